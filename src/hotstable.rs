//! Hot/stable classifier (§4.7).
//!
//! Thresholds are derived per-repo from quantiles over the current
//! distribution rather than hard-coded (§9 "Open question — threshold
//! derivation"): `T_hot30` is the 75th percentile of files with a nonzero
//! 30-day commit count, `T_hot90` likewise over 90-day counts, and
//! `T_stableDays` is a fixed recency-idle floor. These are calibration
//! parameters, not constants — they're recomputed every run and stored in
//! repo metadata so they can be tuned later without a schema change.

use serde::{Deserialize, Serialize};

/// Per-file trailing-window activity the classifier consumes.
#[derive(Debug, Clone)]
pub struct FileActivity {
    pub file_id: u64,
    pub commits_30d: u64,
    pub commits_90d: u64,
    pub days_since_last_change: f64,
    pub total_commits: u64,
}

/// One file's classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub file_id: u64,
    pub is_hot: bool,
    pub is_stable: bool,
    pub is_unknown: bool,
}

/// The derived, repo-wide thresholds, persisted into `repo_meta` under key
/// `hot_stable_thresholds` (§3 supplemented features).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotStableThresholds {
    pub t_hot30: f64,
    pub t_hot90: f64,
    pub t_stable_days: f64,
    pub files_total: usize,
}

/// Default recency-idle cutoff when the repo has no history to derive one
/// from (single-file repos, brand-new clones).
const DEFAULT_STABLE_DAYS: f64 = 180.0;
const HOT_QUANTILE: f64 = 0.75;

fn quantile(mut values: Vec<f64>, q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((values.len() - 1) as f64 * q).round() as usize;
    values[idx]
}

pub fn derive_thresholds(activities: &[FileActivity]) -> HotStableThresholds {
    let nonzero_30d: Vec<f64> = activities
        .iter()
        .filter(|a| a.commits_30d > 0)
        .map(|a| a.commits_30d as f64)
        .collect();
    let nonzero_90d: Vec<f64> = activities
        .iter()
        .filter(|a| a.commits_90d > 0)
        .map(|a| a.commits_90d as f64)
        .collect();

    let recency: Vec<f64> = activities
        .iter()
        .filter(|a| a.total_commits > 0)
        .map(|a| a.days_since_last_change)
        .collect();
    let t_stable_days = if recency.is_empty() {
        DEFAULT_STABLE_DAYS
    } else {
        quantile(recency, HOT_QUANTILE).max(30.0)
    };

    HotStableThresholds {
        t_hot30: quantile(nonzero_30d, HOT_QUANTILE).max(1.0),
        t_hot90: quantile(nonzero_90d, HOT_QUANTILE).max(1.0),
        t_stable_days,
        files_total: activities.len(),
    }
}

pub fn classify(activity: &FileActivity, thresholds: &HotStableThresholds) -> Classification {
    if activity.total_commits == 0 {
        return Classification {
            file_id: activity.file_id,
            is_hot: false,
            is_stable: false,
            is_unknown: true,
        };
    }
    let is_hot = activity.commits_30d as f64 >= thresholds.t_hot30
        || activity.commits_90d as f64 >= thresholds.t_hot90;
    let is_stable = !is_hot && activity.days_since_last_change >= thresholds.t_stable_days;
    Classification {
        file_id: activity.file_id,
        is_hot,
        is_stable,
        is_unknown: false,
    }
}

pub fn classify_all(activities: &[FileActivity]) -> (HotStableThresholds, Vec<Classification>) {
    let thresholds = derive_thresholds(activities);
    let results = activities.iter().map(|a| classify(a, &thresholds)).collect();
    (thresholds, results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(id: u64, c30: u64, c90: u64, days_idle: f64, total: u64) -> FileActivity {
        FileActivity {
            file_id: id,
            commits_30d: c30,
            commits_90d: c90,
            days_since_last_change: days_idle,
            total_commits: total,
        }
    }

    #[test]
    fn zero_commits_is_unknown() {
        let a = activity(1, 0, 0, 0.0, 0);
        let (thresholds, _) = classify_all(std::slice::from_ref(&a));
        let c = classify(&a, &thresholds);
        assert!(c.is_unknown);
        assert!(!c.is_hot);
        assert!(!c.is_stable);
    }

    #[test]
    fn high_recent_activity_is_hot() {
        let activities = vec![
            activity(1, 1, 1, 1.0, 10),
            activity(2, 2, 2, 1.0, 10),
            activity(3, 20, 20, 1.0, 50), // clear outlier, should be hot
        ];
        let (thresholds, results) = classify_all(&activities);
        let hot = results.iter().find(|c| c.file_id == 3).unwrap();
        assert!(hot.is_hot);
        assert!(thresholds.t_hot30 >= 1.0);
    }

    #[test]
    fn idle_file_below_hot_threshold_is_stable() {
        let activities = vec![
            activity(1, 0, 0, 400.0, 5),
            activity(2, 1, 1, 10.0, 5),
            activity(3, 1, 1, 10.0, 5),
        ];
        let (_, results) = classify_all(&activities);
        let idle = results.iter().find(|c| c.file_id == 1).unwrap();
        assert!(idle.is_stable);
        assert!(!idle.is_hot);
    }

    #[test]
    fn hot_takes_precedence_over_stable() {
        // a file that is both very active (hot) and old cannot be stable.
        let activities = vec![
            activity(1, 1, 1, 1.0, 5),
            activity(2, 50, 50, 500.0, 500),
        ];
        let (_, results) = classify_all(&activities);
        let c = results.iter().find(|c| c.file_id == 2).unwrap();
        assert!(c.is_hot);
        assert!(!c.is_stable);
    }
}
