//! Cluster insights (churn, internal coupling, top hot files/commits/
//! authors) and snapshot drift comparison (§4.8, §8 scenario F).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::EdgeInput;

/// Minimal per-file stats an insight calculation needs.
#[derive(Debug, Clone)]
pub struct FileStat {
    pub file_id: u64,
    pub total_commits: u64,
    pub is_hot: bool,
}

/// One commit's touch record, scoped to the files it changed.
#[derive(Debug, Clone)]
pub struct CommitTouch {
    pub commit_oid: String,
    pub author_email: String,
    pub file_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterInsights {
    pub total_churn: u64,
    pub avg_internal_coupling: f64,
    pub top_hot_files: Vec<u64>,
    pub top_commits: Vec<String>,
    pub top_authors: Vec<String>,
}

const TOP_N: usize = 5;

pub fn calculate_cluster_insights(
    members: &[u64],
    edges: &[EdgeInput],
    file_stats: &HashMap<u64, FileStat>,
    commits: &[CommitTouch],
) -> ClusterInsights {
    let member_set: HashSet<u64> = members.iter().copied().collect();

    let total_churn: u64 = members
        .iter()
        .filter_map(|id| file_stats.get(id))
        .map(|s| s.total_commits)
        .sum();

    let internal: Vec<f64> = edges
        .iter()
        .filter(|e| member_set.contains(&e.a) && member_set.contains(&e.b))
        .map(|e| e.weight)
        .collect();
    let avg_internal_coupling = if internal.is_empty() {
        0.0
    } else {
        internal.iter().sum::<f64>() / internal.len() as f64
    };

    let mut hot: Vec<&FileStat> = members
        .iter()
        .filter_map(|id| file_stats.get(id))
        .filter(|s| s.is_hot)
        .collect();
    hot.sort_by(|a, b| b.total_commits.cmp(&a.total_commits).then(a.file_id.cmp(&b.file_id)));
    let top_hot_files = hot.into_iter().take(TOP_N).map(|s| s.file_id).collect();

    let mut commit_touches: Vec<(&str, usize)> = commits
        .iter()
        .map(|c| (c.commit_oid.as_str(), c.file_ids.iter().filter(|f| member_set.contains(f)).count()))
        .filter(|&(_, n)| n > 0)
        .collect();
    commit_touches.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let top_commits = commit_touches.into_iter().take(TOP_N).map(|(oid, _)| oid.to_string()).collect();

    let mut author_counts: HashMap<&str, u64> = HashMap::new();
    for c in commits {
        if c.file_ids.iter().any(|f| member_set.contains(f)) {
            *author_counts.entry(c.author_email.as_str()).or_insert(0) += 1;
        }
    }
    let mut authors: Vec<(&str, u64)> = author_counts.into_iter().collect();
    authors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    let top_authors = authors.into_iter().take(TOP_N).map(|(a, _)| a.to_string()).collect();

    ClusterInsights {
        total_churn,
        avg_internal_coupling,
        top_hot_files,
        top_commits,
        top_authors,
    }
}

/// Drift classification for one old cluster against its best match in the
/// new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DriftStatus {
    Stable,
    Drifted,
    Dissolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterFlow {
    pub old_index: usize,
    pub new_index: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTransition {
    pub old_index: usize,
    pub best_new_index: Option<usize>,
    pub overlap_ratio: f64,
    pub status: DriftStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComparisonSummary {
    pub stable: usize,
    pub drifted: usize,
    pub dissolved: usize,
    pub new: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotComparison {
    pub flows: Vec<ClusterFlow>,
    pub transitions: Vec<ClusterTransition>,
    /// Indices of new clusters never chosen as anyone's best match.
    pub new_cluster_indices: Vec<usize>,
    pub summary: ComparisonSummary,
}

const STABLE_THRESHOLD: f64 = 0.8;

/// Compare an old and a new clustering (§8 invariant 12: every old cluster
/// appears exactly once; every new cluster appears at least once, matched
/// or tagged `new`).
pub fn compare_clusters(old: &[Vec<u64>], new: &[Vec<u64>]) -> SnapshotComparison {
    let new_sets: Vec<HashSet<u64>> = new.iter().map(|c| c.iter().copied().collect()).collect();

    let mut flows = Vec::new();
    let mut transitions = Vec::new();
    let mut matched_new: HashSet<usize> = HashSet::new();

    for (oi, old_cluster) in old.iter().enumerate() {
        let old_set: HashSet<u64> = old_cluster.iter().copied().collect();
        let mut best: Option<(usize, usize)> = None; // (new_index, overlap)

        for (ni, new_set) in new_sets.iter().enumerate() {
            let overlap = old_set.intersection(new_set).count();
            if overlap > 0 {
                flows.push(ClusterFlow { old_index: oi, new_index: ni, overlap });
            }
            if best.is_none_or(|(_, bo)| overlap > bo) {
                best = Some((ni, overlap));
            }
        }

        let (best_new, overlap) = best.unwrap_or((0, 0));
        if overlap == 0 {
            transitions.push(ClusterTransition {
                old_index: oi,
                best_new_index: None,
                overlap_ratio: 0.0,
                status: DriftStatus::Dissolved,
            });
            continue;
        }

        let denom = old_cluster.len().max(new[best_new].len()) as f64;
        let ratio = overlap as f64 / denom;
        matched_new.insert(best_new);
        let status = if ratio > STABLE_THRESHOLD {
            DriftStatus::Stable
        } else {
            DriftStatus::Drifted
        };
        transitions.push(ClusterTransition {
            old_index: oi,
            best_new_index: Some(best_new),
            overlap_ratio: ratio,
            status,
        });
    }

    let new_cluster_indices: Vec<usize> = (0..new.len()).filter(|i| !matched_new.contains(i)).collect();

    let summary = ComparisonSummary {
        stable: transitions.iter().filter(|t| t.status == DriftStatus::Stable).count(),
        drifted: transitions.iter().filter(|t| t.status == DriftStatus::Drifted).count(),
        dissolved: transitions.iter().filter(|t| t.status == DriftStatus::Dissolved).count(),
        new: new_cluster_indices.len(),
    };

    SnapshotComparison {
        flows,
        transitions,
        new_cluster_indices,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_f_snapshot_drift() {
        let old = vec![vec![1, 2, 3, 4, 5], vec![6, 7, 8]];
        let new = vec![vec![1, 2, 3], vec![4, 5, 8], vec![9, 10]];
        let cmp = compare_clusters(&old, &new);
        assert_eq!(cmp.summary.stable, 0);
        assert_eq!(cmp.summary.drifted, 2);
        assert_eq!(cmp.summary.dissolved, 0);
        assert_eq!(cmp.summary.new, 1);

        let a_transition = &cmp.transitions[0];
        assert_eq!(a_transition.best_new_index, Some(0));
        assert!((a_transition.overlap_ratio - 0.6).abs() < 1e-9);

        let b_transition = &cmp.transitions[1];
        assert_eq!(b_transition.best_new_index, Some(1));
        assert!((b_transition.overlap_ratio - (1.0 / 3.0)).abs() < 1e-9);

        assert_eq!(cmp.new_cluster_indices, vec![2]);
    }

    #[test]
    fn every_old_cluster_appears_exactly_once() {
        let old = vec![vec![1, 2], vec![3, 4], vec![5]];
        let new = vec![vec![1, 2, 3]];
        let cmp = compare_clusters(&old, &new);
        assert_eq!(cmp.transitions.len(), old.len());
    }

    #[test]
    fn completely_disjoint_old_cluster_is_dissolved() {
        let old = vec![vec![100, 101]];
        let new = vec![vec![1, 2]];
        let cmp = compare_clusters(&old, &new);
        assert_eq!(cmp.transitions[0].status, DriftStatus::Dissolved);
    }

    #[test]
    fn insights_compute_churn_and_top_lists() {
        let members = vec![1u64, 2];
        let edges = vec![EdgeInput { a: 1, b: 2, weight: 0.5 }];
        let mut stats = HashMap::new();
        stats.insert(1, FileStat { file_id: 1, total_commits: 10, is_hot: true });
        stats.insert(2, FileStat { file_id: 2, total_commits: 5, is_hot: false });
        let commits = vec![
            CommitTouch { commit_oid: "c1".into(), author_email: "a@x".into(), file_ids: vec![1, 2] },
            CommitTouch { commit_oid: "c2".into(), author_email: "b@x".into(), file_ids: vec![1] },
        ];
        let insights = calculate_cluster_insights(&members, &edges, &stats, &commits);
        assert_eq!(insights.total_churn, 15);
        assert_eq!(insights.avg_internal_coupling, 0.5);
        assert_eq!(insights.top_hot_files, vec![1]);
        assert_eq!(insights.top_commits, vec!["c1".to_string(), "c2".to_string()]);
    }

    // §8 invariant 12: every old cluster gets exactly one transition; every
    // new cluster is either someone's best match or listed as new.
    #[quickcheck_macros::quickcheck]
    fn prop_compare_clusters_closure(old_raw: Vec<Vec<u8>>, new_raw: Vec<Vec<u8>>) -> quickcheck::TestResult {
        if old_raw.len() > 10 || new_raw.len() > 10 {
            return quickcheck::TestResult::discard();
        }
        let old: Vec<Vec<u64>> = old_raw.iter().map(|c| c.iter().map(|&b| b as u64).collect()).collect();
        let new: Vec<Vec<u64>> = new_raw.iter().map(|c| c.iter().map(|&b| b as u64).collect()).collect();
        let cmp = compare_clusters(&old, &new);

        if cmp.transitions.len() != old.len() {
            return quickcheck::TestResult::failed();
        }
        let matched_new: HashSet<usize> = cmp.transitions.iter().filter_map(|t| t.best_new_index).collect();
        for i in 0..new.len() {
            if !matched_new.contains(&i) && !cmp.new_cluster_indices.contains(&i) {
                return quickcheck::TestResult::failed();
            }
        }
        quickcheck::TestResult::passed()
    }
}
