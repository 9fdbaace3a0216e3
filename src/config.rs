//! Analysis configuration (§6 of the coupling-graph specification).
//!
//! Mirrors the teacher's plain-struct-plus-`Default` config pattern
//! (`PackConfig`/`LfsConfig`): one flat, serde-round-trippable struct with
//! named fields, loadable from TOML. Validation is a separate pass run
//! before any pipeline phase starts, returning a field-keyed issue list
//! rather than failing fast on the first problem.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How strictly the log parser treats malformed tokens (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Abort the run on any error-severity issue.
    Strict,
    /// Record the issue, skip the token, keep going.
    #[default]
    Soft,
    /// Relax §4.1 path rules as well as continuing past errors.
    Permissive,
}

/// Changeset grouping strategy (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangesetMode {
    #[default]
    ByCommit,
    ByAuthorTime,
    ByTicketId,
}

/// What to do with a changeset whose file count exceeds
/// `max_changeset_size` (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BulkPolicy {
    #[default]
    Exclude,
    Downweight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingConfig {
    // --- Path/extension filters, applied pre-edge-building ---
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub include_extensions: Vec<String>,
    pub exclude_extensions: Vec<String>,

    // --- Ref & time window ---
    pub since: Option<String>,
    pub until: Option<String>,
    pub window_days: Option<u32>,
    pub git_ref: String,
    pub all_refs: bool,

    // --- Commit-level filters ---
    pub skip_merge_commits: bool,
    pub first_parent_only: bool,
    pub find_renames_threshold: u8,
    pub max_changeset_size: Option<usize>,
    pub bulk_policy: BulkPolicy,

    // --- Changeset grouping ---
    pub changeset_mode: ChangesetMode,
    pub author_time_window_hours: u32,
    pub ticket_id_pattern: Option<String>,
    pub max_logical_changeset_size: usize,

    // --- Edge filtering & metrics ---
    pub min_revisions: usize,
    pub min_cooccurrence: usize,
    pub topk_edges_per_file: Option<usize>,
    pub decay_half_life_days: Option<f64>,

    // --- Component aggregation ---
    pub component_depth: usize,
    pub min_component_cooccurrence: usize,

    // --- Hotspot/hot-stable ---
    pub hotspot_threshold: usize,

    // --- Validation ---
    pub validation_mode: ValidationMode,
    pub max_validation_issues: usize,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            include_extensions: Vec::new(),
            exclude_extensions: Vec::new(),
            since: None,
            until: None,
            window_days: None,
            git_ref: "HEAD".to_string(),
            all_refs: false,
            skip_merge_commits: false,
            first_parent_only: false,
            find_renames_threshold: 60,
            max_changeset_size: Some(50),
            bulk_policy: BulkPolicy::Exclude,
            changeset_mode: ChangesetMode::ByCommit,
            author_time_window_hours: 24,
            ticket_id_pattern: None,
            max_logical_changeset_size: 100,
            min_revisions: 5,
            min_cooccurrence: 5,
            topk_edges_per_file: Some(50),
            decay_half_life_days: None,
            component_depth: 2,
            min_component_cooccurrence: 5,
            hotspot_threshold: 50,
            validation_mode: ValidationMode::Soft,
            max_validation_issues: 200,
        }
    }
}

/// One field-keyed configuration complaint (§7 "Configuration errors").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl CouplingConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(path: &Path) -> std::io::Result<Result<Self, toml::de::Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&text))
    }

    /// Validate all fields up front. Returns every problem found, not just
    /// the first — callers surface the whole list before any work starts.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.component_depth == 0 {
            issues.push(ConfigIssue {
                field: "component_depth".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.find_renames_threshold > 100 {
            issues.push(ConfigIssue {
                field: "find_renames_threshold".into(),
                message: "must be between 0 and 100".into(),
            });
        }
        if self.author_time_window_hours == 0 && self.changeset_mode == ChangesetMode::ByAuthorTime
        {
            issues.push(ConfigIssue {
                field: "author_time_window_hours".into(),
                message: "must be > 0 when changeset_mode is by_author_time".into(),
            });
        }
        if self.changeset_mode == ChangesetMode::ByTicketId {
            match &self.ticket_id_pattern {
                None => issues.push(ConfigIssue {
                    field: "ticket_id_pattern".into(),
                    message: "required when changeset_mode is by_ticket_id".into(),
                }),
                Some(pat) => {
                    if Regex::new(pat).is_err() {
                        issues.push(ConfigIssue {
                            field: "ticket_id_pattern".into(),
                            message: format!("not a valid regex: {pat}"),
                        });
                    }
                }
            }
        }
        if let Some(half_life) = self.decay_half_life_days {
            if !(half_life > 0.0) {
                issues.push(ConfigIssue {
                    field: "decay_half_life_days".into(),
                    message: "must be > 0 when set".into(),
                });
            }
        }
        if let Some(k) = self.topk_edges_per_file {
            if k == 0 {
                issues.push(ConfigIssue {
                    field: "topk_edges_per_file".into(),
                    message: "must be > 0 when set; omit the option to keep all edges".into(),
                });
            }
        }
        for (field, patterns) in [
            ("include_paths", &self.include_paths),
            ("exclude_paths", &self.exclude_paths),
        ] {
            for pat in patterns {
                if Glob::new(pat).is_err() {
                    issues.push(ConfigIssue {
                        field: field.into(),
                        message: format!("not a valid glob: {pat}"),
                    });
                }
            }
        }

        issues
    }

    /// Effective `since` bound: the explicit `since`, or `window_days`
    /// resolved against `now`.
    pub fn effective_since(&self, now: chrono::DateTime<chrono::Utc>) -> Option<String> {
        if let Some(since) = &self.since {
            return Some(since.clone());
        }
        self.window_days.map(|days| {
            (now - chrono::Duration::days(i64::from(days)))
                .format("%Y-%m-%d")
                .to_string()
        })
    }

    pub(crate) fn compiled_path_filters(&self) -> Result<PathFilters, globset::Error> {
        PathFilters::compile(self)
    }
}

/// Compiled include/exclude glob and extension filters, applied pre-edge-building.
pub(crate) struct PathFilters {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    include_ext: Vec<String>,
    exclude_ext: Vec<String>,
}

impl PathFilters {
    fn compile(config: &CouplingConfig) -> Result<Self, globset::Error> {
        let build = |patterns: &[String]| -> Result<Option<GlobSet>, globset::Error> {
            if patterns.is_empty() {
                return Ok(None);
            }
            let mut builder = GlobSetBuilder::new();
            for pattern in patterns {
                builder.add(Glob::new(pattern)?);
            }
            Ok(Some(builder.build()?))
        };

        Ok(Self {
            include: build(&config.include_paths)?,
            exclude: build(&config.exclude_paths)?,
            include_ext: config.include_extensions.clone(),
            exclude_ext: config.exclude_extensions.clone(),
        })
    }

    pub(crate) fn is_allowed(&self, path: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(path) {
                return false;
            }
        }
        if let Some(include) = &self.include {
            if !include.is_match(path) {
                return false;
            }
        }
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if self.exclude_ext.iter().any(|e| e.trim_start_matches('.') == ext) {
            return false;
        }
        if !self.include_ext.is_empty()
            && !self
                .include_ext
                .iter()
                .any(|e| e.trim_start_matches('.') == ext)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        assert!(CouplingConfig::default().validate().is_empty());
    }

    #[test]
    fn ticket_mode_requires_pattern() {
        let mut cfg = CouplingConfig::default();
        cfg.changeset_mode = ChangesetMode::ByTicketId;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "ticket_id_pattern"));
    }

    #[test]
    fn bad_glob_is_flagged() {
        let mut cfg = CouplingConfig::default();
        cfg.include_paths.push("[".to_string());
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "include_paths"));
    }

    #[test]
    fn path_filters_respect_extensions() {
        let mut cfg = CouplingConfig::default();
        cfg.include_extensions.push("rs".to_string());
        let filters = cfg.compiled_path_filters().unwrap();
        assert!(filters.is_allowed("src/lib.rs"));
        assert!(!filters.is_allowed("README.md"));
    }
}
