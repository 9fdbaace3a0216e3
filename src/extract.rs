//! History extractor (§4.4): drives one pass of the log parser, builds the
//! file identity index as it goes, and materializes commits/changes into
//! the columnar store plus per-file/repo aggregates into the relational
//! store.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::CouplingConfig;
use crate::error::Result;
use crate::gitlog::{self, Change, CommitHeader, LogOptions, Severity};
use crate::hotstable::{self, FileActivity};
use crate::identity::IdentityIndex;
use crate::store::columnar::{ChangeRecord, ColumnarWriter, CommitRecord};
use crate::store::relational::{EntityMetadata, RelationalStore, ValidationLogRow};
use crate::validate;

const DEFAULT_PROGRESS_INTERVAL: u64 = 100;
const RECENT_30D_SECS: i64 = 30 * 86_400;
const RECENT_90D_SECS: i64 = 90 * 86_400;

#[derive(Debug, Clone, Default)]
struct FileAggregate {
    commit_count: u64,
    authors: HashSet<String>,
    lines_added: u64,
    lines_deleted: u64,
    first_ts: Option<i64>,
    last_ts: Option<i64>,
    commits_30d: u64,
    commits_90d: u64,
}

/// Repo-wide totals materialized alongside per-file metadata (§4.4 outputs).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RepoSummary {
    pub total_files: u64,
    pub total_commits: u64,
    pub distinct_authors: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub hotspot_count: u64,
}

/// What a completed extraction pass reports back to its caller.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub processed_commits: u64,
    pub total_commits: Option<u64>,
    pub repo_summary: RepoSummary,
    pub validation_issue_counts: HashMap<String, u64>,
}

fn build_log_options(config: &CouplingConfig, since: Option<String>) -> LogOptions {
    LogOptions {
        git_ref: Some(config.git_ref.clone()),
        all_refs: config.all_refs,
        since,
        until: config.until.clone(),
        first_parent_only: config.first_parent_only,
        find_renames_threshold: config.find_renames_threshold,
    }
}

/// Run a full extraction pass against `repo`, using `now_ts` (unix seconds)
/// as the reference point for 30d/90d recency windows — passed in rather
/// than read from the clock so a caller can reproduce a run exactly.
#[allow(clippy::too_many_arguments)]
pub fn run_extraction(
    repo: &Path,
    config: &CouplingConfig,
    run_id: &str,
    now_ts: i64,
    relational: &mut RelationalStore,
    columnar: &mut ColumnarWriter,
    on_progress: impl FnMut(u64, Option<u64>),
    is_cancelled: impl Fn() -> bool,
) -> Result<ExtractionOutcome> {
    let filters = config
        .compiled_path_filters()
        .map_err(|e| crate::error::CouplingError::ConfigError(format!("invalid path filter: {e}")))?;

    let total_commits = gitlog::count_commits(repo, &config.git_ref).ok();
    let since = config.effective_since(chrono::DateTime::from_timestamp(now_ts, 0).unwrap_or_default());
    let opts = build_log_options(config, since);
    let stream = gitlog::iter_log(repo, &opts, config.validation_mode)?;

    let head_paths: HashSet<String> = gitlog::list_files_at_ref(repo, "HEAD")
        .map(|v| v.into_iter().collect())
        .unwrap_or_default();

    info!(repo = %repo.display(), "starting history extraction");

    extract_from_stream(
        stream,
        config,
        run_id,
        now_ts,
        relational,
        columnar,
        total_commits,
        &head_paths,
        &filters,
        on_progress,
        is_cancelled,
    )
}

#[allow(clippy::too_many_arguments)]
fn extract_from_stream(
    commits: impl Iterator<Item = Result<(CommitHeader, Vec<Change>)>>,
    config: &CouplingConfig,
    run_id: &str,
    now_ts: i64,
    relational: &mut RelationalStore,
    columnar: &mut ColumnarWriter,
    total_commits: Option<u64>,
    head_paths: &HashSet<String>,
    filters: &crate::config::PathFilters,
    mut on_progress: impl FnMut(u64, Option<u64>),
    is_cancelled: impl Fn() -> bool,
) -> Result<ExtractionOutcome> {
    let mut identity = IdentityIndex::new();
    let aggregates: DashMap<u64, FileAggregate> = DashMap::new();

    let mut processed: u64 = 0;
    let mut issues_logged: u64 = 0;
    let mut distinct_authors: HashSet<String> = HashSet::new();
    let progress_interval = DEFAULT_PROGRESS_INTERVAL;

    for item in commits {
        let (header, changes) = item?;
        distinct_authors.insert(header.author_email.clone());

        for issue in &header.validation_issues {
            if issues_logged >= config.max_validation_issues as u64 {
                break;
            }
            relational.log_validation_issue(&ValidationLogRow {
                run_id: run_id.to_string(),
                commit_oid: Some(header.commit_oid.clone()),
                issue_type: issue.issue_type.as_str().to_string(),
                severity: severity_str(issue.severity).to_string(),
                message: issue.message.clone(),
            })?;
            issues_logged += 1;
        }

        let skip_bulk = config
            .max_changeset_size
            .is_some_and(|max| changes.len() > max);

        if skip_bulk {
            debug!(commit = %header.commit_oid, count = changes.len(), "bulk commit excluded from edges/file stats");
        } else {
            apply_changes(
                &header,
                &changes,
                &mut identity,
                &aggregates,
                columnar,
                filters,
                now_ts,
            );
        }

        columnar.push_commit(CommitRecord {
            commit_oid: header.commit_oid.clone(),
            parent_oids: header.parent_oids.clone(),
            author_name: header.author_name.clone(),
            author_email: header.author_email.clone(),
            authored_ts: header.authored_ts,
            committer_ts: header.committer_ts,
            subject: header.subject.clone(),
            is_merge: header.is_merge(),
            change_count: changes.len() as u32,
        });

        processed += 1;
        if processed % progress_interval == 0 {
            on_progress(processed, total_commits);
            if is_cancelled() {
                return Err(crate::error::CouplingError::Cancelled);
            }
        }
    }
    on_progress(processed, total_commits);

    identity.mark_head(head_paths);

    for (id, path, exists) in identity.snapshot() {
        relational.upsert_entity(id, &path, exists)?;
        for seg in identity.lineage_of(id) {
            relational.insert_lineage_segment(id, &seg.path, &seg.start_commit, seg.end_commit.as_deref())?;
        }
    }

    let activities: Vec<FileActivity> = aggregates
        .iter()
        .map(|entry| {
            let (&id, agg) = (entry.key(), entry.value());
            FileActivity {
                file_id: id,
                commits_30d: agg.commits_30d,
                commits_90d: agg.commits_90d,
                days_since_last_change: agg
                    .last_ts
                    .map(|t| ((now_ts - t) as f64 / 86_400.0).max(0.0))
                    .unwrap_or(0.0),
                total_commits: agg.commit_count,
            }
        })
        .collect();
    let (thresholds, classifications) = hotstable::classify_all(&activities);
    let class_by_id: HashMap<u64, &hotstable::Classification> =
        classifications.iter().map(|c| (c.file_id, c)).collect();

    let mut lines_added_total = 0u64;
    let mut lines_deleted_total = 0u64;
    let mut hotspot_count = 0u64;

    for entry in aggregates.iter() {
        let (&id, agg) = (entry.key(), entry.value());
        let class = class_by_id.get(&id);
        let hot_stable_class = class.and_then(|c| {
            if c.is_hot {
                Some("hot".to_string())
            } else if c.is_stable {
                Some("stable".to_string())
            } else {
                None
            }
        });
        relational.upsert_entity_metadata(
            id,
            &EntityMetadata {
                total_commits: agg.commit_count,
                author_count: agg.authors.len() as u64,
                lines_added: agg.lines_added,
                lines_deleted: agg.lines_deleted,
                first_commit_ts: agg.first_ts,
                last_commit_ts: agg.last_ts,
                commits_30d: agg.commits_30d,
                commits_90d: agg.commits_90d,
                hot_stable_class,
            },
        )?;
        lines_added_total += agg.lines_added;
        lines_deleted_total += agg.lines_deleted;
        if agg.commit_count as usize >= config.hotspot_threshold {
            hotspot_count += 1;
        }
    }

    let thresholds_json = serde_json::to_string(&thresholds).unwrap_or_default();
    relational.set_repo_meta("hot_stable_thresholds", &thresholds_json)?;

    let repo_summary = RepoSummary {
        total_files: identity.entity_count() as u64,
        total_commits: processed,
        distinct_authors: distinct_authors.len() as u64,
        lines_added: lines_added_total,
        lines_deleted: lines_deleted_total,
        hotspot_count,
    };
    let summary_json = serde_json::to_string(&repo_summary).unwrap_or_default();
    relational.set_repo_meta("repo_summary", &summary_json)?;

    if issues_logged >= config.max_validation_issues as u64 {
        warn!(run_id, cap = config.max_validation_issues, "validation issue log capped");
    }

    let validation_issue_counts = relational.validation_issue_counts(run_id)?;
    info!(processed, entities = repo_summary.total_files, "extraction complete");

    Ok(ExtractionOutcome {
        processed_commits: processed,
        total_commits,
        repo_summary,
        validation_issue_counts,
    })
}

fn apply_changes(
    header: &CommitHeader,
    changes: &[Change],
    identity: &mut IdentityIndex,
    aggregates: &DashMap<u64, FileAggregate>,
    columnar: &mut ColumnarWriter,
    filters: &crate::config::PathFilters,
    now_ts: i64,
) {
    let age_secs = now_ts - header.committer_ts;

    for change in changes {
        if !validate::is_valid_path(&change.path, false) {
            continue;
        }
        if let Some(old) = &change.old_path {
            if !validate::is_valid_path(old, false) {
                continue;
            }
        }
        if !filters.is_allowed(&change.path) {
            continue;
        }

        let file_id = if validate::is_rename_or_copy(&change.status) {
            let old_path = change.old_path.as_deref().unwrap_or(&change.path);
            identity.rename(old_path, &change.path, &header.commit_oid)
        } else {
            identity.resolve_or_create(&change.path, &header.commit_oid)
        };
        let old_file_id = change.old_path.as_deref().and_then(|p| identity.id_of(p));

        columnar.push_change(ChangeRecord {
            commit_oid: header.commit_oid.clone(),
            file_id,
            status: change.status.clone(),
            old_file_id,
        });

        let mut agg = aggregates.entry(file_id).or_default();
        agg.commit_count += 1;
        agg.authors.insert(header.author_email.clone());
        agg.first_ts = Some(agg.first_ts.map_or(header.committer_ts, |t| t.min(header.committer_ts)));
        agg.last_ts = Some(agg.last_ts.map_or(header.committer_ts, |t| t.max(header.committer_ts)));
        if age_secs <= RECENT_30D_SECS {
            agg.commits_30d += 1;
        }
        if age_secs <= RECENT_90D_SECS {
            agg.commits_90d += 1;
        }
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Error => "error",
        Severity::Warning => "warning",
    }
}
