//! Task runner (§4.10): drives one analysis invocation through its stages,
//! persists a pollable task row, and checks a cooperative abort flag
//! between phases and between extraction batches.
//!
//! Mirrors the teacher's `Task`/`ActorRef` state-machine shape
//! (`internal/object/ai_task.rs`) but scoped to this crate's four fixed
//! stages instead of an open-ended goal graph.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::changeset::{self, CommitInput};
use crate::config::CouplingConfig;
use crate::edges;
use crate::error::{CouplingError, Result};
use crate::extract;
use crate::gitlog;
use crate::store::columnar::ColumnarWriter;
use crate::store::relational::{RelationalStore, TaskRow};

/// The four stage labels a task passes through, in order (§4.10 point 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mirroring,
    ExtractingHistory,
    BuildingEdges,
    Completed,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Mirroring => "mirroring",
            Stage::ExtractingHistory => "extracting_history",
            Stage::BuildingEdges => "building_edges",
            Stage::Completed => "completed",
        }
    }
}

const MIRROR_DONE: f64 = 0.05;
const EXTRACT_START: f64 = 0.05;
const EXTRACT_DONE: f64 = 0.75;
const EDGES_DONE: f64 = 0.98;

/// The metrics blob written alongside a completed task (§4.10 point 3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub processed_commits: u64,
    pub total_commits: Option<u64>,
    pub validation_issue_counts: HashMap<String, u64>,
    pub git_head_oid: Option<String>,
    pub edge_count: usize,
    pub component_edge_count: usize,
}

/// A task-level cooperative abort flag (§5 "Cancellation & timeouts").
/// Cheaply cloneable; every clone shares the same underlying flag, so a
/// caller can hand one end to a signal handler and the other to the runner.
#[derive(Debug, Clone)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Notified on every task-row transition. Production wires this to the
/// relational store so a separate process can poll; tests can record
/// in-memory instead of round-tripping through sqlite.
pub trait ProgressSink {
    fn record(&mut self, row: &TaskRow);
}

/// Keeps every recorded row in order, for asserting a run's progression.
#[derive(Debug, Default)]
pub struct InMemorySink {
    pub rows: Vec<TaskRow>,
}

impl ProgressSink for InMemorySink {
    fn record(&mut self, row: &TaskRow) {
        self.rows.push(row.clone());
    }
}

/// Persists every update into `analysis_tasks` (§4.10 point 5, "exposes a
/// progress endpoint that polls the task row").
pub struct StoreSink<'a> {
    store: &'a mut RelationalStore,
}

impl<'a> StoreSink<'a> {
    pub fn new(store: &'a mut RelationalStore) -> Self {
        Self { store }
    }
}

impl ProgressSink for StoreSink<'_> {
    fn record(&mut self, row: &TaskRow) {
        if let Err(e) = self.store.upsert_task(row) {
            warn!(task_id = %row.task_id, error = %e, "failed to persist task progress");
        }
    }
}

/// A fresh task id, matching the teacher's `Uuid::now_v7()` convention for
/// entity ids (e.g. `ObjectBase::object_id`).
pub fn new_task_id() -> String {
    Uuid::now_v7().to_string()
}

/// Run one analysis invocation end to end: mirroring check, history
/// extraction, edge building. `now_fn` supplies the current unix timestamp
/// for `created_at`/`updated_at` stamps and for extraction's recency
/// windows — injected rather than read from the clock so a run is
/// reproducible (same convention as [`crate::extract::run_extraction`]).
///
/// On success the returned row's `state` is `"completed"`; on cancellation
/// or any stage error it is `"failed"` with `error` set, and partial
/// artifacts already written by earlier stages are left intact (§4.10
/// point 4).
#[allow(clippy::too_many_arguments)]
pub fn run_task(
    task_id: &str,
    repo: &Path,
    config: &CouplingConfig,
    now_fn: impl Fn() -> i64,
    abort: &AbortFlag,
    relational: &mut RelationalStore,
    columnar: &mut ColumnarWriter,
    sink: &mut dyn ProgressSink,
) -> Result<TaskRow> {
    let created_at = now_fn();
    let mut row = TaskRow {
        task_id: task_id.to_string(),
        state: "pending".to_string(),
        stage: None,
        progress: 0.0,
        processed_commits: 0,
        total_commits: None,
        entity_count: 0,
        relationship_count: 0,
        error: None,
        metrics_json: None,
        created_at,
        updated_at: created_at,
    };
    sink.record(&row);

    match run_stages(task_id, repo, config, &now_fn, abort, relational, columnar, sink, &mut row) {
        Ok(metrics) => {
            row.state = "completed".to_string();
            row.stage = Some(Stage::Completed.as_str().to_string());
            row.progress = 1.0;
            row.metrics_json = serde_json::to_string(&metrics).ok();
            row.updated_at = now_fn();
            sink.record(&row);
            info!(task_id, "task completed");
            Ok(row)
        }
        Err(e) => {
            row.state = "failed".to_string();
            row.error = Some(e.to_string());
            row.updated_at = now_fn();
            sink.record(&row);
            warn!(task_id, error = %e, "task failed");
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_stages(
    task_id: &str,
    repo: &Path,
    config: &CouplingConfig,
    now_fn: &impl Fn() -> i64,
    abort: &AbortFlag,
    relational: &mut RelationalStore,
    columnar: &mut ColumnarWriter,
    sink: &mut dyn ProgressSink,
    row: &mut TaskRow,
) -> Result<TaskMetrics> {
    row.state = "running".to_string();
    row.stage = Some(Stage::Mirroring.as_str().to_string());
    row.progress = 0.0;
    row.updated_at = now_fn();
    sink.record(row);
    if abort.is_cancelled() {
        return Err(CouplingError::Cancelled);
    }

    // The mirror clone itself is maintained by a separate component (§6);
    // this stage only confirms the local checkout is readable and captures
    // the HEAD id for the final metrics blob.
    let git_head_oid = gitlog::get_head_oid(repo).ok();
    row.progress = MIRROR_DONE;
    row.updated_at = now_fn();
    sink.record(row);
    if abort.is_cancelled() {
        return Err(CouplingError::Cancelled);
    }

    row.stage = Some(Stage::ExtractingHistory.as_str().to_string());
    sink.record(row);

    let extraction = extract::run_extraction(
        repo,
        config,
        task_id,
        now_fn(),
        relational,
        columnar,
        |processed, total| {
            row.processed_commits = processed;
            row.total_commits = total;
            let frac = total
                .filter(|&t| t > 0)
                .map(|t| (processed as f64 / t as f64).min(1.0))
                .unwrap_or(0.0);
            row.progress = EXTRACT_START + (EXTRACT_DONE - EXTRACT_START) * frac;
            row.updated_at = now_fn();
            sink.record(row);
        },
        || abort.is_cancelled(),
    )?;

    row.processed_commits = extraction.processed_commits;
    row.total_commits = extraction.total_commits;
    row.progress = EXTRACT_DONE;
    row.updated_at = now_fn();
    sink.record(row);
    if abort.is_cancelled() {
        return Err(CouplingError::Cancelled);
    }

    row.stage = Some(Stage::BuildingEdges.as_str().to_string());
    sink.record(row);

    let commit_inputs = commit_inputs_from_columnar(columnar);
    let changesets = changeset::build_changesets(&commit_inputs, config)?;
    let paths_by_id: HashMap<u64, String> = relational
        .entities_snapshot()?
        .into_iter()
        .map(|(id, path, _)| (id, path))
        .collect();
    let latest_ts = commit_inputs.iter().map(|c| c.timestamp).max().unwrap_or_else(now_fn);
    let build = edges::build_edges(&changesets, &paths_by_id, config, latest_ts);
    relational.replace_edges(&build.edges)?;
    relational.replace_component_edges(&build.component_edges)?;

    row.entity_count = relational.entity_count()?;
    row.relationship_count = relational.relationship_count()?;
    row.progress = EDGES_DONE;
    row.updated_at = now_fn();
    sink.record(row);

    Ok(TaskMetrics {
        processed_commits: extraction.processed_commits,
        total_commits: extraction.total_commits,
        validation_issue_counts: extraction.validation_issue_counts,
        git_head_oid,
        edge_count: build.edges.len(),
        component_edge_count: build.component_edges.len(),
    })
}

/// Reconstitute the grouper's input shape from the rows the extractor
/// already staged in the columnar writer, rather than re-reading from disk.
fn commit_inputs_from_columnar(columnar: &ColumnarWriter) -> Vec<CommitInput> {
    let mut files_by_commit: HashMap<&str, Vec<u64>> = HashMap::new();
    for change in columnar.changes() {
        files_by_commit
            .entry(change.commit_oid.as_str())
            .or_default()
            .push(change.file_id);
    }
    columnar
        .commits()
        .iter()
        .map(|c| CommitInput {
            commit_oid: c.commit_oid.clone(),
            author_email: c.author_email.clone(),
            timestamp: c.committer_ts,
            subject: c.subject.clone(),
            file_ids: files_by_commit.get(c.commit_oid.as_str()).cloned().unwrap_or_default(),
            is_merge: c.is_merge,
        })
        .collect()
}
