//! Streaming `git log` parser (§4.2) and remote-metadata helpers (§6).
//!
//! The parser never materializes the whole log: it pulls NUL-delimited
//! tokens off the subprocess's stdout one at a time and yields a completed
//! `(CommitHeader, Vec<Change>)` as soon as the next commit marker (or EOF)
//! proves the previous one is done.

mod parser;
pub mod remote;

pub use parser::{
    CommitHeader, GitLogStream, IssueType, LogOptions, ParseState, Severity, ValidationIssue,
    iter_log,
};

use std::path::Path;
use std::process::Command;

use crate::error::{CouplingError, Result};

/// The marker token prefixed to every commit header. Chosen to be
/// vanishingly unlikely to appear inside an actual commit subject/author
/// field, matching the original implementation's `__CI_COMMIT__`.
pub const COMMIT_MARKER: &str = "__CI_COMMIT__";

/// A single accepted status-bearing change within one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub status: String,
    pub path: String,
    pub old_path: Option<String>,
}

fn run_git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .map_err(|e| CouplingError::SubprocessError(format!("spawning git {args:?}: {e}")))?;
    if !output.status.success() {
        return Err(CouplingError::SubprocessError(format!(
            "git {args:?} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `git rev-parse HEAD` — the current HEAD commit id.
pub fn get_head_oid(repo: &Path) -> Result<String> {
    run_git(repo, &["rev-parse", "HEAD"])
}

/// `git rev-list --count <ref>` — a cheap upper bound used to size progress
/// reporting; callers should not treat it as exact once `since`/`until` are
/// also applied.
pub fn count_commits(repo: &Path, git_ref: &str) -> Result<u64> {
    let out = run_git(repo, &["rev-list", "--count", git_ref])?;
    out.parse()
        .map_err(|_| CouplingError::ParseError(format!("non-numeric rev-list --count: {out}")))
}

/// `git ls-tree -r --name-only <ref>` — paths present at a given ref,
/// used by the identity index's head-sync step.
pub fn list_files_at_ref(repo: &Path, git_ref: &str) -> Result<Vec<String>> {
    let out = run_git(repo, &["ls-tree", "-r", "--name-only", git_ref])?;
    Ok(out.lines().map(str::to_string).collect())
}
