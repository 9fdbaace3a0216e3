//! Columnar half of the artifact store: the `commits.*` / `changes.*`
//! files (§6 "Persisted state layout"). Whole-buffer bincode encoding
//! wrapped in a Zstandard frame — there's no need for a streaming/chunked
//! format since a run's commit and change tables are written once, at the
//! end of extraction, and read back whole.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CouplingError, Result};

const ZSTD_LEVEL: i32 = 9;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitRecord {
    pub commit_oid: String,
    pub parent_oids: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub authored_ts: i64,
    pub committer_ts: i64,
    pub subject: String,
    pub is_merge: bool,
    pub change_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub commit_oid: String,
    pub file_id: u64,
    pub status: String,
    pub old_file_id: Option<u64>,
}

/// Accumulates rows in memory during extraction, flushed once at the end
/// of the pass.
#[derive(Debug, Default)]
pub struct ColumnarWriter {
    commits: Vec<CommitRecord>,
    changes: Vec<ChangeRecord>,
}

impl ColumnarWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_commit(&mut self, record: CommitRecord) {
        self.commits.push(record);
    }

    pub fn push_change(&mut self, record: ChangeRecord) {
        self.changes.push(record);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    pub fn write_commits(&self, path: &Path) -> Result<()> {
        write_frame(path, &self.commits)
    }

    pub fn write_changes(&self, path: &Path) -> Result<()> {
        write_frame(path, &self.changes)
    }
}

fn write_frame<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let encoded = bincode::serialize(rows)?;
    let compressed = zstd::encode_all(&encoded[..], ZSTD_LEVEL)
        .map_err(|e| CouplingError::Codec(format!("zstd encode: {e}")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, compressed)?;
    Ok(())
}

fn read_frame<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let compressed = fs::read(path)?;
    let encoded = zstd::decode_all(&compressed[..])
        .map_err(|e| CouplingError::Codec(format!("zstd decode: {e}")))?;
    let rows = bincode::deserialize(&encoded)?;
    Ok(rows)
}

pub fn read_commits(path: &Path) -> Result<Vec<CommitRecord>> {
    read_frame(path)
}

pub fn read_changes(path: &Path) -> Result<Vec<ChangeRecord>> {
    read_frame(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn commits_roundtrip_through_compressed_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commits.bin.zst");

        let mut writer = ColumnarWriter::new();
        writer.push_commit(CommitRecord {
            commit_oid: "a".repeat(40),
            parent_oids: vec!["b".repeat(40)],
            author_name: "Alice".into(),
            author_email: "alice@example.com".into(),
            authored_ts: 1000,
            committer_ts: 1000,
            subject: "init".into(),
            is_merge: false,
            change_count: 2,
        });
        writer.write_commits(&path).unwrap();

        let read_back = read_commits(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].subject, "init");
    }

    #[test]
    fn changes_roundtrip_through_compressed_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.bin.zst");

        let mut writer = ColumnarWriter::new();
        writer.push_change(ChangeRecord {
            commit_oid: "c".repeat(40),
            file_id: 7,
            status: "M".into(),
            old_file_id: None,
        });
        writer.write_changes(&path).unwrap();

        let read_back = read_changes(&path).unwrap();
        assert_eq!(read_back, vec![ChangeRecord {
            commit_oid: "c".repeat(40),
            file_id: 7,
            status: "M".into(),
            old_file_id: None,
        }]);
    }
}
