//! Relational half of the artifact store, backed by `rusqlite` (bundled
//! sqlite). One connection per repo, WAL mode, foreign keys on — a
//! single-writer embedded store, not a multi-tenant service (§9
//! "Concurrency within a repo is serialized").

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

/// One undirected file-pair edge, ready for persistence (§3 Data Model /
/// §4.6 Edge Builder output).
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    pub src_id: u64,
    pub dst_id: u64,
    pub pair_count_raw: u64,
    pub pair_count_weighted: f64,
    pub src_count_raw: u64,
    pub dst_count_raw: u64,
    pub jaccard: f64,
    pub jaccard_weighted: f64,
    pub p_dst_given_src: f64,
    pub p_src_given_dst: f64,
}

/// A component-level (folder-prefix) aggregate edge (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentEdgeRecord {
    pub src_component: String,
    pub dst_component: String,
    pub depth: usize,
    pub file_pair_count: u64,
    pub avg_jaccard: f64,
}

/// Per-file aggregate metadata accumulated by the extractor (§4.4 outputs)
/// plus the hot/stable classification (§4.7).
#[derive(Debug, Clone, Default)]
pub struct EntityMetadata {
    pub total_commits: u64,
    pub author_count: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub first_commit_ts: Option<i64>,
    pub last_commit_ts: Option<i64>,
    pub commits_30d: u64,
    pub commits_90d: u64,
    pub hot_stable_class: Option<String>,
}

/// One row in the run-scoped validation issue log (§7, §3).
#[derive(Debug, Clone)]
pub struct ValidationLogRow {
    pub run_id: String,
    pub commit_oid: Option<String>,
    pub issue_type: String,
    pub severity: String,
    pub message: String,
}

/// A persisted clustering run (§3 "Snapshot persistence").
#[derive(Debug, Clone)]
pub struct ClusteringSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub algorithm: String,
    pub result_json: String,
    pub tags: Option<String>,
    pub created_at: i64,
}

/// A task row as surfaced by the task runner (§4.10, §6 task status shape).
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub task_id: String,
    pub state: String,
    pub stage: Option<String>,
    pub progress: f64,
    pub processed_commits: u64,
    pub total_commits: Option<u64>,
    pub entity_count: u64,
    pub relationship_count: u64,
    pub error: Option<String>,
    pub metrics_json: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct RelationalStore {
    conn: Connection,
}

impl RelationalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_info (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repo_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                id INTEGER PRIMARY KEY,
                qualified_name TEXT NOT NULL UNIQUE,
                exists_at_head INTEGER NOT NULL DEFAULT 0,
                total_commits INTEGER NOT NULL DEFAULT 0,
                author_count INTEGER NOT NULL DEFAULT 0,
                lines_added INTEGER NOT NULL DEFAULT 0,
                lines_deleted INTEGER NOT NULL DEFAULT 0,
                first_commit_ts INTEGER,
                last_commit_ts INTEGER,
                commits_30d INTEGER NOT NULL DEFAULT 0,
                commits_90d INTEGER NOT NULL DEFAULT 0,
                hot_stable_class TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_entities_head ON entities(exists_at_head);

            CREATE TABLE IF NOT EXISTS file_lineage (
                file_id INTEGER NOT NULL,
                path TEXT NOT NULL,
                start_commit TEXT NOT NULL,
                end_commit TEXT,
                PRIMARY KEY (file_id, path, start_commit),
                FOREIGN KEY (file_id) REFERENCES entities(id)
            );

            CREATE TABLE IF NOT EXISTS relationships (
                src_entity_id INTEGER NOT NULL,
                dst_entity_id INTEGER NOT NULL,
                rel_kind TEXT NOT NULL DEFAULT 'co_change',
                pair_count_raw INTEGER NOT NULL,
                pair_count_weighted REAL NOT NULL,
                src_count_raw INTEGER NOT NULL,
                dst_count_raw INTEGER NOT NULL,
                jaccard REAL NOT NULL,
                jaccard_weighted REAL NOT NULL,
                p_dst_given_src REAL NOT NULL,
                p_src_given_dst REAL NOT NULL,
                PRIMARY KEY (src_entity_id, dst_entity_id, rel_kind)
            );
            CREATE INDEX IF NOT EXISTS idx_rel_src ON relationships(src_entity_id, jaccard_weighted);
            CREATE INDEX IF NOT EXISTS idx_rel_dst ON relationships(dst_entity_id, jaccard_weighted);

            CREATE TABLE IF NOT EXISTS component_edges (
                src_component TEXT NOT NULL,
                dst_component TEXT NOT NULL,
                depth INTEGER NOT NULL,
                file_pair_count INTEGER NOT NULL,
                avg_jaccard REAL NOT NULL,
                PRIMARY KEY (src_component, dst_component, depth)
            );

            CREATE TABLE IF NOT EXISTS validation_log (
                run_id TEXT NOT NULL,
                commit_oid TEXT,
                issue_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                recorded_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_validation_run ON validation_log(run_id);

            CREATE TABLE IF NOT EXISTS analysis_tasks (
                task_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                stage TEXT,
                progress REAL NOT NULL DEFAULT 0.0,
                processed_commits INTEGER NOT NULL DEFAULT 0,
                total_commits INTEGER,
                entity_count INTEGER NOT NULL DEFAULT 0,
                relationship_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                metrics_json TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clustering_snapshots (
                id TEXT PRIMARY KEY,
                name TEXT,
                algorithm TEXT NOT NULL,
                result_json TEXT NOT NULL,
                tags TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_info (key, value) VALUES ('version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    // --- entities / lineage ---

    pub fn upsert_entity(&self, id: u64, path: &str, exists_at_head: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO entities (id, qualified_name, exists_at_head) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET qualified_name = excluded.qualified_name, exists_at_head = excluded.exists_at_head",
            params![id as i64, path, exists_at_head as i64],
        )?;
        Ok(())
    }

    pub fn set_exists_at_head(&self, id: u64, exists_at_head: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE entities SET exists_at_head = ?2 WHERE id = ?1",
            params![id as i64, exists_at_head as i64],
        )?;
        Ok(())
    }

    pub fn upsert_entity_metadata(&self, id: u64, meta: &EntityMetadata) -> Result<()> {
        self.conn.execute(
            "UPDATE entities SET total_commits = ?2, author_count = ?3, lines_added = ?4,
                lines_deleted = ?5, first_commit_ts = ?6, last_commit_ts = ?7,
                commits_30d = ?8, commits_90d = ?9, hot_stable_class = ?10
             WHERE id = ?1",
            params![
                id as i64,
                meta.total_commits as i64,
                meta.author_count as i64,
                meta.lines_added as i64,
                meta.lines_deleted as i64,
                meta.first_commit_ts,
                meta.last_commit_ts,
                meta.commits_30d as i64,
                meta.commits_90d as i64,
                meta.hot_stable_class,
            ],
        )?;
        Ok(())
    }

    pub fn insert_lineage_segment(
        &self,
        file_id: u64,
        path: &str,
        start_commit: &str,
        end_commit: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO file_lineage (file_id, path, start_commit, end_commit) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(file_id, path, start_commit) DO UPDATE SET end_commit = excluded.end_commit",
            params![file_id as i64, path, start_commit, end_commit],
        )?;
        Ok(())
    }

    pub fn close_lineage_segment(&self, file_id: u64, path: &str, end_commit: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE file_lineage SET end_commit = ?3
             WHERE file_id = ?1 AND path = ?2 AND end_commit IS NULL",
            params![file_id as i64, path, end_commit],
        )?;
        Ok(())
    }

    pub fn entities_snapshot(&self) -> Result<Vec<(u64, String, bool)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, qualified_name, exists_at_head FROM entities")?;
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let path: String = row.get(1)?;
                let head: i64 = row.get(2)?;
                Ok((id as u64, path, head != 0))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn lineage_snapshot(&self) -> Result<Vec<(u64, String, String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_id, path, start_commit, end_commit FROM file_lineage ORDER BY start_commit")?;
        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok((id as u64, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn entity_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn path_of(&self, id: u64) -> Result<Option<String>> {
        let path = self
            .conn
            .query_row(
                "SELECT qualified_name FROM entities WHERE id = ?1",
                params![id as i64],
                |r| r.get(0),
            )
            .optional()?;
        Ok(path)
    }

    // --- relationships (edges) ---

    pub fn replace_edges(&mut self, edges: &[EdgeRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM relationships WHERE rel_kind = 'co_change'", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO relationships
                 (src_entity_id, dst_entity_id, rel_kind, pair_count_raw, pair_count_weighted,
                  src_count_raw, dst_count_raw, jaccard, jaccard_weighted, p_dst_given_src, p_src_given_dst)
                 VALUES (?1, ?2, 'co_change', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for e in edges {
                stmt.execute(params![
                    e.src_id as i64,
                    e.dst_id as i64,
                    e.pair_count_raw as i64,
                    e.pair_count_weighted,
                    e.src_count_raw as i64,
                    e.dst_count_raw as i64,
                    e.jaccard,
                    e.jaccard_weighted,
                    e.p_dst_given_src,
                    e.p_src_given_dst,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn all_edges(&self) -> Result<Vec<EdgeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT src_entity_id, dst_entity_id, pair_count_raw, pair_count_weighted,
                    src_count_raw, dst_count_raw, jaccard, jaccard_weighted, p_dst_given_src, p_src_given_dst
             FROM relationships WHERE rel_kind = 'co_change'",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EdgeRecord {
                    src_id: row.get::<_, i64>(0)? as u64,
                    dst_id: row.get::<_, i64>(1)? as u64,
                    pair_count_raw: row.get::<_, i64>(2)? as u64,
                    pair_count_weighted: row.get(3)?,
                    src_count_raw: row.get::<_, i64>(4)? as u64,
                    dst_count_raw: row.get::<_, i64>(5)? as u64,
                    jaccard: row.get(6)?,
                    jaccard_weighted: row.get(7)?,
                    p_dst_given_src: row.get(8)?,
                    p_src_given_dst: row.get(9)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn relationship_count(&self) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM relationships WHERE rel_kind = 'co_change'",
            [],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn replace_component_edges(&mut self, edges: &[ComponentEdgeRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM component_edges", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO component_edges (src_component, dst_component, depth, file_pair_count, avg_jaccard)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for e in edges {
                stmt.execute(params![
                    e.src_component,
                    e.dst_component,
                    e.depth as i64,
                    e.file_pair_count as i64,
                    e.avg_jaccard,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // --- validation log ---

    pub fn log_validation_issue(&self, row: &ValidationLogRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO validation_log (run_id, commit_oid, issue_type, severity, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![row.run_id, row.commit_oid, row.issue_type, row.severity, row.message],
        )?;
        Ok(())
    }

    pub fn validation_issue_counts(&self, run_id: &str) -> Result<HashMap<String, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_type, COUNT(*) FROM validation_log WHERE run_id = ?1 GROUP BY issue_type")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let t: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                Ok((t, n as u64))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().collect())
    }

    // --- repo metadata ---

    pub fn set_repo_meta(&self, key: &str, value_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO repo_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value_json],
        )?;
        Ok(())
    }

    pub fn get_repo_meta(&self, key: &str) -> Result<Option<String>> {
        let v = self
            .conn
            .query_row("SELECT value FROM repo_meta WHERE key = ?1", params![key], |r| r.get(0))
            .optional()?;
        Ok(v)
    }

    // --- tasks ---

    pub fn upsert_task(&self, task: &TaskRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO analysis_tasks
             (task_id, state, stage, progress, processed_commits, total_commits,
              entity_count, relationship_count, error, metrics_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(task_id) DO UPDATE SET
                state = excluded.state, stage = excluded.stage, progress = excluded.progress,
                processed_commits = excluded.processed_commits, total_commits = excluded.total_commits,
                entity_count = excluded.entity_count, relationship_count = excluded.relationship_count,
                error = excluded.error, metrics_json = excluded.metrics_json, updated_at = excluded.updated_at",
            params![
                task.task_id,
                task.state,
                task.stage,
                task.progress,
                task.processed_commits as i64,
                task.total_commits.map(|v| v as i64),
                task.entity_count as i64,
                task.relationship_count as i64,
                task.error,
                task.metrics_json,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT task_id, state, stage, progress, processed_commits, total_commits,
                        entity_count, relationship_count, error, metrics_json, created_at, updated_at
                 FROM analysis_tasks WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok(TaskRow {
                        task_id: row.get(0)?,
                        state: row.get(1)?,
                        stage: row.get(2)?,
                        progress: row.get(3)?,
                        processed_commits: row.get::<_, i64>(4)? as u64,
                        total_commits: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                        entity_count: row.get::<_, i64>(6)? as u64,
                        relationship_count: row.get::<_, i64>(7)? as u64,
                        error: row.get(8)?,
                        metrics_json: row.get(9)?,
                        created_at: row.get(10)?,
                        updated_at: row.get(11)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // --- clustering snapshots ---

    pub fn save_snapshot(&self, snapshot: &ClusteringSnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT INTO clustering_snapshots (id, name, algorithm, result_json, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, algorithm = excluded.algorithm,
                result_json = excluded.result_json, tags = excluded.tags",
            params![
                snapshot.id,
                snapshot.name,
                snapshot.algorithm,
                snapshot.result_json,
                snapshot.tags,
                snapshot.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn load_snapshot(&self, id: &str) -> Result<Option<ClusteringSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, algorithm, result_json, tags, created_at FROM clustering_snapshots WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ClusteringSnapshot {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        algorithm: row.get(2)?,
                        result_json: row.get(3)?,
                        tags: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_cleanly_and_is_idempotent() {
        let store = RelationalStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        assert_eq!(store.entity_count().unwrap(), 0);
    }

    #[test]
    fn entity_roundtrip() {
        let store = RelationalStore::open_in_memory().unwrap();
        store.upsert_entity(1, "src/a.py", true).unwrap();
        store.upsert_entity(2, "src/b.py", false).unwrap();
        let rows = store.entities_snapshot().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(store.path_of(1).unwrap().as_deref(), Some("src/a.py"));
    }

    #[test]
    fn edges_replace_is_transactional_and_queryable() {
        let mut store = RelationalStore::open_in_memory().unwrap();
        store.upsert_entity(1, "a", true).unwrap();
        store.upsert_entity(2, "b", true).unwrap();
        let edge = EdgeRecord {
            src_id: 1,
            dst_id: 2,
            pair_count_raw: 2,
            pair_count_weighted: 2.0,
            src_count_raw: 2,
            dst_count_raw: 2,
            jaccard: 1.0,
            jaccard_weighted: 1.0,
            p_dst_given_src: 1.0,
            p_src_given_dst: 1.0,
        };
        store.replace_edges(&[edge.clone()]).unwrap();
        let all = store.all_edges().unwrap();
        assert_eq!(all, vec![edge]);
        assert_eq!(store.relationship_count().unwrap(), 1);
    }

    #[test]
    fn task_upsert_roundtrip() {
        let store = RelationalStore::open_in_memory().unwrap();
        let task = TaskRow {
            task_id: "t1".into(),
            state: "running".into(),
            stage: Some("extracting_history".into()),
            progress: 0.3,
            processed_commits: 10,
            total_commits: Some(100),
            entity_count: 5,
            relationship_count: 0,
            error: None,
            metrics_json: None,
            created_at: 1000,
            updated_at: 1001,
        };
        store.upsert_task(&task).unwrap();
        let fetched = store.get_task("t1").unwrap().unwrap();
        assert_eq!(fetched.state, "running");
        assert_eq!(fetched.processed_commits, 10);
    }

    #[test]
    fn validation_log_counts_group_by_type() {
        let store = RelationalStore::open_in_memory().unwrap();
        store
            .log_validation_issue(&ValidationLogRow {
                run_id: "r1".into(),
                commit_oid: Some("abcd".into()),
                issue_type: "invalid_commit_oid".into(),
                severity: "error".into(),
                message: "bad oid".into(),
            })
            .unwrap();
        store
            .log_validation_issue(&ValidationLogRow {
                run_id: "r1".into(),
                commit_oid: None,
                issue_type: "invalid_status".into(),
                severity: "warning".into(),
                message: "bad status".into(),
            })
            .unwrap();
        let counts = store.validation_issue_counts("r1").unwrap();
        assert_eq!(counts.get("invalid_commit_oid"), Some(&1));
        assert_eq!(counts.get("invalid_status"), Some(&1));
    }
}
