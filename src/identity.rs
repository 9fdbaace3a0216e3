//! File identity index (§4.3): the mapping from file path to a stable
//! integer id, and the lineage of that mapping across renames.
//!
//! Held in memory during a single extraction pass (the extractor commits
//! the resulting tables to the relational store at the end of each
//! commit); a fresh index is rehydrated from the store's `entities` and
//! `file_lineage` tables when resuming an incremental run.

use std::collections::HashMap;

/// One segment of a file entity's path history: the path it held from
/// `start_commit` (inclusive) until `end_commit` (exclusive, `None` while
/// still current).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageSegment {
    pub path: String,
    pub start_commit: String,
    pub end_commit: Option<String>,
}

#[derive(Debug, Clone)]
struct Entity {
    id: u64,
    current_path: String,
    exists_at_head: bool,
    lineage: Vec<LineageSegment>,
}

/// A rename collision: `new_path` was already bound to a different entity
/// when `old_path` tried to rename into it. Not an error (§4.3), just
/// logged for diagnostics.
#[derive(Debug, Clone)]
pub struct RenameCollision {
    pub old_path: String,
    pub new_path: String,
    pub displaced_entity_id: u64,
    pub surviving_entity_id: u64,
}

/// The index itself. `path_to_id` always holds exactly one binding per
/// currently-bound path (§4.3 invariant).
#[derive(Debug, Default)]
pub struct IdentityIndex {
    path_to_id: HashMap<String, u64>,
    entities: HashMap<u64, Entity>,
    next_id: u64,
    collisions: Vec<RenameCollision>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrate from previously persisted entities. `rows` is
    /// `(id, current_path, exists_at_head)`; `lineage` is
    /// `(id, path, start_commit, end_commit)` ordered by `start_commit`.
    pub fn from_persisted(
        rows: impl IntoIterator<Item = (u64, String, bool)>,
        lineage: impl IntoIterator<Item = (u64, String, String, Option<String>)>,
    ) -> Self {
        let mut idx = Self::new();
        for (id, path, exists_at_head) in rows {
            idx.next_id = idx.next_id.max(id + 1);
            idx.path_to_id.insert(path.clone(), id);
            idx.entities.insert(
                id,
                Entity {
                    id,
                    current_path: path,
                    exists_at_head,
                    lineage: Vec::new(),
                },
            );
        }
        for (id, path, start_commit, end_commit) in lineage {
            if let Some(entity) = idx.entities.get_mut(&id) {
                entity.lineage.push(LineageSegment {
                    path,
                    start_commit,
                    end_commit,
                });
            }
        }
        idx
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn lineage_of(&self, id: u64) -> &[LineageSegment] {
        self.entities
            .get(&id)
            .map(|e| e.lineage.as_slice())
            .unwrap_or(&[])
    }

    pub fn exists_at_head(&self, id: u64) -> bool {
        self.entities.get(&id).map(|e| e.exists_at_head).unwrap_or(false)
    }

    /// Returns the id bound to `path`, creating a fresh entity if unknown.
    pub fn resolve_or_create(&mut self, path: &str, commit_id: &str) -> u64 {
        if let Some(&id) = self.path_to_id.get(path) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.path_to_id.insert(path.to_string(), id);
        self.entities.insert(
            id,
            Entity {
                id,
                current_path: path.to_string(),
                exists_at_head: false,
                lineage: vec![LineageSegment {
                    path: path.to_string(),
                    start_commit: commit_id.to_string(),
                    end_commit: None,
                }],
            },
        );
        id
    }

    /// Transfer the binding from `old_path` to `new_path` at `commit_id`.
    /// Three cases (§4.3):
    /// 1. No entity at `old_path` → treated as a fresh creation at `new_path`.
    /// 2. `new_path` already bound to a *different* entity → the old entity
    ///    is marked not-at-head and kept under its old path; the existing
    ///    target entity survives unchanged; a collision is logged.
    /// 3. Otherwise → the entity's path is updated in place and its open
    ///    lineage segment is closed at `commit_id`, opening a new one.
    pub fn rename(&mut self, old_path: &str, new_path: &str, commit_id: &str) -> u64 {
        let Some(&old_id) = self.path_to_id.get(old_path) else {
            return self.resolve_or_create(new_path, commit_id);
        };

        if let Some(&target_id) = self.path_to_id.get(new_path) {
            if target_id != old_id {
                if let Some(old_entity) = self.entities.get_mut(&old_id) {
                    old_entity.exists_at_head = false;
                    if let Some(seg) = old_entity.lineage.last_mut() {
                        if seg.end_commit.is_none() {
                            seg.end_commit = Some(commit_id.to_string());
                        }
                    }
                }
                self.collisions.push(RenameCollision {
                    old_path: old_path.to_string(),
                    new_path: new_path.to_string(),
                    displaced_entity_id: old_id,
                    surviving_entity_id: target_id,
                });
                return target_id;
            }
            // target_id == old_id: renaming onto the path it already holds.
            return old_id;
        }

        self.path_to_id.remove(old_path);
        self.path_to_id.insert(new_path.to_string(), old_id);
        if let Some(entity) = self.entities.get_mut(&old_id) {
            entity.current_path = new_path.to_string();
            if let Some(seg) = entity.lineage.last_mut() {
                if seg.end_commit.is_none() {
                    seg.end_commit = Some(commit_id.to_string());
                }
            }
            entity.lineage.push(LineageSegment {
                path: new_path.to_string(),
                start_commit: commit_id.to_string(),
                end_commit: None,
            });
        }
        old_id
    }

    pub fn drain_collisions(&mut self) -> Vec<RenameCollision> {
        std::mem::take(&mut self.collisions)
    }

    /// Flip `exists_at_head` for every known entity in bulk, based on the
    /// set of paths present at HEAD. Idempotent: calling this twice with
    /// the same `head_paths` leaves every flag unchanged on the second call.
    pub fn mark_head(&mut self, head_paths: &std::collections::HashSet<String>) {
        for entity in self.entities.values_mut() {
            entity.exists_at_head = head_paths.contains(&entity.current_path);
        }
    }

    pub fn id_of(&self, path: &str) -> Option<u64> {
        self.path_to_id.get(path).copied()
    }

    /// Every known entity as `(id, current_path, exists_at_head)`, for
    /// persisting into the relational store at the end of a pass.
    pub fn snapshot(&self) -> Vec<(u64, String, bool)> {
        self.entities
            .values()
            .map(|e| (e.id, e.current_path.clone(), e.exists_at_head))
            .collect()
    }

    pub fn path_of(&self, id: u64) -> Option<&str> {
        self.entities.get(&id).map(|e| e.current_path.as_str())
    }
}
