//! Changeset grouper (§4.5): turns the persisted commit/change stream into
//! a stream of `(changeset_id, file_ids, weight, representative_timestamp)`
//! tuples for the edge builder to consume.
//!
//! `by_commit` changesets are **not** size-filtered here — §4.6's
//! `bulk_policy` (exclude/downweight) owns that decision, since the
//! downweight policy needs the oversized changeset to still reach the edge
//! builder. Only the two grouped modes (`by_author_time`, `by_ticket_id`)
//! hard-drop bundles over `max_logical_changeset_size`: the reference
//! implementation never downweights a *logical* bundle, only a raw commit
//! (see DESIGN.md).
//!
//! Merge commits are always recorded by the extractor; `skip_merge_commits`
//! only withholds their contribution here, by filtering them out of the
//! grouper's input before any mode-specific grouping runs.

use regex::Regex;

use crate::config::{ChangesetMode, CouplingConfig};
use crate::error::{CouplingError, Result};

/// One commit's worth of input to the grouper.
#[derive(Debug, Clone)]
pub struct CommitInput {
    pub commit_oid: String,
    pub author_email: String,
    pub timestamp: i64,
    pub subject: String,
    pub file_ids: Vec<u64>,
    /// `parent_count > 1`. Commits/changes are always recorded upstream;
    /// this only controls whether the commit contributes a changeset (and
    /// therefore edges) when `skip_merge_commits` is set.
    pub is_merge: bool,
}

/// A group of files treated as one co-change event.
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    pub changeset_id: String,
    pub file_ids: Vec<u64>,
    pub weight: f64,
    pub representative_timestamp: i64,
}

pub fn build_changesets(commits: &[CommitInput], config: &CouplingConfig) -> Result<Vec<Changeset>> {
    let retained: Vec<CommitInput>;
    let commits: &[CommitInput] = if config.skip_merge_commits {
        retained = commits.iter().filter(|c| !c.is_merge).cloned().collect();
        &retained
    } else {
        commits
    };

    match config.changeset_mode {
        ChangesetMode::ByCommit => Ok(group_by_commit(commits)),
        ChangesetMode::ByAuthorTime => Ok(group_by_author_time(
            commits,
            config.author_time_window_hours,
            config.max_logical_changeset_size,
        )),
        ChangesetMode::ByTicketId => {
            let pattern = config.ticket_id_pattern.as_deref().ok_or_else(|| {
                CouplingError::ConfigError("ticket_id_pattern required for by_ticket_id".into())
            })?;
            let re = Regex::new(pattern)
                .map_err(|e| CouplingError::ConfigError(format!("invalid ticket_id_pattern: {e}")))?;
            Ok(group_by_ticket_id(commits, &re, config.max_logical_changeset_size))
        }
    }
}

fn group_by_commit(commits: &[CommitInput]) -> Vec<Changeset> {
    commits
        .iter()
        .filter(|c| !c.file_ids.is_empty())
        .map(|c| Changeset {
            changeset_id: c.commit_oid.clone(),
            file_ids: c.file_ids.clone(),
            weight: 1.0,
            representative_timestamp: c.timestamp,
        })
        .collect()
}

fn group_by_author_time(commits: &[CommitInput], window_hours: u32, max_size: usize) -> Vec<Changeset> {
    let window_secs = i64::from(window_hours) * 3600;
    let mut sorted: Vec<&CommitInput> = commits.iter().collect();
    sorted.sort_by_key(|c| c.timestamp);

    let mut out = Vec::new();
    let mut bundle: Vec<&CommitInput> = Vec::new();
    let mut bundle_start: i64 = 0;
    let mut bundle_author: Option<&str> = None;

    let flush = |bundle: &mut Vec<&CommitInput>, out: &mut Vec<Changeset>| {
        if bundle.is_empty() {
            return;
        }
        let mut file_ids: Vec<u64> = bundle.iter().flat_map(|c| c.file_ids.iter().copied()).collect();
        file_ids.sort_unstable();
        file_ids.dedup();
        if file_ids.len() <= max_size {
            let id = format!("author_time:{}:{}", bundle[0].author_email, bundle[0].commit_oid);
            let ts = bundle.last().unwrap().timestamp;
            out.push(Changeset {
                changeset_id: id,
                file_ids,
                weight: 1.0,
                representative_timestamp: ts,
            });
        }
        bundle.clear();
    };

    for c in sorted {
        let opens_new = match bundle_author {
            None => true,
            Some(author) => author != c.author_email || c.timestamp > bundle_start + window_secs,
        };
        if opens_new {
            flush(&mut bundle, &mut out);
            bundle_start = c.timestamp;
            bundle_author = Some(&c.author_email);
        }
        bundle.push(c);
    }
    flush(&mut bundle, &mut out);
    out
}

fn group_by_ticket_id(commits: &[CommitInput], pattern: &Regex, max_size: usize) -> Vec<Changeset> {
    use std::collections::HashMap;

    let mut groups: HashMap<String, Vec<&CommitInput>> = HashMap::new();
    for c in commits {
        let key = pattern
            .captures(&c.subject)
            .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| format!("__singleton__:{}", c.commit_oid));
        groups.entry(key).or_default().push(c);
    }

    let mut out = Vec::new();
    for (key, members) in groups {
        let mut file_ids: Vec<u64> = members.iter().flat_map(|c| c.file_ids.iter().copied()).collect();
        file_ids.sort_unstable();
        file_ids.dedup();
        if file_ids.is_empty() || file_ids.len() > max_size {
            continue;
        }
        let ts = members.iter().map(|c| c.timestamp).max().unwrap_or(0);
        out.push(Changeset {
            changeset_id: format!("ticket:{key}"),
            file_ids,
            weight: 1.0,
            representative_timestamp: ts,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(oid: &str, author: &str, ts: i64, subject: &str, files: &[u64]) -> CommitInput {
        CommitInput {
            commit_oid: oid.to_string(),
            author_email: author.to_string(),
            timestamp: ts,
            subject: subject.to_string(),
            file_ids: files.to_vec(),
            is_merge: false,
        }
    }

    #[test]
    fn by_commit_does_not_drop_oversized_changesets() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByCommit;
        let big: Vec<u64> = (0..100).collect();
        let commits = vec![commit("c1", "a@x", 1, "bulk", &big)];
        let out = build_changesets(&commits, &config).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].file_ids.len(), 100);
    }

    #[test]
    fn skip_merge_commits_drops_merge_changesets_but_leaves_others() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByCommit;
        config.skip_merge_commits = true;
        let mut merge = commit("c1", "a@x", 1, "merge branch x", &[1, 2]);
        merge.is_merge = true;
        let regular = commit("c2", "a@x", 2, "fix bug", &[3]);
        let out = build_changesets(&[merge, regular], &config).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].changeset_id, "c2");
    }

    #[test]
    fn skip_merge_commits_false_keeps_merge_changesets() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByCommit;
        let mut merge = commit("c1", "a@x", 1, "merge branch x", &[1, 2]);
        merge.is_merge = true;
        let out = build_changesets(&[merge], &config).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn by_author_time_bundles_same_author_within_window() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByAuthorTime;
        config.author_time_window_hours = 1;
        let commits = vec![
            commit("c1", "a@x", 0, "s1", &[1]),
            commit("c2", "a@x", 1800, "s2", &[2]),
            commit("c3", "a@x", 10_000, "s3", &[3]), // outside the window, opens new bundle
        ];
        let out = build_changesets(&commits, &config).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].file_ids, vec![1, 2]);
        assert_eq!(out[1].file_ids, vec![3]);
    }

    #[test]
    fn by_author_time_drops_oversized_bundles() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByAuthorTime;
        config.max_logical_changeset_size = 2;
        let commits = vec![
            commit("c1", "a@x", 0, "s1", &[1, 2]),
            commit("c2", "a@x", 10, "s2", &[3]),
        ];
        let out = build_changesets(&commits, &config).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn by_ticket_id_groups_matching_subjects_and_singletons_fall_back() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByTicketId;
        config.ticket_id_pattern = Some(r"(JIRA-\d+)".to_string());
        let commits = vec![
            commit("c1", "a@x", 0, "JIRA-42: fix thing", &[1]),
            commit("c2", "a@x", 10, "JIRA-42: follow up", &[2]),
            commit("c3", "a@x", 20, "unrelated tweak", &[3]),
        ];
        let out = build_changesets(&commits, &config).unwrap();
        assert_eq!(out.len(), 2);
        let ticket = out.iter().find(|cs| cs.changeset_id == "ticket:JIRA-42").unwrap();
        assert_eq!(ticket.file_ids, vec![1, 2]);
    }

    #[test]
    fn by_ticket_id_requires_pattern() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByTicketId;
        config.ticket_id_pattern = None;
        assert!(build_changesets(&[], &config).is_err());
    }
}
