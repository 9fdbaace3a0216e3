//! Edge builder (§4.6): turns changesets into file-level co-change edges,
//! then aggregates those into component-level edges.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::changeset::Changeset;
use crate::config::{BulkPolicy, CouplingConfig};
use crate::store::relational::{ComponentEdgeRecord, EdgeRecord};

#[derive(Debug, Default, Clone, Copy)]
struct PairAccum {
    raw: u64,
    weighted: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct FileAccum {
    raw: u64,
    weighted: f64,
}

/// The effective weight of a changeset after bulk-policy and decay are
/// applied, or `None` if it is excluded outright (§4.6 "Weighting").
fn effective_weight(cs: &Changeset, config: &CouplingConfig, latest_ts: i64) -> Option<f64> {
    let mut weight = cs.weight;

    if let Some(max_size) = config.max_changeset_size {
        if cs.file_ids.len() > max_size {
            match config.bulk_policy {
                BulkPolicy::Exclude => return None,
                BulkPolicy::Downweight => {
                    weight *= 1.0 / (1.0 + cs.file_ids.len() as f64).ln();
                }
            }
        }
    }

    if let Some(half_life) = config.decay_half_life_days {
        let age_days = ((latest_ts - cs.representative_timestamp) as f64 / 86400.0).max(0.0);
        weight *= 0.5_f64.powf(age_days / half_life);
    }

    Some(weight)
}

/// Pair and per-file raw/weighted accumulation over every eligible
/// changeset (§4.6 "Counting").
fn accumulate(
    changesets: &[Changeset],
    config: &CouplingConfig,
    latest_ts: i64,
) -> (IndexMap<(u64, u64), PairAccum>, HashMap<u64, FileAccum>) {
    let mut pairs: IndexMap<(u64, u64), PairAccum> = IndexMap::new();
    let mut files: HashMap<u64, FileAccum> = HashMap::new();

    for cs in changesets {
        let Some(weight) = effective_weight(cs, config, latest_ts) else {
            continue;
        };
        let mut ids = cs.file_ids.clone();
        ids.sort_unstable();
        ids.dedup();

        for &id in &ids {
            let entry = files.entry(id).or_default();
            entry.raw += 1;
            entry.weighted += weight;
        }
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (a, b) = (ids[i], ids[j]);
                let entry = pairs.entry((a, b)).or_default();
                entry.raw += 1;
                entry.weighted += weight;
            }
        }
    }

    (pairs, files)
}

/// Compute retained edges with their Jaccard-family metrics (§4.6
/// "Filtering" + "Metrics per retained pair").
fn compute_metrics(
    pairs: &IndexMap<(u64, u64), PairAccum>,
    files: &HashMap<u64, FileAccum>,
    config: &CouplingConfig,
) -> Vec<EdgeRecord> {
    let mut out = Vec::new();
    for (&(a, b), pair) in pairs {
        if pair.raw < config.min_cooccurrence as u64 {
            continue;
        }
        let fa = files.get(&a).copied().unwrap_or_default();
        let fb = files.get(&b).copied().unwrap_or_default();
        if fa.raw < config.min_revisions as u64 || fb.raw < config.min_revisions as u64 {
            continue;
        }

        let union_raw = fa.raw + fb.raw - pair.raw;
        let jaccard = if union_raw > 0 {
            pair.raw as f64 / union_raw as f64
        } else {
            0.0
        };
        let union_weighted = fa.weighted + fb.weighted - pair.weighted;
        let jaccard_weighted = if union_weighted > 0.0 {
            pair.weighted / union_weighted
        } else {
            0.0
        };
        let p_dst_given_src = if fa.raw > 0 { pair.raw as f64 / fa.raw as f64 } else { 0.0 };
        let p_src_given_dst = if fb.raw > 0 { pair.raw as f64 / fb.raw as f64 } else { 0.0 };

        out.push(EdgeRecord {
            src_id: a,
            dst_id: b,
            pair_count_raw: pair.raw,
            pair_count_weighted: pair.weighted,
            src_count_raw: fa.raw,
            dst_count_raw: fb.raw,
            jaccard,
            jaccard_weighted,
            p_dst_given_src,
            p_src_given_dst,
        });
    }
    out
}

/// Top-K pruning: for each file id, keep its top-K incident edges ranked
/// by Jaccard; an edge survives if either endpoint keeps it (union, not
/// intersection) — §4.6, invariant 4 in §8.
fn topk_prune(edges: Vec<EdgeRecord>, k: usize) -> Vec<EdgeRecord> {
    let mut per_file: HashMap<u64, Vec<usize>> = HashMap::new();
    for (idx, e) in edges.iter().enumerate() {
        per_file.entry(e.src_id).or_default().push(idx);
        per_file.entry(e.dst_id).or_default().push(idx);
    }

    let mut survivors = vec![false; edges.len()];
    for indices in per_file.values_mut() {
        indices.sort_by(|&i, &j| {
            edges[j]
                .jaccard
                .partial_cmp(&edges[i].jaccard)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for &idx in indices.iter().take(k) {
            survivors[idx] = true;
        }
    }

    edges
        .into_iter()
        .zip(survivors)
        .filter_map(|(e, keep)| keep.then_some(e))
        .collect()
}

/// First `depth` path segments, joined by `/` — the component label used
/// for aggregation (§4.6 "Component aggregation").
pub fn component_label(path: &str, depth: usize) -> String {
    path.split('/').take(depth.max(1)).collect::<Vec<_>>().join("/")
}

fn aggregate_components(
    edges: &[EdgeRecord],
    paths_by_id: &HashMap<u64, String>,
    depth: usize,
    min_component_cooccurrence: u64,
) -> Vec<ComponentEdgeRecord> {
    #[derive(Default)]
    struct Agg {
        pair_count: u64,
        jaccard_sum: f64,
        file_pair_count: u64,
    }

    let mut agg: IndexMap<(String, String), Agg> = IndexMap::new();
    for e in edges {
        let (Some(pa), Some(pb)) = (paths_by_id.get(&e.src_id), paths_by_id.get(&e.dst_id)) else {
            continue;
        };
        let (ca, cb) = (component_label(pa, depth), component_label(pb, depth));
        if ca == cb {
            continue;
        }
        let key = if ca < cb { (ca, cb) } else { (cb, ca) };
        let entry = agg.entry(key).or_default();
        entry.pair_count += e.pair_count_raw;
        entry.jaccard_sum += e.jaccard;
        entry.file_pair_count += 1;
    }

    agg.into_iter()
        .filter(|(_, a)| a.pair_count >= min_component_cooccurrence)
        .map(|((src, dst), a)| ComponentEdgeRecord {
            src_component: src,
            dst_component: dst,
            depth,
            file_pair_count: a.file_pair_count,
            avg_jaccard: a.jaccard_sum / a.file_pair_count as f64,
        })
        .collect()
}

/// Everything the edge builder produces in one pass.
pub struct EdgeBuildResult {
    pub edges: Vec<EdgeRecord>,
    pub component_edges: Vec<ComponentEdgeRecord>,
}

/// Run the full pipeline: weighting, counting, filtering, metrics,
/// top-K pruning, component aggregation.
pub fn build_edges(
    changesets: &[Changeset],
    paths_by_id: &HashMap<u64, String>,
    config: &CouplingConfig,
    latest_ts: i64,
) -> EdgeBuildResult {
    let (pairs, files) = accumulate(changesets, config, latest_ts);
    let edges = compute_metrics(&pairs, &files, config);
    let edges = match config.topk_edges_per_file {
        Some(k) => topk_prune(edges, k),
        None => edges,
    };
    let component_edges = aggregate_components(
        &edges,
        paths_by_id,
        config.component_depth,
        config.min_component_cooccurrence as u64,
    );
    EdgeBuildResult { edges, component_edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChangesetMode;

    fn cs(id: &str, files: &[u64], ts: i64) -> Changeset {
        Changeset {
            changeset_id: id.to_string(),
            file_ids: files.to_vec(),
            weight: 1.0,
            representative_timestamp: ts,
        }
    }

    #[test]
    fn simple_pair_has_jaccard_one() {
        let mut config = CouplingConfig::default();
        config.min_revisions = 1;
        config.min_cooccurrence = 1;
        let changesets = vec![cs("c1", &[1, 2], 0), cs("c2", &[1, 2], 1)];
        let result = build_edges(&changesets, &HashMap::new(), &config, 1);
        assert_eq!(result.edges.len(), 1);
        let e = &result.edges[0];
        assert_eq!((e.src_id, e.dst_id), (1, 2));
        assert_eq!(e.pair_count_raw, 2);
        assert_eq!(e.jaccard, 1.0);
    }

    #[test]
    fn pair_canonicality_src_less_than_dst_no_duplicates() {
        let mut config = CouplingConfig::default();
        config.min_revisions = 1;
        config.min_cooccurrence = 1;
        let changesets = vec![cs("c1", &[5, 2, 9], 0)];
        let result = build_edges(&changesets, &HashMap::new(), &config, 0);
        for e in &result.edges {
            assert!(e.src_id < e.dst_id);
        }
        let mut seen = std::collections::HashSet::new();
        for e in &result.edges {
            assert!(seen.insert((e.src_id, e.dst_id)));
        }
    }

    #[test]
    fn bulk_downweight_matches_scenario_b() {
        let mut config = CouplingConfig::default();
        config.changeset_mode = ChangesetMode::ByCommit;
        config.bulk_policy = BulkPolicy::Downweight;
        config.max_changeset_size = Some(50);
        config.min_cooccurrence = 3;
        config.min_revisions = 1;
        let files: Vec<u64> = (0..100).collect();
        let changesets = vec![cs("c1", &files, 0)];
        let result = build_edges(&changesets, &HashMap::new(), &config, 0);
        // raw pair counts are 1 < min_cooccurrence=3, so nothing survives
        assert!(result.edges.is_empty());
    }

    #[test]
    fn bulk_downweight_weight_formula() {
        let mut config = CouplingConfig::default();
        config.bulk_policy = BulkPolicy::Downweight;
        config.max_changeset_size = Some(50);
        let files: Vec<u64> = (0..100).collect();
        let weight = effective_weight(&cs("c1", &files, 0), &config, 0).unwrap();
        assert!((weight - 1.0 / 101f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn bulk_exclude_drops_oversized_changeset_entirely() {
        let mut config = CouplingConfig::default();
        config.bulk_policy = BulkPolicy::Exclude;
        config.max_changeset_size = Some(2);
        let changesets = vec![cs("c1", &[1, 2, 3], 0)];
        let (pairs, files) = accumulate(&changesets, &config, 0);
        assert!(pairs.is_empty());
        assert!(files.is_empty());
    }

    #[test]
    fn min_cooccurrence_and_min_revisions_floor_are_enforced() {
        let mut config = CouplingConfig::default();
        config.min_revisions = 5;
        config.min_cooccurrence = 1;
        let changesets = vec![cs("c1", &[1, 2], 0)];
        let result = build_edges(&changesets, &HashMap::new(), &config, 0);
        assert!(result.edges.is_empty());
    }

    #[test]
    fn topk_keeps_union_of_survivors_from_either_endpoint() {
        let mut config = CouplingConfig::default();
        config.min_revisions = 1;
        config.min_cooccurrence = 1;
        config.topk_edges_per_file = Some(1);
        // file 1 is more strongly coupled with 3 (jaccard 0.5) than with 2
        // (jaccard 0.333), so file 1's top-1 drops (1,2). But file 2 has no
        // other edge, so (1,2) is trivially file 2's own top-1 and must
        // still survive via the union-of-endpoints rule.
        let changesets = vec![
            cs("c1", &[1, 2], 0),
            cs("c2", &[1, 2], 1),
            cs("c3", &[1], 2),
            cs("c4", &[1, 3], 3),
            cs("c5", &[1, 3], 4),
            cs("c6", &[1, 3], 5),
        ];
        let result = build_edges(&changesets, &HashMap::new(), &config, 5);
        let has_pair = |a: u64, b: u64| result.edges.iter().any(|e| e.src_id == a && e.dst_id == b);
        assert!(has_pair(1, 3), "file 1's strongest edge must survive");
        assert!(has_pair(1, 2), "file 2's only edge must survive via union rule");
    }

    #[test]
    fn component_aggregation_matches_scenario_e() {
        let mut config = CouplingConfig::default();
        config.min_revisions = 1;
        config.min_cooccurrence = 1;
        config.component_depth = 2;
        config.min_component_cooccurrence = 1;
        config.topk_edges_per_file = None;

        let mut paths = HashMap::new();
        paths.insert(1, "src/auth/a.py".to_string());
        paths.insert(2, "src/auth/b.py".to_string());
        paths.insert(3, "src/api/x.py".to_string());
        paths.insert(4, "src/api/y.py".to_string());

        // strong intra-folder coupling for (1,2) and (3,4); one cross edge (2,3).
        let changesets = vec![
            cs("c1", &[1, 2], 0),
            cs("c2", &[1, 2], 1),
            cs("c3", &[1, 2], 2),
            cs("c4", &[3, 4], 3),
            cs("c5", &[3, 4], 4),
            cs("c6", &[3, 4], 5),
            cs("c7", &[2, 3], 6),
        ];
        let result = build_edges(&changesets, &paths, &config, 6);
        assert_eq!(result.component_edges.len(), 1);
        let ce = &result.component_edges[0];
        assert_eq!(ce.file_pair_count, 1);
        // files 2 and 3 each appear in 4 commits, co-occurring in 1: 1/(4+4-1)
        assert!((ce.avg_jaccard - 1.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn component_label_respects_depth() {
        assert_eq!(component_label("src/auth/service/a.py", 2), "src/auth");
        assert_eq!(component_label("a.py", 2), "a.py");
    }

    // §8 invariants 1-3: pair canonicality, Jaccard bounds, co-occurrence floor.
    #[quickcheck_macros::quickcheck]
    fn prop_retained_edges_are_canonical_and_bounded(raw: Vec<Vec<u8>>) -> quickcheck::TestResult {
        if raw.len() > 16 {
            return quickcheck::TestResult::discard();
        }
        let mut config = CouplingConfig::default();
        config.min_revisions = 1;
        config.min_cooccurrence = 1;
        config.topk_edges_per_file = None;

        let changesets: Vec<Changeset> = raw
            .iter()
            .enumerate()
            .map(|(i, files)| {
                let mut ids: Vec<u64> = files.iter().map(|&b| b as u64 % 6).collect();
                ids.sort_unstable();
                ids.dedup();
                cs(&format!("c{i}"), &ids, i as i64)
            })
            .collect();

        let result = build_edges(&changesets, &HashMap::new(), &config, raw.len() as i64);

        let mut seen = std::collections::HashSet::new();
        for e in &result.edges {
            if e.src_id >= e.dst_id || !seen.insert((e.src_id, e.dst_id)) {
                return quickcheck::TestResult::failed();
            }
            if !(0.0..=1.0).contains(&e.jaccard) || !(0.0..=1.0).contains(&e.jaccard_weighted) {
                return quickcheck::TestResult::failed();
            }
            if e.pair_count_raw < config.min_cooccurrence as u64
                || e.src_count_raw < config.min_revisions as u64
                || e.dst_count_raw < config.min_revisions as u64
            {
                return quickcheck::TestResult::failed();
            }
        }
        quickcheck::TestResult::passed()
    }
}
