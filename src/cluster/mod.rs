//! Clustering engine (§4.8): a registry of pluggable algorithms sharing one
//! contract — `run(edges, file_ids, params) -> ClusterResult` — dispatched
//! by name. An unknown name is a configuration error, not a panic (§9
//! "Pluggable algorithms... Dispatch is by name lookup; unknown names are a
//! configuration error").

pub mod components;
pub mod dbscan;
pub mod hierarchical;
pub mod insights;
pub mod label_propagation;
pub mod louvain;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CouplingError, Result};

/// One weighted edge handed to a clustering algorithm. `weight` is
/// whichever metric column the caller chose (Jaccard by default).
#[derive(Debug, Clone, Copy)]
pub struct EdgeInput {
    pub a: u64,
    pub b: u64,
    pub weight: f64,
}

/// The outcome of one clustering run, independent of which algorithm
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterResult {
    pub algorithm: String,
    pub parameters: Value,
    pub cluster_count: usize,
    /// Ordered by size descending; id `i` (1-based) is `clusters[i-1]`.
    pub clusters: Vec<Vec<u64>>,
    /// DBSCAN noise points; empty for every other algorithm.
    pub noise: Vec<u64>,
    pub metrics: Value,
}

/// Builds an adjacency map from a flat edge list; self-loops are ignored.
pub(crate) fn adjacency(edges: &[EdgeInput]) -> HashMap<u64, Vec<(u64, f64)>> {
    let mut adj: HashMap<u64, Vec<(u64, f64)>> = HashMap::new();
    for e in edges {
        if e.a == e.b {
            continue;
        }
        adj.entry(e.a).or_default().push((e.b, e.weight));
        adj.entry(e.b).or_default().push((e.a, e.weight));
    }
    adj
}

/// Sort clusters by size descending (ties broken by the smallest member id,
/// for determinism) and assign a dense 1-based ordering (§8 invariant 11).
/// Any file id in `universe` absent from every cluster is appended as its
/// own singleton, so the union of members always equals the universe
/// (§8 invariant 10) — callers that report noise separately (DBSCAN) pass
/// a universe already reduced by their noise set.
pub(crate) fn finalize_clusters(mut clusters: Vec<Vec<u64>>, universe: &[u64]) -> Vec<Vec<u64>> {
    let covered: HashSet<u64> = clusters.iter().flatten().copied().collect();
    for &id in universe {
        if !covered.contains(&id) {
            clusters.push(vec![id]);
        }
    }
    for c in &mut clusters {
        c.sort_unstable();
    }
    clusters.sort_by(|a, b| {
        b.len()
            .cmp(&a.len())
            .then_with(|| a.first().cmp(&b.first()))
    });
    clusters
}

/// Dispatch by algorithm name. `params` is algorithm-specific JSON,
/// deserialized into that algorithm's own parameter struct.
pub fn run(name: &str, edges: &[EdgeInput], file_ids: &[u64], params: &Value) -> Result<ClusterResult> {
    match name {
        "connected_components" => {
            let p: components::Params = parse_params(params)?;
            Ok(components::run(edges, file_ids, &p))
        }
        "louvain" => {
            let p: louvain::Params = parse_params(params)?;
            Ok(louvain::run(edges, file_ids, &p))
        }
        "label_propagation" => {
            let p: label_propagation::Params = parse_params(params)?;
            Ok(label_propagation::run(edges, file_ids, &p))
        }
        "hierarchical" => {
            let p: hierarchical::Params = parse_params(params)?;
            Ok(hierarchical::run(edges, file_ids, &p))
        }
        "dbscan" => {
            let p: dbscan::Params = parse_params(params)?;
            Ok(dbscan::run(edges, file_ids, &p))
        }
        other => Err(CouplingError::UnknownAlgorithm(other.to_string())),
    }
}

fn parse_params<T: for<'de> Deserialize<'de> + Default>(value: &Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
        .map_err(|e| CouplingError::ConfigError(format!("invalid clustering parameters: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_algorithm_is_a_config_error() {
        let err = run("not_a_real_algorithm", &[], &[], &Value::Null).unwrap_err();
        assert!(matches!(err, CouplingError::UnknownAlgorithm(_)));
    }

    #[test]
    fn finalize_clusters_covers_isolated_nodes() {
        let clusters = vec![vec![1, 2]];
        let out = finalize_clusters(clusters, &[1, 2, 3]);
        let total: usize = out.iter().map(|c| c.len()).sum();
        assert_eq!(total, 3);
        assert!(out.iter().any(|c| c == &vec![3]));
    }

    #[test]
    fn finalize_clusters_orders_by_size_descending() {
        let clusters = vec![vec![1], vec![2, 3, 4], vec![5, 6]];
        let out = finalize_clusters(clusters, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(out[0].len(), 3);
        assert_eq!(out[1].len(), 2);
        assert_eq!(out[2].len(), 1);
    }

    // §8 invariants 10-11: the output covers the whole universe and is
    // ordered by size descending, regardless of what partial clustering
    // feeds in.
    #[quickcheck_macros::quickcheck]
    fn prop_finalize_clusters_covers_universe_and_orders_by_size(raw: Vec<Vec<u8>>) -> quickcheck::TestResult {
        if raw.len() > 12 {
            return quickcheck::TestResult::discard();
        }
        let universe: Vec<u64> = (0..8).collect();
        let clusters: Vec<Vec<u64>> = raw
            .iter()
            .map(|c| c.iter().map(|&b| b as u64 % 8).collect())
            .collect();
        let out = finalize_clusters(clusters, &universe);

        let covered: HashSet<u64> = out.iter().flatten().copied().collect();
        let expected: HashSet<u64> = universe.iter().copied().collect();
        if covered != expected {
            return quickcheck::TestResult::failed();
        }
        for w in out.windows(2) {
            if w[0].len() < w[1].len() {
                return quickcheck::TestResult::failed();
            }
        }
        quickcheck::TestResult::passed()
    }
}
