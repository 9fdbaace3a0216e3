//! Agglomerative hierarchical clustering over the distance space
//! `d = 1 - weight`. Builds a dense pairwise distance matrix (absent edges
//! are maximally dissimilar, `d = 1.0`) and merges the closest pair
//! repeatedly until the requested cut is reached.
//!
//! `ward` is approximated via the classic Lance-Williams increase-in-
//! variance heuristic applied to our generic dissimilarity rather than a
//! true sum-of-squares criterion (which needs a vector space, not just
//! pairwise distances) — see DESIGN.md.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ClusterResult, EdgeInput, finalize_clusters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    Single,
    Complete,
    Average,
    Ward,
}

impl Default for Linkage {
    fn default() -> Self {
        Linkage::Average
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Params {
    #[serde(default)]
    pub linkage: Linkage,
    /// Stop once exactly this many clusters remain. Takes precedence over
    /// `cut_distance` if both are set.
    #[serde(default)]
    pub cut_count: Option<usize>,
    /// Stop merging once the closest remaining pair exceeds this distance.
    #[serde(default)]
    pub cut_distance: Option<f64>,
}

struct Cluster {
    members: Vec<usize>,
}

pub fn run(edges: &[EdgeInput], file_ids: &[u64], params: &Params) -> ClusterResult {
    let mut nodes: Vec<u64> = file_ids.to_vec();
    for e in edges {
        if !nodes.contains(&e.a) {
            nodes.push(e.a);
        }
        if !nodes.contains(&e.b) {
            nodes.push(e.b);
        }
    }
    let n = nodes.len();
    if n == 0 {
        return ClusterResult {
            algorithm: "hierarchical".to_string(),
            parameters: params_json(params),
            cluster_count: 0,
            clusters: Vec::new(),
            noise: Vec::new(),
            metrics: json!({}),
        };
    }

    let index: HashMap<u64, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let mut dist = vec![vec![1.0f64; n]; n];
    for i in 0..n {
        dist[i][i] = 0.0;
    }
    for e in edges {
        let (i, j) = (index[&e.a], index[&e.b]);
        let d = (1.0 - e.weight).clamp(0.0, 1.0);
        dist[i][j] = d;
        dist[j][i] = d;
    }

    let mut clusters: Vec<Option<Cluster>> = (0..n).map(|i| Some(Cluster { members: vec![i] })).collect();
    let cut_count = params.cut_count.unwrap_or(1).max(1);

    loop {
        let alive: Vec<usize> = clusters
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| i))
            .collect();
        if alive.len() <= cut_count {
            break;
        }

        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..alive.len() {
            for b in (a + 1)..alive.len() {
                let (ci, cj) = (alive[a], alive[b]);
                let d = linkage_distance(
                    &dist,
                    clusters[ci].as_ref().unwrap(),
                    clusters[cj].as_ref().unwrap(),
                    params.linkage,
                );
                if best.is_none_or(|(_, _, bd)| d < bd) {
                    best = Some((ci, cj, d));
                }
            }
        }
        let Some((ci, cj, d)) = best else { break };

        if params.cut_count.is_none() {
            if let Some(threshold) = params.cut_distance {
                if d > threshold {
                    break;
                }
            }
        }

        let mut merged = clusters[cj].take().unwrap().members;
        clusters[ci].as_mut().unwrap().members.append(&mut merged);
    }

    let groups: Vec<Vec<u64>> = clusters
        .into_iter()
        .flatten()
        .map(|c| c.members.into_iter().map(|i| nodes[i]).collect())
        .collect();
    let clusters = finalize_clusters(groups, &nodes);

    ClusterResult {
        algorithm: "hierarchical".to_string(),
        parameters: params_json(params),
        cluster_count: clusters.len(),
        clusters,
        noise: Vec::new(),
        metrics: json!({}),
    }
}

fn linkage_distance(dist: &[Vec<f64>], a: &Cluster, b: &Cluster, linkage: Linkage) -> f64 {
    match linkage {
        Linkage::Single => a
            .members
            .iter()
            .flat_map(|&i| b.members.iter().map(move |&j| dist[i][j]))
            .fold(f64::INFINITY, f64::min),
        Linkage::Complete => a
            .members
            .iter()
            .flat_map(|&i| b.members.iter().map(move |&j| dist[i][j]))
            .fold(0.0, f64::max),
        Linkage::Average => {
            let sum: f64 = a.members.iter().flat_map(|&i| b.members.iter().map(move |&j| dist[i][j])).sum();
            sum / (a.members.len() * b.members.len()) as f64
        }
        Linkage::Ward => {
            let avg = {
                let sum: f64 = a.members.iter().flat_map(|&i| b.members.iter().map(move |&j| dist[i][j])).sum();
                sum / (a.members.len() * b.members.len()) as f64
            };
            let (na, nb) = (a.members.len() as f64, b.members.len() as f64);
            ((na * nb) / (na + nb)).sqrt() * avg
        }
    }
}

fn params_json(params: &Params) -> serde_json::Value {
    json!({
        "linkage": params.linkage,
        "cut_count": params.cut_count,
        "cut_distance": params.cut_distance,
    })
}
