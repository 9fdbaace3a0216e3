//! DBSCAN over the distance space `d = 1 - weight`. Isolated points
//! (neither a core point nor reachable from one) are reported as noise,
//! never silently folded into the nearest cluster (§4.8).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ClusterResult, EdgeInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_epsilon() -> f64 {
    0.5
}

fn default_min_samples() -> usize {
    2
}

impl Default for Params {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            min_samples: default_min_samples(),
        }
    }
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

    let mut neighbors: HashMap<u64, Vec<u64>> = nodes.iter().map(|&n| (n, Vec::new())).collect();
    for e in edges {
        let d = 1.0 - e.weight;
        if d <= params.epsilon {
            neighbors.get_mut(&e.a).unwrap().push(e.b);
            neighbors.get_mut(&e.b).unwrap().push(e.a);
        }
    }

    let mut visited: HashSet<u64> = HashSet::new();
    let mut assigned: HashMap<u64, usize> = HashMap::new();
    let mut clusters: Vec<Vec<u64>> = Vec::new();
    let mut noise: Vec<u64> = Vec::new();

    for &node in &nodes {
        if visited.contains(&node) {
            continue;
        }
        visited.insert(node);
        let n_neighbors = neighbors[&node].len();
        if n_neighbors + 1 < params.min_samples {
            noise.push(node);
            continue;
        }

        let cluster_idx = clusters.len();
        clusters.push(vec![node]);
        assigned.insert(node, cluster_idx);

        let mut queue: Vec<u64> = neighbors[&node].clone();
        let mut i = 0;
        while i < queue.len() {
            let q = queue[i];
            i += 1;
            if !visited.contains(&q) {
                visited.insert(q);
                if neighbors[&q].len() + 1 >= params.min_samples {
                    for &nb in &neighbors[&q] {
                        if !queue.contains(&nb) {
                            queue.push(nb);
                        }
                    }
                }
            }
            if !assigned.contains_key(&q) {
                assigned.insert(q, cluster_idx);
                clusters[cluster_idx].push(q);
            }
        }
    }

    // demote any point that ended up reachable only from a non-core seed
    // back to noise if it was never actually assigned (defensive; the loop
    // above already assigns every visited, reachable point).
    noise.retain(|n| !assigned.contains_key(n));

    for c in &mut clusters {
        c.sort_unstable();
    }
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.first().cmp(&b.first())));
    noise.sort_unstable();

    ClusterResult {
        algorithm: "dbscan".to_string(),
        parameters: json!({ "epsilon": params.epsilon, "min_samples": params.min_samples }),
        cluster_count: clusters.len(),
        clusters,
        noise,
        metrics: json!({ "noise_count": noise.len() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_triangle_is_one_cluster_isolated_node_is_noise() {
        let edges = vec![
            EdgeInput { a: 1, b: 2, weight: 0.9 },
            EdgeInput { a: 2, b: 3, weight: 0.9 },
            EdgeInput { a: 1, b: 3, weight: 0.9 },
        ];
        let params = Params { epsilon: 0.3, min_samples: 2 };
        let result = run(&edges, &[1, 2, 3, 4], &params);
        assert_eq!(result.cluster_count, 1);
        assert_eq!(result.clusters[0], vec![1, 2, 3]);
        assert_eq!(result.noise, vec![4]);
    }

    #[test]
    fn noise_is_never_folded_into_a_cluster() {
        let edges = vec![EdgeInput { a: 1, b: 2, weight: 0.2 }]; // distance 0.8, beyond epsilon
        let params = Params { epsilon: 0.3, min_samples: 2 };
        let result = run(&edges, &[1, 2], &params);
        assert!(result.clusters.is_empty());
        assert_eq!(result.noise.len(), 2);
    }
}
