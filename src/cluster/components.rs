//! Connected-components clustering: union-find with path compression and
//! union-by-rank, over edges at or above `min_weight`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ClusterResult, EdgeInput, finalize_clusters};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub min_weight: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self { min_weight: 0.0 }
    }
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

pub fn run(edges: &[EdgeInput], file_ids: &[u64], params: &Params) -> ClusterResult {
    let mut index: HashMap<u64, usize> = HashMap::new();
    for &id in file_ids {
        let next = index.len();
        index.entry(id).or_insert(next);
    }
    for e in edges {
        for &id in [e.a, e.b].iter() {
            let next = index.len();
            index.entry(id).or_insert(next);
        }
    }

    let mut uf = UnionFind::new(index.len());
    for e in edges {
        if e.weight < params.min_weight {
            continue;
        }
        uf.union(index[&e.a], index[&e.b]);
    }

    let mut groups: HashMap<usize, Vec<u64>> = HashMap::new();
    for (&id, &i) in &index {
        let root = uf.find(i);
        groups.entry(root).or_default().push(id);
    }

    let clusters = finalize_clusters(groups.into_values().collect(), file_ids);
    ClusterResult {
        algorithm: "connected_components".to_string(),
        parameters: json!({ "min_weight": params.min_weight }),
        cluster_count: clusters.len(),
        clusters,
        noise: Vec::new(),
        metrics: json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_of_edges_forms_one_component() {
        let edges = vec![
            EdgeInput { a: 1, b: 2, weight: 1.0 },
            EdgeInput { a: 2, b: 3, weight: 1.0 },
        ];
        let result = run(&edges, &[1, 2, 3, 4], &Params::default());
        assert_eq!(result.cluster_count, 2); // {1,2,3} and {4}
        assert_eq!(result.clusters[0], vec![1, 2, 3]);
        assert_eq!(result.clusters[1], vec![4]);
    }

    #[test]
    fn min_weight_drops_weak_edges() {
        let edges = vec![EdgeInput { a: 1, b: 2, weight: 0.1 }];
        let result = run(&edges, &[1, 2], &Params { min_weight: 0.5 });
        assert_eq!(result.cluster_count, 2);
    }
}
