//! Sparse weighted digraph and power-iteration PageRank

use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default damping factor
pub const DAMPING: f64 = 0.85;

/// Default L1 convergence tolerance
pub const TOLERANCE: f64 = 1e-8;

/// Safety net for pathological inputs; convergence normally takes < 100 rounds
pub const MAX_ITERATIONS: usize = 10_000;

/// Directed graph with weighted edges between named nodes
///
/// Nodes are indexed in insertion order; adding the same edge twice adds the
/// weights.
#[derive(Debug, Clone, Default)]
pub struct WeightedDigraph {
    index: BTreeMap<String, usize>,
    names: Vec<String>,
    /// Outgoing `(target, weight)` per node
    out_edges: Vec<Vec<(usize, f64)>>,
}

impl WeightedDigraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, inserting a new node if needed
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.names.len();
        self.index.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.out_edges.push(Vec::new());
        id
    }

    pub fn add_edge(&mut self, from: &str, to: &str, weight: f64) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        let edges = &mut self.out_edges[from];
        match edges.iter_mut().find(|(target, _)| *target == to) {
            Some((_, w)) => *w += weight,
            None => edges.push((to, weight)),
        }
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// PageRank by power iteration
    ///
    /// Each round every node keeps `(1 - damping) / n` as teleport mass and
    /// passes `damping` of its rank along its out-edges in proportion to their
    /// weight. Nodes without out-edges (or only zero-weight ones) spread their
    /// rank uniformly. Stops once the L1 change between rounds drops below
    /// `tolerance`. Returned scores sum to 1.
    pub fn page_rank(&self, damping: f64, tolerance: f64) -> BTreeMap<String, f64> {
        let n = self.node_count();
        if n == 0 {
            return BTreeMap::new();
        }

        let n_f = n as f64;
        let out_weight: Vec<f64> = self
            .out_edges
            .iter()
            .map(|edges| edges.iter().map(|(_, w)| w.max(0.0)).sum())
            .collect();

        let mut rank = vec![1.0 / n_f; n];
        let mut next = vec![0.0; n];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < MAX_ITERATIONS {
            iterations += 1;

            let dangling: f64 = (0..n)
                .filter(|&i| out_weight[i] <= 0.0)
                .map(|i| rank[i])
                .sum();
            let base = (1.0 - damping) / n_f + damping * dangling / n_f;
            next.iter_mut().for_each(|r| *r = base);

            for (from, edges) in self.out_edges.iter().enumerate() {
                if out_weight[from] <= 0.0 {
                    continue;
                }
                let share = damping * rank[from] / out_weight[from];
                for &(to, weight) in edges {
                    next[to] += share * weight.max(0.0);
                }
            }

            let delta: f64 = rank.iter().zip(&next).map(|(a, b)| (a - b).abs()).sum();
            std::mem::swap(&mut rank, &mut next);

            if delta < tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            debug!(nodes = n, iterations, "PageRank converged");
        } else {
            warn!(nodes = n, iterations, "PageRank hit the iteration cap");
        }

        self.names.iter().cloned().zip(rank).collect()
    }
}
