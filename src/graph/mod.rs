//! Approval graph and influence ranking
//!
//! Turns loaded pull requests into the force-graph document:
//!
//! 1. [`collect_approvals`] counts `requester → reviewer` approvals
//! 2. the counts become a [`WeightedDigraph`] with weight `freq / total × 100`
//! 3. [`WeightedDigraph::page_rank`] scores every contributor
//! 4. scores are min-max scaled to `[0, 10]` and bucketed into display groups

mod approvals;
mod pagerank;
mod window;

pub use approvals::{collect_approvals, ApprovalEdge, Approvals};
pub use pagerank::{WeightedDigraph, DAMPING, MAX_ITERATIONS, TOLERANCE};
pub use window::{filter_by_window, TimeWindow};

use crate::github::PullDetails;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Weighted link as rendered by the visualization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceGraphLink {
    pub source: String,
    pub target: String,
    /// Approval count
    pub value: u64,
}

impl From<&ApprovalEdge> for ForceGraphLink {
    fn from(edge: &ApprovalEdge) -> Self {
        Self {
            source: edge.requester.clone(),
            target: edge.reviewer.clone(),
            value: edge.frequency,
        }
    }
}

/// One contributor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceGraphNode {
    /// Login
    pub id: String,
    /// Rank scaled to `[0, 10]`
    pub score: f64,
    /// Contributors joined to this one by an approval in either direction
    pub neighbors: Vec<String>,
    /// Outgoing links (approvals this contributor received)
    pub links: Vec<ForceGraphLink>,
    /// Display tier, "1" for the top-ranked contributors
    pub group: String,
    /// Unscaled PageRank score
    #[serde(skip)]
    pub raw_score: f64,
}

/// Document consumed by the force-directed visualization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForceGraph {
    pub nodes: Vec<ForceGraphNode>,
    pub links: Vec<ForceGraphLink>,
}

impl ForceGraph {
    /// The `n` highest-ranked contributors, best first
    pub fn top_ranked(&self, n: usize) -> Vec<&ForceGraphNode> {
        let mut ranked: Vec<&ForceGraphNode> = self.nodes.iter().collect();
        ranked.sort_by(|a, b| {
            b.raw_score
                .total_cmp(&a.raw_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked.truncate(n);
        ranked
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// `10 × ((score − min) / (max − min))`, or 0 when all scores are equal
///
/// Dividing first keeps the maximum at exactly 10.
pub fn normalize_score(score: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range <= 0.0 || !range.is_finite() {
        return 0.0;
    }
    (10.0 * ((score - min) / range)).clamp(0.0, 10.0)
}

/// Number of doublings (plus one) needed to lift `score` to `max`
pub fn score_group(score: f64, max: f64) -> u32 {
    if score <= 0.0 || !score.is_finite() {
        return 1;
    }
    let mut group = 1;
    let mut score = score;
    while score < max {
        score *= 2.0;
        group += 1;
    }
    group
}

/// Build the force-graph document for a set of pull requests
pub fn build_force_graph(details: &[PullDetails]) -> ForceGraph {
    let approvals = collect_approvals(details);
    if approvals.total == 0 {
        info!(pulls = details.len(), "No approvals in range, empty graph");
        return ForceGraph::default();
    }

    let total = approvals.total as f64;
    let mut graph = WeightedDigraph::new();
    for edge in &approvals.edges {
        let weight = edge.frequency as f64 / total * 100.0;
        graph.add_edge(&edge.requester, &edge.reviewer, weight);
    }

    let scores = graph.page_rank(DAMPING, TOLERANCE);
    let min = scores.values().copied().fold(f64::INFINITY, f64::min);
    let max = scores.values().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut neighbors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut outgoing: BTreeMap<&str, Vec<ForceGraphLink>> = BTreeMap::new();
    for edge in &approvals.edges {
        let (from, to) = (edge.requester.as_str(), edge.reviewer.as_str());
        neighbors.entry(from).or_default().insert(to);
        neighbors.entry(to).or_default().insert(from);
        outgoing.entry(from).or_default().push(edge.into());
    }

    let nodes: Vec<ForceGraphNode> = scores
        .iter()
        .map(|(id, &raw_score)| ForceGraphNode {
            id: id.clone(),
            score: normalize_score(raw_score, min, max),
            neighbors: neighbors
                .get(id.as_str())
                .map(|set| set.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            links: outgoing.remove(id.as_str()).unwrap_or_default(),
            group: score_group(raw_score, max).to_string(),
            raw_score,
        })
        .collect();

    let links: Vec<ForceGraphLink> = approvals.edges.iter().map(ForceGraphLink::from).collect();

    info!(
        pulls = details.len(),
        approvals = approvals.total,
        nodes = nodes.len(),
        links = links.len(),
        "Built force graph"
    );

    ForceGraph { nodes, links }
}
