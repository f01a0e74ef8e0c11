//! Prometheus metrics for ingestion and graph serving
//!
//! Exposed by the Query Service on `/metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Histogram: pipeline stage duration (seconds)
    pub static ref STAGE_DURATION: HistogramVec = register_histogram_vec!(
        "reviewgraph_stage_duration_seconds",
        "Duration of pipeline stages",
        &["stage"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    )
    .expect("Failed to create stage_duration metric");

    /// Counter: API errors by kind (transient/permanent)
    pub static ref API_ERRORS: CounterVec = register_counter_vec!(
        "reviewgraph_api_errors_total",
        "Total GitHub API errors by kind",
        &["kind"]
    )
    .expect("Failed to create api_errors metric");

    /// Counter: rate-limit pauses
    pub static ref RATE_LIMIT_WAITS: Counter = register_counter!(
        "reviewgraph_rate_limit_waits_total",
        "Number of times ingestion paused for a rate limit"
    )
    .expect("Failed to create rate_limit_waits metric");

    /// Counter: pull requests written to the cache
    pub static ref PULLS_INGESTED: Counter = register_counter!(
        "reviewgraph_pulls_ingested_total",
        "Merged pull requests written to the cache"
    )
    .expect("Failed to create pulls_ingested metric");

    /// Counter: cached records the loader could not read
    pub static ref LOADER_SKIPS: Counter = register_counter!(
        "reviewgraph_loader_skipped_records_total",
        "Cached records skipped because they could not be read or decoded"
    )
    .expect("Failed to create loader_skips metric");

    /// Gauge: size of the last graph built per repository
    pub static ref GRAPH_SIZE: GaugeVec = register_gauge_vec!(
        "reviewgraph_graph_size",
        "Nodes and links in the last graph built",
        &["repo", "kind"]
    )
    .expect("Failed to create graph_size metric");

    /// Counter: graph requests by outcome
    pub static ref GRAPH_REQUESTS: CounterVec = register_counter_vec!(
        "reviewgraph_graph_requests_total",
        "Graph requests by status",
        &["status"]
    )
    .expect("Failed to create graph_requests metric");
}

/// Record a pipeline stage duration
pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    STAGE_DURATION
        .with_label_values(&[stage])
        .observe(duration_secs);
}

/// Increment API error counter
pub fn record_api_error(kind: &str) {
    API_ERRORS.with_label_values(&[kind]).inc();
}

pub fn record_rate_limit_wait() {
    RATE_LIMIT_WAITS.inc();
}

pub fn record_pulls_ingested(count: usize) {
    PULLS_INGESTED.inc_by(count as f64);
}

pub fn record_loader_skip() {
    LOADER_SKIPS.inc();
}

/// Set node/link counts for a repository's graph
pub fn set_graph_size(repo: &str, nodes: usize, links: usize) {
    GRAPH_SIZE
        .with_label_values(&[repo, "nodes"])
        .set(nodes as f64);
    GRAPH_SIZE
        .with_label_values(&[repo, "links"])
        .set(links as f64);
}

/// Record a graph request outcome
pub fn record_graph_request(status: &str) {
    GRAPH_REQUESTS.with_label_values(&[status]).inc();
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
