//! HTTP Query Service
//!
//! Serves the force-graph document for a repository and time window.
//!
//! # Routes
//!
//! - `GET /graph?owner=&repo=&start=&end=` - Graph document (`start`/`end` are RFC 3339)
//! - `GET /health` - Liveness check
//! - `GET /metrics` - Prometheus text format
//!
//! # Example
//!
//! ```no_run
//! use reviewgraph::ingest::SyncConfig;
//! use reviewgraph::pipeline::Pipeline;
//! use reviewgraph::server::GraphServer;
//! use reviewgraph::shutdown::Shutdown;
//! use reviewgraph::store::StoreConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = Pipeline::new(None, StoreConfig::disk("cache"), SyncConfig::default());
//!     GraphServer::new(pipeline, false)
//!         .run("127.0.0.1:8080", Shutdown::never())
//!         .await
//!         .expect("Server failed");
//! }
//! ```

use crate::graph::{ForceGraph, TimeWindow};
use crate::pipeline::Pipeline;
use crate::shutdown::Shutdown;
use crate::store::validate_segment;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared server state
struct AppState {
    pipeline: Pipeline,
    sync_on_request: bool,
    /// One sync at a time per `owner/repo`
    sync_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AppState {
    fn new(pipeline: Pipeline, sync_on_request: bool) -> Self {
        Self {
            pipeline,
            sync_on_request,
            sync_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Per-repository sync lock; the map entry goes away with the last holder
    fn repo_lock(self: &Arc<Self>, repo_key: &str) -> RepoLock {
        let mut locks = self.sync_locks.lock().unwrap_or_else(|e| e.into_inner());
        let lock = locks.entry(repo_key.to_string()).or_default().clone();
        RepoLock {
            state: Arc::clone(self),
            repo_key: repo_key.to_string(),
            lock: Some(lock),
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.sync_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Handle on one repository's sync lock, also released if the request is dropped
struct RepoLock {
    state: Arc<AppState>,
    repo_key: String,
    lock: Option<Arc<Mutex<()>>>,
}

impl RepoLock {
    fn mutex(&self) -> Arc<Mutex<()>> {
        self.lock.clone().unwrap_or_default()
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        drop(self.lock.take());
        let mut locks = self
            .state
            .sync_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.repo_key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.repo_key);
        }
    }
}

/// HTTP server for graph queries
pub struct GraphServer {
    state: Arc<AppState>,
}

impl GraphServer {
    /// `sync_on_request` runs a (cooldown-limited) sync before each graph request
    pub fn new(pipeline: Pipeline, sync_on_request: bool) -> Self {
        Self {
            state: Arc::new(AppState::new(pipeline, sync_on_request)),
        }
    }

    fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/graph", get(get_graph))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .with_state(state)
    }

    /// Serve on `addr` until `shutdown` fires, then drain open connections
    pub async fn run(self, addr: &str, shutdown: Shutdown) -> crate::Result<()> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            crate::ReviewGraphError::Config(format!("Failed to bind {}: {}", addr, e))
        })?;

        tracing::info!(
            addr = addr,
            sync_on_request = self.state.sync_on_request,
            "Graph server listening"
        );

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(async move { shutdown.triggered().await })
            .await?;

        tracing::info!("Graph server stopped");
        Ok(())
    }
}

/// Query parameters of `GET /graph`
#[derive(Debug, Deserialize)]
pub struct GraphQuery {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Parse an RFC 3339 bound; absent or unparseable values fall back to the default
fn parse_bound(name: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(value) {
        Ok(time) => Some(time.with_timezone(&Utc)),
        Err(e) => {
            debug!(bound = name, value, error = %e, "Ignoring unparseable time bound");
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::encode_metrics(),
    )
}

async fn get_graph(State(state): State<Arc<AppState>>, Query(query): Query<GraphQuery>) -> Response {
    let (Some(owner), Some(repo)) = (non_empty(query.owner), non_empty(query.repo)) else {
        crate::metrics::record_graph_request("bad_request");
        return StatusCode::BAD_REQUEST.into_response();
    };

    if let Err(e) = validate_segment(&owner).and_then(|_| validate_segment(&repo)) {
        debug!(owner = %owner, repo = %repo, error = %e, "Rejecting invalid repository name");
        crate::metrics::record_graph_request("error");
        return Json(ForceGraph::default()).into_response();
    }

    let window = TimeWindow::from_bounds(
        parse_bound("start", query.start.as_deref()),
        parse_bound("end", query.end.as_deref()),
    );

    let sync = state.sync_on_request && state.pipeline.can_sync();
    let result = if sync {
        let repo_lock = state.repo_lock(&format!("{}/{}", owner, repo));
        let mutex = repo_lock.mutex();
        let _guard = mutex.lock().await;
        state.pipeline.run(&owner, &repo, &window, true).await
    } else {
        state.pipeline.run(&owner, &repo, &window, false).await
    };

    match result {
        Ok(graph) => {
            crate::metrics::record_graph_request("ok");
            Json(graph).into_response()
        }
        Err(e) => {
            warn!(owner = %owner, repo = %repo, error = %e, "Failed to build graph");
            crate::metrics::record_graph_request("error");
            Json(ForceGraph::default()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{ApiError, CommitFile, Page, PullRequest, PullRequestApi, RateLimitInfo, Review};
    use crate::ingest::SyncConfig;
    use crate::store::{Store, StoreConfig};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn seed(store: &dyn Store) {
        let pull = serde_json::json!({
            "number": 1,
            "user": {"login": "alice", "id": 1},
            "created_at": "2024-01-15T00:00:00Z",
            "merged_at": "2024-01-16T00:00:00Z"
        });
        let reviews = serde_json::json!([
            {"id": 1, "user": {"login": "bob", "id": 2}, "state": "APPROVED"}
        ]);
        store.put("1", &serde_json::to_vec(&pull).unwrap()).unwrap();
        store
            .put("1/reviews", &serde_json::to_vec(&reviews).unwrap())
            .unwrap();
        store.put("1/files", b"[]").unwrap();
    }

    fn create_test_server() -> (Arc<AppState>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let stores = StoreConfig::disk(temp_dir.path());
        seed(stores.open("octo", "widgets").unwrap().as_ref());

        let pipeline = Pipeline::new(None, stores, SyncConfig::default());
        (Arc::new(AppState::new(pipeline, true)), temp_dir)
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = GraphServer::router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (state, _temp) = create_test_server();
        let (status, body) = get(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_owner_or_repo() {
        let (state, _temp) = create_test_server();

        for uri in ["/graph", "/graph?owner=octo", "/graph?repo=widgets", "/graph?owner=&repo=widgets"] {
            let (status, body) = get(state.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body.is_empty());
        }
    }

    #[tokio::test]
    async fn test_graph_document() {
        let (state, _temp) = create_test_server();

        let response = GraphServer::router(state)
            .oneshot(
                Request::builder()
                    .uri("/graph?owner=octo&repo=widgets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let graph: ForceGraph = serde_json::from_slice(&body).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.links[0].source, "alice");
        assert_eq!(graph.links[0].target, "bob");
    }

    #[tokio::test]
    async fn test_time_window() {
        let (state, _temp) = create_test_server();

        let (_, body) = get(
            state.clone(),
            "/graph?owner=octo&repo=widgets&start=2024-02-01T00:00:00Z",
        )
        .await;
        let graph: ForceGraph = serde_json::from_slice(&body).unwrap();
        assert!(graph.nodes.is_empty());

        let (_, body) = get(
            state.clone(),
            "/graph?owner=octo&repo=widgets&start=2024-01-01T00:00:00Z&end=2024-01-31T00:00:00Z",
        )
        .await;
        let graph: ForceGraph = serde_json::from_slice(&body).unwrap();
        assert_eq!(graph.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_bounds_use_defaults() {
        let (state, _temp) = create_test_server();
        let (status, body) = get(
            state,
            "/graph?owner=octo&repo=widgets&start=yesterday&end=not-a-time",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let graph: ForceGraph = serde_json::from_slice(&body).unwrap();
        assert_eq!(graph.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_failures_return_empty_document() {
        let (state, _temp) = create_test_server();

        let (status, body) = get(state.clone(), "/graph?owner=octo&repo=unknown").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"nodes":[],"links":[]}"#);

        // Repo names that cannot be a cache namespace
        let (status, body) = get(state, "/graph?owner=octo&repo=a%2Fb").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"nodes":[],"links":[]}"#);
    }

    /// Remote with no pull requests at all
    struct EmptyApi;

    #[async_trait::async_trait]
    impl PullRequestApi for EmptyApi {
        async fn list_closed_pulls(
            &self,
            _owner: &str,
            _repo: &str,
            _page: u32,
            _per_page: u32,
        ) -> Result<Page<PullRequest>, ApiError> {
            Ok(empty_page())
        }

        async fn list_reviews(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
            _page: u32,
            _per_page: u32,
        ) -> Result<Page<Review>, ApiError> {
            Ok(empty_page())
        }

        async fn list_files(
            &self,
            _owner: &str,
            _repo: &str,
            _number: u64,
            _page: u32,
            _per_page: u32,
        ) -> Result<Page<CommitFile>, ApiError> {
            Ok(empty_page())
        }
    }

    fn empty_page<T>() -> Page<T> {
        Page {
            items: Vec::new(),
            next_page: None,
            rate: RateLimitInfo::default(),
        }
    }

    #[tokio::test]
    async fn test_sync_locks_released_and_names_validated() {
        let temp_dir = TempDir::new().unwrap();
        let stores = StoreConfig::disk(temp_dir.path());
        let pipeline = Pipeline::new(Some(Arc::new(EmptyApi)), stores, SyncConfig::default());
        let state = Arc::new(AppState::new(pipeline, true));

        for n in 0..20 {
            let uri = format!("/graph?owner=octo&repo=nothing-{}", n);
            let (status, body) = get(state.clone(), &uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, br#"{"nodes":[],"links":[]}"#);
        }
        assert_eq!(state.lock_count(), 0);

        for uri in ["/graph?owner=octo&repo=..", "/graph?owner=..&repo=x", "/graph?owner=octo&repo=a%2F..%2Fb"] {
            let (status, body) = get(state.clone(), uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert_eq!(body, br#"{"nodes":[],"links":[]}"#);
        }
        assert_eq!(state.lock_count(), 0);
        assert!(!temp_dir.path().join("metadata.json").exists());
        assert!(!temp_dir.path().join("octo").join("metadata.json").exists());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _temp) = create_test_server();
        get(state.clone(), "/graph?owner=octo&repo=widgets").await;

        let (status, body) = get(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("reviewgraph_graph_requests_total"));
    }

    #[test]
    fn test_parse_bound() {
        assert!(parse_bound("start", None).is_none());
        assert!(parse_bound("start", Some("")).is_none());
        assert!(parse_bound("start", Some("2024-13-01")).is_none());
        assert_eq!(
            parse_bound("start", Some("2024-01-01T02:00:00+02:00"))
                .unwrap()
                .to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
    }
}
