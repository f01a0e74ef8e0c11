//! Sync → load → filter → build, shared by the CLI and the Query Service

use crate::github::{PullRequestApi, RateLimitGate};
use crate::graph::{build_force_graph, filter_by_window, ForceGraph, TimeWindow};
use crate::ingest::{RecordLoader, SyncConfig, SyncEngine, SyncReport};
use crate::shutdown::Shutdown;
use crate::store::StoreConfig;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Graph generation for any repository in one cache
#[derive(Clone)]
pub struct Pipeline {
    /// `None` disables syncing (offline, cache only)
    api: Option<Arc<dyn PullRequestApi>>,
    stores: StoreConfig,
    sync_config: SyncConfig,
    gate: RateLimitGate,
    shutdown: Shutdown,
}

impl Pipeline {
    pub fn new(
        api: Option<Arc<dyn PullRequestApi>>,
        stores: StoreConfig,
        sync_config: SyncConfig,
    ) -> Self {
        Self {
            api,
            stores,
            sync_config,
            gate: RateLimitGate::new(),
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn can_sync(&self) -> bool {
        self.api.is_some()
    }

    /// One sync pass for `owner/repo`
    ///
    /// All passes of this pipeline share one rate-limit pause.
    pub async fn sync(&self, owner: &str, repo: &str) -> Result<SyncReport> {
        let api = self.api.clone().ok_or_else(|| {
            crate::ReviewGraphError::Config("No GitHub client configured".to_string())
        })?;
        let store = self.stores.open(owner, repo)?;

        let started = Instant::now();
        let report = SyncEngine::new(api, store, self.sync_config.clone())
            .with_rate_limit_gate(self.gate.clone())
            .with_shutdown(self.shutdown.clone())
            .sync(owner, repo)
            .await;
        observe_stage("sync", owner, repo, started);
        report
    }

    /// Build the graph from what is already cached
    pub async fn build(&self, owner: &str, repo: &str, window: &TimeWindow) -> Result<ForceGraph> {
        let store = self.stores.open(owner, repo)?;

        let started = Instant::now();
        let details = RecordLoader::new(store)
            .with_shutdown(self.shutdown.clone())
            .load_all()
            .await?;
        observe_stage("load", owner, repo, started);
        let cached = details.len();

        let started = Instant::now();
        let details = filter_by_window(details, window);
        observe_stage("filter", owner, repo, started);

        let started = Instant::now();
        let graph = build_force_graph(&details);
        observe_stage("build", owner, repo, started);

        // Only repositories with cached data get a gauge series
        if cached > 0 {
            crate::metrics::set_graph_size(
                &format!("{}/{}", owner, repo),
                graph.nodes.len(),
                graph.links.len(),
            );
        }
        Ok(graph)
    }

    /// Optionally sync, then build
    ///
    /// A failed sync is logged and the graph is built from whatever the cache
    /// already holds.
    pub async fn run(
        &self,
        owner: &str,
        repo: &str,
        window: &TimeWindow,
        sync: bool,
    ) -> Result<ForceGraph> {
        if sync && self.can_sync() {
            match self.sync(owner, repo).await {
                Ok(report) => info!(
                    owner,
                    repo,
                    skipped = report.skipped,
                    pulls_ingested = report.pulls_ingested,
                    "Sync finished"
                ),
                Err(crate::ReviewGraphError::Cancelled) => {
                    return Err(crate::ReviewGraphError::Cancelled)
                }
                Err(e) => warn!(owner, repo, error = %e, "Sync failed, using cached data"),
            }
        }

        self.build(owner, repo, window).await
    }
}

fn observe_stage(stage: &str, owner: &str, repo: &str, started: Instant) {
    let elapsed = started.elapsed();
    info!(
        stage,
        owner,
        repo,
        elapsed_ms = elapsed.as_millis() as u64,
        "Stage complete"
    );
    crate::metrics::record_stage_duration(stage, elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn seed(store: &dyn Store, number: u64, author: &str, reviewer: &str, day: u32) {
        let pull = serde_json::json!({
            "number": number,
            "user": {"login": author, "id": 1},
            "created_at": Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            "merged_at": "2024-02-01T00:00:00Z"
        });
        let reviews = serde_json::json!([
            {"id": 1, "user": {"login": reviewer, "id": 2}, "state": "APPROVED"}
        ]);
        store
            .put(&number.to_string(), &serde_json::to_vec(&pull).unwrap())
            .unwrap();
        store
            .put(&format!("{}/reviews", number), &serde_json::to_vec(&reviews).unwrap())
            .unwrap();
        store.put(&format!("{}/files", number), b"[]").unwrap();
    }

    #[tokio::test]
    async fn test_build_from_cache_only() {
        let dir = TempDir::new().unwrap();
        let stores = StoreConfig::disk(dir.path());
        let store = stores.open("octo", "widgets").unwrap();
        seed(store.as_ref(), 1, "alice", "bob", 1);
        seed(store.as_ref(), 2, "carol", "dave", 20);

        let pipeline = Pipeline::new(None, stores, SyncConfig::default());
        assert!(!pipeline.can_sync());

        let all = pipeline
            .run("octo", "widgets", &TimeWindow::all_time(), true)
            .await
            .unwrap();
        assert_eq!(all.nodes.len(), 4);

        let january_start = TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
        );
        let early = pipeline
            .build("octo", "widgets", &january_start)
            .await
            .unwrap();
        let ids: Vec<&str> = early.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_graph_size_only_for_cached_repos() {
        let dir = TempDir::new().unwrap();
        let stores = StoreConfig::disk(dir.path());
        seed(stores.open("octo", "sized").unwrap().as_ref(), 1, "alice", "bob", 1);

        let pipeline = Pipeline::new(None, stores, SyncConfig::default());
        let window = TimeWindow::all_time();
        pipeline.build("octo", "sized", &window).await.unwrap();
        for n in 0..5 {
            pipeline
                .build("octo", &format!("missing-{}", n), &window)
                .await
                .unwrap();
        }

        let output = crate::metrics::encode_metrics();
        assert!(output.contains(r#"repo="octo/sized""#));
        assert!(!output.contains("octo/missing-"));
    }

    #[tokio::test]
    async fn test_sync_without_client_is_config_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(None, StoreConfig::disk(dir.path()), SyncConfig::default());
        assert!(matches!(
            pipeline.sync("octo", "widgets").await,
            Err(crate::ReviewGraphError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_repo_name() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::new(None, StoreConfig::disk(dir.path()), SyncConfig::default());
        let result = pipeline
            .build("octo", "../etc", &TimeWindow::all_time())
            .await;
        assert!(matches!(result, Err(crate::ReviewGraphError::Store(_))));
    }
}
