//! Resumable sync of merged pull requests, their reviews and changed files

use super::{files_key, reviews_key, SyncConfig, SyncCursor, SyncReport};
use crate::github::retry::with_retry;
use crate::github::{ApiError, Page, PullRequest, PullRequestApi, RateLimitGate};
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::{ReviewGraphError, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Pulls a repository's closed pull requests into the cache
///
/// One engine serves one repository namespace (the store is already scoped to
/// it). Running two engines against the same namespace at once is not
/// supported.
pub struct SyncEngine {
    api: Arc<dyn PullRequestApi>,
    store: Arc<dyn Store>,
    config: SyncConfig,
    gate: RateLimitGate,
    shutdown: Shutdown,
}

impl SyncEngine {
    pub fn new(api: Arc<dyn PullRequestApi>, store: Arc<dyn Store>, config: SyncConfig) -> Self {
        Self {
            api,
            store,
            config,
            gate: RateLimitGate::new(),
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Share a rate-limit pause with other engines using the same credentials
    pub fn with_rate_limit_gate(mut self, gate: RateLimitGate) -> Self {
        self.gate = gate;
        self
    }

    /// Run one sync pass
    ///
    /// Returns early (skipped) inside the cooldown. Any error leaves the cursor
    /// where it was, so the next pass re-fetches everything this one touched.
    pub async fn sync(&self, owner: &str, repo: &str) -> Result<SyncReport> {
        let cursor = self
            .run_blocking(|store| SyncCursor::read_or_create(store))
            .await?;
        let now = Utc::now();

        if cursor.is_fresh(now, self.config.cooldown) {
            info!(
                owner,
                repo,
                last_sync = %cursor.last_sync_time,
                "Synced recently, not updating"
            );
            return Ok(SyncReport::skipped(cursor));
        }

        debug!(owner, repo, cursor = ?cursor, "Starting sync");

        let mut pulls_ingested = 0;
        let mut pages_fetched = 0;
        let mut early_exit = false;
        let mut highest = cursor.last_pull_number;
        let mut page = 1;

        loop {
            self.shutdown.check()?;

            let per_page = self.config.per_page;
            let listing = with_retry(
                &self.config.retry,
                &self.gate,
                &self.shutdown,
                "list_closed_pulls",
                || self.api.list_closed_pulls(owner, repo, page, per_page),
            )
            .await?;
            pages_fetched += 1;

            let mut merged = Vec::new();
            for pull in listing.items {
                let number = pull.number as i64;
                if number <= cursor.last_pull_number {
                    info!(
                        owner,
                        repo,
                        number,
                        "Reached previously synced pull requests, exiting early"
                    );
                    early_exit = true;
                    break;
                }
                highest = highest.max(number);

                if pull.is_merged() {
                    merged.push(pull);
                } else {
                    debug!(number, "Skipping unmerged pull request");
                }
            }

            let ingested = self.ingest_page(owner, repo, merged).await?;
            pulls_ingested += ingested;
            crate::metrics::record_pulls_ingested(ingested);

            if early_exit {
                break;
            }
            match listing.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        let cursor = if pulls_ingested > 0 {
            let advanced = SyncCursor {
                last_sync_time: Utc::now(),
                last_pull_number: highest,
            };
            let saved = advanced.clone();
            self.run_blocking(move |store| saved.save(store)).await?;
            advanced
        } else {
            cursor
        };

        info!(
            owner,
            repo,
            pulls_ingested,
            pages_fetched,
            early_exit,
            last_pull_number = cursor.last_pull_number,
            "Sync complete"
        );

        Ok(SyncReport {
            skipped: false,
            pulls_ingested,
            pages_fetched,
            early_exit,
            cursor,
        })
    }

    /// Persist a page's merged pull requests with bounded concurrency; the
    /// first failure aborts the rest of the page.
    async fn ingest_page(&self, owner: &str, repo: &str, pulls: Vec<PullRequest>) -> Result<usize> {
        if pulls.is_empty() {
            return Ok(0);
        }

        let done: Vec<u64> = stream::iter(pulls)
            .map(|pull| self.ingest_pull(owner, repo, pull))
            .buffer_unordered(self.config.workers.max(1))
            .try_collect()
            .await?;

        Ok(done.len())
    }

    async fn ingest_pull(&self, owner: &str, repo: &str, pull: PullRequest) -> Result<u64> {
        let number = pull.number;
        let per_page = self.config.per_page;

        self.put_json(number.to_string(), &pull).await?;

        let reviews = self
            .collect_pages("list_reviews", |page| {
                self.api.list_reviews(owner, repo, number, page, per_page)
            })
            .await?;
        self.put_json(reviews_key(number), &reviews).await?;

        let files = self
            .collect_pages("list_files", |page| {
                self.api.list_files(owner, repo, number, page, per_page)
            })
            .await?;
        self.put_json(files_key(number), &files).await?;

        debug!(
            number,
            reviews = reviews.len(),
            files = files.len(),
            "Downloaded pull request details"
        );
        Ok(number)
    }

    /// Follow `next_page` links until the listing is exhausted
    async fn collect_pages<T, F, Fut>(&self, operation_name: &str, mut fetch: F) -> Result<Vec<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, ApiError>>,
    {
        let mut items = Vec::new();
        let mut page = 1;

        loop {
            self.shutdown.check()?;
            let listing = with_retry(
                &self.config.retry,
                &self.gate,
                &self.shutdown,
                operation_name,
                || fetch(page),
            )
            .await?;
            items.extend(listing.items);

            match listing.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(items)
    }

    async fn put_json<T: Serialize + ?Sized>(&self, key: String, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.run_blocking(move |store| Ok(store.put(&key, &bytes)?))
            .await
    }

    /// Run a store operation on the blocking pool
    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ReviewGraphError::Other(format!("Store task failed: {}", e)))?
    }
}
