//! Incremental ingestion of pull-request history into the durable cache
//!
//! [`SyncEngine`] pages through the remote listing and writes raw records;
//! [`RecordLoader`] reassembles them into [`crate::github::PullDetails`].
//!
//! Cache layout per repository namespace:
//!
//! ```text
//! metadata          SyncCursor
//! {n}               PullRequest
//! {n}/reviews       [Review]
//! {n}/files         [CommitFile]
//! ```

pub mod loader;
pub mod sync;

pub use loader::RecordLoader;
pub use sync::SyncEngine;

use crate::github::RetryConfig;
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reserved cache key holding the [`SyncCursor`]
pub const METADATA_KEY: &str = "metadata";

pub fn reviews_key(number: u64) -> String {
    format!("{}/reviews", number)
}

pub fn files_key(number: u64) -> String {
    format!("{}/files", number)
}

/// Resumable sync position for one repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// When the last pass that ingested anything finished
    #[serde(rename = "lastModifiedTime")]
    pub last_sync_time: DateTime<Utc>,

    /// Highest pull number seen by that pass; -1 before the first one
    #[serde(rename = "lastPullNumber")]
    pub last_pull_number: i64,
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self {
            last_sync_time: DateTime::UNIX_EPOCH,
            last_pull_number: -1,
        }
    }
}

impl SyncCursor {
    /// True while `now` is still inside the cooldown after the last sync
    pub fn is_fresh(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match chrono::Duration::from_std(cooldown) {
            Ok(cooldown) => self.last_sync_time > now - cooldown,
            Err(_) => true,
        }
    }

    /// Read the cursor, creating and persisting the sentinel cursor if absent
    pub fn read_or_create(store: &dyn Store) -> crate::Result<Self> {
        match store.get(METADATA_KEY) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(StoreError::NotFound(_)) => {
                let cursor = Self::default();
                cursor.save(store)?;
                tracing::debug!("Created initial sync cursor");
                Ok(cursor)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, store: &dyn Store) -> crate::Result<()> {
        let bytes = serde_json::to_vec(self)?;
        store.put(METADATA_KEY, &bytes)?;
        Ok(())
    }
}

/// Ingestion tuning
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between two passes that contact the remote API
    pub cooldown: Duration,
    /// Listing page size
    pub per_page: u32,
    /// Pull requests whose reviews and files are fetched concurrently
    pub workers: usize,
    /// Transient-failure retries
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(20),
            per_page: 100,
            workers: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Outcome of one [`SyncEngine::sync`] call
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// The cooldown had not elapsed; nothing was fetched
    pub skipped: bool,
    /// Merged pull requests written to the cache
    pub pulls_ingested: usize,
    pub pages_fetched: u32,
    /// Stopped at a pull request already covered by the cursor
    pub early_exit: bool,
    /// Cursor in effect after the pass
    pub cursor: SyncCursor,
}

impl SyncReport {
    fn skipped(cursor: SyncCursor) -> Self {
        Self {
            skipped: true,
            pulls_ingested: 0,
            pages_fetched: 0,
            early_exit: false,
            cursor,
        }
    }
}
