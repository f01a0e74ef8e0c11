//! Parallel reassembly of cached records into [`PullDetails`]

use super::{files_key, reviews_key, METADATA_KEY};
use crate::github::{CommitFile, PullDetails, PullRequest, Review};
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::{ReviewGraphError, Result};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Loads every cached pull request of one repository namespace
pub struct RecordLoader {
    store: Arc<dyn Store>,
    shutdown: Shutdown,
}

impl RecordLoader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Load all records, one blocking task per pull request
    ///
    /// Records that cannot be read or decoded are logged and skipped. The
    /// result order is unspecified.
    pub async fn load_all(&self) -> Result<Vec<PullDetails>> {
        self.shutdown.check()?;

        let store = Arc::clone(&self.store);
        let keys = tokio::task::spawn_blocking(move || store.keys())
            .await
            .map_err(|e| ReviewGraphError::Other(format!("Key listing task failed: {}", e)))??;

        let mut set = JoinSet::new();
        for key in keys {
            if key == METADATA_KEY || key.contains('/') {
                continue;
            }
            let store = Arc::clone(&self.store);
            set.spawn_blocking(move || load_record(store.as_ref(), &key).map_err(|e| (key, e)));
        }

        let mut loaded = Vec::with_capacity(set.len());
        loop {
            let joined = tokio::select! {
                joined = set.join_next() => joined,
                _ = self.shutdown.triggered() => {
                    set.abort_all();
                    return Err(ReviewGraphError::Cancelled);
                }
            };

            match joined {
                None => break,
                Some(Ok(Ok(details))) => loaded.push(details),
                Some(Ok(Err((key, e)))) => {
                    warn!(key = %key, error = %e, "Skipping unreadable cached record");
                    crate::metrics::record_loader_skip();
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Record load task failed");
                    crate::metrics::record_loader_skip();
                }
            }
        }

        debug!(records = loaded.len(), "Loaded cached pull requests");
        Ok(loaded)
    }
}

/// Read a pull request together with its reviews and files
fn load_record(store: &dyn Store, key: &str) -> Result<PullDetails> {
    let pull: PullRequest = serde_json::from_slice(&store.get(key)?)?;
    let reviews: Vec<Review> = serde_json::from_slice(&store.get(&reviews_key(pull.number))?)?;
    let files: Vec<CommitFile> = serde_json::from_slice(&store.get(&files_key(pull.number))?)?;

    Ok(PullDetails {
        pull,
        reviews,
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyncCursor;
    use crate::store::{DiskStore, SqliteStore};
    use tempfile::TempDir;

    fn write_record(store: &dyn Store, number: u64, author: &str, reviewers: &[&str]) {
        let pull = serde_json::json!({
            "number": number,
            "state": "closed",
            "user": {"login": author, "id": 1},
            "created_at": "2024-01-01T00:00:00Z",
            "merged_at": "2024-01-02T00:00:00Z"
        });
        let reviews: Vec<_> = reviewers
            .iter()
            .map(|r| serde_json::json!({"id": 1, "user": {"login": r, "id": 2}, "state": "APPROVED"}))
            .collect();

        store
            .put(&number.to_string(), &serde_json::to_vec(&pull).unwrap())
            .unwrap();
        store
            .put(&reviews_key(number), &serde_json::to_vec(&reviews).unwrap())
            .unwrap();
        store.put(&files_key(number), b"[]").unwrap();
    }

    #[tokio::test]
    async fn test_load_all_records() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::new(dir.path(), "octo", "widgets"));
        SyncCursor::read_or_create(store.as_ref()).unwrap();
        for n in 1..=20 {
            write_record(store.as_ref(), n, "alice", &["bob"]);
        }

        let mut loaded = RecordLoader::new(store).load_all().await.unwrap();
        loaded.sort_by_key(|d| d.pull.number);

        assert_eq!(loaded.len(), 20);
        assert_eq!(loaded[0].pull.number, 1);
        assert_eq!(loaded[19].reviews[0].reviewer_login(), "bob");
    }

    #[tokio::test]
    async fn test_bad_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::new(dir.path(), "octo", "widgets"));
        write_record(store.as_ref(), 1, "alice", &["bob"]);
        write_record(store.as_ref(), 2, "alice", &["bob"]);
        store.put("3", b"{ not json").unwrap();
        // Pull record without its reviews entry
        store
            .put("4", br#"{"number": 4, "merged_at": "2024-01-02T00:00:00Z"}"#)
            .unwrap();

        let loaded = RecordLoader::new(store).load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_namespace() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::new(dir.path(), "octo", "nothing"));
        let loaded = RecordLoader::new(store).load_all().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_backend() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open(dir.path().join("cache.db"), "octo", "widgets").unwrap());
        write_record(store.as_ref(), 7, "carol", &["dave", "erin"]);

        let loaded = RecordLoader::new(store).load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].reviews.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> = Arc::new(DiskStore::new(dir.path(), "octo", "widgets"));
        write_record(store.as_ref(), 1, "alice", &[]);

        let (trigger, shutdown) = Shutdown::new();
        trigger.trigger();
        let result = RecordLoader::new(store)
            .with_shutdown(shutdown)
            .load_all()
            .await;
        assert!(matches!(result, Err(ReviewGraphError::Cancelled)));
    }
}
