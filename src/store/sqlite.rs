//! SQLite store implementation

use super::{validate_key, Store, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-backed store; many repository namespaces can share one database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    namespace: String,
}

impl SqliteStore {
    /// Open or create the database at `path` and scope it to `{owner}/{repo}`
    pub fn open(path: impl Into<PathBuf>, owner: &str, repo: &str) -> StoreResult<Self> {
        let path = path.into();

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::debug!(path = %path.display(), owner, repo, "Opening cache database");

        let conn = Connection::open(&path)?;
        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let store = Self {
            conn: Mutex::new(conn),
            path,
            namespace: format!("{}/{}", owner, repo),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS entries (
                    namespace TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (namespace, key)
                );
                "#,
            )
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> StoreResult<T> {
        // A poisoned lock only means another reader panicked; the connection is still usable
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&conn)?)
    }
}

impl Store for SqliteStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM entries WHERE namespace = ? AND key = ?",
                params![self.namespace, key],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
        })
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        validate_key(key)?;
        let value: Option<Vec<u8>> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM entries WHERE namespace = ? AND key = ?",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()
        })?;

        value.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        validate_key(key)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entries (namespace, key, value, updated_at) VALUES (?, ?, ?, ?)",
                params![self.namespace, key, value, now],
            )
        })
        .map_err(|e| match e {
            StoreError::Database(db) => StoreError::WriteFailed {
                key: key.to_string(),
                source: std::io::Error::other(db),
            },
            other => other,
        })?;

        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM entries WHERE namespace = ? ORDER BY key")?;
            let keys = stmt
                .query_map(params![self.namespace], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
    }
}
