//! Durable key-value cache for raw API records
//!
//! Keys are slash-delimited hierarchical strings (`"1234"`, `"1234/reviews"`,
//! `"metadata"`). Every store instance is scoped to a single `{owner}/{repo}`
//! namespace and is passed explicitly to the components that need it.
//!
//! Two backends are provided:
//! - [`DiskStore`]: one JSON file per key under `{root}/{owner}/{repo}`
//! - [`SqliteStore`]: one row per key in a shared SQLite database

mod disk;
mod sqlite;

pub use disk::DiskStore;
pub use sqlite::SqliteStore;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Suffix appended to the final key segment when mapping keys to files
pub const FILE_SUFFIX: &str = ".json";

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent. Expected on first run; not a failure.
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid stored path: {0}")]
    InvalidPath(String),

    #[error("Write failed for key {key}: {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Hierarchical key→bytes store
///
/// Implementations must tolerate concurrent readers and writers on distinct
/// keys without external locking.
pub trait Store: Send + Sync {
    /// Check whether a key exists
    fn has(&self, key: &str) -> StoreResult<bool>;

    /// Read the bytes stored under `key`, or [`StoreError::NotFound`]
    fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// Write `value` under `key`, replacing any previous value
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// List every key stored in this namespace
    fn keys(&self) -> StoreResult<Vec<String>>;
}

/// A key split into directory segments plus a file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    pub path: Vec<String>,
    pub file_name: String,
}

impl PathKey {
    /// Relative file-system path for this key
    pub fn to_path_buf(&self) -> PathBuf {
        let mut buf: PathBuf = self.path.iter().collect();
        buf.push(&self.file_name);
        buf
    }
}

/// Validate a key: non-empty, no empty segments, no `.`/`..` traversal
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Validate a single namespace segment (owner or repository name)
pub fn validate_segment(segment: &str) -> StoreResult<()> {
    validate_key(segment)?;
    if segment.contains('/') {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(())
}

/// Map a key to its on-disk location: all but the last segment become
/// directories, the last segment becomes `{segment}.json`.
pub fn transform(key: &str) -> StoreResult<PathKey> {
    validate_key(key)?;

    let mut segments: Vec<String> = key.split('/').map(str::to_string).collect();
    // validate_key guarantees at least one segment
    let last = segments.pop().unwrap_or_default();

    Ok(PathKey {
        path: segments,
        file_name: format!("{}{}", last, FILE_SUFFIX),
    })
}

/// Reconstruct the original key from a stored [`PathKey`]
pub fn inverse_transform(path_key: &PathKey) -> StoreResult<String> {
    let stem = path_key
        .file_name
        .strip_suffix(FILE_SUFFIX)
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| StoreError::InvalidPath(path_key.file_name.clone()))?;

    let mut segments = path_key.path.clone();
    segments.push(stem.to_string());
    Ok(segments.join("/"))
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per key
    #[default]
    Disk,
    /// SQLite database (WAL mode)
    Sqlite,
}

/// Where and how to open per-repository stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory (disk) or database file (sqlite)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("reviewgraph");
    path.push("cache");
    path
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// File-system store rooted at `path`
    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Disk,
            path: path.into(),
        }
    }

    /// SQLite store in the database file at `path`
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: path.into(),
        }
    }

    /// Open the store for one repository namespace
    pub fn open(&self, owner: &str, repo: &str) -> StoreResult<Arc<dyn Store>> {
        validate_segment(owner)?;
        validate_segment(repo)?;

        match self.backend {
            StoreBackend::Disk => Ok(Arc::new(DiskStore::new(&self.path, owner, repo))),
            StoreBackend::Sqlite => {
                let db_path = if self.path.extension().is_some() {
                    self.path.clone()
                } else {
                    self.path.join("cache.db")
                };
                Ok(Arc::new(SqliteStore::open(db_path, owner, repo)?))
            }
        }
    }
}
