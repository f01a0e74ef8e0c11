//! File-system store: one JSON file per key

use super::{inverse_transform, transform, PathKey, Store, StoreError, StoreResult, FILE_SUFFIX};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Disk-backed store rooted at `{root}/{owner}/{repo}`
#[derive(Debug, Clone)]
pub struct DiskStore {
    base: PathBuf,
}

impl DiskStore {
    /// Create a store for one repository. Directories are created lazily on
    /// the first write.
    pub fn new(root: impl AsRef<Path>, owner: &str, repo: &str) -> Self {
        Self {
            base: root.as_ref().join(owner).join(repo),
        }
    }

    /// Namespace directory for this store
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn file_path(&self, key: &str) -> StoreResult<PathBuf> {
        Ok(self.base.join(transform(key)?.to_path_buf()))
    }

    /// Convert a file found under the base directory back into its key
    fn key_for(&self, file: &Path) -> StoreResult<String> {
        let relative = file
            .strip_prefix(&self.base)
            .map_err(|_| StoreError::InvalidPath(file.display().to_string()))?;

        let mut segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let file_name = segments
            .pop()
            .ok_or_else(|| StoreError::InvalidPath(file.display().to_string()))?;

        inverse_transform(&PathKey {
            path: segments,
            file_name,
        })
    }
}

impl Store for DiskStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.file_path(key)?.is_file())
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.file_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.file_path(key)?;
        let write_failed = |source: std::io::Error| StoreError::WriteFailed {
            key: key.to_string(),
            source,
        };

        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(path.display().to_string()))?;
        fs::create_dir_all(parent).map_err(write_failed)?;

        // Stage in the same directory so the rename stays on one file system
        let mut staged = NamedTempFile::new_in(parent).map_err(write_failed)?;
        staged.write_all(value).map_err(write_failed)?;
        staged.as_file().sync_all().map_err(write_failed)?;
        staged.persist(&path).map_err(|e| write_failed(e.error))?;

        tracing::trace!(key = key, bytes = value.len(), "Stored cache entry");
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }

        let pattern = format!(
            "{}/**/*{}",
            glob::Pattern::escape(&self.base.to_string_lossy()),
            FILE_SUFFIX
        );

        let mut keys = Vec::new();
        for entry in glob::glob(&pattern)? {
            let file = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !file.is_file() {
                continue;
            }
            match self.key_for(&file) {
                Ok(key) => keys.push(key),
                Err(e) => tracing::warn!(path = %file.display(), error = %e, "Ignoring foreign file in cache"),
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (DiskStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path(), "foo", "bar");
        (store, temp_dir)
    }

    #[test]
    fn test_simple_read_and_write() {
        let (store, _temp) = create_test_store();
        store.put("foo", b"bar").unwrap();

        assert_eq!(store.get("foo").unwrap(), b"bar".to_vec());
        assert!(store.has("foo").unwrap());
    }

    #[test]
    fn test_not_found() {
        let (store, _temp) = create_test_store();

        assert!(matches!(store.get("foo"), Err(StoreError::NotFound(k)) if k == "foo"));
        assert!(!store.has("foo").unwrap());
    }

    #[test]
    fn test_layout_on_disk() {
        let (store, temp) = create_test_store();
        store.put("12", b"{}").unwrap();
        store.put("12/reviews", b"[]").unwrap();
        store.put("metadata", b"{}").unwrap();

        let base = temp.path().join("foo").join("bar");
        assert!(base.join("12.json").is_file());
        assert!(base.join("12").join("reviews.json").is_file());
        assert!(base.join("metadata.json").is_file());
    }

    #[test]
    fn test_overwrite() {
        let (store, _temp) = create_test_store();
        store.put("metadata", b"one").unwrap();
        store.put("metadata", b"two").unwrap();
        assert_eq!(store.get("metadata").unwrap(), b"two".to_vec());
    }

    #[test]
    fn test_keys_round_trip() {
        let (store, temp) = create_test_store();
        for key in ["1", "1/reviews", "1/files", "2", "metadata"] {
            store.put(key, b"x").unwrap();
        }
        // Stray files without the suffix are not keys
        std::fs::write(temp.path().join("foo/bar/README"), b"hi").unwrap();

        assert_eq!(
            store.keys().unwrap(),
            vec!["1", "1/files", "1/reviews", "2", "metadata"]
        );
    }

    #[test]
    fn test_keys_on_missing_namespace() {
        let (store, _temp) = create_test_store();
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_is_reported() {
        let (store, temp) = create_test_store();
        // A file where the namespace directory should be blocks every write
        std::fs::create_dir_all(temp.path().join("foo")).unwrap();
        std::fs::write(temp.path().join("foo").join("bar"), b"not a dir").unwrap();

        let result = store.put("1", b"{}");
        assert!(matches!(result, Err(StoreError::WriteFailed { key, .. }) if key == "1"));
    }

    #[test]
    fn test_concurrent_writers_distinct_keys() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.put(&format!("{i}"), format!("{i}").as_bytes()).unwrap();
                    store
                        .put(&format!("{i}/reviews"), format!("[{i}]").as_bytes())
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.keys().unwrap().len(), 32);
        assert_eq!(store.get("7/reviews").unwrap(), b"[7]".to_vec());
    }
}
