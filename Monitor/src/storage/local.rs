//! Local filesystem storage implementation.
//!
//! Every key maps to a file below the root directory. Writes go to a
//! temporary sibling first and are moved into place with `rename`, so a
//! reader never observes a half-written file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::KeyValueStore;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn tmp_path(path: &Path) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.{}.tmp", std::process::id(), n));
        path.with_file_name(name)
    }

    async fn write_atomic(&self, key: &str, bytes: &[u8]) -> std::io::Result<()> {
        let path = self.path(key);
        let tmp = Self::tmp_path(&path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for LocalStorage {
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::store(key, e)),
        }
    }

    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(&self.path(key))
            .await
            .map_err(|e| AppError::store(key, e))?;
        self.write_atomic(key, bytes)
            .await
            .map_err(|e| AppError::store(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::store(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageSet, Slot};
    use crate::storage::SnapshotStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_unwritable_parent_is_store_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("snapshots"), b"not a directory").unwrap();
        let storage = LocalStorage::new(tmp.path());

        let err = storage
            .write_bytes("snapshots/site/baseline.json", b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store { ref key, .. } if key == "snapshots/site/baseline.json"));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("a/b.json", b"one").await.unwrap();
        storage.write_bytes("a/b.json", b"two").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path().join("a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["b.json".to_string()]);
        assert_eq!(
            storage.read_bytes("a/b.json").await.unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_snapshot_files_on_disk() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let pages = PageSet::new("ex.com", vec!["https://ex.com/a".to_string()]);

        storage.put("abc123", Slot::Baseline, &pages).await.unwrap();
        assert!(tmp.path().join("snapshots/abc123/baseline.json").exists());

        let loaded = storage.get("abc123", Slot::Baseline).await.unwrap();
        assert_eq!(loaded, Some(pages));

        SnapshotStore::delete(&storage, "abc123").await.unwrap();
        assert!(!tmp.path().join("snapshots/abc123/baseline.json").exists());
        SnapshotStore::delete(&storage, "abc123").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_whole_values() {
        let tmp = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(LocalStorage::new(tmp.path()));
        let small = vec![b'a'; 16];
        let large = vec![b'b'; 256 * 1024];
        storage.write_bytes("k.bin", &small).await.unwrap();

        let writer = {
            let storage = storage.clone();
            let (small, large) = (small.clone(), large.clone());
            tokio::spawn(async move {
                for i in 0..20 {
                    let value = if i % 2 == 0 { &large } else { &small };
                    storage.write_bytes("k.bin", value).await.unwrap();
                }
            })
        };

        for _ in 0..50 {
            let read = storage.read_bytes("k.bin").await.unwrap().unwrap();
            assert!(read == small || read == large);
        }
        writer.await.unwrap();
    }
}
