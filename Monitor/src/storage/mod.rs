//! Storage abstractions for snapshot persistence.
//!
//! Every backend is a plain key-value store of byte blobs. The snapshot,
//! registry and outbox layers are built on top of that, so a backend swap
//! never touches the engine.
//!
//! ## Key Layout
//!
//! ```text
//! {root}/
//! ├── registry.json              # Tracked sites per owner
//! ├── snapshots/
//! │   └── {site_id}/
//! │       ├── baseline.json      # First capture
//! │       ├── tracked.json       # Latest re-check
//! │       └── state.json         # Phase + pending report buffer
//! └── outbox/
//!     └── {owner}/
//!         └── {timestamp}.json   # Delivered reports
//! ```

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};
use crate::models::{PageSet, Slot, TrackingState};

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "s3")]
pub use s3::S3Storage;

/// Storage keys.
pub mod keys {
    use crate::models::Slot;

    pub const REGISTRY: &str = "registry.json";

    pub fn snapshot(site_id: &str, slot: Slot) -> String {
        format!("snapshots/{}/{}.json", site_id, slot.as_str())
    }

    pub fn state(site_id: &str) -> String {
        format!("snapshots/{}/state.json", site_id)
    }

    pub fn report(owner: &str, stamp: &str) -> String {
        format!("outbox/{}/{}.json", owner, stamp)
    }
}

/// Byte-level backend.
///
/// `write_bytes` must replace the value atomically: a concurrent reader sees
/// either the old or the new value, never a partial one.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, returning `None` if the key doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove a value. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Read and decode a JSON value.
pub async fn read_json<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.read_bytes(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::store(key, format!("corrupt record: {e}"))),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn write_json<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized + Sync,
    S: KeyValueStore + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value)?;
    store.write_bytes(key, &bytes).await
}

/// Per-site snapshot persistence.
///
/// Exactly one snapshot exists per (site, slot); `put` replaces it.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the snapshot for (site, slot).
    async fn put(&self, site_id: &str, slot: Slot, pages: &PageSet) -> Result<()>;

    /// Current snapshot for (site, slot), `None` before the first capture.
    async fn get(&self, site_id: &str, slot: Slot) -> Result<Option<PageSet>>;

    /// Remove every snapshot and the tracking state of a site.
    async fn delete(&self, site_id: &str) -> Result<()>;

    /// Replace the tracking state of a site.
    async fn put_state(&self, state: &TrackingState) -> Result<()>;

    /// Tracking state of a site, `None` if never stored.
    async fn get_state(&self, site_id: &str) -> Result<Option<TrackingState>>;
}

#[async_trait]
impl<S> SnapshotStore for S
where
    S: KeyValueStore + ?Sized,
{
    async fn put(&self, site_id: &str, slot: Slot, pages: &PageSet) -> Result<()> {
        let key = keys::snapshot(site_id, slot);
        write_json(self, &key, pages).await?;
        log::debug!("Stored {} snapshot with {} pages at {}", slot, pages.len(), key);
        Ok(())
    }

    async fn get(&self, site_id: &str, slot: Slot) -> Result<Option<PageSet>> {
        read_json(self, &keys::snapshot(site_id, slot)).await
    }

    async fn delete(&self, site_id: &str) -> Result<()> {
        KeyValueStore::delete(self, &keys::snapshot(site_id, Slot::Baseline)).await?;
        KeyValueStore::delete(self, &keys::snapshot(site_id, Slot::Tracked)).await?;
        KeyValueStore::delete(self, &keys::state(site_id)).await?;
        log::debug!("Removed snapshots and state for site {}", site_id);
        Ok(())
    }

    async fn put_state(&self, state: &TrackingState) -> Result<()> {
        write_json(self, &keys::state(&state.site_id), state).await
    }

    async fn get_state(&self, site_id: &str) -> Result<Option<TrackingState>> {
        read_json(self, &keys::state(site_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn page_set(pages: &[&str]) -> PageSet {
        PageSet::new("ex.com", pages.iter().map(|p| p.to_string()))
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let store = MemoryStorage::new();
        let written = page_set(&["https://ex.com/a", "https://ex.com/b"]);

        store.put("site", Slot::Baseline, &written).await.unwrap();
        let read = store.get("site", Slot::Baseline).await.unwrap();
        assert_eq!(read, Some(written));
    }

    #[tokio::test]
    async fn test_absent_is_distinct_from_empty() {
        let store = MemoryStorage::new();
        assert_eq!(store.get("site", Slot::Tracked).await.unwrap(), None);

        store.put("site", Slot::Tracked, &page_set(&[])).await.unwrap();
        let read = store.get("site", Slot::Tracked).await.unwrap().unwrap();
        assert!(read.is_empty());
    }

    #[tokio::test]
    async fn test_slots_are_independent() {
        let store = MemoryStorage::new();
        store
            .put("site", Slot::Baseline, &page_set(&["https://ex.com/a"]))
            .await
            .unwrap();
        store
            .put("site", Slot::Tracked, &page_set(&["https://ex.com/b"]))
            .await
            .unwrap();

        let baseline = store.get("site", Slot::Baseline).await.unwrap().unwrap();
        assert!(baseline.contains("https://ex.com/a"));
        assert!(!baseline.contains("https://ex.com/b"));
    }

    #[tokio::test]
    async fn test_delete_removes_everything_and_is_idempotent() {
        let store = MemoryStorage::new();
        store
            .put("site", Slot::Baseline, &page_set(&["https://ex.com/a"]))
            .await
            .unwrap();
        store
            .put_state(&TrackingState::new("site", Utc::now()))
            .await
            .unwrap();

        SnapshotStore::delete(&store, "site").await.unwrap();
        assert!(store.get("site", Slot::Baseline).await.unwrap().is_none());
        assert!(store.get_state("site").await.unwrap().is_none());

        SnapshotStore::delete(&store, "site").await.unwrap();
        SnapshotStore::delete(&store, "never-seen").await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_record_is_store_error() {
        let store = MemoryStorage::new();
        store
            .write_bytes(&keys::snapshot("site", Slot::Baseline), b"{not json")
            .await
            .unwrap();

        let err = store.get("site", Slot::Baseline).await.unwrap_err();
        assert!(matches!(err, AppError::Store { .. }));
    }
}
