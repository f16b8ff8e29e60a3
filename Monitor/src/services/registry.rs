// src/services/registry.rs

//! Registry of the websites each owner asked to track.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{OwnerId, RootUrl, Site};
use crate::storage::{self, KeyValueStore, keys};

/// Which root URLs an owner tracks and since when.
#[async_trait]
pub trait SiteRegistry: Send + Sync {
    /// Start tracking `roots` for `owner`.
    ///
    /// Fails with [`AppError::AlreadyRegistered`] if the owner already has
    /// sites under tracking.
    async fn register(
        &self,
        owner: &OwnerId,
        roots: &[RootUrl],
        registered_at: DateTime<Utc>,
    ) -> Result<Vec<Site>>;

    /// Sites tracked for `owner`; empty when the owner has no record.
    async fn list_tracked_sites(&self, owner: &OwnerId) -> Result<Vec<Site>>;

    /// Forget every site of `owner`. Succeeds when nothing is registered.
    async fn remove_tracked_site(&self, owner: &OwnerId) -> Result<()>;

    /// Owners with at least one tracked site.
    async fn owners(&self) -> Result<Vec<OwnerId>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryRecord {
    #[serde(default)]
    owners: BTreeMap<OwnerId, Vec<Site>>,
}

/// Registry kept as a single JSON record in a key-value store.
pub struct StoredRegistry {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl StoredRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<RegistryRecord> {
        Ok(storage::read_json(self.store.as_ref(), keys::REGISTRY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, record: &RegistryRecord) -> Result<()> {
        storage::write_json(self.store.as_ref(), keys::REGISTRY, record).await
    }
}

#[async_trait]
impl SiteRegistry for StoredRegistry {
    async fn register(
        &self,
        owner: &OwnerId,
        roots: &[RootUrl],
        registered_at: DateTime<Utc>,
    ) -> Result<Vec<Site>> {
        if roots.is_empty() {
            return Err(AppError::validation("no websites submitted"));
        }

        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;

        if record.owners.get(owner).is_some_and(|sites| !sites.is_empty()) {
            return Err(AppError::AlreadyRegistered(owner.to_string()));
        }

        let mut sites: Vec<Site> = Vec::with_capacity(roots.len());
        for root in roots {
            if sites.iter().any(|s| &s.root_url == root) {
                continue;
            }
            sites.push(Site::new(owner.clone(), root.clone(), registered_at));
        }

        record.owners.insert(owner.clone(), sites.clone());
        self.save(&record).await?;

        log::info!("Registered {} site(s) for owner {}", sites.len(), owner);
        Ok(sites)
    }

    async fn list_tracked_sites(&self, owner: &OwnerId) -> Result<Vec<Site>> {
        Ok(self.load().await?.owners.remove(owner).unwrap_or_default())
    }

    async fn remove_tracked_site(&self, owner: &OwnerId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?;

        if record.owners.remove(owner).is_some() {
            self.save(&record).await?;
            log::info!("Removed tracked sites of owner {}", owner);
        }
        Ok(())
    }

    async fn owners(&self) -> Result<Vec<OwnerId>> {
        Ok(self
            .load()
            .await?
            .owners
            .into_iter()
            .filter(|(_, sites)| !sites.is_empty())
            .map(|(owner, _)| owner)
            .collect())
    }
}
