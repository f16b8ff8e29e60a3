// src/services/report.rs

//! Report delivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{Delta, OwnerId, PageTitles};
use crate::storage::{self, KeyValueStore, keys};
use crate::utils::key_segment;

/// Hands a finished report to whatever transport delivers it.
#[async_trait]
pub trait ReportSender: Send + Sync {
    /// Deliver the new pages of every site of `owner`.
    ///
    /// `titles` may be partial or empty.
    async fn send_report(&self, owner: &OwnerId, deltas: &[Delta], titles: &PageTitles) -> Result<()>;
}

/// Serialized report body.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub owner_id: &'a OwnerId,
    pub generated_at: DateTime<Utc>,
    pub total_new_pages: usize,
    pub sites: &'a [Delta],
    pub titles: &'a PageTitles,
}

impl<'a> Report<'a> {
    pub fn new(owner_id: &'a OwnerId, sites: &'a [Delta], titles: &'a PageTitles) -> Self {
        Self {
            owner_id,
            generated_at: Utc::now(),
            total_new_pages: sites.iter().map(Delta::len).sum(),
            sites,
            titles,
        }
    }
}

/// Writes each report as a JSON document into an outbox for pickup.
pub struct OutboxReporter {
    store: Arc<dyn KeyValueStore>,
}

impl OutboxReporter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn key(owner: &OwnerId, at: DateTime<Utc>) -> String {
        let stamp = at.format("%Y%m%dT%H%M%S%.3fZ").to_string();
        keys::report(&key_segment(owner.as_str()), &stamp)
    }
}

#[async_trait]
impl ReportSender for OutboxReporter {
    async fn send_report(&self, owner: &OwnerId, deltas: &[Delta], titles: &PageTitles) -> Result<()> {
        let report = Report::new(owner, deltas, titles);
        let key = Self::key(owner, report.generated_at);

        storage::write_json(self.store.as_ref(), &key, &report)
            .await
            .map_err(|e| AppError::delivery(owner.as_str(), e))?;

        log::info!(
            "Report for {} queued at {} ({} sites, {} new pages)",
            owner,
            key,
            deltas.len(),
            report.total_new_pages
        );
        Ok(())
    }
}
