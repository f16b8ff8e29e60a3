// src/pipeline/scheduler.rs

//! Per-site tracking lifecycle.
//!
//! Every site moves through `Registered -> Capturing -> Tracking ->
//! Reporting -> Closed`. A tick is driven from outside (CLI, cron, Lambda);
//! nothing here runs on a timer.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{AppError, Result};
use crate::models::{Config, Delta, OwnerId, PageTitles, Phase, RootUrl, Site, Slot, TrackingState};
use crate::pipeline::diff;
use crate::services::{ReportSender, SiteRegistry, SitemapParser, TitleResolver, resolve_titles};
use crate::storage::SnapshotStore;

/// Async mutexes keyed by site (or owner), created on first use.
#[derive(Default)]
pub struct SiteLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Forget `key` unless someone still holds or waits for its lock.
    pub fn release(&self, key: &str) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Result of accepting a registration.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub owner_id: OwnerId,
    pub sites: Vec<Site>,
    pub report_due: DateTime<Utc>,
}

impl Registration {
    /// Confirmation shown to the owner.
    pub fn message(&self) -> String {
        format!(
            "Thank you! You will get a report by email on {}.",
            self.report_due.format("%B %-d, %Y")
        )
    }
}

/// State of a site after one transition.
#[derive(Debug, Clone)]
pub struct SiteProgress {
    pub state: TrackingState,
    /// Pages added to the report buffer by this transition
    pub added: usize,
}

/// What happened to one site during a tick.
#[derive(Debug, Clone, Serialize)]
pub struct SiteOutcome {
    pub site_id: String,
    pub site_name: String,
    pub phase: Phase,
    pub new_pages: usize,
    pub pending: usize,
    /// User-facing failure message; internal detail goes to the log only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SiteOutcome {
    fn from_progress(site: &Site, progress: &SiteProgress) -> Self {
        Self {
            site_id: site.site_id.clone(),
            site_name: site.name().to_string(),
            phase: progress.state.phase,
            new_pages: progress.added,
            pending: progress.state.pending.len(),
            error: None,
        }
    }

    fn closed(site: &Site, error: Option<String>) -> Self {
        Self {
            site_id: site.site_id.clone(),
            site_name: site.name().to_string(),
            phase: Phase::Closed,
            new_pages: 0,
            pending: 0,
            error,
        }
    }
}

/// Result of ticking one owner.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerTick {
    pub owner_id: OwnerId,
    pub sites: Vec<SiteOutcome>,
    pub report_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OwnerTick {
    fn empty(owner: &OwnerId) -> Self {
        Self {
            owner_id: owner.clone(),
            sites: Vec::new(),
            report_sent: false,
            message: None,
        }
    }

    pub fn failures(&self) -> usize {
        self.sites.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn is_closed(&self) -> bool {
        !self.sites.is_empty() && self.sites.iter().all(|s| s.phase == Phase::Closed)
    }
}

/// Result of ticking every registered owner.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub ticks: Vec<OwnerTick>,
    pub errors: Vec<(OwnerId, AppError)>,
}

impl RunSummary {
    pub fn owners(&self) -> usize {
        self.ticks.len() + self.errors.len()
    }

    pub fn sites(&self) -> usize {
        self.ticks.iter().map(|t| t.sites.len()).sum()
    }

    pub fn failures(&self) -> usize {
        self.ticks.iter().map(OwnerTick::failures).sum::<usize>() + self.errors.len()
    }

    pub fn reports_sent(&self) -> usize {
        self.ticks.iter().filter(|t| t.report_sent).count()
    }
}

/// Snapshot and buffer sizes of one tracked site.
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatus {
    pub site_id: String,
    pub root_url: RootUrl,
    pub registered_at: DateTime<Utc>,
    pub report_due: DateTime<Utc>,
    pub phase: Phase,
    pub baseline_pages: Option<usize>,
    pub tracked_pages: Option<usize>,
    pub pending: usize,
    pub delivery_attempts: u32,
}

/// Drives the tracking lifecycle of every registered site.
pub struct RunController {
    config: Arc<Config>,
    parser: SitemapParser,
    store: Arc<dyn SnapshotStore>,
    registry: Arc<dyn SiteRegistry>,
    reporter: Arc<dyn ReportSender>,
    titles: Option<Arc<dyn TitleResolver>>,
    locks: SiteLocks,
}

impl RunController {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn SnapshotStore>,
        registry: Arc<dyn SiteRegistry>,
        reporter: Arc<dyn ReportSender>,
    ) -> Result<Self> {
        config.validate()?;
        let parser = SitemapParser::new(&config)?;
        Ok(Self {
            config,
            parser,
            store,
            registry,
            reporter,
            titles: None,
            locks: SiteLocks::new(),
        })
    }

    /// Attach a page-title resolver used to enrich reports.
    pub fn with_titles(mut self, resolver: Arc<dyn TitleResolver>) -> Self {
        self.titles = Some(resolver);
        self
    }

    pub fn parser(&self) -> &SitemapParser {
        &self.parser
    }

    /// Validate `urls` and start tracking them for `owner`.
    pub async fn register(&self, owner: &OwnerId, urls: &[String], now: DateTime<Utc>) -> Result<Registration> {
        let roots = urls
            .iter()
            .map(|u| RootUrl::parse(u))
            .collect::<Result<Vec<_>>>()?;

        let _owner_guard = self.locks.acquire(&owner_key(owner)).await;
        let sites = self.registry.register(owner, &roots, now).await?;

        for site in &sites {
            self.store
                .put_state(&TrackingState::new(&site.site_id, now))
                .await?;
        }

        Ok(Registration {
            owner_id: owner.clone(),
            report_due: now + self.config.schedule.report_after(),
            sites,
        })
    }

    /// Run one tick for every owner in the registry.
    pub async fn tick_all(&self, now: DateTime<Utc>) -> Result<RunSummary> {
        let owners = self.registry.owners().await?;
        log::info!("Tick over {} owner(s)", owners.len());

        let mut summary = RunSummary::default();
        for owner in owners {
            match self.tick_owner(&owner, now).await {
                Ok(tick) => summary.ticks.push(tick),
                Err(e) => {
                    log::error!("Tick for owner {} failed: {}", owner, e);
                    summary.errors.push((owner, e));
                }
            }
        }
        Ok(summary)
    }

    /// Advance every site of `owner` and deliver the report once all of
    /// them are due.
    pub async fn tick_owner(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<OwnerTick> {
        let owner_guard = self.locks.acquire(&owner_key(owner)).await;
        let tick = self.tick_locked(owner, now).await;
        drop(owner_guard);

        if matches!(&tick, Ok(t) if t.sites.is_empty() || t.is_closed()) {
            self.locks.release(&owner_key(owner));
        }
        tick
    }

    async fn tick_locked(&self, owner: &OwnerId, now: DateTime<Utc>) -> Result<OwnerTick> {
        let sites = self.registry.list_tracked_sites(owner).await?;
        if sites.is_empty() {
            log::debug!("Owner {} has no tracked sites", owner);
            return Ok(OwnerTick::empty(owner));
        }

        let results: Vec<(&Site, Result<SiteProgress>)> = stream::iter(&sites)
            .map(|site| async move { (site, self.advance_site(site, now).await) })
            .buffered(self.config.http.max_concurrent.max(1))
            .collect()
            .await;

        let mut progress = Vec::with_capacity(results.len());
        let mut failed = None;
        for (site, result) in results {
            match result {
                Ok(p) => progress.push((site, p)),
                Err(e) => {
                    log::warn!("Site {} ({}) failed: {}", site.name(), site.site_id, e);
                    if failed.is_none() {
                        failed = Some((site.site_id.clone(), e));
                    }
                }
            }
        }

        if let Some((failed_id, error)) = failed {
            return Ok(self.abort_owner(owner, &sites, &failed_id, &error).await);
        }

        let mut tick = OwnerTick {
            owner_id: owner.clone(),
            sites: progress
                .iter()
                .map(|(site, p)| SiteOutcome::from_progress(site, p))
                .collect(),
            report_sent: false,
            message: None,
        };

        if progress.iter().all(|(_, p)| p.state.phase == Phase::Reporting) {
            return self.deliver(owner, &sites, &progress, now, tick).await;
        }

        Ok(tick)
    }

    /// Apply one state-machine transition to `site`.
    ///
    /// The first capture and every re-check share this path; the presence of
    /// a prior snapshot decides whether the result becomes the baseline or
    /// feeds the report buffer. On any failure the site's snapshots are
    /// discarded.
    pub async fn advance_site(&self, site: &Site, now: DateTime<Utc>) -> Result<SiteProgress> {
        let _guard = self.locks.acquire(&site.site_id).await;

        match self.step(site, now).await {
            Ok(progress) => Ok(progress),
            Err(e) => {
                self.discard(site).await;
                Err(e)
            }
        }
    }

    async fn step(&self, site: &Site, now: DateTime<Utc>) -> Result<SiteProgress> {
        let id = site.site_id.as_str();
        let mut state = self
            .store
            .get_state(id)
            .await?
            .unwrap_or_else(|| TrackingState::new(id, site.registered_at));

        match state.phase {
            Phase::Reporting | Phase::Closed => return Ok(SiteProgress { state, added: 0 }),
            Phase::Tracking if site.is_due(now, self.config.schedule.report_after()) => {
                state.transition(Phase::Reporting, now);
                self.store.put_state(&state).await?;
                log::info!(
                    "{}: reporting threshold reached, {} new page(s) buffered",
                    site.name(),
                    state.pending.len()
                );
                return Ok(SiteProgress { state, added: 0 });
            }
            _ => {}
        }

        let prior = match self.store.get(id, Slot::Tracked).await? {
            Some(tracked) => Some(tracked),
            None => self.store.get(id, Slot::Baseline).await?,
        };

        if prior.is_none() {
            state.transition(Phase::Capturing, now);
            self.store.put_state(&state).await?;
        }

        let current = self.parser.parse_site(site).await?;

        let added = match prior {
            None => {
                self.store.put(id, Slot::Baseline, &current).await?;
                log::info!("{}: baseline of {} pages", site.name(), current.len());
                0
            }
            Some(previous) => {
                let delta = diff::diff(Some(&previous), &current);
                let added = state.accumulate(&delta);
                self.store.put(id, Slot::Tracked, &current).await?;
                log::info!(
                    "{}: {} new page(s) since last capture, {} buffered",
                    site.name(),
                    delta.len(),
                    state.pending.len()
                );
                added
            }
        };

        state.transition(Phase::Tracking, now);
        self.store.put_state(&state).await?;

        Ok(SiteProgress { state, added })
    }

    async fn deliver(
        &self,
        owner: &OwnerId,
        sites: &[Site],
        progress: &[(&Site, SiteProgress)],
        now: DateTime<Utc>,
        mut tick: OwnerTick,
    ) -> Result<OwnerTick> {
        let max_attempts = self.config.schedule.max_delivery_attempts;
        let attempts = progress
            .iter()
            .map(|(_, p)| p.state.delivery_attempts)
            .max()
            .unwrap_or(0);
        if attempts >= max_attempts {
            log::error!("Report for {} still undeliverable after {} attempts", owner, attempts);
            return Err(AppError::DeliveryExhausted {
                owner: owner.to_string(),
                attempts,
            });
        }

        let deltas: Vec<Delta> = progress
            .iter()
            .map(|(site, p)| Delta {
                site_name: site.name().to_string(),
                computed_at: now,
                new_pages: p.state.pending.clone(),
            })
            .collect();
        let titles = self.titles_for(&deltas).await;

        match self.reporter.send_report(owner, &deltas, &titles).await {
            Ok(()) => {
                self.close_owner(owner, sites).await;
                tick.report_sent = true;
                for outcome in &mut tick.sites {
                    outcome.phase = Phase::Closed;
                }
                log::info!("Report delivered to {}, tracking closed", owner);
                Ok(tick)
            }
            Err(e) => {
                let attempts = attempts + 1;
                for (site, _) in progress {
                    if let Err(store_err) = self.record_attempt(site, attempts, now).await {
                        log::warn!("Could not record delivery attempt for {}: {}", site.site_id, store_err);
                        return Ok(self.abort_owner(owner, sites, &site.site_id, &store_err).await);
                    }
                }

                if attempts >= max_attempts {
                    log::error!("Giving up on report for {} after {} attempts: {}", owner, attempts, e);
                    return Err(AppError::DeliveryExhausted {
                        owner: owner.to_string(),
                        attempts,
                    });
                }

                log::warn!("Report for {} failed (attempt {}/{}): {}", owner, attempts, max_attempts, e);
                tick.message = Some(e.user_message().to_string());
                Ok(tick)
            }
        }
    }

    async fn record_attempt(&self, site: &Site, attempts: u32, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.locks.acquire(&site.site_id).await;
        if let Some(mut state) = self.store.get_state(&site.site_id).await? {
            state.delivery_attempts = attempts;
            state.updated_at = now;
            self.store.put_state(&state).await?;
        }
        Ok(())
    }

    /// Resolve titles for every reported page. Never fails.
    async fn titles_for(&self, deltas: &[Delta]) -> PageTitles {
        let Some(resolver) = self.titles.as_ref().filter(|_| self.config.report.fetch_titles) else {
            return PageTitles::new();
        };

        let urls: BTreeSet<String> = deltas
            .iter()
            .flat_map(|d| d.new_pages.iter().cloned())
            .collect();
        resolve_titles(resolver.as_ref(), urls, self.config.http.max_concurrent).await
    }

    /// Close the session after a delivered report.
    ///
    /// The report is out, so nothing here may fail the tick: the registry
    /// entry goes first, then each site's data best-effort.
    async fn close_owner(&self, owner: &OwnerId, sites: &[Site]) {
        if let Err(e) = self.registry.remove_tracked_site(owner).await {
            log::error!("Could not unregister owner {} after delivery: {}", owner, e);
        }
        self.discard_all(sites).await;
    }

    /// Discard every site's data and drop their locks.
    async fn discard_all(&self, sites: &[Site]) {
        for site in sites {
            let guard = self.locks.acquire(&site.site_id).await;
            self.discard(site).await;
            drop(guard);
            self.locks.release(&site.site_id);
        }
    }

    /// End the owner's session after a site failed: every snapshot goes and
    /// the registration is dropped so the owner has to resubmit.
    async fn abort_owner(&self, owner: &OwnerId, sites: &[Site], failed_id: &str, error: &AppError) -> OwnerTick {
        self.discard_all(sites).await;
        if let Err(e) = self.registry.remove_tracked_site(owner).await {
            log::warn!("Could not unregister owner {}: {}", owner, e);
        }

        let message = error.user_message().to_string();
        OwnerTick {
            owner_id: owner.clone(),
            sites: sites
                .iter()
                .map(|site| {
                    let error = (site.site_id == failed_id).then(|| message.clone());
                    SiteOutcome::closed(site, error)
                })
                .collect(),
            report_sent: false,
            message: Some(message),
        }
    }

    /// Delete a site's snapshots and state. Caller holds the site lock.
    async fn discard(&self, site: &Site) {
        if let Err(e) = self.store.delete(&site.site_id).await {
            log::warn!("Could not discard snapshots of {}: {}", site.site_id, e);
        }
    }

    /// Per-site view of the owner's tracking session.
    pub async fn status(&self, owner: &OwnerId) -> Result<Vec<SiteStatus>> {
        let report_after = self.config.schedule.report_after();
        let mut statuses = Vec::new();

        for site in self.registry.list_tracked_sites(owner).await? {
            let id = site.site_id.as_str();
            let state = self
                .store
                .get_state(id)
                .await?
                .unwrap_or_else(|| TrackingState::new(id, site.registered_at));
            let baseline = self.store.get(id, Slot::Baseline).await?;
            let tracked = self.store.get(id, Slot::Tracked).await?;

            statuses.push(SiteStatus {
                site_id: site.site_id.clone(),
                report_due: site.registered_at + report_after,
                root_url: site.root_url,
                registered_at: site.registered_at,
                phase: state.phase,
                baseline_pages: baseline.map(|p| p.len()),
                tracked_pages: tracked.map(|p| p.len()),
                pending: state.pending.len(),
                delivery_attempts: state.delivery_attempts,
            });
        }
        Ok(statuses)
    }

    /// Stop tracking every site of `owner`, returning how many were removed.
    pub async fn unregister(&self, owner: &OwnerId) -> Result<usize> {
        let owner_guard = self.locks.acquire(&owner_key(owner)).await;
        let removed = self.remove_owner(owner).await;
        drop(owner_guard);

        self.locks.release(&owner_key(owner));
        removed
    }

    async fn remove_owner(&self, owner: &OwnerId) -> Result<usize> {
        let sites = self.registry.list_tracked_sites(owner).await?;
        for site in &sites {
            let guard = self.locks.acquire(&site.site_id).await;
            self.store.delete(&site.site_id).await?;
            drop(guard);
            self.locks.release(&site.site_id);
        }
        self.registry.remove_tracked_site(owner).await?;
        Ok(sites.len())
    }
}

fn owner_key(owner: &OwnerId) -> String {
    format!("owner:{owner}")
}
