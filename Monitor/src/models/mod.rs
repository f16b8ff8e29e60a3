// src/models/mod.rs

//! Domain models for the sitemap monitor.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod page_set;
mod site;

// Re-export all public types
pub use config::{
    Config, HttpConfig, ReportConfig, ScheduleConfig, SitemapConfig, StorageConfig,
};
pub use page_set::{Delta, PageSet, Phase, Slot, TrackingState};
pub use site::{OwnerId, RootUrl, Site};

/// Page titles keyed by URL, attached to a report when available.
pub type PageTitles = std::collections::BTreeMap<String, String>;
