// src/models/page_set.rs

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every page a site's sitemaps declared during one parse run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSet {
    pub site_name: String,
    pub captured_at: DateTime<Utc>,
    pub pages: BTreeSet<String>,
}

impl PageSet {
    pub fn new(site_name: impl Into<String>, pages: impl IntoIterator<Item = String>) -> Self {
        Self {
            site_name: site_name.into(),
            captured_at: Utc::now(),
            pages: pages.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.pages.contains(url)
    }
}

/// Named snapshot variant for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// First capture after registration
    Baseline,
    /// Latest re-check
    Tracked,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Baseline => "baseline",
            Slot::Tracked => "tracked",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pages newly observed between two captures of the same site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub site_name: String,
    pub computed_at: DateTime<Utc>,
    pub new_pages: BTreeSet<String>,
}

impl Delta {
    /// An empty delta is a valid "no change" result.
    pub fn is_empty(&self) -> bool {
        self.new_pages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new_pages.len()
    }
}

/// Lifecycle phase of a tracked site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Registered,
    Capturing,
    Tracking,
    Reporting,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Registered => "registered",
            Phase::Capturing => "capturing",
            Phase::Tracking => "tracking",
            Phase::Reporting => "reporting",
            Phase::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state machine record of one site, including the report buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingState {
    pub site_id: String,
    pub phase: Phase,
    /// New pages accumulated across re-checks, awaiting the report
    #[serde(default)]
    pub pending: BTreeSet<String>,
    #[serde(default)]
    pub delivery_attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl TrackingState {
    pub fn new(site_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            site_id: site_id.into(),
            phase: Phase::Registered,
            pending: BTreeSet::new(),
            delivery_attempts: 0,
            updated_at: now,
        }
    }

    /// Move to `phase`, logging the transition.
    pub fn transition(&mut self, phase: Phase, now: DateTime<Utc>) {
        if self.phase != phase {
            log::debug!("Site {}: {} -> {}", self.site_id, self.phase, phase);
        }
        self.phase = phase;
        self.updated_at = now;
    }

    /// Merge newly observed pages into the report buffer.
    pub fn accumulate(&mut self, delta: &Delta) -> usize {
        let before = self.pending.len();
        self.pending.extend(delta.new_pages.iter().cloned());
        self.pending.len() - before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_set_dedups() {
        let set = PageSet::new(
            "ex.com",
            vec![
                "https://ex.com/a".to_string(),
                "https://ex.com/b".to_string(),
                "https://ex.com/a".to_string(),
            ],
        );
        assert_eq!(set.len(), 2);
        assert!(set.contains("https://ex.com/b"));
    }

    #[test]
    fn test_slot_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Slot::Baseline).unwrap(), "\"baseline\"");
        assert_eq!(Slot::Tracked.to_string(), "tracked");
    }

    #[test]
    fn test_accumulate_counts_only_unseen() {
        let now = Utc::now();
        let mut state = TrackingState::new("site", now);
        let delta = Delta {
            site_name: "ex.com".into(),
            computed_at: now,
            new_pages: ["https://ex.com/c".to_string()].into_iter().collect(),
        };

        assert_eq!(state.accumulate(&delta), 1);
        assert_eq!(state.accumulate(&delta), 0);
        assert_eq!(state.pending.len(), 1);
    }

    #[test]
    fn test_state_defaults_on_old_records() {
        let json = r#"{"site_id":"s","phase":"tracking","updated_at":"2026-01-01T00:00:00Z"}"#;
        let state: TrackingState = serde_json::from_str(json).unwrap();
        assert_eq!(state.phase, Phase::Tracking);
        assert!(state.pending.is_empty());
        assert_eq!(state.delivery_attempts, 0);
    }
}
