//! Diff calculation between two captures of a site.
//!
//! Computes the pages present in the current capture but absent from the
//! previous one. URLs are compared by exact string equality; the parser is
//! the only place that decides a URL's canonical form.

use chrono::{DateTime, Utc};

use crate::models::{Delta, PageSet};

/// Calculator for computing deltas between snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffCalculator;

impl DiffCalculator {
    /// Create a new diff calculator.
    pub fn new() -> Self {
        Self
    }

    /// Calculate the delta between previous and current snapshots.
    ///
    /// With no previous snapshot every current page counts as new.
    pub fn calculate(&self, previous: Option<&PageSet>, current: &PageSet) -> Delta {
        self.calculate_at(previous, current, Utc::now())
    }

    /// Same as [`calculate`](Self::calculate) with an explicit timestamp.
    pub fn calculate_at(
        &self,
        previous: Option<&PageSet>,
        current: &PageSet,
        computed_at: DateTime<Utc>,
    ) -> Delta {
        let new_pages = match previous {
            Some(previous) => current
                .pages
                .difference(&previous.pages)
                .cloned()
                .collect(),
            None => current.pages.clone(),
        };

        Delta {
            site_name: current.site_name.clone(),
            computed_at,
            new_pages,
        }
    }
}

/// Convenience function to calculate a delta.
pub fn diff(previous: Option<&PageSet>, current: &PageSet) -> Delta {
    DiffCalculator::new().calculate(previous, current)
}
