//! Tracking engine.
//!
//! - `diff`: new pages between two captures
//! - `scheduler`: per-site state machine driven by external ticks

pub mod diff;
pub mod scheduler;

pub use diff::{DiffCalculator, diff};
pub use scheduler::{
    OwnerTick, Registration, RunController, RunSummary, SiteLocks, SiteOutcome, SiteProgress,
    SiteStatus,
};
