//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP client behavior
    #[serde(default)]
    pub http: HttpConfig,

    /// Sitemap traversal limits
    #[serde(default)]
    pub sitemap: SitemapConfig,

    /// Tracking and reporting cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Report enrichment
    #[serde(default)]
    pub report: ReportConfig,

    /// Local storage location
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.http.max_concurrent == 0 {
            return Err(AppError::validation("http.max_concurrent must be > 0"));
        }
        if self.sitemap.max_depth == 0 {
            return Err(AppError::validation("sitemap.max_depth must be > 0"));
        }
        if self.schedule.max_delivery_attempts == 0 {
            return Err(AppError::validation(
                "schedule.max_delivery_attempts must be > 0",
            ));
        }
        Ok(())
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Extra attempts after a retryable failure
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,

    /// Maximum concurrent requests
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            retry_delay_ms: defaults::retry_delay(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// Sitemap traversal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapConfig {
    /// Index levels allowed below a robots-declared sitemap
    #[serde(default = "defaults::max_depth")]
    pub max_depth: usize,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            max_depth: defaults::max_depth(),
        }
    }
}

/// Tracking cadence and delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds after registration at which the report is due
    #[serde(default = "defaults::report_after")]
    pub report_after_secs: u64,

    /// Delivery attempts before giving up with a fatal alert
    #[serde(default = "defaults::max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

impl ScheduleConfig {
    pub fn report_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.report_after_secs).unwrap_or(i64::MAX))
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            report_after_secs: defaults::report_after(),
            max_delivery_attempts: defaults::max_delivery_attempts(),
        }
    }
}

/// Report enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Look up page titles before delivery
    #[serde(default = "defaults::fetch_titles")]
    pub fetch_titles: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            fetch_titles: defaults::fetch_titles(),
        }
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for snapshots, registry and outbox, relative to the
    /// storage directory given on the command line
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // HTTP defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; SitemapMonitor/1.0)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_retries() -> u32 {
        2
    }
    pub fn retry_delay() -> u64 {
        500
    }
    pub fn max_concurrent() -> usize {
        4
    }

    // Sitemap defaults
    pub fn max_depth() -> usize {
        2
    }

    // Schedule defaults (7 days)
    pub fn report_after() -> u64 {
        7 * 24 * 60 * 60
    }
    pub fn max_delivery_attempts() -> u32 {
        3
    }

    pub fn fetch_titles() -> bool {
        true
    }

    pub fn root_dir() -> PathBuf {
        PathBuf::from(".")
    }
}
