// src/lambda/mod.rs

//! AWS Lambda handler for the monitor.
//!
//! Each invocation is one scheduled tick:
//! 1. Loads configuration from S3 (falls back to defaults)
//! 2. Advances every tracked site of one owner, or of all owners
//! 3. Writes due reports to the S3 outbox

use std::sync::Arc;

use chrono::Utc;
use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::models::{Config, OwnerId};
use crate::pipeline::{RunController, RunSummary};
use crate::services::{HttpTitleResolver, OutboxReporter, StoredRegistry};
use crate::storage::{KeyValueStore, S3Storage};

/// Key of the configuration object under the storage prefix.
const CONFIG_KEY: &str = "config.toml";

/// Lambda invocation payload.
#[derive(Debug, Default, Deserialize)]
pub struct TickRequest {
    /// Tick a single owner (ticks every registered owner if not specified)
    #[serde(default)]
    pub owner: Option<String>,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct TickResponse {
    pub success: bool,

    /// Owners ticked
    pub owners: usize,

    /// Sites advanced across all owners
    pub sites: usize,

    /// Sites and owners that failed this tick
    pub failures: usize,

    pub reports_sent: usize,

    /// Error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub execution_time_ms: u64,
}

impl From<&RunSummary> for TickResponse {
    fn from(summary: &RunSummary) -> Self {
        Self {
            success: true,
            owners: summary.owners(),
            sites: summary.sites(),
            failures: summary.failures(),
            reports_sent: summary.reports_sent(),
            error: None,
            execution_time_ms: 0,
        }
    }
}

/// Main Lambda handler function.
#[instrument(skip(event))]
pub async fn handler(event: LambdaEvent<TickRequest>) -> std::result::Result<TickResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (request, _context) = event.into_parts();

    info!("Starting tick: owner={:?}", request.owner);

    match run_tick(&request).await {
        Ok(mut response) => {
            response.execution_time_ms = start.elapsed().as_millis() as u64;
            info!(
                "Tick completed: {} owners, {} sites, {} failures, {} reports in {}ms",
                response.owners,
                response.sites,
                response.failures,
                response.reports_sent,
                response.execution_time_ms
            );
            Ok(response)
        }
        Err(e) => {
            error!("Tick failed: {}", e);
            Ok(TickResponse {
                success: false,
                error: Some(e.to_string()),
                execution_time_ms: start.elapsed().as_millis() as u64,
                ..Default::default()
            })
        }
    }
}

async fn run_tick(request: &TickRequest) -> Result<TickResponse> {
    let storage = Arc::new(S3Storage::from_env().await?);
    let config = Arc::new(load_lambda_config(storage.as_ref()).await?);

    let registry = Arc::new(StoredRegistry::new(storage.clone()));
    let reporter = Arc::new(OutboxReporter::new(storage.clone()));
    let titles = Arc::new(HttpTitleResolver::new(&config.http)?);

    let controller = RunController::new(Arc::clone(&config), storage, registry, reporter)?.with_titles(titles);
    let now = Utc::now();

    let summary = match request.owner.as_deref() {
        Some(owner) => {
            let tick = controller.tick_owner(&OwnerId::new(owner), now).await?;
            RunSummary {
                ticks: vec![tick],
                errors: Vec::new(),
            }
        }
        None => controller.tick_all(now).await?,
    };

    let mut response = TickResponse::from(&summary);
    if let Some((owner, e)) = summary.errors.first() {
        response.error = Some(format!("owner {owner}: {e}"));
    }
    Ok(response)
}

/// Configuration from the bucket, with environment overrides.
async fn load_lambda_config(storage: &dyn KeyValueStore) -> Result<Config> {
    let mut config = match storage.read_bytes(CONFIG_KEY).await? {
        Some(bytes) => Config::from_toml(&String::from_utf8_lossy(&bytes))?,
        None => {
            info!("No {} in bucket, using defaults", CONFIG_KEY);
            Config::default()
        }
    };

    if let Some(secs) = env_parse("FETCH_TIMEOUT_SECS") {
        config.http.timeout_secs = secs;
    }
    if let Some(n) = env_parse("MAX_CONCURRENT") {
        config.http.max_concurrent = n;
    }
    if let Some(secs) = env_parse("REPORT_AFTER_SECS") {
        config.schedule.report_after_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_tick_request_defaults() {
        let req: TickRequest = serde_json::from_str("{}").unwrap();
        assert!(req.owner.is_none());
    }

    #[test]
    fn test_tick_request_with_owner() {
        let req: TickRequest = serde_json::from_str(r#"{"owner": "user_123"}"#).unwrap();
        assert_eq!(req.owner.as_deref(), Some("user_123"));
    }

    #[tokio::test]
    async fn test_config_from_bucket() {
        let store = MemoryStorage::new();
        assert_eq!(
            load_lambda_config(&store).await.unwrap().sitemap.max_depth,
            Config::default().sitemap.max_depth
        );

        store
            .write_bytes(CONFIG_KEY, b"[schedule]\nreport_after_secs = 600\n")
            .await
            .unwrap();
        let config = load_lambda_config(&store).await.unwrap();
        assert_eq!(config.schedule.report_after_secs, 600);
    }

    #[test]
    fn test_response_skips_empty_error() {
        let json = serde_json::to_value(TickResponse::from(&RunSummary::default())).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
    }
}
