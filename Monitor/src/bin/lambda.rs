//! AWS Lambda entry point for the sitemap monitor
//!
//! Deploy with `cargo lambda build --release --features lambda` and trigger
//! it from a schedule (EventBridge) with `{}` or `{"owner": "..."}`.

use lambda_runtime::{Error as LambdaError, service_fn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitor::lambda::handler;

#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Sitemap monitor Lambda starting...");
    lambda_runtime::run(service_fn(handler)).await
}
