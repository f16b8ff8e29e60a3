//! Sitemap Monitor CLI
//!
//! Local execution entry point. For AWS Lambda, use `monitor-lambda`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use monitor::{
    error::{AppError, Result},
    models::{Config, OwnerId, RootUrl},
    pipeline::{OwnerTick, RunController},
    services::{HttpTitleResolver, OutboxReporter, SitemapParser, StoredRegistry},
    storage::LocalStorage,
};

/// Sitemap Monitor - reports pages added to tracked websites
#[derive(Parser, Debug)]
#[command(
    name = "monitor",
    version,
    about = "Tracks website sitemaps and reports newly added pages"
)]
struct Cli {
    /// Path to storage directory containing config.toml and tracking data
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start tracking websites for an owner
    Register {
        #[arg(long)]
        owner: String,

        /// Root URLs (scheme and host only)
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Advance tracked sites by one scheduled step
    Tick {
        /// Only tick this owner (default: every registered owner)
        #[arg(long)]
        owner: Option<String>,
    },

    /// Parse a website's sitemaps once and print the page set
    Capture { url: String },

    /// Show tracking state of an owner's sites
    Status {
        #[arg(long)]
        owner: String,
    },

    /// Stop tracking an owner's sites and discard their snapshots
    Unregister {
        #[arg(long)]
        owner: String,
    },

    /// Validate configuration file
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn build_controller(config: Arc<Config>, data_dir: &std::path::Path) -> Result<RunController> {
    let storage = Arc::new(LocalStorage::new(data_dir));
    let registry = Arc::new(StoredRegistry::new(storage.clone()));
    let reporter = Arc::new(OutboxReporter::new(storage.clone()));
    let titles = Arc::new(HttpTitleResolver::new(&config.http)?);

    Ok(RunController::new(config, storage, registry, reporter)?.with_titles(titles))
}

fn print_tick(tick: &OwnerTick) {
    for site in &tick.sites {
        match &site.error {
            Some(message) => log::warn!("  {} [{}] {}", site.site_name, site.phase, message),
            None => log::info!(
                "  {} [{}] +{} new, {} pending",
                site.site_name,
                site.phase,
                site.new_pages,
                site.pending
            ),
        }
    }
    if tick.report_sent {
        log::info!("  Report sent to {}", tick.owner_id);
    } else if let Some(message) = &tick.message {
        log::warn!("  {}", message);
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.storage_dir.join("config.toml");
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    let data_dir = cli.storage_dir.join(&config.storage.root_dir);

    log::debug!("Loaded configuration from {}", cli.storage_dir.display());

    let config = Arc::new(config);

    match cli.command {
        Command::Register { owner, urls } => {
            let controller = build_controller(Arc::clone(&config), &data_dir)?;
            match controller.register(&OwnerId::new(owner), &urls, Utc::now()).await {
                Ok(registration) => {
                    for site in &registration.sites {
                        log::info!("Tracking {} ({})", site.root_url, site.site_id);
                    }
                    println!("{}", registration.message());
                }
                Err(e @ (AppError::AlreadyRegistered(_) | AppError::Validation(_) | AppError::Url(_))) => {
                    log::debug!("Registration rejected: {}", e);
                    println!("{}", e.user_message());
                }
                Err(e) => return Err(e),
            }
        }

        Command::Tick { owner } => {
            let controller = build_controller(Arc::clone(&config), &data_dir)?;
            let now = Utc::now();

            match owner {
                Some(owner) => {
                    let tick = controller.tick_owner(&OwnerId::new(owner), now).await?;
                    log::info!("Owner {}:", tick.owner_id);
                    print_tick(&tick);
                }
                None => {
                    let summary = controller.tick_all(now).await?;
                    for tick in &summary.ticks {
                        log::info!("Owner {}:", tick.owner_id);
                        print_tick(tick);
                    }
                    for (owner, e) in &summary.errors {
                        log::error!("Owner {}: {}", owner, e);
                    }
                    log::info!(
                        "Tick complete: {} owners, {} sites, {} failures, {} reports sent",
                        summary.owners(),
                        summary.sites(),
                        summary.failures(),
                        summary.reports_sent()
                    );
                }
            }
        }

        Command::Capture { url } => {
            let root = RootUrl::parse(&url)?;
            let parser = SitemapParser::new(&config)?;
            let pages = parser.parse_root(&root).await?;
            println!("{}", serde_json::to_string_pretty(&pages)?);
        }

        Command::Status { owner } => {
            let controller = build_controller(Arc::clone(&config), &data_dir)?;
            let statuses = controller.status(&OwnerId::new(owner)).await?;

            if statuses.is_empty() {
                log::info!("No tracked sites.");
            }
            for status in statuses {
                log::info!("{} [{}]", status.root_url, status.phase);
                log::info!("    Registered: {}", status.registered_at);
                log::info!("    Report due: {}", status.report_due);
                log::info!(
                    "    Baseline: {}, tracked: {}, pending: {}",
                    status
                        .baseline_pages
                        .map_or_else(|| "-".to_string(), |n| n.to_string()),
                    status
                        .tracked_pages
                        .map_or_else(|| "-".to_string(), |n| n.to_string()),
                    status.pending
                );
                if status.delivery_attempts > 0 {
                    log::info!("    Delivery attempts: {}", status.delivery_attempts);
                }
            }
        }

        Command::Unregister { owner } => {
            let controller = build_controller(Arc::clone(&config), &data_dir)?;
            let removed = controller.unregister(&OwnerId::new(owner)).await?;
            log::info!("Removed {} tracked site(s)", removed);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
            log::info!("    Report after: {}s", config.schedule.report_after_secs);
            log::info!("    Max sitemap depth: {}", config.sitemap.max_depth);
            log::info!("    Data directory: {}", data_dir.display());
        }
    }

    Ok(())
}
