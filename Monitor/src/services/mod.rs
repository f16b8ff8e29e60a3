//! Service layer for the sitemap monitor.
//!
//! - Sitemap discovery and parsing (`SitemapParser`)
//! - Tracked-site registry (`SiteRegistry`, `StoredRegistry`)
//! - Report delivery (`ReportSender`, `OutboxReporter`)
//! - Optional page-title enrichment (`TitleResolver`, `HttpTitleResolver`)

pub mod registry;
pub mod report;
pub mod robots;
pub mod sitemap;
pub mod titles;

pub use registry::{SiteRegistry, StoredRegistry};
pub use report::{OutboxReporter, Report, ReportSender};
pub use sitemap::{SitemapDocument, SitemapParser, parse_document};
pub use titles::{HttpTitleResolver, TitleResolver, extract_title, resolve_titles};
