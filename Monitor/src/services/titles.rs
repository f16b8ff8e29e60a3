// src/services/titles.rs

//! Page-title enrichment for reports.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};

use crate::error::Result;
use crate::models::{HttpConfig, PageTitles};
use crate::utils::http::HttpFetcher;

/// Looks up a human-readable title for a page.
#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn title_of(&self, url: &str) -> Result<Option<String>>;
}

/// Resolves titles by fetching the page and reading its `<title>`.
#[derive(Debug, Clone)]
pub struct HttpTitleResolver {
    fetcher: HttpFetcher,
}

impl HttpTitleResolver {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            fetcher: HttpFetcher::new(config)?,
        })
    }
}

#[async_trait]
impl TitleResolver for HttpTitleResolver {
    async fn title_of(&self, url: &str) -> Result<Option<String>> {
        let html = self.fetcher.fetch_text(url).await?;
        Ok(extract_title(&html))
    }
}

/// Text of the document's `<title>`, whitespace-normalized.
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let raw: String = document.select(&selector).next()?.text().collect();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Resolve titles for `urls`, skipping any that fail.
pub async fn resolve_titles<I>(resolver: &dyn TitleResolver, urls: I, concurrency: usize) -> PageTitles
where
    I: IntoIterator<Item = String>,
{
    stream::iter(urls)
        .map(|url| async move {
            let title = resolver.title_of(&url).await;
            (url, title)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(url, title)| async move {
            match title {
                Ok(Some(title)) => Some((url, title)),
                Ok(None) => None,
                Err(e) => {
                    log::warn!("No title for {}: {}", url, e);
                    None
                }
            }
        })
        .collect()
        .await
}
