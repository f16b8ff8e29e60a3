// src/services/sitemap.rs

//! Sitemap discovery and parsing service.
//!
//! Locates a site's sitemaps through its robots file, walks sitemap indices
//! down to leaf sitemaps and unions every declared page URL. A run either
//! produces the complete page set or fails as a whole.

use std::collections::BTreeSet;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;

use crate::error::{AppError, Result};
use crate::models::{Config, PageSet, RootUrl, Site};
use crate::services::robots;
use crate::utils::http::HttpFetcher;

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<sitemapindex>`: locations of nested sitemaps
    Index(Vec<String>),
    /// `<urlset>`: page locations
    Urlset(Vec<String>),
}

/// Parse a sitemap or sitemap index.
///
/// Namespace prefixes are ignored. A `<loc>` only counts when its parent is
/// `<sitemap>` (index) or `<url>` (leaf), so extension tags such as
/// `<image:loc>` are skipped.
pub fn parse_document(url: &str, xml: &str) -> Result<SitemapDocument> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));

    let mut root: Option<String> = None;
    let mut stack: Vec<String> = Vec::new();
    let mut loc_text: Option<String> = None;
    let mut nested = Vec::new();
    let mut pages = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::parse(url, format!("{e} at byte {}", reader.error_position()))
        })?;

        match event {
            Event::Start(e) => {
                let name = element_name(e.local_name().as_ref());
                open_element(url, &mut root, &stack, &name)?;
                if name == "loc" {
                    loc_text = Some(String::new());
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = element_name(e.local_name().as_ref());
                open_element(url, &mut root, &stack, &name)?;
            }
            Event::End(e) => {
                let name = element_name(e.local_name().as_ref());
                match stack.pop() {
                    Some(open) if open == name => {}
                    Some(open) => {
                        return Err(AppError::parse(
                            url,
                            format!("expected </{open}>, found </{name}>"),
                        ));
                    }
                    None => {
                        return Err(AppError::parse(url, format!("unmatched </{name}>")));
                    }
                }

                if name == "loc" {
                    let text = loc_text.take().unwrap_or_default();
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    match stack.last().map(String::as_str) {
                        Some("sitemap") => nested.push(text.to_string()),
                        Some("url") => pages.push(text.to_string()),
                        _ => {}
                    }
                }
            }
            Event::Text(e) => {
                if let Some(buf) = loc_text.as_mut() {
                    let text = e.decode().map_err(|err| AppError::parse(url, err))?;
                    buf.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(buf) = loc_text.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if let Some(buf) = loc_text.as_mut() {
                    if let Some(ch) = e.resolve_char_ref().map_err(|err| AppError::parse(url, err))? {
                        buf.push(ch);
                    } else {
                        let entity = e.decode().map_err(|err| AppError::parse(url, err))?;
                        let resolved = resolve_predefined_entity(&entity).ok_or_else(|| {
                            AppError::parse(url, format!("unknown entity &{entity};"))
                        })?;
                        buf.push_str(resolved);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(AppError::parse(url, format!("unclosed <{open}>")));
    }

    match root.as_deref() {
        Some("sitemapindex") => Ok(SitemapDocument::Index(nested)),
        Some("urlset") => Ok(SitemapDocument::Urlset(pages)),
        Some(other) => Err(AppError::parse(
            url,
            format!("unexpected root element <{other}>"),
        )),
        None => Err(AppError::parse(url, "no root element")),
    }
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

/// Record the root element and reject a second top-level element.
fn open_element(url: &str, root: &mut Option<String>, stack: &[String], name: &str) -> Result<()> {
    if stack.is_empty() {
        if let Some(existing) = root {
            return Err(AppError::parse(
                url,
                format!("second root element <{name}> after <{existing}>"),
            ));
        }
        *root = Some(name.to_string());
    }
    Ok(())
}

/// Service turning a site's root URL into its complete page set.
#[derive(Debug, Clone)]
pub struct SitemapParser {
    fetcher: HttpFetcher,
    max_depth: usize,
    max_concurrent: usize,
}

impl SitemapParser {
    /// Create a parser with the given configuration.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_fetcher(
            HttpFetcher::new(&config.http)?,
            config.sitemap.max_depth,
            config.http.max_concurrent,
        ))
    }

    /// Create a parser around an existing fetcher.
    pub fn with_fetcher(fetcher: HttpFetcher, max_depth: usize, max_concurrent: usize) -> Self {
        Self {
            fetcher,
            max_depth,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Sitemap URLs declared in the site's robots file.
    ///
    /// No fallback to `/sitemap.xml`: an unreachable robots file or one
    /// without directives is a discovery failure.
    pub async fn discover(&self, root: &RootUrl) -> Result<Vec<String>> {
        let robots_url = root.robots_url()?;
        let text = self
            .fetcher
            .fetch_text(robots_url.as_str())
            .await
            .map_err(|e| AppError::discovery(root.as_str(), format!("robots.txt unreachable: {e}")))?;

        let sitemaps = robots::sitemap_directives(&text, root.as_url());
        if sitemaps.is_empty() {
            return Err(AppError::discovery(
                root.as_str(),
                "robots.txt has no Sitemap directive",
            ));
        }

        log::debug!("{}: {} sitemap(s) declared", root.host(), sitemaps.len());
        Ok(sitemaps)
    }

    /// Parse every sitemap of a tracked site.
    pub async fn parse_site(&self, site: &Site) -> Result<PageSet> {
        self.parse_root(&site.root_url).await
    }

    /// Parse every sitemap reachable from a root URL into one page set.
    pub async fn parse_root(&self, root: &RootUrl) -> Result<PageSet> {
        let candidates = self.discover(root).await?;

        let collected: Vec<BTreeSet<String>> = stream::iter(candidates)
            .map(|url| self.collect(url, 0))
            .buffer_unordered(self.max_concurrent)
            .try_collect()
            .await?;

        let pages: BTreeSet<String> = collected.into_iter().flatten().collect();
        log::info!("{}: {} pages found", root.host(), pages.len());

        Ok(PageSet {
            site_name: root.host().to_string(),
            captured_at: Utc::now(),
            pages,
        })
    }

    /// Fetch one sitemap document and return the pages below it.
    fn collect(&self, url: String, depth: usize) -> BoxFuture<'_, Result<BTreeSet<String>>> {
        Box::pin(async move {
            let xml = self.fetcher.fetch_text(&url).await?;

            match parse_document(&url, &xml)? {
                SitemapDocument::Urlset(pages) => {
                    log::debug!("{url}: {} pages", pages.len());
                    Ok(pages.into_iter().collect())
                }
                SitemapDocument::Index(children) => {
                    if depth >= self.max_depth {
                        return Err(AppError::RecursionLimit {
                            url,
                            limit: self.max_depth,
                        });
                    }
                    log::debug!("{url}: index with {} sitemaps", children.len());

                    let nested: Vec<BTreeSet<String>> = stream::iter(children)
                        .map(|child| self.collect(child, depth + 1))
                        .buffer_unordered(self.max_concurrent)
                        .try_collect()
                        .await?;
                    Ok(nested.into_iter().flatten().collect())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpConfig;

    const URL: &str = "https://ex.com/sitemap.xml";

    fn parser(max_depth: usize) -> SitemapParser {
        let config = HttpConfig {
            max_retries: 0,
            retry_delay_ms: 0,
            timeout_secs: 5,
            ..HttpConfig::default()
        };
        SitemapParser::with_fetcher(HttpFetcher::new(&config).unwrap(), max_depth, 2)
    }

    fn urlset(locs: &[String]) -> String {
        let entries: String = locs
            .iter()
            .map(|l| format!("<url><loc>{l}</loc><lastmod>2026-01-01</lastmod></url>"))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#
        )
    }

    fn index(locs: &[String]) -> String {
        let entries: String = locs
            .iter()
            .map(|l| format!("<sitemap><loc>{l}</loc></sitemap>"))
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</sitemapindex>"#
        )
    }

    #[test]
    fn test_parse_leaf() {
        let xml = urlset(&["https://ex.com/a".into(), "https://ex.com/b".into()]);
        assert_eq!(
            parse_document(URL, &xml).unwrap(),
            SitemapDocument::Urlset(vec!["https://ex.com/a".into(), "https://ex.com/b".into()])
        );
    }

    #[test]
    fn test_parse_index() {
        let xml = index(&["https://ex.com/sitemap1.xml".into()]);
        assert_eq!(
            parse_document(URL, &xml).unwrap(),
            SitemapDocument::Index(vec!["https://ex.com/sitemap1.xml".into()])
        );
    }

    #[test]
    fn test_parse_entities_whitespace_and_cdata() {
        let xml = r#"<urlset>
            <url>
                <loc>
                    https://ex.com/search?q=a&amp;page=2
                </loc>
            </url>
            <url><loc><![CDATA[https://ex.com/c]]></loc></url>
            <url><loc>https://ex.com/&#100;</loc></url>
        </urlset>"#;

        assert_eq!(
            parse_document(URL, xml).unwrap(),
            SitemapDocument::Urlset(vec![
                "https://ex.com/search?q=a&page=2".into(),
                "https://ex.com/c".into(),
                "https://ex.com/d".into(),
            ])
        );
    }

    #[test]
    fn test_parse_ignores_extension_locs() {
        let xml = r#"<urlset xmlns:image="http://www.google.com/schemas/sitemap-image/1.1">
            <url>
                <loc>https://ex.com/gallery</loc>
                <image:image><image:loc>https://ex.com/img.png</image:loc></image:image>
            </url>
        </urlset>"#;

        assert_eq!(
            parse_document(URL, xml).unwrap(),
            SitemapDocument::Urlset(vec!["https://ex.com/gallery".into()])
        );
    }

    #[test]
    fn test_parse_empty_urlset() {
        assert_eq!(
            parse_document(URL, "<urlset/>").unwrap(),
            SitemapDocument::Urlset(vec![])
        );
        assert_eq!(
            parse_document(URL, "<urlset></urlset>").unwrap(),
            SitemapDocument::Urlset(vec![])
        );
    }

    #[test]
    fn test_parse_malformed() {
        let cases = [
            "<urlset><url><loc>https://ex.com/a</url></urlset>",
            "<urlset><url><loc>https://ex.com/a</loc></url>",
            "not xml at all",
            "",
            "<html><body>Not found</body></html>",
            "<urlset></urlset><urlset></urlset>",
        ];
        for xml in cases {
            let err = parse_document(URL, xml).unwrap_err();
            assert!(matches!(err, AppError::Parse { .. }), "{xml:?} gave {err}");
        }
    }

    #[tokio::test]
    async fn test_index_union_dedups() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!("User-agent: *\nSitemap: {base}/sitemap_index.xml\n"))
            .create_async()
            .await;
        let _index = server
            .mock("GET", "/sitemap_index.xml")
            .with_body(index(&[
                format!("{base}/sitemap1.xml"),
                format!("{base}/sitemap2.xml"),
            ]))
            .create_async()
            .await;
        let _s1 = server
            .mock("GET", "/sitemap1.xml")
            .with_body(urlset(&[format!("{base}/A"), format!("{base}/B")]))
            .create_async()
            .await;
        let _s2 = server
            .mock("GET", "/sitemap2.xml")
            .with_body(urlset(&[format!("{base}/B"), format!("{base}/C")]))
            .create_async()
            .await;

        let root = RootUrl::parse(&base).unwrap();
        let set = parser(2).parse_root(&root).await.unwrap();

        let expected: BTreeSet<String> = ["A", "B", "C"]
            .iter()
            .map(|p| format!("{base}/{p}"))
            .collect();
        assert_eq!(set.pages, expected);
        assert_eq!(set.site_name, root.host());
    }

    #[tokio::test]
    async fn test_multiple_directives_are_unioned() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!("Sitemap: {base}/pages.xml\nSitemap: {base}/posts.xml\n"))
            .create_async()
            .await;
        let _pages = server
            .mock("GET", "/pages.xml")
            .with_body(urlset(&[format!("{base}/about")]))
            .create_async()
            .await;
        let _posts = server
            .mock("GET", "/posts.xml")
            .with_body(urlset(&[format!("{base}/hello-world"), format!("{base}/about")]))
            .create_async()
            .await;

        let set = parser(2)
            .parse_root(&RootUrl::parse(&base).unwrap())
            .await
            .unwrap();
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_self_referencing_index_hits_recursion_limit() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!("Sitemap: {base}/loop.xml"))
            .create_async()
            .await;
        let _loop = server
            .mock("GET", "/loop.xml")
            .with_body(index(&[format!("{base}/loop.xml")]))
            .expect_at_most(3)
            .create_async()
            .await;

        let err = parser(2)
            .parse_root(&RootUrl::parse(&base).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RecursionLimit { limit: 2, .. }));
    }

    #[tokio::test]
    async fn test_missing_robots_is_discovery_error() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_status(404)
            .create_async()
            .await;
        let fallback = server
            .mock("GET", "/sitemap.xml")
            .with_body(urlset(&["https://ex.com/a".into()]))
            .expect(0)
            .create_async()
            .await;

        let err = parser(2)
            .parse_root(&RootUrl::parse(&server.url()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Discovery { .. }));
        fallback.assert_async().await;
    }

    #[tokio::test]
    async fn test_robots_without_directive_is_discovery_error() {
        let mut server = mockito::Server::new_async().await;
        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body("User-agent: *\nDisallow:")
            .create_async()
            .await;

        let err = parser(2)
            .parse_root(&RootUrl::parse(&server.url()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Discovery { .. }));
    }

    #[tokio::test]
    async fn test_one_failing_child_fails_whole_run() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!("Sitemap: {base}/index.xml"))
            .create_async()
            .await;
        let _index = server
            .mock("GET", "/index.xml")
            .with_body(index(&[format!("{base}/ok.xml"), format!("{base}/gone.xml")]))
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/ok.xml")
            .with_body(urlset(&[format!("{base}/a")]))
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/gone.xml")
            .with_status(500)
            .create_async()
            .await;

        let err = parser(2)
            .parse_root(&RootUrl::parse(&base).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_stalled_sitemap_fails_within_timeout() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        let stalled = format!("{}/stalled.xml", crate::utils::http::silent_server());

        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!("Sitemap: {base}/ok.xml\nSitemap: {stalled}\n"))
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/ok.xml")
            .with_body(urlset(&[format!("{base}/a")]))
            .create_async()
            .await;

        let config = HttpConfig {
            max_retries: 0,
            retry_delay_ms: 0,
            timeout_secs: 1,
            ..HttpConfig::default()
        };
        let parser = SitemapParser::with_fetcher(HttpFetcher::new(&config).unwrap(), 2, 2);

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            parser.parse_root(&RootUrl::parse(&base).unwrap()),
        )
        .await
        .expect("stalled sitemap was not abandoned")
        .unwrap_err();
        assert!(matches!(err, AppError::Fetch { ref url, .. } if *url == stalled));
    }

    #[tokio::test]
    async fn test_malformed_child_is_parse_error() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();

        let _robots = server
            .mock("GET", "/robots.txt")
            .with_body(format!("Sitemap: {base}/broken.xml"))
            .create_async()
            .await;
        let _broken = server
            .mock("GET", "/broken.xml")
            .with_body("<urlset><url><loc>x</url>")
            .create_async()
            .await;

        let err = parser(2)
            .parse_root(&RootUrl::parse(&base).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Parse { .. }));
    }
}
