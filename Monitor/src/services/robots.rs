// src/services/robots.rs

//! `Sitemap:` directive extraction from robots.txt.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::utils::resolve_url;

static SITEMAP_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*sitemap\s*:\s*(\S+)").expect("static regex is valid")
});

/// Collect every sitemap URL declared in a robots file.
///
/// Relative values are resolved against `base`; duplicates keep their first
/// position.
pub fn sitemap_directives(robots_txt: &str, base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();

    robots_txt
        .lines()
        .filter_map(|line| SITEMAP_DIRECTIVE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| resolve_url(base, m.as_str()))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
