use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use common::{SearchConfig, DEFAULT_SEARCH_ENDPOINT, DEFAULT_USER_AGENT};

use crate::fetcher::PageFetcher;

/// Query parameter carrying the real destination of a redirect-wrapped link.
const REDIRECT_TARGET_PARAM: &str = "uddg";

/// One hit from the results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Client for a DuckDuckGo-style HTML results page.
#[derive(Clone)]
pub struct SearchClient {
    endpoint: String,
    fetcher: PageFetcher,
}

impl SearchClient {
    pub fn new(endpoint: impl Into<String>, fetcher: PageFetcher) -> Self {
        Self {
            endpoint: endpoint.into(),
            fetcher,
        }
    }

    pub fn from_config(cfg: Option<&SearchConfig>) -> Result<Self> {
        let endpoint = cfg
            .and_then(|c| c.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string());
        let user_agent = cfg
            .and_then(|c| c.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT);
        let timeout = cfg.and_then(|c| c.timeout_seconds).unwrap_or(10);

        Ok(Self::new(endpoint, PageFetcher::new(user_agent, timeout)?))
    }

    /// Build the results page URL for `query`.
    pub fn query_url(&self, query: &str) -> Result<Url> {
        Url::parse_with_params(&self.endpoint, &[("q", query)])
            .with_context(|| format!("invalid search endpoint: {}", self.endpoint))
    }

    /// Search for `query`, returning at most `num_results` hits in page order.
    ///
    /// A failed fetch or an unparseable page yields an empty list, never an error.
    pub async fn search(&self, query: &str, num_results: usize) -> Vec<SearchResult> {
        let url = match self.query_url(query) {
            Ok(u) => u,
            Err(e) => {
                warn!("search: {:#}", e);
                return Vec::new();
            }
        };

        let html = match self.fetcher.fetch_text(url.as_str()).await {
            Ok(body) => body,
            Err(e) => {
                warn!("search: results page fetch failed for '{}': {:#}", query, e);
                return Vec::new();
            }
        };

        let hits = parse_results(&html, num_results, &url);
        info!("search: '{}' returned {} results", query, hits.len());
        hits
    }
}

/// Parse result blocks out of a results page, stopping after `limit` hits.
///
/// Hrefs are resolved against `base`, the URL the page was fetched from. Blocks whose
/// link does not end up as an absolute http(s) URL are skipped.
pub fn parse_results(html: &str, limit: usize, base: &Url) -> Vec<SearchResult> {
    let document = Html::parse_document(html);

    let (Ok(block_sel), Ok(title_sel), Ok(fallback_title_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse(".result__title a"),
        Selector::parse("a.result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let mut hits = Vec::new();
    for block in document.select(&block_sel) {
        if hits.len() >= limit {
            break;
        }

        let Some(link) = block
            .select(&title_sel)
            .next()
            .or_else(|| block.select(&fallback_title_sel).next())
        else {
            continue;
        };

        let raw_href = link.value().attr("href").unwrap_or("").trim();
        if raw_href.is_empty() {
            continue;
        }
        let Some(url) = resolve_redirect(base, raw_href) else {
            debug!("search: skipping result with unusable href '{}'", raw_href);
            continue;
        };

        let snippet = block
            .select(&snippet_sel)
            .next()
            .map(text_of)
            .unwrap_or_default();

        hits.push(SearchResult {
            title: text_of(link),
            url,
            snippet,
        });
    }
    hits
}

/// Resolve `href` against `base` and unwrap `/l/?uddg=<target>` redirect links.
///
/// Returns `None` unless the result is an absolute http(s) URL.
pub fn resolve_redirect(base: &Url, href: &str) -> Option<String> {
    let joined = base.join(href).ok()?;

    let is_wrapper = href.starts_with("/l/") || href.starts_with("//duckduckgo.com/l/");
    let unwrapped = if is_wrapper {
        joined
            .query_pairs()
            .find(|(k, _)| k == REDIRECT_TARGET_PARAM)
            .and_then(|(_, v)| Url::parse(&v).ok())
    } else {
        None
    };
    let target = unwrapped.unwrap_or(joined);

    matches!(target.scheme(), "http" | "https").then(|| target.to_string())
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
