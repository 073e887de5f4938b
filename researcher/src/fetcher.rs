use anyhow::{Context, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use common::{FetchConfig, DEFAULT_USER_AGENT};

/// Fetches pages over HTTP with a fixed browser-like header set.
///
/// One instance is built at startup and shared by every request; the inner
/// `reqwest::Client` keeps its own connection pool. No retries, no caching.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(user_agent: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn from_config(cfg: Option<&FetchConfig>) -> Result<Self> {
        let user_agent = cfg
            .and_then(|c| c.user_agent.as_deref())
            .unwrap_or(DEFAULT_USER_AGENT);
        let timeout = cfg.and_then(|c| c.timeout_seconds).unwrap_or(15);
        Self::new(user_agent, timeout)
    }

    /// GET `url` and return the body, failing on transport errors and non-2xx status.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.send(url).await?;
        response.text().await.context("failed to read response body")
    }

    /// GET `url` and return the body only if the server declares it as HTML.
    pub async fn fetch_html(&self, url: &str) -> Result<String> {
        let response = self.send(url).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") {
            anyhow::bail!("unexpected content type '{}' for {}", content_type, url);
        }

        let body = response.text().await.context("failed to read response body")?;
        debug!("fetcher: {} bytes of html from {}", body.len(), url);
        Ok(body)
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/html")
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("fetch of {} failed with status: {}", url, status));
        }
        Ok(response)
    }
}
