//! Research pipeline: search, enrich each hit with page text, summarize, persist.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use common::Config;

use crate::extractor::{self, DEFAULT_MAX_LENGTH};
use crate::fetcher::PageFetcher;
use crate::history::{HistoryStore, ResearchPayload};
use crate::llm::summarizer::{self, EnrichedResult, SummarizerSettings};
use crate::llm::LlmProvider;
use crate::search::{SearchClient, SearchResult};

pub const DEFAULT_NUM_RESULTS: usize = 5;

/// Body of `POST /research`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchQuery {
    pub text: String,
    #[serde(default)]
    pub num_results: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("{0}")]
    InvalidQuery(String),
    #[error("No search results found")]
    NoResults,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Everything a research run needs, built once at startup and shared by all requests.
#[derive(Clone)]
pub struct Researcher {
    pub search: SearchClient,
    pub fetcher: PageFetcher,
    pub llm: Option<Arc<dyn LlmProvider>>,
    pub history: HistoryStore,
    pub summary: SummarizerSettings,
    pub max_content_length: usize,
    pub max_results: usize,
    pub fail_on_save_error: bool,
}

impl Researcher {
    /// Wire the pipeline from configuration. The LLM provider is resolved by the caller
    /// so that environment lookups happen exactly once, at startup.
    pub fn from_config(config: &Config, history: HistoryStore, llm: Option<Arc<dyn LlmProvider>>) -> Result<Self> {
        let fetcher = PageFetcher::from_config(config.fetch.as_ref())?;
        let search = SearchClient::from_config(config.search.as_ref())?;

        Ok(Self {
            search,
            fetcher,
            llm,
            history,
            summary: SummarizerSettings::from_config(config.summary.as_ref()),
            max_content_length: config
                .fetch
                .as_ref()
                .and_then(|f| f.max_content_length)
                .unwrap_or(DEFAULT_MAX_LENGTH),
            max_results: config.search_max_results(),
            fail_on_save_error: config.fail_on_save_error(),
        })
    }

    /// Validate the request and return the number of results to ask for.
    pub fn validate(&self, query: &ResearchQuery) -> Result<usize, ResearchError> {
        if query.text.trim().is_empty() {
            return Err(ResearchError::InvalidQuery("Query text must not be empty".to_string()));
        }
        let requested = query.num_results.unwrap_or(DEFAULT_NUM_RESULTS as i64);
        if requested < 1 {
            return Err(ResearchError::InvalidQuery("num_results must be at least 1".to_string()));
        }
        Ok((requested as usize).min(self.max_results))
    }

    /// Run one research request end to end.
    pub async fn run(&self, query: &ResearchQuery) -> Result<ResearchPayload, ResearchError> {
        let num_results = self.validate(query)?;
        let text = query.text.as_str();
        info!("research: '{}' (up to {} results)", text, num_results);

        let hits = self.search.search(text, num_results).await;
        if hits.is_empty() {
            info!("research: no search results for '{}'", text);
            return Err(ResearchError::NoResults);
        }

        let mut enriched = Vec::with_capacity(hits.len());
        for hit in &hits {
            let content = self.page_content(hit).await;
            enriched.push(EnrichedResult {
                result: hit.clone(),
                content,
            });
        }

        let outcome = summarizer::summarize_findings(self.llm.as_deref(), text, &enriched, &self.summary).await;
        if outcome.is_failure() {
            warn!("research: summary for '{}' is a failure placeholder", text);
        }

        let payload = ResearchPayload {
            query: text.to_string(),
            results: hits,
            summary: outcome.into_text(),
        };

        if let Err(e) = self.history.save(text, &payload).await {
            if self.fail_on_save_error {
                error!("research: failed to save history for '{}': {:#}", text, e);
                return Err(ResearchError::Internal(e));
            }
            warn!("research: failed to save history for '{}', returning result anyway: {:#}", text, e);
        }

        Ok(payload)
    }

    /// Extracted text of the hit's page, or its snippet when nothing could be extracted.
    async fn page_content(&self, hit: &SearchResult) -> String {
        let content = match self.fetcher.fetch_html(&hit.url).await {
            Ok(html) => extractor::extract_text(&html, self.max_content_length),
            Err(e) => {
                debug!("research: skipping page content for {}: {:#}", hit.url, e);
                String::new()
            }
        };

        if content.is_empty() {
            debug!("research: falling back to snippet for {}", hit.url);
            hit.snippet.clone()
        } else {
            content
        }
    }
}
