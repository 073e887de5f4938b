// Summarizer module
use std::fmt::Write as _;

use tracing::{info, warn};

use common::SummaryConfig;

use super::{LlmProvider, LlmRequest};
use crate::search::SearchResult;

pub const FAILURE_PREFIX: &str = "Failed to generate summary";

const SYSTEM_PROMPT: &str = "You are a research assistant that creates concise, accurate summaries.";

/// A search hit plus the page text extracted for it (or its snippet when extraction
/// produced nothing).
#[derive(Debug, Clone)]
pub struct EnrichedResult {
    pub result: SearchResult,
    pub content: String,
}

/// Outcome of a summarization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryOutcome {
    Generated(String),
    Failed(String),
}

impl SummaryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SummaryOutcome::Failed(_))
    }

    /// Text stored and returned to clients. Failures become a readable placeholder.
    pub fn into_text(self) -> String {
        match self {
            SummaryOutcome::Generated(text) => text,
            SummaryOutcome::Failed(reason) => format!("{}: {}", FAILURE_PREFIX, reason),
        }
    }
}

/// Prompt shaping knobs, resolved once at startup. Token and temperature bounds
/// belong to the provider.
#[derive(Debug, Clone, Copy)]
pub struct SummarizerSettings {
    pub max_items: usize,
    pub excerpt_chars: usize,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            max_items: 5,
            excerpt_chars: 800,
        }
    }
}

impl SummarizerSettings {
    pub fn from_config(cfg: Option<&SummaryConfig>) -> Self {
        let defaults = Self::default();
        Self {
            max_items: cfg.and_then(|c| c.max_items).unwrap_or(defaults.max_items),
            excerpt_chars: cfg.and_then(|c| c.excerpt_chars).unwrap_or(defaults.excerpt_chars),
        }
    }
}

/// Build the user prompt: the query, then title/URL/excerpt for each of the first
/// `max_items` results, then the bullet-point instruction.
pub fn build_prompt(query: &str, items: &[EnrichedResult], settings: &SummarizerSettings) -> String {
    let mut prompt = format!("Query: \"{}\"\n\n", query);
    for (i, item) in items.iter().take(settings.max_items).enumerate() {
        let excerpt: String = item.content.chars().take(settings.excerpt_chars).collect();
        let _ = write!(
            prompt,
            "Article {}:\nTitle: {}\nURL: {}\n\nExcerpt: {}\n\n---\n\n",
            i + 1,
            item.result.title,
            item.result.url,
            excerpt
        );
    }
    prompt.push_str("Please provide a concise summary in 5-10 bullet points.");
    prompt
}

/// Summarize the findings for `query`. Never fails: provider errors come back as
/// [`SummaryOutcome::Failed`].
pub async fn summarize_findings<P: LlmProvider + ?Sized>(
    provider: Option<&P>,
    query: &str,
    items: &[EnrichedResult],
    settings: &SummarizerSettings,
) -> SummaryOutcome {
    let Some(provider) = provider else {
        warn!("summarizer: no LLM provider configured");
        return SummaryOutcome::Failed("no LLM provider configured".to_string());
    };

    let request = LlmRequest {
        system: Some(SYSTEM_PROMPT.to_string()),
        prompt: build_prompt(query, items, settings),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };

    match provider.generate(request).await {
        Ok(response) => {
            let text = response.content.trim();
            if text.is_empty() {
                warn!("summarizer: model {} returned an empty completion", response.model);
                return SummaryOutcome::Failed("model returned an empty response".to_string());
            }
            info!(
                "LLM summarization successful: model {}, {} tokens",
                response.model, response.usage.total_tokens
            );
            SummaryOutcome::Generated(text.to_string())
        }
        Err(e) => {
            warn!("LLM summarization failed: {:#}", e);
            SummaryOutcome::Failed(format!("{:#}", e))
        }
    }
}
