//! Main-content text extraction from raw HTML.
//!
//! Boilerplate elements are detached from the parsed tree first, then a fixed list of
//! strategies is tried in order; the first one producing non-empty text wins.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Elements that never carry article text.
const BOILERPLATE_TAGS: &[&str] = &[
    "script",
    "style",
    "nav",
    "footer",
    "header",
    "aside",
    "iframe",
    "noscript",
    "advertisement",
];

/// Candidate main-content regions, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".content",
    ".post",
    ".article",
    ".main-content",
];

pub const TRUNCATION_MARKER: &str = "...";

pub const DEFAULT_MAX_LENGTH: usize = 8000;

#[derive(Debug, Clone, Copy)]
enum Strategy {
    /// Text of every element matched by the first selector that matches anything.
    ContentRegions(&'static [&'static str]),
    /// All `<p>` elements concatenated.
    Paragraphs,
    /// Every text node left in the document.
    FullText,
}

const STRATEGIES: [Strategy; 3] = [
    Strategy::ContentRegions(CONTENT_SELECTORS),
    Strategy::Paragraphs,
    Strategy::FullText,
];

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Strategy::ContentRegions(_) => "content-regions",
            Strategy::Paragraphs => "paragraphs",
            Strategy::FullText => "full-text",
        }
    }

    fn apply(&self, document: &Html) -> Option<String> {
        match self {
            Strategy::ContentRegions(selectors) => {
                for selector_str in selectors.iter() {
                    let Ok(selector) = Selector::parse(selector_str) else {
                        continue;
                    };
                    let regions: Vec<String> = document.select(&selector).map(element_text).collect();
                    if !regions.is_empty() {
                        debug!("extractor: selector '{}' matched {} regions", selector_str, regions.len());
                        return non_empty(regions.join(" "));
                    }
                }
                None
            }
            Strategy::Paragraphs => {
                let selector = Selector::parse("p").ok()?;
                let paragraphs: Vec<String> = document.select(&selector).map(element_text).collect();
                if paragraphs.is_empty() {
                    return None;
                }
                non_empty(paragraphs.join(" "))
            }
            Strategy::FullText => non_empty(element_text(document.root_element())),
        }
    }
}

/// Extract the readable text of `html`, collapsed to single spaces and capped at
/// `max_length` characters (plus [`TRUNCATION_MARKER`] when cut).
///
/// Returns an empty string when nothing readable is left; callers treat that as
/// "no content".
pub fn extract_text(html: &str, max_length: usize) -> String {
    let mut document = Html::parse_document(html);
    strip_boilerplate(&mut document);

    let text = STRATEGIES
        .iter()
        .find_map(|strategy| {
            let text = strategy.apply(&document).map(|t| collapse_whitespace(&t))?;
            if text.is_empty() {
                return None;
            }
            debug!("extractor: {} strategy produced {} chars", strategy.name(), text.len());
            Some(text)
        })
        .unwrap_or_default();

    truncate_chars(&text, max_length)
}

fn strip_boilerplate(document: &mut Html) {
    for tag in BOILERPLATE_TAGS {
        let Ok(selector) = Selector::parse(tag) else {
            continue;
        };
        let ids: Vec<_> = document.select(&selector).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Collapse every whitespace run (newlines included) to a single space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to `max_chars` characters, appending the truncation marker when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}
