//! Link and content-fingerprint extraction
//!
//! Pages are scanned with precompiled regular expressions instead of being parsed
//! into a DOM: the page structure is simple and stable, and pattern matching keeps
//! per-page CPU cost low when thousands of pages are processed per minute.

use crate::config::DEFAULT_LINK_PATTERN;
use crate::ConfigError;
use indexmap::IndexSet;
use regex::Regex;

/// Number of leading characters searched for the content hash
pub const HASH_WINDOW_CHARS: usize = 500;

const HASH_PATTERN: &str = r"\b([a-f0-9]{32})\b";

/// Pulls outbound paths and a content hash out of raw HTML
#[derive(Debug, Clone)]
pub struct LinkExtractor {
    link_pattern: Regex,
    hash_pattern: Regex,
}

impl LinkExtractor {
    /// Builds an extractor for the default `/scraping/<n>` link pattern
    pub fn with_default_pattern() -> Result<Self, ConfigError> {
        Self::new(DEFAULT_LINK_PATTERN)
    }

    /// Builds an extractor for a link pattern with one capture group
    pub fn new(link_pattern: &str) -> Result<Self, ConfigError> {
        let link_pattern =
            Regex::new(link_pattern).map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;
        let hash_pattern =
            Regex::new(HASH_PATTERN).map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        Ok(Self {
            link_pattern,
            hash_pattern,
        })
    }

    /// Extracts every outbound path, in document order, duplicates collapsed
    ///
    /// # Example
    ///
    /// ```
    /// use pathwalker::crawler::LinkExtractor;
    ///
    /// let extractor = LinkExtractor::with_default_pattern().unwrap();
    /// let html = r#"<a href="/scraping/2">2</a> <a href='/scraping/3'>3</a> <a href="/scraping/2">again</a>"#;
    /// let links = extractor.extract_links(html);
    /// assert_eq!(links.len(), 2);
    /// assert_eq!(links.get_index(0).unwrap(), "/scraping/2");
    /// ```
    pub fn extract_links(&self, html: &str) -> IndexSet<String> {
        self.link_pattern
            .captures_iter(html)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// First outbound path of the page, used by greedy traversal
    pub fn extract_next_link(&self, html: &str) -> Option<String> {
        self.link_pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// First 32-hex-character token within the first 500 characters
    ///
    /// Absence is not an error; the page simply has no fingerprint.
    pub fn extract_hash(&self, html: &str) -> Option<String> {
        let head = char_prefix(html, HASH_WINDOW_CHARS);
        self.hash_pattern
            .captures(head)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Slices at most `chars` characters without splitting a code point
fn char_prefix(s: &str, chars: usize) -> &str {
    match s.char_indices().nth(chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
