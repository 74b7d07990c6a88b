//! Feed item filtering
//!
//! Two filter inputs per feed, both newline-separated: blocked keywords
//! (case-insensitive substring match) and blocked regex patterns (ORed).
//! Invalid regex lines are skipped with a warning rather than failing the
//! whole feed.

use regex::Regex;

/// Compiled per-feed filter
#[derive(Debug, Default)]
pub struct FeedFilter {
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl FeedFilter {
    /// Compile a filter from the feed's newline-separated settings
    pub fn new(blocked_keywords: &str, blocked_regex: &str) -> Self {
        let keywords = blocked_keywords
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_lowercase)
            .collect();

        let patterns = blocked_regex
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match Regex::new(line) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = line, error = %e, "skipping invalid filter regex");
                    None
                }
            })
            .collect();

        Self { keywords, patterns }
    }

    /// Whether this filter has any active rule
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.patterns.is_empty()
    }

    /// True when the title matches any blocked keyword or pattern
    pub fn should_filter(&self, title: &str) -> bool {
        let lowered = title.to_lowercase();
        if self.keywords.iter().any(|kw| lowered.contains(kw)) {
            return true;
        }
        self.patterns.iter().any(|re| re.is_match(title))
    }
}
