//! Type definitions for the RSS module.

use std::env;

use chrono::{DateTime, Utc};
use tokio::time::Duration;
use tracing::error;

pub const NEWS_FEEDS_ENV: &str = "NEWS_FEEDS";

// Constants
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
pub const MAX_RETRIES: usize = 3;

/// A configured feed source.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub reference: String,
    pub category: String,
    pub url: String,
}

impl FeedSource {
    /// Combined name used as the article `source` column.
    pub fn name(&self) -> String {
        format!("{}/{}", self.reference, self.category)
    }
}

/// An article scraped from a feed, ready to persist.
#[derive(Debug, Clone)]
pub struct CrawlItem {
    pub title: String,
    pub content: String,
    pub source: FeedSource,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

/// Parse feed sources from the NEWS_FEEDS environment variable.
///
/// Entries are `;`-separated `reference|category|url` triples, e.g.
/// `NEWS_FEEDS="agency|world|https://example.com/world.rss"`.
pub fn sources_from_env() -> Vec<FeedSource> {
    let raw = env::var(NEWS_FEEDS_ENV).unwrap_or_default();

    let mut sources = Vec::new();
    for config in raw.split(';').map(str::trim).filter(|c| !c.is_empty()) {
        let parts: Vec<&str> = config.split('|').collect();
        if parts.len() != 3 {
            error!("Invalid feed configuration format: {}", config);
            continue;
        }
        sources.push(FeedSource {
            reference: parts[0].to_string(),
            category: parts[1].to_string(),
            url: parts[2].to_string(),
        });
    }
    sources
}
