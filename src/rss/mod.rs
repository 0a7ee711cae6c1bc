//! Feed ingestion: fetch configured RSS/Atom sources and persist articles
//! for the clustering worker to pick up.

pub mod fetcher;
pub mod types;

pub use fetcher::{compute_title_hash, fetch_all_feeds, ingest_feeds};
pub use types::{sources_from_env, CrawlItem, FeedSource};
