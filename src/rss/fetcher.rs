//! Feed fetching and parsing.

use anyhow::Result;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::types::{CrawlItem, FeedSource, MAX_RETRIES, REQUEST_TIMEOUT, RETRY_DELAY};
use crate::db::Database;
use crate::TARGET_WEB_REQUEST;

/// Dedup hash over the source reference and the article title; articles the
/// engine has already clustered keep their assignment on re-ingest.
pub fn compute_title_hash(reference: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference.as_bytes());
    hasher.update(title.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fetch every configured source concurrently. Failures are logged and
/// skipped; one broken feed never blocks a cycle.
pub async fn fetch_all_feeds(sources: &[FeedSource], per_feed_limit: usize) -> Vec<CrawlItem> {
    let client = match create_http_client() {
        Ok(client) => client,
        Err(e) => {
            error!(target: TARGET_WEB_REQUEST, "Failed to build HTTP client: {}", e);
            return Vec::new();
        }
    };

    let fetches = sources.iter().map(|source| {
        let client = client.clone();
        async move {
            match fetch_feed(&client, source, per_feed_limit).await {
                Ok(items) => items,
                Err(e) => {
                    error!(target: TARGET_WEB_REQUEST, "Feed fetch failed for {}: {}", source.url, e);
                    Vec::new()
                }
            }
        }
    });

    join_all(fetches).await.into_iter().flatten().collect()
}

/// Persist a batch of crawled items; returns how many rows were written.
pub async fn ingest_feeds(db: &Database, items: &[CrawlItem]) -> Result<usize> {
    let mut saved = 0;
    for item in items {
        let title_hash = compute_title_hash(&item.source.reference, &item.title);
        db.add_article(
            &item.title,
            &item.content,
            &item.source.name(),
            &item.url,
            &title_hash,
            Some(item.published_at),
        )
        .await?;
        saved += 1;
    }
    Ok(saved)
}

pub fn create_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .gzip(true)
        .redirect(reqwest::redirect::Policy::default())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// Fetch one source with bounded retries and parse its entries.
async fn fetch_feed(
    client: &reqwest::Client,
    source: &FeedSource,
    limit: usize,
) -> Result<Vec<CrawlItem>> {
    let mut attempts = 0;

    loop {
        if attempts >= MAX_RETRIES {
            return Err(anyhow::anyhow!(
                "max retries reached for feed {}",
                source.url
            ));
        }

        debug!(target: TARGET_WEB_REQUEST, "Loading feed from {}", source.url);
        let response = timeout(
            REQUEST_TIMEOUT,
            client
                .get(&source.url)
                .header(reqwest::header::USER_AGENT, "newsflow-rss/1.0")
                .header(
                    reqwest::header::ACCEPT,
                    "application/rss+xml, application/atom+xml, application/xml, text/xml, */*;q=0.9",
                )
                .send(),
        )
        .await;

        match response {
            Ok(Ok(resp)) if resp.status().is_success() => {
                let body = match resp.text().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(target: TARGET_WEB_REQUEST, "Failed to read feed body from {}: {}", source.url, e);
                        attempts += 1;
                        sleep(RETRY_DELAY).await;
                        continue;
                    }
                };
                let items = parse_feed(&body, source, limit)?;
                info!(target: TARGET_WEB_REQUEST, "Fetched {} entries from {}", items.len(), source.url);
                return Ok(items);
            }
            Ok(Ok(resp)) => {
                warn!(target: TARGET_WEB_REQUEST, "Non-success status {} from {}", resp.status(), source.url);
                attempts += 1;
                sleep(RETRY_DELAY).await;
            }
            Ok(Err(e)) => {
                warn!(target: TARGET_WEB_REQUEST, "Request to {} failed: {}", source.url, e);
                attempts += 1;
                sleep(RETRY_DELAY).await;
            }
            Err(_) => {
                warn!(target: TARGET_WEB_REQUEST, "Request to {} timed out", source.url);
                attempts += 1;
                sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Turn a feed document into crawl items, skipping entries the pipeline
/// cannot use: video links, missing dates, empty bodies.
fn parse_feed(body: &str, source: &FeedSource, limit: usize) -> Result<Vec<CrawlItem>> {
    let feed = feed_rs::parser::parse(Cursor::new(body))?;

    let mut items = Vec::new();
    for entry in feed.entries {
        if limit > 0 && items.len() >= limit {
            break;
        }

        let Some(link) = entry.links.first().map(|link| link.href.clone()) else {
            continue;
        };
        if link.contains("/video") {
            debug!(target: TARGET_WEB_REQUEST, "Skipping video link: {}", link);
            continue;
        }

        let Some(title) = entry.title.map(|t| t.content) else {
            debug!(target: TARGET_WEB_REQUEST, "Skipping untitled entry: {}", link);
            continue;
        };

        let Some(published_at) = entry.published.or(entry.updated) else {
            debug!(target: TARGET_WEB_REQUEST, "Skipping entry without a date: {}", link);
            continue;
        };

        let content = entry
            .summary
            .map(|t| t.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .unwrap_or_default();
        if content.trim().is_empty() {
            debug!(target: TARGET_WEB_REQUEST, "Skipping entry without content: {}", link);
            continue;
        }

        items.push(CrawlItem {
            title,
            content,
            source: source.clone(),
            url: link,
            published_at,
        });
    }

    Ok(items)
}
