use std::env;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use newsflow::cluster::ClusterEngine;
use newsflow::config::{ClusterConfig, EMBEDDING_DIM};
use newsflow::db::Database;
use newsflow::embedder::OllamaEmbedder;
use newsflow::logging;
use newsflow::rss::{self, sources_from_env};
use newsflow::vector::{InMemoryIssueIndex, IssueIndex, QdrantIssueIndex, QDRANT_URL_ENV};
use newsflow::worker;
use newsflow::TARGET_CLUSTER;

const FEED_LIMIT_ENV: &str = "FEED_LIMIT";
const CYCLE_SECONDS_ENV: &str = "CYCLE_SECONDS";

#[tokio::main]
async fn main() -> Result<()> {
    logging::configure_logging();

    let config = ClusterConfig::from_env()?;
    info!(
        "Starting newsflow: alpha={}, beta={}, lambda={}, t_base={}, top_k={}",
        config.alpha, config.beta, config.lambda, config.t_base, config.top_k
    );

    let sources = sources_from_env();
    if sources.is_empty() {
        info!("No feed sources configured; only clustering already-ingested articles");
    } else {
        info!("Configured {} feed sources", sources.len());
    }

    let per_feed_limit: usize = env::var(FEED_LIMIT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let cycle_seconds: u64 = env::var(CYCLE_SECONDS_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(600);

    let db = Database::instance().await.clone();

    // Prefer a Qdrant deployment; otherwise an exact in-memory index seeded
    // from the authoritative centroids carries a single-node run.
    let index: Arc<dyn IssueIndex> = if env::var(QDRANT_URL_ENV).is_ok() {
        Arc::new(QdrantIssueIndex::from_env(EMBEDDING_DIM).await?)
    } else {
        info!("{} not set; using the in-memory issue index", QDRANT_URL_ENV);
        Arc::new(InMemoryIssueIndex::load(&db).await?)
    };

    let embedder = Arc::new(OllamaEmbedder::from_env(EMBEDDING_DIM));
    let engine = ClusterEngine::new(db.clone(), index, embedder, config)?;

    loop {
        let items = rss::fetch_all_feeds(&sources, per_feed_limit).await;
        let saved = match rss::ingest_feeds(&db, &items).await {
            Ok(saved) => saved,
            Err(e) => {
                error!("Feed ingest failed: {}", e);
                0
            }
        };

        let stats = worker::cluster_cycle(&db, &engine).await;

        match db.list_issues().await {
            Ok(issues) => {
                info!(
                    target: TARGET_CLUSTER,
                    "Cycle summary: {} fetched, {} saved, {} clustered, {} live issues",
                    items.len(), saved, stats.processed, issues.len()
                );
                for issue in issues.iter().take(10) {
                    info!(
                        target: TARGET_CLUSTER,
                        "  issue {}: {} articles, updated {} - {}",
                        issue.id, issue.article_count, issue.updated_at, issue.title
                    );
                }
            }
            Err(e) => error!("Failed to list issues: {}", e),
        }

        sleep(Duration::from_secs(cycle_seconds)).await;
    }
}
