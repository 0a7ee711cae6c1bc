use chrono::Utc;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::cluster::ClusterEngine;
use crate::db::Database;
use crate::TARGET_CLUSTER;

/// Per-article processing deadline, propagated to every suspension point.
pub const PROCESS_DEADLINE: Duration = Duration::from_secs(30);

/// How many unassigned articles one clustering cycle will look at.
pub const CYCLE_BATCH_LIMIT: i64 = 500;

/// Counts for one clustering cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleStats {
    pub processed: usize,
    pub merged: usize,
    pub created: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Run one clustering pass over articles still waiting on a decision.
///
/// Each article gets a single attempt per cycle: recoverable failures stay
/// unassigned and are retried next cycle, poison goes to the dead-letter
/// table and is never retried blindly.
pub async fn cluster_cycle(db: &Database, engine: &ClusterEngine) -> CycleStats {
    let mut stats = CycleStats::default();

    let pending = match db.list_unassigned_articles(CYCLE_BATCH_LIMIT).await {
        Ok(pending) => pending,
        Err(e) => {
            error!(target: TARGET_CLUSTER, "Failed to list unassigned articles: {}", e);
            return stats;
        }
    };

    for article in pending {
        let deadline = Instant::now() + PROCESS_DEADLINE;
        match engine
            .process_article(&article, Utc::now(), Some(deadline))
            .await
        {
            Ok(decision) => {
                stats.processed += 1;
                if decision.is_merge() {
                    stats.merged += 1;
                } else {
                    stats.created += 1;
                }
            }
            Err(e) if e.is_poison() => {
                error!(target: TARGET_CLUSTER, "Article {} is poison: {}", article.id, e);
                stats.failed += 1;
                match db.add_dead_letter(article.id, &e.to_string()).await {
                    Ok(()) => stats.dead_lettered += 1,
                    Err(db_err) => {
                        error!(target: TARGET_CLUSTER, "Failed to dead-letter article {}: {}", article.id, db_err)
                    }
                }
            }
            Err(e) => {
                warn!(target: TARGET_CLUSTER, "Article {} left for retry: {}", article.id, e);
                stats.failed += 1;
            }
        }
    }

    info!(
        target: TARGET_CLUSTER,
        "Clustering cycle complete: {} processed ({} merged, {} created), {} failed, {} dead-lettered",
        stats.processed, stats.merged, stats.created, stats.failed, stats.dead_lettered
    );
    stats
}
