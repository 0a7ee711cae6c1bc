use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::candidates::{admits_merge, rank_candidates, CandidateIssue};
use super::scoring::separability;
use super::types::Decision;
use crate::config::ClusterConfig;
use crate::db::article::ArticleRow;
use crate::db::Database;
use crate::embedder::Embedder;
use crate::error::ClusterError;
use crate::vector::{validate_embedding, IssueIndex};
use crate::TARGET_CLUSTER;

/// Bounded retries for the optimistic centroid update.
const MERGE_RETRY_BUDGET: u32 = 3;

/// The merge-or-create decision core.
///
/// One engine instance serves many concurrent articles; it holds no mutable
/// state of its own. All decisions read authoritative issue state from the
/// relational store; the vector index only provides the candidate shortlist.
pub struct ClusterEngine {
    db: Database,
    index: Arc<dyn IssueIndex>,
    embedder: Arc<dyn Embedder>,
    config: ClusterConfig,
}

impl ClusterEngine {
    pub fn new(
        db: Database,
        index: Arc<dyn IssueIndex>,
        embedder: Arc<dyn Embedder>,
        config: ClusterConfig,
    ) -> Result<Self, ClusterError> {
        config.validate()?;
        Ok(ClusterEngine {
            db,
            index,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Run the full decision pipeline for one ingested article:
    /// embed, retrieve candidates, score, threshold, validate separability,
    /// then merge into the best issue or create a new one.
    ///
    /// `deadline` bounds every suspension point; on expiry nothing has been
    /// persisted for this article.
    pub async fn process_article(
        &self,
        article: &ArticleRow,
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<Decision, ClusterError> {
        // Duplicate title hashes are deduplicated upstream; if one slips
        // through, the prior assignment stands.
        if article.issue_id != 0 {
            debug!(target: TARGET_CLUSTER, "Article {} already assigned to issue {}", article.id, article.issue_id);
            return Ok(Decision::Unchanged {
                issue_id: article.issue_id,
            });
        }
        if let Some(issue_id) = self
            .db
            .find_assignment_by_title_hash(&article.title_hash)
            .await?
        {
            debug!(target: TARGET_CLUSTER, "Title hash of article {} already assigned to issue {}", article.id, issue_id);
            return Ok(Decision::Unchanged { issue_id });
        }

        let embedding = bounded(
            deadline,
            "embed",
            self.embedder.embed(&article.title, &article.content),
        )
        .await?;
        validate_embedding(&embedding, self.config.dimension)?;

        let hits = bounded(
            deadline,
            "candidate search",
            self.index.search(&embedding, self.config.top_k),
        )
        .await?;

        let candidates = bounded(deadline, "candidate read", self.read_candidates(&hits)).await?;
        let ranked = rank_candidates(&embedding, &candidates, now, &self.config)?;

        let Some(best) = ranked.first() else {
            // Cold start or empty shortlist: nothing to merge into.
            return self.create_issue(article, &embedding, now, deadline).await;
        };

        let sep = match ranked.get(1) {
            Some(neighbor) => separability(best.similarity, neighbor.similarity),
            None => 1.0,
        };

        if !admits_merge(best, sep, self.config.t_base) {
            info!(
                target: TARGET_CLUSTER,
                "Creating new issue for article {}: best issue {} rejected (sim {:.4}, score {:.4}, threshold {:.4}, separability {:.4})",
                article.id, best.issue_id, best.similarity, best.score, best.threshold, sep
            );
            return self.create_issue(article, &embedding, now, deadline).await;
        }

        info!(
            target: TARGET_CLUSTER,
            "Merging article {} into issue {} (sim {:.4}, score {:.4}, threshold {:.4}, separability {:.4})",
            article.id, best.issue_id, best.similarity, best.score, best.threshold, sep
        );
        self.merge_article(article, best.issue_id, &embedding, now, deadline)
            .await
    }

    /// Re-read authoritative state for every shortlisted issue. Hits whose
    /// rows vanished are dropped; the index is only a shortlist.
    async fn read_candidates(
        &self,
        hits: &[crate::vector::IssueHit],
    ) -> Result<Vec<CandidateIssue>, ClusterError> {
        let mut candidates = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(issue) = self.db.get_issue(hit.issue_id).await? else {
                warn!(target: TARGET_CLUSTER, "Index returned unknown issue {}; skipping", hit.issue_id);
                continue;
            };
            let Some(centroid) = self.db.get_issue_centroid(hit.issue_id).await? else {
                warn!(target: TARGET_CLUSTER, "Issue {} has no centroid row; skipping", hit.issue_id);
                continue;
            };
            candidates.push(CandidateIssue {
                issue_id: issue.id,
                article_count: issue.article_count,
                updated_at: issue.updated_at,
                centroid,
            });
        }
        Ok(candidates)
    }

    async fn create_issue(
        &self,
        article: &ArticleRow,
        embedding: &[f32],
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<Decision, ClusterError> {
        let issue_id = bounded(
            deadline,
            "issue create",
            async {
                self.db
                    .create_issue_for_article(
                        article.id,
                        &article.title,
                        &article.content,
                        embedding,
                        now,
                    )
                    .await
                    .map_err(ClusterError::from)
            },
        )
        .await?;

        // The transaction is durable; index drift self-heals from the
        // authoritative row, so an upsert failure is not a pipeline failure.
        if let Err(e) = self.index.upsert(issue_id, embedding).await {
            warn!(target: TARGET_CLUSTER, "Index upsert failed for new issue {}: {}", issue_id, e);
        }

        info!(target: TARGET_CLUSTER, "Created issue {} for article {}", issue_id, article.id);
        Ok(Decision::Created { issue_id })
    }

    async fn merge_article(
        &self,
        article: &ArticleRow,
        issue_id: i64,
        embedding: &[f32],
        now: DateTime<Utc>,
        deadline: Option<Instant>,
    ) -> Result<Decision, ClusterError> {
        for attempt in 1..=MERGE_RETRY_BUDGET {
            let issue = self
                .db
                .get_issue(issue_id)
                .await?
                .ok_or_else(|| {
                    ClusterError::Retrieval(format!("issue {} disappeared during merge", issue_id))
                })?;
            if issue.article_count < 1 {
                return Err(ClusterError::InvariantViolation(format!(
                    "issue {} has article_count {}",
                    issue_id, issue.article_count
                )));
            }

            let centroid = self
                .db
                .get_issue_centroid(issue_id)
                .await?
                .ok_or_else(|| {
                    ClusterError::Retrieval(format!("issue {} has no centroid row", issue_id))
                })?;
            if centroid.len() != embedding.len() {
                return Err(ClusterError::InvariantViolation(format!(
                    "centroid dimension {} != embedding dimension {} for issue {}",
                    centroid.len(),
                    embedding.len(),
                    issue_id
                )));
            }

            let new_centroid = merge_centroid(&centroid, issue.article_count, embedding);

            let applied = bounded(
                deadline,
                "merge commit",
                async {
                    self.db
                        .try_merge_article(
                            issue_id,
                            article.id,
                            issue.article_count,
                            &new_centroid,
                            embedding,
                            now,
                        )
                        .await
                        .map_err(ClusterError::from)
                },
            )
            .await?;

            if applied {
                if let Err(e) = self.index.upsert(issue_id, &new_centroid).await {
                    warn!(target: TARGET_CLUSTER, "Index upsert failed for issue {}: {}", issue_id, e);
                }
                return Ok(Decision::Merged { issue_id });
            }

            debug!(
                target: TARGET_CLUSTER,
                "Concurrent merge on issue {}; retrying with fresh state (attempt {}/{})",
                issue_id, attempt, MERGE_RETRY_BUDGET
            );
        }

        Err(ClusterError::PersistenceConflict {
            issue_id,
            attempts: MERGE_RETRY_BUDGET,
        })
    }
}

/// Moving-average centroid update: C_new = (C_old * N + A) / (N + 1).
///
/// The result stays the arithmetic mean of all member embeddings; it is not
/// re-normalized, similarity always uses the full cosine formula.
pub fn merge_centroid(centroid: &[f32], article_count: i64, embedding: &[f32]) -> Vec<f32> {
    let n = article_count as f64;
    centroid
        .iter()
        .zip(embedding.iter())
        .map(|(c, a)| (((*c as f64) * n + (*a as f64)) / (n + 1.0)) as f32)
        .collect()
}

/// Await `fut` within whatever remains of the processing deadline.
async fn bounded<T, F>(
    deadline: Option<Instant>,
    stage: &'static str,
    fut: F,
) -> Result<T, ClusterError>
where
    F: Future<Output = Result<T, ClusterError>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };
    let now = Instant::now();
    if deadline <= now {
        return Err(ClusterError::DeadlineExceeded(stage));
    }
    match timeout(deadline - now, fut).await {
        Ok(result) => result,
        Err(_) => Err(ClusterError::DeadlineExceeded(stage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_centroid_is_the_running_mean() {
        let centroid = vec![1.0_f32, 0.0, 0.0];
        let after_second = merge_centroid(&centroid, 1, &[0.0, 1.0, 0.0]);
        assert_eq!(after_second, vec![0.5, 0.5, 0.0]);

        let after_third = merge_centroid(&after_second, 2, &[0.0, 0.0, 1.0]);
        for component in &after_third {
            assert!((component - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn merge_centroid_keeps_magnitude_unnormalized() {
        // Mean of two opposite unit vectors collapses toward zero; no
        // renormalization may happen.
        let centroid = vec![1.0_f32, 0.0];
        let merged = merge_centroid(&centroid, 1, &[-1.0, 0.0]);
        assert_eq!(merged, vec![0.0, 0.0]);
    }
}
