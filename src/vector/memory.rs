use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::info;

use super::similarity::cosine_similarity;
use super::types::IssueHit;
use super::{IssueIndex, TARGET_VECTOR};
use crate::db::Database;
use crate::error::ClusterError;

/// Exact brute-force issue index held in memory.
///
/// Used by the test suite and by single-node runs without a Qdrant
/// deployment; search scans every centroid, so it is exact rather than
/// approximate.
#[derive(Default)]
pub struct InMemoryIssueIndex {
    entries: RwLock<HashMap<i64, Entry>>,
}

struct Entry {
    centroid: Vec<f32>,
    updated_at: DateTime<Utc>,
}

impl InMemoryIssueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the index from the authoritative issue centroids.
    pub async fn load(db: &Database) -> Result<Self, ClusterError> {
        let index = Self::new();
        let issues = db.list_issues().await?;
        let mut entries = index.entries.write().await;
        for issue in &issues {
            if let Some(centroid) = db.get_issue_centroid(issue.id).await? {
                entries.insert(
                    issue.id,
                    Entry {
                        centroid,
                        updated_at: issue.updated_at,
                    },
                );
            }
        }
        let count = entries.len();
        drop(entries);
        info!(target: TARGET_VECTOR, "Seeded in-memory issue index with {} centroids", count);
        Ok(index)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl IssueIndex for InMemoryIssueIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IssueHit>, ClusterError> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(f64, IssueHit)> = Vec::with_capacity(entries.len());
        for (issue_id, entry) in entries.iter() {
            let score = cosine_similarity(vector, &entry.centroid)?;
            scored.push((
                score,
                IssueHit {
                    issue_id: *issue_id,
                    centroid: entry.centroid.clone(),
                    updated_at: Some(entry.updated_at),
                },
            ));
        }

        scored.sort_by(|(a, ha), (b, hb)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ha.issue_id.cmp(&hb.issue_id))
        });

        Ok(scored.into_iter().take(k).map(|(_, hit)| hit).collect())
    }

    async fn upsert(&self, issue_id: i64, centroid: &[f32]) -> Result<(), ClusterError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            issue_id,
            Entry {
                centroid: centroid.to_vec(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_orders_by_similarity_and_truncates_to_k() {
        let index = InMemoryIssueIndex::new();
        index.upsert(1, &[1.0, 0.0, 0.0]).await.unwrap();
        index.upsert(2, &[0.0, 1.0, 0.0]).await.unwrap();
        index.upsert(3, &[0.9, 0.1, 0.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].issue_id, 1);
        assert_eq!(hits[1].issue_id, 3);
    }

    #[tokio::test]
    async fn search_tolerates_an_empty_index() {
        let index = InMemoryIssueIndex::new();
        let hits = index.search(&[1.0, 0.0, 0.0], 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_an_existing_centroid() {
        let index = InMemoryIssueIndex::new();
        index.upsert(1, &[1.0, 0.0, 0.0]).await.unwrap();
        index.upsert(1, &[0.0, 1.0, 0.0]).await.unwrap();
        assert_eq!(index.len().await, 1);

        let hits = index.search(&[0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].issue_id, 1);
    }
}
