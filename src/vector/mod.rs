use async_trait::async_trait;

// Submodules
pub mod memory;
pub mod qdrant;
pub mod similarity;
pub mod types;

// Re-export commonly used types and functions
pub use memory::InMemoryIssueIndex;
pub use qdrant::QdrantIssueIndex;
pub use similarity::{cosine_similarity, validate_embedding};
pub use types::IssueHit;

use crate::error::ClusterError;

// Constants
pub const TARGET_VECTOR: &str = "vector";
pub const QDRANT_URL_ENV: &str = "QDRANT_URL";

/// Nearest-neighbor index over issue centroids.
///
/// `search` returns an approximate top-k shortlist by cosine similarity; the
/// caller re-reads authoritative issue state from the relational store.
/// Implementations must tolerate an empty index.
#[async_trait]
pub trait IssueIndex: Send + Sync {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<IssueHit>, ClusterError>;

    async fn upsert(&self, issue_id: i64, centroid: &[f32]) -> Result<(), ClusterError>;
}
