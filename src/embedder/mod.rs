use async_trait::async_trait;

pub mod ollama;

pub use ollama::OllamaEmbedder;

use crate::error::ClusterError;

pub const TARGET_EMBEDDING: &str = "embedding";

/// Black-box producer of dense article embeddings.
///
/// Implementations must be deterministic for identical input within a model
/// version and must return vectors of exactly `dimension()` components.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, title: &str, content: &str) -> Result<Vec<f32>, ClusterError>;

    fn dimension(&self) -> usize;
}
