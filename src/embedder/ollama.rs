use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Embedder, TARGET_EMBEDDING};
use crate::error::ClusterError;

pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "nomic-embed-text";
const EMBED_TIMEOUT: Duration = Duration::from_secs(60);

/// Request body for the Ollama `/api/embed` endpoint.
#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

/// Response from the Ollama `/api/embed` endpoint.
#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by a served embedding model behind the Ollama API.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        OllamaEmbedder {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        }
    }

    /// Use OLLAMA_HOST when set, otherwise the local default, with the
    /// standard 768-dimensional text embedding model.
    pub fn from_env(dimension: usize) -> Self {
        let base_url =
            std::env::var(OLLAMA_HOST_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(base_url, DEFAULT_MODEL, dimension)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, title: &str, content: &str) -> Result<Vec<f32>, ClusterError> {
        let start = Instant::now();
        let input = format!("{} {}", title, content);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(EMBED_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClusterError::Embedder(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Embedder(format!(
                "embedding endpoint returned {}: {}",
                status, body
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ClusterError::Embedder(format!("failed to parse response: {}", e)))?;

        let embedding = result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ClusterError::Embedder("empty embeddings array".to_string()))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            target: TARGET_EMBEDDING,
            "Embedding complete: {} dims in {}ms", embedding.len(), elapsed
        );
        if elapsed > 5000 {
            warn!(target: TARGET_EMBEDDING, "Slow embedding operation: {}ms", elapsed);
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
