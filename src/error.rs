use thiserror::Error;

/// Failures surfaced by the clustering pipeline.
///
/// Everything except `InvariantViolation` is recoverable: the caller may
/// retry the article. `InvariantViolation` is poison and must be routed to
/// the dead-letter table instead of being retried blindly.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Upstream embedding failed or returned a malformed vector.
    #[error("embedder error: {0}")]
    Embedder(String),

    /// Vector index unreachable or returned a malformed response.
    #[error("vector index error: {0}")]
    Retrieval(String),

    /// Optimistic concurrency check on the centroid update failed and the
    /// retry budget is exhausted.
    #[error("persistence conflict on issue {issue_id} after {attempts} attempts")]
    PersistenceConflict { issue_id: i64, attempts: u32 },

    /// The processing deadline expired; nothing was persisted.
    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(&'static str),

    /// Dimension mismatch, non-finite vector component, or corrupt issue
    /// state. The article is rejected and no issue is mutated.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ClusterError {
    /// Whether the caller may simply retry the article.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ClusterError::InvariantViolation(_))
    }

    /// Poison errors go to the dead-letter table, never back on the queue.
    pub fn is_poison(&self) -> bool {
        matches!(self, ClusterError::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violations_are_poison() {
        let err = ClusterError::InvariantViolation("NaN in vector".to_string());
        assert!(err.is_poison());
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflicts_and_timeouts_are_retryable() {
        let conflict = ClusterError::PersistenceConflict {
            issue_id: 7,
            attempts: 3,
        };
        let deadline = ClusterError::DeadlineExceeded("embed");
        assert!(conflict.is_retryable());
        assert!(deadline.is_retryable());
        assert!(!conflict.is_poison());
    }
}
