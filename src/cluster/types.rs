use chrono::{DateTime, Utc};

/// Outcome of running the decision pipeline on one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The article joined an existing issue.
    Merged { issue_id: i64 },
    /// The article opened a new issue.
    Created { issue_id: i64 },
    /// The article had already been assigned (duplicate title hash); the
    /// prior assignment stands.
    Unchanged { issue_id: i64 },
}

impl Decision {
    pub fn issue_id(&self) -> i64 {
        match self {
            Decision::Merged { issue_id }
            | Decision::Created { issue_id }
            | Decision::Unchanged { issue_id } => *issue_id,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, Decision::Merged { .. })
    }
}

/// A candidate issue after scoring, ready for ranking.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub issue_id: i64,
    pub article_count: i64,
    pub updated_at: DateTime<Utc>,
    /// Cosine similarity between the article and the issue centroid.
    pub similarity: f64,
    /// exp(-lambda * |dt|), the freshness factor.
    pub time_weight: f64,
    /// alpha * similarity + beta * time_weight.
    pub score: f64,
    /// Per-candidate merge cutoff; rises as the issue ages.
    pub threshold: f64,
}
