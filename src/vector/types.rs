use chrono::{DateTime, Utc};

/// A shortlist entry returned by an issue index search.
///
/// The centroid and timestamp carried here are the index's copy; scoring and
/// merging always re-read the authoritative rows from the relational store.
#[derive(Debug, Clone)]
pub struct IssueHit {
    pub issue_id: i64,
    pub centroid: Vec<f32>,
    pub updated_at: Option<DateTime<Utc>>,
}
