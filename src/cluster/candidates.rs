//! Candidate scoring and deterministic ranking.

use chrono::{DateTime, Utc};

use super::scoring::{composite_score, dynamic_threshold, hours_between, time_decay_weight};
use super::types::ScoredCandidate;
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::vector::cosine_similarity;

/// Authoritative state of one candidate issue, re-read from the relational
/// store after index retrieval.
#[derive(Debug, Clone)]
pub struct CandidateIssue {
    pub issue_id: i64,
    pub article_count: i64,
    pub updated_at: DateTime<Utc>,
    pub centroid: Vec<f32>,
}

/// Score every candidate and rank best-first.
///
/// Ordering is by composite score descending; ties prefer the more recently
/// updated issue, then the larger issue, then the smaller id, so replays of
/// the same candidate list always produce the same decision.
pub fn rank_candidates(
    article: &[f32],
    candidates: &[CandidateIssue],
    now: DateTime<Utc>,
    config: &ClusterConfig,
) -> Result<Vec<ScoredCandidate>, ClusterError> {
    let mut ranked = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        if candidate.article_count < 1 {
            return Err(ClusterError::InvariantViolation(format!(
                "issue {} has article_count {}",
                candidate.issue_id, candidate.article_count
            )));
        }

        let similarity = cosine_similarity(article, &candidate.centroid)?;
        let delta_hours = hours_between(now, candidate.updated_at);
        let time_weight = time_decay_weight(delta_hours, config.lambda);

        ranked.push(ScoredCandidate {
            issue_id: candidate.issue_id,
            article_count: candidate.article_count,
            updated_at: candidate.updated_at,
            similarity,
            time_weight,
            score: composite_score(similarity, time_weight, config.alpha, config.beta),
            threshold: dynamic_threshold(time_weight, config.t_base),
        });
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| b.article_count.cmp(&a.article_count))
            .then_with(|| a.issue_id.cmp(&b.issue_id))
    });

    Ok(ranked)
}

/// The merge gate: a raw-similarity floor, the per-candidate dynamic
/// threshold on the composite score, and positive separation from the
/// runner-up.
pub fn admits_merge(best: &ScoredCandidate, separability: f64, t_base: f64) -> bool {
    best.similarity >= t_base && best.score >= best.threshold && separability > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::scoring::separability;
    use chrono::Duration;

    fn candidate(issue_id: i64, count: i64, updated_at: DateTime<Utc>, centroid: Vec<f32>) -> CandidateIssue {
        CandidateIssue {
            issue_id,
            article_count: count,
            updated_at,
            centroid,
        }
    }

    fn test_config() -> ClusterConfig {
        ClusterConfig {
            alpha: 0.7,
            beta: 0.3,
            lambda: 1.0,
            t_base: 0.5,
            top_k: 10,
            dimension: 3,
        }
    }

    #[test]
    fn ranks_by_composite_score() {
        let now = Utc::now();
        let config = test_config();
        let article = vec![1.0_f32, 0.0, 0.0];

        // Similar but stale vs less similar but fresh
        let candidates = vec![
            candidate(1, 5, now - Duration::hours(10), vec![1.0, 0.0, 0.0]),
            candidate(2, 5, now, vec![0.9, 0.1, 0.0]),
        ];

        let ranked = rank_candidates(&article, &candidates, now, &config).unwrap();
        // Issue 1: score ~ 0.7; issue 2: score ~ 0.7 * 0.994 + 0.3 ~ 0.996
        assert_eq!(ranked[0].issue_id, 2);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn tie_breaks_prefer_recent_then_larger_then_smaller_id() {
        let now = Utc::now();
        let config = test_config();
        let article = vec![1.0_f32, 0.0, 0.0];
        let centroid = vec![1.0_f32, 0.0, 0.0];

        // Identical centroids and identical update times differ only in the
        // final keys of the chain.
        let fresh = now;
        let candidates = vec![
            candidate(9, 3, fresh, centroid.clone()),
            candidate(4, 3, fresh, centroid.clone()),
            candidate(7, 8, fresh, centroid.clone()),
            candidate(2, 3, fresh - Duration::hours(1), centroid.clone()),
        ];

        let ranked = rank_candidates(&article, &candidates, now, &config).unwrap();
        let order: Vec<i64> = ranked.iter().map(|c| c.issue_id).collect();
        // Stale issue 2 scores below the fresh three; among the fresh ones
        // the larger issue wins, then the smaller id.
        assert_eq!(order, vec![7, 4, 9, 2]);
    }

    #[test]
    fn ranking_is_deterministic_across_replays() {
        let now = Utc::now();
        let config = test_config();
        let article = vec![0.6_f32, 0.8, 0.0];
        let candidates = vec![
            candidate(3, 2, now, vec![0.6, 0.8, 0.0]),
            candidate(1, 2, now, vec![0.6, 0.8, 0.0]),
            candidate(2, 2, now, vec![0.6, 0.8, 0.0]),
        ];

        let first = rank_candidates(&article, &candidates, now, &config).unwrap();
        let second = rank_candidates(&article, &candidates, now, &config).unwrap();
        let ids = |v: &[ScoredCandidate]| v.iter().map(|c| c.issue_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(ids(&first), vec![1, 2, 3]);
    }

    #[test]
    fn corrupt_article_count_is_poison() {
        let now = Utc::now();
        let config = test_config();
        let candidates = vec![candidate(1, 0, now, vec![1.0, 0.0, 0.0])];
        let err = rank_candidates(&[1.0, 0.0, 0.0], &candidates, now, &config).unwrap_err();
        assert!(err.is_poison());
    }

    #[test]
    fn merge_gate_requires_similarity_floor() {
        // A fresh issue keeps the composite score above the base threshold
        // even for weak matches; the raw-similarity floor still rejects it.
        let now = Utc::now();
        let config = test_config();
        let candidates = vec![candidate(1, 5, now, vec![1.0, 0.0, 0.0])];
        let ranked = rank_candidates(&[0.4, 0.9165151, 0.0], &candidates, now, &config).unwrap();

        let best = &ranked[0];
        assert!(best.similarity < config.t_base);
        assert!(best.score >= best.threshold);
        assert!(!admits_merge(best, 1.0, config.t_base));
    }

    #[test]
    fn merge_gate_vetoes_non_positive_separability() {
        let now = Utc::now();
        let config = test_config();
        let candidates = vec![candidate(1, 5, now, vec![1.0, 0.0, 0.0])];
        let ranked = rank_candidates(&[1.0, 0.0, 0.0], &candidates, now, &config).unwrap();
        let best = &ranked[0];

        assert!(admits_merge(best, 1.0, config.t_base));
        assert!(!admits_merge(best, 0.0, config.t_base));
        assert!(!admits_merge(best, separability(0.9, 0.95), config.t_base));
    }
}
