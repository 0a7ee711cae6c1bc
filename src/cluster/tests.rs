use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

use crate::cluster::{ClusterEngine, Decision};
use crate::config::ClusterConfig;
use crate::db::article::ArticleRow;
use crate::db::Database;
use crate::embedder::Embedder;
use crate::error::ClusterError;
use crate::vector::{InMemoryIssueIndex, IssueIndex};

/// Embedder stub keyed by article title; unknown titles are an error, so a
/// test can only use vectors it declared.
struct StaticEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dimension: usize,
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, title: &str, _content: &str) -> Result<Vec<f32>, ClusterError> {
        self.vectors
            .get(title)
            .cloned()
            .ok_or_else(|| ClusterError::Embedder(format!("no vector for '{}'", title)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

struct Harness {
    db: Database,
    index: Arc<InMemoryIssueIndex>,
    engine: ClusterEngine,
}

/// Three-dimensional engine with the reference decision parameters
/// (alpha 0.7, beta 0.3, lambda 1 per hour, t_base 0.5).
async fn harness(vectors: &[(&str, [f32; 3])]) -> Harness {
    let db = Database::open_in_memory().await.unwrap();
    let index = Arc::new(InMemoryIssueIndex::new());
    let embedder = Arc::new(StaticEmbedder {
        vectors: vectors
            .iter()
            .map(|(title, v)| (title.to_string(), v.to_vec()))
            .collect(),
        dimension: 3,
    });
    let config = ClusterConfig {
        alpha: 0.7,
        beta: 0.3,
        lambda: 1.0,
        t_base: 0.5,
        top_k: 10,
        dimension: 3,
    };
    let engine = ClusterEngine::new(db.clone(), index.clone(), embedder, config).unwrap();
    Harness { db, index, engine }
}

async fn ingest(db: &Database, title: &str) -> ArticleRow {
    let id = db
        .add_article(title, "body text", "wire/politics", "https://example.com/a", title, None)
        .await
        .unwrap();
    db.get_article(id).await.unwrap().unwrap()
}

/// Seed an issue with `members` articles all at `centroid`, last updated at
/// `at`, and register it in the index.
async fn seed_issue(
    harness: &Harness,
    title: &str,
    centroid: [f32; 3],
    members: i64,
    at: DateTime<Utc>,
) -> i64 {
    let first = ingest(&harness.db, title).await;
    let issue_id = harness
        .db
        .create_issue_for_article(first.id, &first.title, &first.content, &centroid, at)
        .await
        .unwrap();
    for n in 1..members {
        let extra = ingest(&harness.db, &format!("{} follow-up {}", title, n)).await;
        let applied = harness
            .db
            .try_merge_article(issue_id, extra.id, n, &centroid, &centroid, at)
            .await
            .unwrap();
        assert!(applied);
    }
    harness.index.upsert(issue_id, &centroid).await.unwrap();
    issue_id
}

#[tokio::test]
async fn fresh_issue_absorbs_a_matching_article() {
    let h = harness(&[("quake aftershock", [1.0, 0.0, 0.0])]).await;
    let now = Utc::now();
    let issue_id = seed_issue(&h, "quake", [1.0, 0.0, 0.0], 5, now).await;

    let article = ingest(&h.db, "quake aftershock").await;
    let decision = h.engine.process_article(&article, now, None).await.unwrap();

    assert_eq!(decision, Decision::Merged { issue_id });
    let issue = h.db.get_issue(issue_id).await.unwrap().unwrap();
    assert_eq!(issue.article_count, 6);
    let centroid = h.db.get_issue_centroid(issue_id).await.unwrap().unwrap();
    for (c, expected) in centroid.iter().zip([1.0_f32, 0.0, 0.0]) {
        assert!((c - expected).abs() < 1e-6);
    }
}

#[tokio::test]
async fn aged_issue_is_rejected_despite_perfect_similarity() {
    let h = harness(&[("quake redux", [1.0, 0.0, 0.0])]).await;
    let now = Utc::now();
    let old_issue = seed_issue(&h, "quake", [1.0, 0.0, 0.0], 5, now - Duration::hours(10)).await;

    let article = ingest(&h.db, "quake redux").await;
    let decision = h.engine.process_article(&article, now, None).await.unwrap();

    // W_time = e^-10 pushes the threshold to ~1 while the score caps near
    // alpha, so a brand-new issue opens instead.
    match decision {
        Decision::Created { issue_id } => assert_ne!(issue_id, old_issue),
        other => panic!("expected a new issue, got {:?}", other),
    }
    let untouched = h.db.get_issue(old_issue).await.unwrap().unwrap();
    assert_eq!(untouched.article_count, 5);
}

#[tokio::test]
async fn clear_winner_merges_into_the_closer_of_two_issues() {
    let h = harness(&[("verdict appeal", [0.995, 0.1, 0.0])]).await;
    let now = Utc::now();
    let farther = seed_issue(&h, "trial", [1.0, 0.0, 0.0], 1, now).await;
    let closer = seed_issue(&h, "verdict", [0.99, 0.14, 0.0], 1, now).await;

    let article = ingest(&h.db, "verdict appeal").await;
    let decision = h.engine.process_article(&article, now, None).await.unwrap();

    assert_eq!(decision, Decision::Merged { issue_id: closer });
    assert_eq!(
        h.db.get_issue(farther).await.unwrap().unwrap().article_count,
        1
    );
}

#[tokio::test]
async fn equidistant_article_is_vetoed_into_a_new_issue() {
    let h = harness(&[("ambiguous report", [0.70710678, 0.70710678, 0.0])]).await;
    let now = Utc::now();
    let left = seed_issue(&h, "left story", [1.0, 0.0, 0.0], 1, now).await;
    let right = seed_issue(&h, "right story", [0.0, 1.0, 0.0], 1, now).await;

    let article = ingest(&h.db, "ambiguous report").await;
    let decision = h.engine.process_article(&article, now, None).await.unwrap();

    // Exactly on the bisector: separability is zero, so neither issue wins
    // even though the score clears the threshold.
    match decision {
        Decision::Created { issue_id } => {
            assert_ne!(issue_id, left);
            assert_ne!(issue_id, right);
        }
        other => panic!("expected a new issue, got {:?}", other),
    }
}

#[tokio::test]
async fn cold_start_creates_the_first_issue() {
    let h = harness(&[("first ever story", [0.2, 0.3, 0.9])]).await;
    let now = Utc::now();

    let article = ingest(&h.db, "first ever story").await;
    let decision = h.engine.process_article(&article, now, None).await.unwrap();

    let Decision::Created { issue_id } = decision else {
        panic!("expected a created issue, got {:?}", decision);
    };

    let issue = h.db.get_issue(issue_id).await.unwrap().unwrap();
    assert_eq!(issue.article_count, 1);
    assert_eq!(issue.started_at, issue.updated_at);

    let centroid = h.db.get_issue_centroid(issue_id).await.unwrap().unwrap();
    assert_eq!(centroid, vec![0.2, 0.3, 0.9]);

    // The article now belongs to exactly this issue.
    let stored = h.db.get_article(article.id).await.unwrap().unwrap();
    assert_eq!(stored.issue_id, issue_id);
}

#[tokio::test]
async fn moving_average_tracks_the_member_mean() {
    let h = harness(&[]).await;
    let now = Utc::now();

    let first = ingest(&h.db, "axis x").await;
    let issue_id = h
        .db
        .create_issue_for_article(first.id, &first.title, &first.content, &[1.0, 0.0, 0.0], now)
        .await
        .unwrap();

    let second = ingest(&h.db, "axis y").await;
    assert!(h
        .db
        .try_merge_article(issue_id, second.id, 1, &[0.5, 0.5, 0.0], &[0.0, 1.0, 0.0], now)
        .await
        .unwrap());

    let third = ingest(&h.db, "axis z").await;
    let new_centroid = crate::cluster::merge_centroid(
        &h.db.get_issue_centroid(issue_id).await.unwrap().unwrap(),
        2,
        &[0.0, 0.0, 1.0],
    );
    assert!(h
        .db
        .try_merge_article(issue_id, third.id, 2, &new_centroid, &[0.0, 0.0, 1.0], now)
        .await
        .unwrap());

    let centroid = h.db.get_issue_centroid(issue_id).await.unwrap().unwrap();
    for component in &centroid {
        assert!((component - 1.0 / 3.0).abs() < 1e-6);
    }

    // The stored centroid matches the arithmetic mean of member embeddings.
    let members = h.db.embeddings_for_issue(issue_id).await.unwrap();
    assert_eq!(members.len(), 3);
    for dim in 0..3 {
        let mean: f32 = members.iter().map(|m| m[dim]).sum::<f32>() / members.len() as f32;
        assert!((centroid[dim] - mean).abs() < 1e-6);
    }
}

#[tokio::test]
async fn concurrent_merges_serialize_through_the_version_check() {
    let h = harness(&[
        ("storm east", [0.8, 0.6, 0.0]),
        ("storm west", [0.6, 0.8, 0.0]),
    ])
    .await;
    let now = Utc::now();
    let issue_id = seed_issue(&h, "storm", [1.0, 0.0, 0.0], 10, now).await;

    let east = ingest(&h.db, "storm east").await;
    let west = ingest(&h.db, "storm west").await;

    let (left, right) = tokio::join!(
        h.engine.process_article(&east, now, None),
        h.engine.process_article(&west, now, None),
    );
    assert_eq!(left.unwrap(), Decision::Merged { issue_id });
    assert_eq!(right.unwrap(), Decision::Merged { issue_id });

    let issue = h.db.get_issue(issue_id).await.unwrap().unwrap();
    assert_eq!(issue.article_count, 12);

    // Final centroid is (10*C + A1 + A2) / 12 regardless of commit order.
    let centroid = h.db.get_issue_centroid(issue_id).await.unwrap().unwrap();
    let expected = [11.4_f32 / 12.0, 1.4 / 12.0, 0.0];
    for (c, e) in centroid.iter().zip(expected) {
        assert!((c - e).abs() < 1e-6, "centroid {:?} != {:?}", centroid, expected);
    }
}

#[tokio::test]
async fn duplicate_title_hash_reuses_the_prior_assignment() {
    let h = harness(&[("scoop", [0.0, 1.0, 0.0])]).await;
    let now = Utc::now();

    let article = ingest(&h.db, "scoop").await;
    let first = h.engine.process_article(&article, now, None).await.unwrap();
    let issue_id = first.issue_id();

    // The same pre-assignment row replayed: the title-hash gate answers.
    let replay = h.engine.process_article(&article, now, None).await.unwrap();
    assert_eq!(replay, Decision::Unchanged { issue_id });

    // And the refreshed row short-circuits on its own issue_id.
    let refreshed = h.db.get_article(article.id).await.unwrap().unwrap();
    let again = h.engine.process_article(&refreshed, now, None).await.unwrap();
    assert_eq!(again, Decision::Unchanged { issue_id });
}

#[tokio::test]
async fn non_finite_embedding_is_poison_and_persists_nothing() {
    let h = harness(&[("corrupt", [f32::NAN, 0.0, 0.0])]).await;
    let now = Utc::now();

    let article = ingest(&h.db, "corrupt").await;
    let err = h.engine.process_article(&article, now, None).await.unwrap_err();
    assert!(err.is_poison());

    let stored = h.db.get_article(article.id).await.unwrap().unwrap();
    assert_eq!(stored.issue_id, 0);
    assert!(h.db.list_issues().await.unwrap().is_empty());
}

#[tokio::test]
async fn wrong_dimension_embedding_is_poison() {
    let h = harness(&[]).await;
    let db = &h.db;

    let embedder = Arc::new(StaticEmbedder {
        vectors: [("short".to_string(), vec![1.0_f32, 0.0])].into(),
        dimension: 3,
    });
    let engine = ClusterEngine::new(
        db.clone(),
        Arc::new(InMemoryIssueIndex::new()),
        embedder,
        ClusterConfig {
            dimension: 3,
            ..ClusterConfig::default()
        },
    )
    .unwrap();

    let article = ingest(db, "short").await;
    let err = engine.process_article(&article, Utc::now(), None).await.unwrap_err();
    assert!(err.is_poison());
}

#[tokio::test]
async fn expired_deadline_aborts_before_any_write() {
    let h = harness(&[("late story", [1.0, 0.0, 0.0])]).await;
    let now = Utc::now();

    let article = ingest(&h.db, "late story").await;
    let deadline = Instant::now() - tokio::time::Duration::from_millis(1);
    let err = h
        .engine
        .process_article(&article, now, Some(deadline))
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::DeadlineExceeded(_)));
    assert!(err.is_retryable());
    let stored = h.db.get_article(article.id).await.unwrap().unwrap();
    assert_eq!(stored.issue_id, 0);
}

#[tokio::test]
async fn stale_version_check_refuses_the_merge() {
    let h = harness(&[]).await;
    let now = Utc::now();
    let issue_id = seed_issue(&h, "base", [1.0, 0.0, 0.0], 3, now).await;

    let straggler = ingest(&h.db, "straggler").await;
    let applied = h
        .db
        .try_merge_article(issue_id, straggler.id, 7, &[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0], now)
        .await
        .unwrap();

    assert!(!applied);
    assert_eq!(h.db.get_issue(issue_id).await.unwrap().unwrap().article_count, 3);
    assert_eq!(h.db.get_article(straggler.id).await.unwrap().unwrap().issue_id, 0);
}
