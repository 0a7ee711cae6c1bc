use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::Row;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};

use super::core::{Database, DbLockErrorExt};
use super::encoding::dense_from_blob;
use crate::TARGET_DB;

/// An ingested article row. `issue_id = 0` means not yet assigned.
#[derive(Debug, Clone)]
pub struct ArticleRow {
    pub id: i64,
    pub issue_id: i64,
    pub title: String,
    pub content: String,
    pub source: String,
    pub url: String,
    pub title_hash: String,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

fn article_from_row(row: &sqlx::sqlite::SqliteRow) -> ArticleRow {
    ArticleRow {
        id: row.get("id"),
        issue_id: row.get("issue_id"),
        title: row.get("title"),
        content: row.get("content"),
        source: row.get("source"),
        url: row.get("url"),
        title_hash: row.get("title_hash"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
    }
}

impl Database {
    /// Insert an ingested article, deduplicating on `title_hash`. Returns the
    /// id of the stored row (existing id when the hash was already seen).
    #[instrument(target = "db_query", level = "info", skip(self, content))]
    pub async fn add_article(
        &self,
        title: &str,
        content: &str,
        source: &str,
        url: &str,
        title_hash: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<i64, sqlx::Error> {
        let created_at = Utc::now();
        debug!(target: TARGET_DB, "Adding article: {}", url);

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            match sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO articles (issue_id, title, content, source, url, title_hash, published_at, created_at)
                VALUES (0, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(title_hash) DO UPDATE SET title_hash = excluded.title_hash
                RETURNING id
                "#,
            )
            .bind(title)
            .bind(content)
            .bind(source)
            .bind(url)
            .bind(title_hash)
            .bind(published_at)
            .bind(created_at)
            .fetch_one(self.pool())
            .await
            {
                Ok((id,)) => {
                    debug!(target: TARGET_DB, "Article stored: {} with id {}", url, id);
                    return Ok(id);
                }
                Err(err) => {
                    if err.is_database_lock_error() {
                        info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}: {}", backoff, attempt, max_retries, url);
                        sleep(Duration::from_millis(backoff)).await;
                        backoff = backoff.saturating_mul(2); // exponential backoff
                        if attempt == max_retries {
                            // Introduce some randomness to avoid the "thundering herd problem"
                            let random_jitter = rand::rng().random_range(0..200);
                            backoff += random_jitter;
                            sleep(Duration::from_millis(backoff)).await;
                        }
                    } else {
                        error!(target: TARGET_DB, "Failed to add article: {}", err);
                        return Err(err);
                    }
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for adding article".into(),
        ))
    }

    /// Fetch a single article by id.
    pub async fn get_article(&self, article_id: i64) -> Result<Option<ArticleRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, issue_id, title, content, source, url, title_hash, published_at, created_at
            FROM articles
            WHERE id = ?
            "#,
        )
        .bind(article_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(article_from_row))
    }

    /// Articles still waiting on a clustering decision, oldest first.
    pub async fn list_unassigned_articles(
        &self,
        limit: i64,
    ) -> Result<Vec<ArticleRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, issue_id, title, content, source, url, title_hash, published_at, created_at
            FROM articles
            WHERE issue_id = 0
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(article_from_row).collect())
    }

    /// The issue a previously processed article with this title hash was
    /// assigned to, if any. Backs the idempotence gate.
    pub async fn find_assignment_by_title_hash(
        &self,
        title_hash: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT issue_id FROM articles
            WHERE title_hash = ? AND issue_id != 0
            "#,
        )
        .bind(title_hash)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|(issue_id,)| issue_id))
    }

    /// Embeddings of all members of an issue, in member order.
    pub async fn embeddings_for_issue(
        &self,
        issue_id: i64,
    ) -> Result<Vec<Vec<f32>>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT ae.dense
            FROM article_embeddings ae
            JOIN articles a ON a.id = ae.article_id
            WHERE a.issue_id = ?
            ORDER BY a.id ASC
            "#,
        )
        .bind(issue_id)
        .fetch_all(self.pool())
        .await?;

        let mut embeddings = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("dense");
            let dense = dense_from_blob(&blob)
                .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?;
            embeddings.push(dense);
        }
        Ok(embeddings)
    }

    /// Record a poison article so operators can inspect it; poison work is
    /// never retried blindly.
    pub async fn add_dead_letter(
        &self,
        article_id: i64,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (article_id, reason, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(article_id)
        .bind(reason)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
