use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, instrument};

use super::core::Database;
use super::encoding::{dense_from_blob, dense_to_blob};
use crate::TARGET_DB;

/// An issue row: a live cluster of related articles.
#[derive(Debug, Clone)]
pub struct IssueRow {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub article_count: i64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

fn issue_from_row(row: &sqlx::sqlite::SqliteRow) -> IssueRow {
    IssueRow {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        article_count: row.get("article_count"),
        started_at: row.get("started_at"),
        updated_at: row.get("updated_at"),
        created_at: row.get("created_at"),
    }
}

impl Database {
    pub async fn get_issue(&self, issue_id: i64) -> Result<Option<IssueRow>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, title, content, article_count, started_at, updated_at, created_at
            FROM issues
            WHERE id = ?
            "#,
        )
        .bind(issue_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.as_ref().map(issue_from_row))
    }

    /// The authoritative centroid for an issue.
    pub async fn get_issue_centroid(
        &self,
        issue_id: i64,
    ) -> Result<Option<Vec<f32>>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT dense FROM issue_embeddings WHERE issue_id = ?
            "#,
        )
        .bind(issue_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => {
                let blob: Vec<u8> = row.get("dense");
                let dense = dense_from_blob(&blob)
                    .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?;
                Ok(Some(dense))
            }
            None => Ok(None),
        }
    }

    pub async fn list_issues(&self) -> Result<Vec<IssueRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, content, article_count, started_at, updated_at, created_at
            FROM issues
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(issue_from_row).collect())
    }

    /// Open a new issue for an article. The issue row, its centroid, the
    /// article assignment, and the article embedding commit atomically; a
    /// failure at any point leaves the article unassigned.
    #[instrument(target = "db_query", level = "info", skip(self, content, embedding))]
    pub async fn create_issue_for_article(
        &self,
        article_id: i64,
        title: &str,
        content: &str,
        embedding: &[f32],
        now: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let (issue_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO issues (title, content, article_count, started_at, updated_at, created_at)
            VALUES (?1, ?2, 1, ?3, ?3, ?3)
            RETURNING id
            "#,
        )
        .bind(title)
        .bind(content)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO issue_embeddings (issue_id, dense, created_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(issue_id)
        .bind(dense_to_blob(embedding))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        assign_article(&mut tx, article_id, issue_id, embedding, now).await?;

        tx.commit().await?;

        debug!(target: TARGET_DB, "Created issue {} for article {}", issue_id, article_id);
        Ok(issue_id)
    }

    /// Apply a moving-average merge with an optimistic concurrency check on
    /// `article_count`. Returns false (and persists nothing) when another
    /// writer advanced the issue first; the caller re-reads and retries.
    #[instrument(target = "db_query", level = "debug", skip(self, new_centroid, embedding))]
    pub async fn try_merge_article(
        &self,
        issue_id: i64,
        article_id: i64,
        expected_count: i64,
        new_centroid: &[f32],
        embedding: &[f32],
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE issues
            SET article_count = article_count + 1,
                updated_at = ?1
            WHERE id = ?2 AND article_count = ?3
            "#,
        )
        .bind(now)
        .bind(issue_id)
        .bind(expected_count)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(target: TARGET_DB, "Stale merge for issue {} (expected count {})", issue_id, expected_count);
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE issue_embeddings SET dense = ?1 WHERE issue_id = ?2
            "#,
        )
        .bind(dense_to_blob(new_centroid))
        .bind(issue_id)
        .execute(&mut *tx)
        .await?;

        assign_article(&mut tx, article_id, issue_id, embedding, now).await?;

        tx.commit().await?;
        Ok(true)
    }
}

async fn assign_article(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    article_id: i64,
    issue_id: i64,
    embedding: &[f32],
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE articles SET issue_id = ?1 WHERE id = ?2
        "#,
    )
    .bind(issue_id)
    .bind(article_id)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO article_embeddings (article_id, dense, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(article_id) DO UPDATE SET dense = excluded.dense
        "#,
    )
    .bind(article_id)
    .bind(dense_to_blob(embedding))
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
