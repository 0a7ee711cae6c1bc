use super::core::Database;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS issues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                article_count INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues (updated_at);

            -- issue_id = 0 marks an article not yet assigned to an issue
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_id INTEGER NOT NULL DEFAULT 0,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                url TEXT NOT NULL,
                title_hash TEXT NOT NULL UNIQUE,
                published_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_articles_title_hash ON articles (title_hash);
            CREATE INDEX IF NOT EXISTS idx_articles_issue_id ON articles (issue_id);

            CREATE TABLE IF NOT EXISTS article_embeddings (
                article_id INTEGER PRIMARY KEY,
                dense BLOB NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (article_id) REFERENCES articles (id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS issue_embeddings (
                issue_id INTEGER PRIMARY KEY,
                dense BLOB NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (issue_id) REFERENCES issues (id) ON DELETE CASCADE
            );

            -- Poison articles that must not be retried blindly
            CREATE TABLE IF NOT EXISTS dead_letters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_dead_letters_article_id ON dead_letters (article_id);
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
