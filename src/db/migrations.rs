//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {e}"
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {e}"
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {e}"
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {e}"
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {e}"
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {e}"
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: core schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        Self::in_transaction(conn, 1, |conn| {
            Box::pin(async move {
                Self::create_anime_schema(conn).await?;
                Self::create_downloads_schema(conn).await?;
                Self::create_hardlinks_schema(conn).await?;
                Self::create_rss_history_schema(conn).await?;
                Ok(())
            })
        })
        .await
    }

    /// Migration v2: key-usage snapshots and manual upload history
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        Self::in_transaction(conn, 2, |conn| {
            Box::pin(async move {
                Self::create_state_schema(conn).await?;
                Ok(())
            })
        })
        .await
    }

    /// Run a migration body inside BEGIN/COMMIT so partial failures don't
    /// leave the schema half-applied.
    async fn in_transaction<F>(conn: &mut SqliteConnection, version: i64, body: F) -> Result<()>
    where
        F: for<'c> FnOnce(
            &'c mut SqliteConnection,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'c>>,
    {
        sqlx::query("BEGIN").execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to begin transaction: {e}"
            )))
        })?;

        let result = async {
            body(conn).await?;
            Self::record_migration(conn, version).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await.map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to commit migration v{version}: {e}"
                    )))
                })?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{version}: {e}"
                )))
            })?;
        Ok(())
    }

    async fn create_anime_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anime_info (
                anime_id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_title TEXT NOT NULL,
                full_title TEXT,
                subtitle_group TEXT NOT NULL,
                season INTEGER NOT NULL DEFAULT 1,
                category TEXT NOT NULL DEFAULT 'tv',
                media_type TEXT NOT NULL DEFAULT 'anime',
                tvdb_id INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_anime_identity
                ON anime_info (short_title, season, subtitle_group, category)
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anime_patterns (
                anime_id INTEGER PRIMARY KEY REFERENCES anime_info(anime_id) ON DELETE CASCADE,
                subtitle_group_regex TEXT NOT NULL DEFAULT 'none',
                full_title_regex TEXT NOT NULL DEFAULT 'none',
                clean_title_regex TEXT NOT NULL DEFAULT 'none',
                episode_regex TEXT NOT NULL DEFAULT 'none',
                special_tag_regex TEXT NOT NULL DEFAULT 'none',
                quality_regex TEXT NOT NULL DEFAULT 'none',
                platform_regex TEXT NOT NULL DEFAULT 'none',
                source_regex TEXT NOT NULL DEFAULT 'none',
                codec_regex TEXT NOT NULL DEFAULT 'none',
                subtitle_type_regex TEXT NOT NULL DEFAULT 'none',
                format_regex TEXT NOT NULL DEFAULT 'none',
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        Ok(())
    }

    async fn create_downloads_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS download_status (
                hash TEXT PRIMARY KEY,
                original_filename TEXT NOT NULL,
                anime_id INTEGER REFERENCES anime_info(anime_id),
                status TEXT NOT NULL DEFAULT 'pending',
                download_directory TEXT NOT NULL DEFAULT '',
                error_message TEXT,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS torrent_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                torrent_hash TEXT NOT NULL REFERENCES download_status(hash) ON DELETE CASCADE,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                file_type TEXT NOT NULL DEFAULT 'other',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deletion_history (
                hash TEXT PRIMARY KEY,
                original_filename TEXT NOT NULL DEFAULT '',
                deleted_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        Ok(())
    }

    async fn create_hardlinks_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hardlinks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                torrent_hash TEXT NOT NULL,
                anime_id INTEGER NOT NULL,
                original_file_path TEXT NOT NULL,
                hardlink_path TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE (torrent_hash, original_file_path, hardlink_path)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_hardlinks_anime ON hardlinks (anime_id)",
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        Ok(())
    }

    async fn create_rss_history_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rss_processing_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rss_url TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'processing',
                items_found INTEGER NOT NULL DEFAULT 0,
                items_attempted INTEGER NOT NULL DEFAULT 0,
                items_processed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rss_processing_detail (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                history_id INTEGER NOT NULL
                    REFERENCES rss_processing_history(id) ON DELETE CASCADE,
                item_title TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reason TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        Ok(())
    }

    async fn create_state_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ai_key_usage (
                purpose TEXT NOT NULL,
                key_id TEXT NOT NULL,
                rpd_count INTEGER NOT NULL DEFAULT 0,
                rpd_date TEXT NOT NULL DEFAULT '',
                disabled INTEGER NOT NULL DEFAULT 0,
                disabled_reason TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (purpose, key_id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS manual_upload_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                upload_type TEXT NOT NULL,
                title TEXT NOT NULL,
                hash TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'submitted',
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_err)?;

        Ok(())
    }
}

fn migration_err(e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::MigrationFailed(e.to_string()))
}
