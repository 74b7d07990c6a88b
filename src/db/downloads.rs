//! Download records, torrent files, and deletion history.

use crate::error::DatabaseError;
use crate::types::AnimeId;
use crate::{Error, Result};

use super::{Database, DownloadRecord, NewDownload, TorrentFileRecord};

impl Database {
    /// Insert a new download record
    pub async fn insert_download(&self, download: &NewDownload) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_status (
                hash, original_filename, anime_id, status, download_directory, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&download.hash)
        .bind(&download.original_filename)
        .bind(download.anime_id)
        .bind(&download.status)
        .bind(&download.download_directory)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Duplicate(format!("download {} already tracked", download.hash))
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download: {e}"
            ))),
        })?;

        Ok(())
    }

    /// Get a download by hash
    pub async fn get_download(&self, hash: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query_as::<_, DownloadRecord>(
            r#"
            SELECT hash, original_filename, anime_id, status, download_directory,
                   error_message, created_at, completed_at
            FROM download_status
            WHERE hash = ?
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get download: {e}"
            )))
        })?;

        Ok(row)
    }

    /// List all downloads, newest first
    pub async fn list_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query_as::<_, DownloadRecord>(
            r#"
            SELECT hash, original_filename, anime_id, status, download_directory,
                   error_message, created_at, completed_at
            FROM download_status
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list downloads: {e}"
            )))
        })?;

        Ok(rows)
    }

    /// Update download status; archived/completed also stamps completed_at
    pub async fn update_download_status(&self, hash: &str, status: &str) -> Result<()> {
        let completed_at = matches!(status, "completed" | "archived")
            .then(|| chrono::Utc::now().timestamp());

        sqlx::query(
            "UPDATE download_status SET status = ?, completed_at = COALESCE(?, completed_at) WHERE hash = ?",
        )
        .bind(status)
        .bind(completed_at)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download status: {e}"
            )))
        })?;

        Ok(())
    }

    /// Record a download failure
    pub async fn set_download_error(&self, hash: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE download_status SET status = 'error', error_message = ? WHERE hash = ?")
            .bind(message)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set download error: {e}"
                )))
            })?;
        Ok(())
    }

    /// Attach the owning anime to a download
    pub async fn set_download_anime(&self, hash: &str, anime_id: AnimeId) -> Result<()> {
        sqlx::query("UPDATE download_status SET anime_id = ? WHERE hash = ?")
            .bind(anime_id)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set download anime: {e}"
                )))
            })?;
        Ok(())
    }

    /// Whether the hash is blocked for submission: live row or deletion history
    pub async fn hash_is_known(&self, hash: &str) -> Result<bool> {
        let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_status WHERE hash = ?")
            .bind(hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check download existence: {e}"
                )))
            })?;
        if live > 0 {
            return Ok(true);
        }

        let deleted: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM deletion_history WHERE hash = ?")
                .bind(hash)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check deletion history: {e}"
                    )))
                })?;
        Ok(deleted > 0)
    }

    /// Delete a download row, recording it in the deletion history so the
    /// hash stays blocked for resubmission.
    pub async fn delete_download(&self, hash: &str) -> Result<()> {
        let record = self.get_download(hash).await?.ok_or_else(|| {
            Error::Database(DatabaseError::NotFound(format!("download {hash}")))
        })?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {e}"
            )))
        })?;

        sqlx::query(
            "INSERT OR REPLACE INTO deletion_history (hash, original_filename, deleted_at) VALUES (?, ?, ?)",
        )
        .bind(hash)
        .bind(&record.original_filename)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record deletion: {e}"
            )))
        })?;

        sqlx::query("DELETE FROM download_status WHERE hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download: {e}"
                )))
            })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit deletion: {e}"
            )))
        })?;

        Ok(())
    }

    /// Replace the tracked file list for a torrent
    pub async fn replace_torrent_files(
        &self,
        hash: &str,
        files: &[(String, i64, String)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {e}"
            )))
        })?;

        sqlx::query("DELETE FROM torrent_files WHERE torrent_hash = ?")
            .bind(hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear torrent files: {e}"
                )))
            })?;

        let now = chrono::Utc::now().timestamp();
        for (path, size, file_type) in files {
            sqlx::query(
                r#"
                INSERT INTO torrent_files (torrent_hash, file_path, file_size, file_type, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(hash)
            .bind(path)
            .bind(size)
            .bind(file_type)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert torrent file: {e}"
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit torrent files: {e}"
            )))
        })?;

        Ok(())
    }

    /// List the tracked files for a torrent
    pub async fn get_torrent_files(&self, hash: &str) -> Result<Vec<TorrentFileRecord>> {
        let rows = sqlx::query_as::<_, TorrentFileRecord>(
            r#"
            SELECT id, torrent_hash, file_path, file_size, file_type
            FROM torrent_files
            WHERE torrent_hash = ?
            ORDER BY id ASC
            "#,
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get torrent files: {e}"
            )))
        })?;

        Ok(rows)
    }
}
