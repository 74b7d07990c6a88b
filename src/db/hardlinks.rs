//! Hardlink rows and dedup queries.

use crate::error::DatabaseError;
use crate::types::AnimeId;
use crate::{Error, Result};

use super::{Database, HardlinkRecord};

/// Fields for a new hardlink row
#[derive(Debug, Clone)]
pub struct NewHardlink<'a> {
    /// Torrent the link came from
    pub torrent_hash: &'a str,
    /// Owning anime
    pub anime_id: AnimeId,
    /// Absolute source path
    pub original_file_path: &'a str,
    /// Absolute library path
    pub hardlink_path: &'a str,
    /// File size in bytes
    pub file_size: i64,
}

impl Database {
    /// Insert a hardlink row.
    ///
    /// Returns false when the identical (torrent, source, target) row already
    /// exists — the idempotent no-op case.
    pub async fn insert_hardlink(&self, link: &NewHardlink<'_>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO hardlinks (
                torrent_hash, anime_id, original_file_path, hardlink_path,
                file_size, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(link.torrent_hash)
        .bind(link.anime_id)
        .bind(link.original_file_path)
        .bind(link.hardlink_path)
        .bind(link.file_size)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert hardlink: {e}"
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether the exact (torrent, source, target) row exists
    pub async fn hardlink_exists(
        &self,
        torrent_hash: &str,
        original_file_path: &str,
        hardlink_path: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM hardlinks
            WHERE torrent_hash = ? AND original_file_path = ? AND hardlink_path = ?
            "#,
        )
        .bind(torrent_hash)
        .bind(original_file_path)
        .bind(hardlink_path)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check hardlink existence: {e}"
            )))
        })?;

        Ok(count > 0)
    }

    /// All hardlink rows created from a torrent
    pub async fn get_hardlinks_for_torrent(&self, torrent_hash: &str) -> Result<Vec<HardlinkRecord>> {
        let rows = sqlx::query_as::<_, HardlinkRecord>(
            r#"
            SELECT id, torrent_hash, anime_id, original_file_path, hardlink_path,
                   file_size, created_at
            FROM hardlinks
            WHERE torrent_hash = ?
            ORDER BY id ASC
            "#,
        )
        .bind(torrent_hash)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get hardlinks for torrent: {e}"
            )))
        })?;

        Ok(rows)
    }

    /// All hardlink rows owned by an anime
    pub async fn get_hardlinks_for_anime(&self, anime_id: AnimeId) -> Result<Vec<HardlinkRecord>> {
        let rows = sqlx::query_as::<_, HardlinkRecord>(
            r#"
            SELECT id, torrent_hash, anime_id, original_file_path, hardlink_path,
                   file_size, created_at
            FROM hardlinks
            WHERE anime_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(anime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get hardlinks for anime: {e}"
            )))
        })?;

        Ok(rows)
    }

    /// Library target paths already materialised for an anime.
    ///
    /// Fed to the file renamer as `previous_hardlinks` so new batches cannot
    /// generate colliding targets.
    pub async fn get_hardlink_targets_for_anime(&self, anime_id: AnimeId) -> Result<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT hardlink_path FROM hardlinks WHERE anime_id = ? ORDER BY id ASC",
        )
        .bind(anime_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get hardlink targets: {e}"
            )))
        })?;

        Ok(rows)
    }

    /// Delete all hardlink rows for a torrent, returning the deleted rows so
    /// the filesystem links can be unlinked.
    pub async fn delete_hardlinks_for_torrent(
        &self,
        torrent_hash: &str,
    ) -> Result<Vec<HardlinkRecord>> {
        let rows = self.get_hardlinks_for_torrent(torrent_hash).await?;

        sqlx::query("DELETE FROM hardlinks WHERE torrent_hash = ?")
            .bind(torrent_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete hardlinks: {e}"
                )))
            })?;

        Ok(rows)
    }
}
