//! RSS processing history and detail rows.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::{Database, RssDetailRecord, RssHistoryRecord};

impl Database {
    /// Open a history row for a feed run with status `processing`
    pub async fn insert_rss_history(&self, rss_url: &str, triggered_by: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO rss_processing_history (rss_url, triggered_by, started_at, status)
            VALUES (?, ?, ?, 'processing')
            "#,
        )
        .bind(rss_url)
        .bind(triggered_by)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert RSS history: {e}"
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Get a history row
    pub async fn get_rss_history(&self, id: i64) -> Result<Option<RssHistoryRecord>> {
        let row = sqlx::query_as::<_, RssHistoryRecord>(
            r#"
            SELECT id, rss_url, triggered_by, started_at, status,
                   items_found, items_attempted, items_processed
            FROM rss_processing_history
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get RSS history: {e}"
            )))
        })?;

        Ok(row)
    }

    /// Record the fanout counts after a feed expansion
    pub async fn update_rss_history_counts(
        &self,
        id: i64,
        items_found: i64,
        items_attempted: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE rss_processing_history SET items_found = ?, items_attempted = ? WHERE id = ?",
        )
        .bind(items_found)
        .bind(items_attempted)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update RSS history counts: {e}"
            )))
        })?;
        Ok(())
    }

    /// Set a history row's status
    pub async fn set_rss_history_status(&self, id: i64, status: &str) -> Result<()> {
        sqlx::query("UPDATE rss_processing_history SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set RSS history status: {e}"
                )))
            })?;
        Ok(())
    }

    /// Bump `items_processed`; transitions the row to `completed` once every
    /// attempted item has been processed.
    pub async fn increment_rss_history_processed(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rss_processing_history
            SET items_processed = items_processed + 1,
                status = CASE
                    WHEN items_processed + 1 >= items_attempted AND status = 'processing'
                        THEN 'completed'
                    ELSE status
                END
            WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to increment RSS history: {e}"
            )))
        })?;
        Ok(())
    }

    /// Insert a per-item detail row
    pub async fn insert_rss_detail(
        &self,
        history_id: i64,
        item_title: &str,
        outcome: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rss_processing_detail (history_id, item_title, outcome, reason, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(history_id)
        .bind(item_title)
        .bind(outcome)
        .bind(reason)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert RSS detail: {e}"
            )))
        })?;
        Ok(())
    }

    /// Detail rows for a history run
    pub async fn get_rss_details(&self, history_id: i64) -> Result<Vec<RssDetailRecord>> {
        let rows = sqlx::query_as::<_, RssDetailRecord>(
            r#"
            SELECT id, history_id, item_title, outcome, reason
            FROM rss_processing_detail
            WHERE history_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(history_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get RSS details: {e}"
            )))
        })?;

        Ok(rows)
    }

    /// Mark a drained feed run as interrupted, writing `failed/interrupted`
    /// detail rows for the cleared items. Used after `clear_queue`.
    pub async fn mark_rss_history_interrupted(
        &self,
        history_id: i64,
        cleared_items: &[(i64, String)],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {e}"
            )))
        })?;

        sqlx::query("UPDATE rss_processing_history SET status = 'interrupted' WHERE id = ?")
            .bind(history_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark history interrupted: {e}"
                )))
            })?;

        let now = chrono::Utc::now().timestamp();
        for (item_history_id, item_title) in cleared_items {
            if *item_history_id != history_id {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO rss_processing_detail (history_id, item_title, outcome, reason, created_at)
                VALUES (?, ?, 'failed', 'interrupted', ?)
                "#,
            )
            .bind(history_id)
            .bind(item_title)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert interruption detail: {e}"
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit interruption: {e}"
            )))
        })?;

        Ok(())
    }

    /// Record a manual magnet/torrent submission
    pub async fn insert_manual_upload(
        &self,
        upload_type: &str,
        title: &str,
        hash: &str,
        status: &str,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO manual_upload_history (upload_type, title, hash, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(upload_type)
        .bind(title)
        .bind(hash)
        .bind(status)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert manual upload: {e}"
            )))
        })?;

        Ok(result.last_insert_rowid())
    }
}
