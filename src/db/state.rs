//! Key-usage snapshots.
//!
//! Best-effort persistence of per-key budget and disable state so a restart
//! does not forget disabled keys or spent daily budgets.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

/// One persisted key-usage snapshot
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KeyUsageSnapshot {
    /// Pool purpose tag
    pub purpose: String,
    /// Key id within the pool
    pub key_id: String,
    /// Requests on the snapshot's UTC date
    pub rpd_count: i64,
    /// UTC date (YYYY-MM-DD) the count belongs to
    pub rpd_date: String,
    /// Whether the key was disabled
    pub disabled: bool,
    /// Why it was disabled
    pub disabled_reason: Option<String>,
}

impl Database {
    /// Upsert a key-usage snapshot
    pub async fn upsert_key_usage(&self, snapshot: &KeyUsageSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_key_usage (
                purpose, key_id, rpd_count, rpd_date, disabled, disabled_reason, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (purpose, key_id) DO UPDATE SET
                rpd_count = excluded.rpd_count,
                rpd_date = excluded.rpd_date,
                disabled = excluded.disabled,
                disabled_reason = excluded.disabled_reason,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&snapshot.purpose)
        .bind(&snapshot.key_id)
        .bind(snapshot.rpd_count)
        .bind(&snapshot.rpd_date)
        .bind(snapshot.disabled)
        .bind(&snapshot.disabled_reason)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert key usage: {e}"
            )))
        })?;
        Ok(())
    }

    /// All snapshots for one pool purpose
    pub async fn get_key_usage(&self, purpose: &str) -> Result<Vec<KeyUsageSnapshot>> {
        let rows = sqlx::query_as::<_, KeyUsageSnapshot>(
            r#"
            SELECT purpose, key_id, rpd_count, rpd_date, disabled, disabled_reason
            FROM ai_key_usage
            WHERE purpose = ?
            "#,
        )
        .bind(purpose)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get key usage: {e}"
            )))
        })?;

        Ok(rows)
    }
}
