//! Anime rows and stored rename patterns.

use crate::error::DatabaseError;
use crate::types::AnimeId;
use crate::{Error, Result};

use super::{AnimePatternsBundle, AnimeRecord, Database};

/// Fields for a new anime row
#[derive(Debug, Clone)]
pub struct NewAnime<'a> {
    /// Clean single-language title
    pub short_title: &'a str,
    /// Full multi-language title
    pub full_title: Option<&'a str>,
    /// Fansub/encoder group
    pub subtitle_group: &'a str,
    /// Season number
    pub season: u32,
    /// tv or movie
    pub category: &'a str,
    /// anime or live_action
    pub media_type: &'a str,
}

impl Database {
    /// Insert a new anime row
    pub async fn insert_anime(&self, anime: &NewAnime<'_>) -> Result<AnimeId> {
        let result = sqlx::query(
            r#"
            INSERT INTO anime_info (
                short_title, full_title, subtitle_group, season,
                category, media_type, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(anime.short_title)
        .bind(anime.full_title)
        .bind(anime.subtitle_group)
        .bind(anime.season as i64)
        .bind(anime.category)
        .bind(anime.media_type)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert anime: {e}"
            )))
        })?;

        Ok(AnimeId(result.last_insert_rowid()))
    }

    /// Get an anime by id
    pub async fn get_anime(&self, id: AnimeId) -> Result<Option<AnimeRecord>> {
        let row = sqlx::query_as::<_, AnimeRecord>(
            r#"
            SELECT anime_id, short_title, full_title, subtitle_group, season,
                   category, media_type, tvdb_id, created_at
            FROM anime_info
            WHERE anime_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get anime: {e}"
            )))
        })?;

        Ok(row)
    }

    /// Exact-match lookup on the identity tuple used for title resolution
    pub async fn find_anime(
        &self,
        short_title: &str,
        season: u32,
        subtitle_group: &str,
        category: &str,
    ) -> Result<Option<AnimeRecord>> {
        let row = sqlx::query_as::<_, AnimeRecord>(
            r#"
            SELECT anime_id, short_title, full_title, subtitle_group, season,
                   category, media_type, tvdb_id, created_at
            FROM anime_info
            WHERE short_title = ? AND season = ? AND subtitle_group = ? AND category = ?
            "#,
        )
        .bind(short_title)
        .bind(season as i64)
        .bind(subtitle_group)
        .bind(category)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find anime: {e}"
            )))
        })?;

        Ok(row)
    }

    /// List all anime rows
    pub async fn list_anime(&self) -> Result<Vec<AnimeRecord>> {
        let rows = sqlx::query_as::<_, AnimeRecord>(
            r#"
            SELECT anime_id, short_title, full_title, subtitle_group, season,
                   category, media_type, tvdb_id, created_at
            FROM anime_info
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list anime: {e}"
            )))
        })?;

        Ok(rows)
    }

    /// Record the TVDB series id for an anime
    pub async fn set_anime_tvdb_id(&self, id: AnimeId, tvdb_id: i64) -> Result<()> {
        sqlx::query("UPDATE anime_info SET tvdb_id = ? WHERE anime_id = ?")
            .bind(tvdb_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set tvdb id: {e}"
                )))
            })?;
        Ok(())
    }

    /// Get the stored regex bundle for an anime
    pub async fn get_anime_patterns(&self, id: AnimeId) -> Result<Option<AnimePatternsBundle>> {
        let row = sqlx::query_as::<_, AnimePatternsBundle>(
            r#"
            SELECT subtitle_group_regex, full_title_regex, clean_title_regex,
                   episode_regex, special_tag_regex, quality_regex, platform_regex,
                   source_regex, codec_regex, subtitle_type_regex, format_regex
            FROM anime_patterns
            WHERE anime_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get anime patterns: {e}"
            )))
        })?;

        Ok(row)
    }

    /// Store (or replace) the regex bundle for an anime
    pub async fn upsert_anime_patterns(
        &self,
        id: AnimeId,
        patterns: &AnimePatternsBundle,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anime_patterns (
                anime_id, subtitle_group_regex, full_title_regex, clean_title_regex,
                episode_regex, special_tag_regex, quality_regex, platform_regex,
                source_regex, codec_regex, subtitle_type_regex, format_regex, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (anime_id) DO UPDATE SET
                subtitle_group_regex = excluded.subtitle_group_regex,
                full_title_regex = excluded.full_title_regex,
                clean_title_regex = excluded.clean_title_regex,
                episode_regex = excluded.episode_regex,
                special_tag_regex = excluded.special_tag_regex,
                quality_regex = excluded.quality_regex,
                platform_regex = excluded.platform_regex,
                source_regex = excluded.source_regex,
                codec_regex = excluded.codec_regex,
                subtitle_type_regex = excluded.subtitle_type_regex,
                format_regex = excluded.format_regex,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(&patterns.subtitle_group_regex)
        .bind(&patterns.full_title_regex)
        .bind(&patterns.clean_title_regex)
        .bind(&patterns.episode_regex)
        .bind(&patterns.special_tag_regex)
        .bind(&patterns.quality_regex)
        .bind(&patterns.platform_regex)
        .bind(&patterns.source_regex)
        .bind(&patterns.codec_regex)
        .bind(&patterns.subtitle_type_regex)
        .bind(&patterns.format_regex)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert anime patterns: {e}"
            )))
        })?;

        Ok(())
    }
}
