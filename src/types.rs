//! Core types for ani-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Canonical torrent identifier: a 40-character lowercase hex info-hash.
///
/// The hash is the primary key across the whole system (download records,
/// hardlink rows, webhook payloads), so it is validated once at the boundary
/// and carried as a newtype everywhere else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TorrentHash(String);

impl TorrentHash {
    /// Validate and normalise a raw hash string (lowercased).
    pub fn parse(raw: &str) -> Result<Self> {
        let normalised = raw.trim().to_ascii_lowercase();
        if normalised.len() != 40 || !normalised.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!(
                "torrent hash must be 40 hex characters, got '{raw}'"
            )));
        }
        Ok(Self(normalised))
    }

    /// The full 40-character hash.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl std::fmt::Display for TorrentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TorrentHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl sqlx::Type<sqlx::Sqlite> for TorrentHash {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TorrentHash {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TorrentHash {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(raw))
    }
}

/// Unique identifier for an anime (series/season+group tuple)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct AnimeId(pub i64);

impl AnimeId {
    /// Create a new AnimeId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for AnimeId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<AnimeId> for i64 {
    fn from(id: AnimeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for AnimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<sqlx::Sqlite> for AnimeId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AnimeId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AnimeId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Content category: episodic series vs. standalone film
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Episodic series (named `Season N/` directories)
    #[default]
    Tv,
    /// Standalone film (no season prefix)
    Movie,
}

impl Category {
    /// Canonical string form as stored in the database and AI schemas
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tv => "tv",
            Category::Movie => "movie",
        }
    }

    /// Parse the canonical string form; unknown values fall back to Tv
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "movie" => Category::Movie,
            _ => Category::Tv,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Library branch: anime vs. live action
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    /// Animated content
    #[default]
    Anime,
    /// Live-action content
    LiveAction,
}

impl MediaType {
    /// Canonical string form as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Anime => "anime",
            MediaType::LiveAction => "live_action",
        }
    }

    /// Parse the canonical string form; unknown values fall back to Anime
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "live_action" => MediaType::LiveAction,
            _ => MediaType::Anime,
        }
    }
}

/// Per-torrent download state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Submitted to the downloader, not yet started
    Pending,
    /// Downloader reported the torrent as started
    Downloading,
    /// Downloader reported completion; pipeline not yet run
    Completed,
    /// Every file is hardlinked into the library or deliberately skipped
    Archived,
    /// Downloader or pipeline failure
    Error,
}

impl DownloadStatus {
    /// Canonical string form as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Archived => "archived",
            DownloadStatus::Error => "error",
        }
    }

    /// Parse the stored string form; unknown values map to Error
    pub fn from_db(s: &str) -> Self {
        match s {
            "pending" => DownloadStatus::Pending,
            "downloading" => DownloadStatus::Downloading,
            "completed" => DownloadStatus::Completed,
            "archived" => DownloadStatus::Archived,
            _ => DownloadStatus::Error,
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of parsing an anime release title
///
/// Produced by the title parser from a raw filename. `clean_title` is the
/// single-language canonical title chosen per the configured language
/// priority; `season` defaults to 1 when the title carries no season marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TitleParseResult {
    /// The input title, echoed back
    pub original_title: String,
    /// Single-language canonical title
    pub clean_title: String,
    /// Full multi-language title block
    pub full_title: Option<String>,
    /// Fansub or encoder group name, without brackets
    pub subtitle_group: String,
    /// Season number (0 = specials, default 1)
    pub season: u32,
    /// Episode number, if the title carries one
    pub episode: Option<u32>,
    /// tv or movie
    pub category: Category,
}

/// Events emitted by the orchestrator over the broadcast channel
///
/// Consumers subscribe via [`crate::orchestrator::DownloadOrchestrator::subscribe`];
/// missing a message is harmless, the channel is lossy under lag.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An RSS feed expansion started
    RssCheckStarted {
        /// Feed URL being expanded
        rss_url: String,
        /// What triggered the check (scheduled, manual, startup)
        triggered_by: String,
    },
    /// An RSS feed expansion finished
    RssCheckCompleted {
        /// Feed URL that was expanded
        rss_url: String,
        /// Items discovered in the feed
        items_found: usize,
        /// Items enqueued for download
        items_enqueued: usize,
    },
    /// A torrent was submitted to the downloader
    TorrentSubmitted {
        /// Canonical torrent hash
        hash: TorrentHash,
        /// Release title
        title: String,
    },
    /// The downloader accepted a torrent
    TorrentAdded {
        /// Canonical torrent hash
        hash: TorrentHash,
    },
    /// The downloader finished a torrent
    TorrentCompleted {
        /// Canonical torrent hash
        hash: TorrentHash,
    },
    /// The downloader or pipeline failed a torrent
    TorrentFailed {
        /// Canonical torrent hash
        hash: TorrentHash,
        /// Failure description
        error: String,
    },
    /// The completion pipeline materialised a torrent into the library
    TorrentArchived {
        /// Canonical torrent hash
        hash: TorrentHash,
        /// Videos hardlinked
        video_count: usize,
        /// Subtitles hardlinked
        subtitle_count: usize,
        /// Library directory the files landed in
        target_dir: PathBuf,
    },
    /// A pool credential was disabled after an auth-class fault
    KeyDisabled {
        /// Pool purpose tag
        purpose: String,
        /// Display name of the disabled key
        key_name: String,
        /// Why it was disabled
        reason: String,
    },
    /// A notification send failed (never fatal)
    NotificationFailed {
        /// Channel the send targeted
        channel: String,
        /// Failure description
        error: String,
    },
}

/// A single file inside a torrent, as reported by the downloader
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TorrentFileEntry {
    /// Path relative to the torrent's save path
    pub name: String,
    /// File size in bytes
    pub size: u64,
}

/// Torrent metadata, as reported by the downloader
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TorrentInfo {
    /// Display name
    pub name: String,
    /// Directory the downloader saved into
    pub save_path: String,
    /// Total size in bytes
    pub size: u64,
    /// Completion fraction 0.0..=1.0
    pub progress: f64,
}

/// TVDB episode record used for season-boundary-aware renaming
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// Season the episode belongs to (0 = specials)
    #[serde(rename = "seasonNumber")]
    pub season_number: u32,
    /// Episode number within the season
    pub number: u32,
    /// Episode title
    pub name: Option<String>,
    /// English episode title, when the primary title is localised
    #[serde(rename = "englishName")]
    pub english_name: Option<String>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_hash_accepts_40_hex_and_lowercases() {
        let h = TorrentHash::parse(&"ABCDEF0123".repeat(4)).unwrap();
        assert_eq!(h.as_str(), "abcdef0123".repeat(4));
        assert_eq!(h.short(), "abcdef01");
    }

    #[test]
    fn torrent_hash_rejects_wrong_length() {
        assert!(TorrentHash::parse("abc123").is_err());
        assert!(TorrentHash::parse(&"a".repeat(41)).is_err());
    }

    #[test]
    fn torrent_hash_rejects_non_hex() {
        assert!(TorrentHash::parse(&"g".repeat(40)).is_err());
    }

    #[test]
    fn category_round_trips_canonical_strings() {
        assert_eq!(Category::from_str_lossy("tv"), Category::Tv);
        assert_eq!(Category::from_str_lossy("movie"), Category::Movie);
        assert_eq!(Category::Movie.as_str(), "movie");
        // Unknown input falls back to tv
        assert_eq!(Category::from_str_lossy("ova"), Category::Tv);
    }

    #[test]
    fn media_type_round_trips_canonical_strings() {
        assert_eq!(MediaType::from_str_lossy("live_action"), MediaType::LiveAction);
        assert_eq!(MediaType::from_str_lossy("anime"), MediaType::Anime);
        assert_eq!(MediaType::LiveAction.as_str(), "live_action");
    }

    #[test]
    fn download_status_unknown_maps_to_error() {
        assert_eq!(DownloadStatus::from_db("bogus"), DownloadStatus::Error);
        assert_eq!(DownloadStatus::from_db("archived"), DownloadStatus::Archived);
    }

    #[test]
    fn title_parse_result_serializes_category_lowercase() {
        let result = TitleParseResult {
            original_title: "[ANi] X - 02".into(),
            clean_title: "X".into(),
            full_title: None,
            subtitle_group: "ANi".into(),
            season: 1,
            episode: Some(2),
            category: Category::Tv,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["category"], "tv");
    }
}
