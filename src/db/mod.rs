//! Database layer for ani-dl
//!
//! Handles SQLite persistence for anime, downloads, hardlinks, RSS history
//! and key-usage snapshots.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`anime`] — Anime rows and stored rename patterns
//! - [`downloads`] — Download records, torrent files, deletion history
//! - [`hardlinks`] — Hardlink rows and dedup queries
//! - [`history`] — RSS processing history and detail rows
//! - [`state`] — Key-usage snapshots, manual upload history

use sqlx::{FromRow, sqlite::SqlitePool};

mod anime;
mod downloads;
mod hardlinks;
mod history;
mod migrations;
mod state;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use anime::NewAnime;
pub use hardlinks::NewHardlink;
pub use state::KeyUsageSnapshot;

/// Database handle wrapping the SQLite pool
#[derive(Clone)]
pub struct Database {
    /// Connection pool. Public for integration tests to run raw queries.
    pub pool: SqlitePool,
}

/// Anime row: a series/season+group tuple grouping torrents and patterns
#[derive(Debug, Clone, FromRow)]
pub struct AnimeRecord {
    /// Surrogate key
    pub anime_id: i64,
    /// Clean single-language title
    pub short_title: String,
    /// Full multi-language title
    pub full_title: Option<String>,
    /// Fansub/encoder group
    pub subtitle_group: String,
    /// Season number (0 = specials)
    pub season: i64,
    /// tv or movie
    pub category: String,
    /// anime or live_action
    pub media_type: String,
    /// TVDB series id, when resolved
    pub tvdb_id: Option<i64>,
    /// Unix timestamp of row creation
    pub created_at: i64,
}

/// The stored regex bundle produced by the file renamer.
///
/// Each field is either a regex string or the literal sentinel "none"
/// (the upstream also emits "无"); the rename service treats both as absent.
#[derive(Debug, Clone, Default, PartialEq, FromRow, serde::Serialize, serde::Deserialize)]
pub struct AnimePatternsBundle {
    /// Captures the fansub group
    pub subtitle_group_regex: String,
    /// Captures the full title block
    pub full_title_regex: String,
    /// Captures the clean title
    pub clean_title_regex: String,
    /// Captures episode numbers
    pub episode_regex: String,
    /// Captures special tags (V2, END, SP)
    pub special_tag_regex: String,
    /// Captures quality markers
    pub quality_regex: String,
    /// Captures platform tags
    pub platform_regex: String,
    /// Captures rip/source info
    pub source_regex: String,
    /// Captures codec tags
    pub codec_regex: String,
    /// Captures subtitle type tags
    pub subtitle_type_regex: String,
    /// Captures the extension/format
    pub format_regex: String,
}

/// New download record to insert
#[derive(Debug, Clone)]
pub struct NewDownload {
    /// Canonical torrent hash
    pub hash: String,
    /// Release title as submitted
    pub original_filename: String,
    /// Owning anime, when resolved at submit time
    pub anime_id: Option<i64>,
    /// Initial status (normally "pending")
    pub status: String,
    /// Directory the downloader saves into
    pub download_directory: String,
}

/// Download record from the database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Canonical torrent hash (unique)
    pub hash: String,
    /// Release title as submitted
    pub original_filename: String,
    /// Owning anime
    pub anime_id: Option<i64>,
    /// pending / downloading / completed / archived / error
    pub status: String,
    /// Directory the downloader saves into
    pub download_directory: String,
    /// Failure description when status is error
    pub error_message: Option<String>,
    /// Unix timestamp of submission
    pub created_at: i64,
    /// Unix timestamp of completion
    pub completed_at: Option<i64>,
}

/// Hardlink row from the database
#[derive(Debug, Clone, FromRow)]
pub struct HardlinkRecord {
    /// Row id
    pub id: i64,
    /// Torrent the link came from
    pub torrent_hash: String,
    /// Owning anime
    pub anime_id: i64,
    /// Absolute source path
    pub original_file_path: String,
    /// Absolute library path
    pub hardlink_path: String,
    /// File size in bytes
    pub file_size: i64,
    /// Unix timestamp of link creation
    pub created_at: i64,
}

/// One file inside a tracked torrent
#[derive(Debug, Clone, FromRow)]
pub struct TorrentFileRecord {
    /// Row id
    pub id: i64,
    /// Owning torrent
    pub torrent_hash: String,
    /// Path relative to the torrent root
    pub file_path: String,
    /// File size in bytes
    pub file_size: i64,
    /// video / subtitle / other
    pub file_type: String,
}

/// RSS processing history row
#[derive(Debug, Clone, FromRow)]
pub struct RssHistoryRecord {
    /// Row id
    pub id: i64,
    /// Feed URL
    pub rss_url: String,
    /// What triggered the run
    pub triggered_by: String,
    /// Unix timestamp of the run start
    pub started_at: i64,
    /// processing / completed / partial / failed / interrupted
    pub status: String,
    /// Items discovered in the feed
    pub items_found: i64,
    /// Items enqueued for processing
    pub items_attempted: i64,
    /// Items processed so far
    pub items_processed: i64,
}

/// RSS processing detail row (one per feed item)
#[derive(Debug, Clone, FromRow)]
pub struct RssDetailRecord {
    /// Row id
    pub id: i64,
    /// Owning history row
    pub history_id: i64,
    /// Feed item title
    pub item_title: String,
    /// success / exists / filtered / failed
    pub outcome: String,
    /// Outcome qualifier
    pub reason: Option<String>,
}
