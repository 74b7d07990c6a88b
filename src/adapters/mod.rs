//! Adapter seams for external collaborators
//!
//! The core drives the downloader, the metadata provider and the
//! notification sender through these narrow traits; the concrete REST
//! clients live beside them. Everything here is replaceable in tests with
//! plain structs.

mod notify;
mod qbit;
mod tvdb;

pub use notify::{Embed, EmbedField, WebhookNotifier};
pub use qbit::QbitClient;
pub use tvdb::TvdbClient;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EpisodeInfo, TorrentFileEntry, TorrentHash, TorrentInfo};

/// What gets handed to the downloader
#[derive(Clone, Debug)]
pub enum TorrentSource {
    /// Magnet link or torrent URL
    Url(String),
    /// Raw .torrent file contents
    File {
        /// Original file name, for the upload form
        file_name: String,
        /// File bytes
        bytes: Vec<u8>,
    },
}

/// Summary row from the downloader's torrent listing
#[derive(Clone, Debug)]
pub struct TorrentSummary {
    /// Canonical hash
    pub hash: TorrentHash,
    /// Display name
    pub name: String,
    /// Completion fraction 0.0..=1.0
    pub progress: f64,
}

/// Driver for the torrent downloader back-end
#[async_trait]
pub trait DownloaderClient: Send + Sync {
    /// Authenticate against the downloader
    async fn login(&self) -> Result<()>;

    /// Submit a torrent. Must be idempotent when the hash already exists.
    async fn add_torrent(
        &self,
        source: TorrentSource,
        category: &str,
        save_path: &str,
    ) -> Result<()>;

    /// Metadata for one torrent, `None` when the downloader doesn't know it
    async fn get_torrent_info(&self, hash: &TorrentHash) -> Result<Option<TorrentInfo>>;

    /// File listing for one torrent
    async fn get_torrent_files(&self, hash: &TorrentHash) -> Result<Vec<TorrentFileEntry>>;

    /// All torrents the downloader tracks
    async fn get_all_torrents(&self) -> Result<Vec<TorrentSummary>>;

    /// Remove a torrent, optionally deleting its files
    async fn delete_torrent(&self, hash: &TorrentHash, delete_files: bool) -> Result<()>;
}

/// Series search hit from the metadata provider
#[derive(Clone, Debug)]
pub struct SeriesSearchResult {
    /// Provider series id
    pub id: i64,
    /// Series name
    pub name: String,
    /// First-aired year, when known
    pub year: Option<String>,
}

/// Extended series record from the metadata provider
#[derive(Clone, Debug)]
pub struct SeriesExtended {
    /// Provider series id
    pub id: i64,
    /// Series name
    pub name: String,
    /// Airing status (Continuing, Ended, ...)
    pub status: Option<String>,
    /// First-aired date
    pub first_aired: Option<String>,
}

/// Optional TVDB-style metadata provider
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Search series by name
    async fn search_series(&self, name: &str) -> Result<Vec<SeriesSearchResult>>;

    /// Extended record for one series, `None` when the provider doesn't know it
    async fn get_series_extended(&self, series_id: i64) -> Result<Option<SeriesExtended>>;

    /// Every episode of a series, across all seasons
    async fn get_all_episodes(&self, series_id: i64) -> Result<Vec<EpisodeInfo>>;
}

/// Result of one notification send; sends never fail the caller
#[derive(Clone, Debug)]
pub struct NotifySendResult {
    /// Whether the channel accepted the message (or was a configured no-op)
    pub success: bool,
    /// HTTP status when a request was made
    pub status_code: Option<u16>,
    /// Failure description
    pub error: Option<String>,
}

impl NotifySendResult {
    /// A successful no-op (channel unset)
    pub fn skipped() -> Self {
        Self {
            success: true,
            status_code: None,
            error: None,
        }
    }
}

/// Channel-keyed notification sender
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send embeds to a channel; an unset channel is a successful no-op
    async fn send(
        &self,
        channel: &str,
        embeds: Vec<Embed>,
        content: Option<&str>,
    ) -> NotifySendResult;
}
