//! Download orchestrator
//!
//! Top-level state machine per torrent hash:
//!
//! ```text
//!              +--- rss item / manual submit ---+
//!              v                                |
//!   [none] --> pending --> downloading --> completed --> archived
//!                 \             \               \
//!                  +--> error <--+---------------+
//! ```
//!
//! Submission deduplicates against the live table and the deletion history,
//! resolves the release title to an anime row (creating one on miss), and
//! drives the downloader adapter. Webhook events advance the state; torrent
//! completion runs the rename/hardlink pipeline in [`completion`]. The
//! orchestrator itself is stateless across calls — per-hash ordering comes
//! from the single webhook queue consumer.

mod completion;
mod handlers;


pub use handlers::install_queue_handlers;

use std::sync::Arc;

use crate::adapters::{DownloaderClient, MetadataProvider, Notifier, TorrentSource};
use crate::ai::{FileRenamer, SubtitleMatcher, TitleParser};
use crate::config::Config;
use crate::db::{Database, NewDownload};
use crate::error::{Error, Result};
use crate::hardlink::HardlinkService;
use crate::queue::{ClearResult, RssQueue, SingleItem};
use crate::types::{AnimeId, DownloadStatus, Event, MediaType, TorrentHash};
use crate::utils::extract_info_hash;

/// Wires RSS items and webhook events to the downloader, the AI services
/// and the hardlink stage.
pub struct DownloadOrchestrator {
    pub(crate) db: Database,
    pub(crate) downloader: Arc<dyn DownloaderClient>,
    pub(crate) metadata: Option<Arc<dyn MetadataProvider>>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) title_parser: Arc<TitleParser>,
    pub(crate) file_renamer: Arc<FileRenamer>,
    pub(crate) subtitle_matcher: Arc<SubtitleMatcher>,
    pub(crate) hardlinks: HardlinkService,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

/// Everything the orchestrator needs, gathered by the composition root
pub struct OrchestratorParts {
    /// Persistence handle
    pub db: Database,
    /// Downloader adapter
    pub downloader: Arc<dyn DownloaderClient>,
    /// Optional metadata provider
    pub metadata: Option<Arc<dyn MetadataProvider>>,
    /// Notification sender
    pub notifier: Arc<dyn Notifier>,
    /// Title parser (C8)
    pub title_parser: Arc<TitleParser>,
    /// File renamer (C9)
    pub file_renamer: Arc<FileRenamer>,
    /// Subtitle matcher
    pub subtitle_matcher: Arc<SubtitleMatcher>,
    /// Hardlink stage (C11)
    pub hardlinks: HardlinkService,
    /// Full configuration
    pub config: Arc<Config>,
}

impl DownloadOrchestrator {
    /// Assemble the orchestrator from its parts
    pub fn new(parts: OrchestratorParts) -> Arc<Self> {
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
        Arc::new(Self {
            db: parts.db,
            downloader: parts.downloader,
            metadata: parts.metadata,
            notifier: parts.notifier,
            title_parser: parts.title_parser,
            file_renamer: parts.file_renamer,
            subtitle_matcher: parts.subtitle_matcher,
            hardlinks: parts.hardlinks,
            config: parts.config,
            event_tx,
        })
    }

    /// Subscribe to orchestrator events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Submit a torrent for download.
    ///
    /// Validates the hash against the live table *and* the deletion history
    /// (both block resubmission), resolves the title to an anime, drives the
    /// downloader, and inserts the `pending` record.
    pub async fn submit_torrent(
        &self,
        source: TorrentSource,
        hash: &TorrentHash,
        title: &str,
        media_type: MediaType,
    ) -> Result<()> {
        if self.db.hash_is_known(hash.as_str()).await? {
            return Err(Error::Duplicate(format!(
                "torrent {} already tracked or previously deleted",
                hash.short()
            )));
        }

        let anime_id = self.resolve_or_create_anime(title, media_type).await?;

        self.downloader
            .add_torrent(
                source,
                &self.config.downloader.category,
                &self.config.downloader.base_download_path,
            )
            .await?;

        self.db
            .insert_download(&NewDownload {
                hash: hash.as_str().to_string(),
                original_filename: title.to_string(),
                anime_id: anime_id.map(|id| id.get()),
                status: DownloadStatus::Pending.as_str().to_string(),
                download_directory: self.config.downloader.base_download_path.clone(),
            })
            .await?;

        tracing::info!(hash = %hash.short(), title, "torrent submitted");
        self.emit(Event::TorrentSubmitted {
            hash: hash.clone(),
            title: title.to_string(),
        });
        self.notify_download(
            "Torrent submitted",
            &format!("{title}\n`{}`", hash.as_str()),
        )
        .await;

        Ok(())
    }

    /// Process one RSS item: resolve its hash and submit it.
    pub async fn process_single_item(&self, item: &SingleItem) -> Result<()> {
        let hash = match &item.hash_id {
            Some(hash) => TorrentHash::parse(hash)?,
            None => {
                let extracted = extract_info_hash(&item.torrent_url).ok_or_else(|| {
                    Error::Validation(format!(
                        "item '{}' carries no resolvable info hash",
                        item.item_title
                    ))
                })?;
                TorrentHash::parse(&extracted)?
            }
        };

        self.submit_torrent(
            TorrentSource::Url(item.torrent_url.clone()),
            &hash,
            &item.item_title,
            item.media_type,
        )
        .await
    }

    /// Submit a torrent whose identity the operator supplied directly
    /// (manual magnet/torrent commands). Skips title parsing: the anime row
    /// is found or created from the given tuple.
    pub async fn submit_manual(
        &self,
        source: TorrentSource,
        hash: &TorrentHash,
        title: &str,
        group: &str,
        season: u32,
        category: crate::types::Category,
        media_type: MediaType,
    ) -> Result<()> {
        if self.db.hash_is_known(hash.as_str()).await? {
            return Err(Error::Duplicate(format!(
                "torrent {} already tracked or previously deleted",
                hash.short()
            )));
        }

        let anime_id = match self
            .db
            .find_anime(title, season, group, category.as_str())
            .await?
        {
            Some(existing) => AnimeId(existing.anime_id),
            None => {
                self.db
                    .insert_anime(&crate::db::NewAnime {
                        short_title: title,
                        full_title: None,
                        subtitle_group: group,
                        season,
                        category: category.as_str(),
                        media_type: media_type.as_str(),
                    })
                    .await?
            }
        };

        let upload_type = match &source {
            TorrentSource::Url(url) if url.starts_with("magnet:") => "magnet",
            TorrentSource::Url(_) => "url",
            TorrentSource::File { .. } => "torrent",
        };

        self.downloader
            .add_torrent(
                source,
                &self.config.downloader.category,
                &self.config.downloader.base_download_path,
            )
            .await?;

        self.db
            .insert_download(&NewDownload {
                hash: hash.as_str().to_string(),
                original_filename: title.to_string(),
                anime_id: Some(anime_id.get()),
                status: DownloadStatus::Pending.as_str().to_string(),
                download_directory: self.config.downloader.base_download_path.clone(),
            })
            .await?;
        self.db
            .insert_manual_upload(upload_type, title, hash.as_str(), "submitted")
            .await?;

        tracing::info!(hash = %hash.short(), title, "manual torrent submitted");
        self.emit(Event::TorrentSubmitted {
            hash: hash.clone(),
            title: title.to_string(),
        });
        Ok(())
    }

    /// Hand a raw .torrent file to the downloader without tracking it.
    ///
    /// Used by the torrent CLI command, which learns the info hash from the
    /// downloader's listing afterwards.
    pub async fn submit_torrent_file_untracked(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<()> {
        self.downloader
            .add_torrent(
                TorrentSource::File {
                    file_name: file_name.to_string(),
                    bytes: bytes.to_vec(),
                },
                &self.config.downloader.category,
                &self.config.downloader.base_download_path,
            )
            .await
    }

    /// Find a freshly added torrent's hash by name, polling the downloader
    /// briefly. Returns `None` when nothing matching shows up.
    pub async fn find_hash_by_name_hint(
        &self,
        title: &str,
        file_name: &str,
    ) -> Result<Option<TorrentHash>> {
        let stem = file_name.trim_end_matches(".torrent");

        for _ in 0..10 {
            let torrents = self.downloader.get_all_torrents().await?;
            for torrent in torrents {
                if !torrent.name.contains(stem) && !torrent.name.contains(title) {
                    continue;
                }
                if !self.db.hash_is_known(torrent.hash.as_str()).await? {
                    return Ok(Some(torrent.hash));
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        Ok(None)
    }

    /// Webhook: downloader accepted the torrent (`pending` → `downloading`)
    pub async fn handle_torrent_added(&self, hash: &TorrentHash) -> Result<()> {
        let Some(record) = self.db.get_download(hash.as_str()).await? else {
            tracing::debug!(hash = %hash.short(), "added event for untracked torrent");
            return Ok(());
        };

        match DownloadStatus::from_db(&record.status) {
            DownloadStatus::Pending => {
                self.db
                    .update_download_status(hash.as_str(), DownloadStatus::Downloading.as_str())
                    .await?;
                tracing::info!(hash = %hash.short(), "torrent downloading");
                self.emit(Event::TorrentAdded { hash: hash.clone() });
            }
            other => {
                tracing::debug!(
                    hash = %hash.short(),
                    status = %other,
                    "added event ignored in current state"
                );
            }
        }
        Ok(())
    }

    /// Webhook: downloader finished the torrent; runs the completion pipeline
    pub async fn handle_torrent_completed(&self, hash: &TorrentHash) -> Result<()> {
        let Some(record) = self.db.get_download(hash.as_str()).await? else {
            tracing::warn!(hash = %hash.short(), "completion event for untracked torrent");
            return Ok(());
        };

        match DownloadStatus::from_db(&record.status) {
            DownloadStatus::Archived => {
                tracing::debug!(hash = %hash.short(), "torrent already archived");
                return Ok(());
            }
            DownloadStatus::Error => {
                tracing::debug!(hash = %hash.short(), "completion event for errored torrent");
            }
            _ => {}
        }

        self.db
            .update_download_status(hash.as_str(), DownloadStatus::Completed.as_str())
            .await?;
        self.emit(Event::TorrentCompleted { hash: hash.clone() });

        self.run_completion_pipeline(hash).await
    }

    /// Webhook: downloader reported a failure
    pub async fn handle_torrent_error(&self, hash: &TorrentHash, message: &str) -> Result<()> {
        self.db.set_download_error(hash.as_str(), message).await?;
        tracing::warn!(hash = %hash.short(), error = message, "torrent failed");
        self.emit(Event::TorrentFailed {
            hash: hash.clone(),
            error: message.to_string(),
        });
        self.notify_download(
            "Torrent failed",
            &format!("`{}`\n{message}", hash.as_str()),
        )
        .await;
        Ok(())
    }

    /// Webhook: torrent removed from the downloader. The record moves into
    /// the deletion history so the hash stays blocked, and its hardlinks are
    /// left in place (the library copy survives the torrent).
    pub async fn handle_torrent_deleted(&self, hash: &TorrentHash) -> Result<()> {
        if self.db.get_download(hash.as_str()).await?.is_none() {
            return Ok(());
        }
        self.db.delete_download(hash.as_str()).await?;
        tracing::info!(hash = %hash.short(), "torrent deleted from downloader");
        Ok(())
    }

    /// Resolve a release title to an anime row, creating one on miss.
    ///
    /// `Ok(None)` means the title was unparseable after retries; the download
    /// proceeds without an anime and the completion pipeline retries later.
    /// Circuit-open and key-exhaustion propagate to the caller.
    pub(crate) async fn resolve_or_create_anime(
        &self,
        title: &str,
        media_type: MediaType,
    ) -> Result<Option<AnimeId>> {
        let Some(parsed) = self.title_parser.parse(title).await? else {
            tracing::warn!(title, "title unparseable, continuing without anime");
            return Ok(None);
        };

        if let Some(existing) = self
            .db
            .find_anime(
                &parsed.clean_title,
                parsed.season,
                &parsed.subtitle_group,
                parsed.category.as_str(),
            )
            .await?
        {
            return Ok(Some(AnimeId(existing.anime_id)));
        }

        let anime_id = self
            .db
            .insert_anime(&crate::db::NewAnime {
                short_title: &parsed.clean_title,
                full_title: parsed.full_title.as_deref(),
                subtitle_group: &parsed.subtitle_group,
                season: parsed.season,
                category: parsed.category.as_str(),
                media_type: media_type.as_str(),
            })
            .await?;

        tracing::info!(
            anime_id = %anime_id,
            clean_title = %parsed.clean_title,
            season = parsed.season,
            "anime created"
        );
        Ok(Some(anime_id))
    }

    /// Drain the RSS queue's pending events and mark the affected feed runs
    /// interrupted, with `failed/interrupted` detail rows for dropped items.
    pub async fn cancel_pending_rss(&self, rss_queue: &RssQueue) -> Result<ClearResult> {
        let cleared = rss_queue.clear_queue();

        for history_id in &cleared.history_ids {
            self.db
                .mark_rss_history_interrupted(*history_id, &cleared.cleared_items)
                .await?;
        }

        tracing::info!(
            count = cleared.count,
            histories = cleared.history_ids.len(),
            "pending RSS work cancelled"
        );
        Ok(cleared)
    }

    /// Best-effort send to the download channel
    pub(crate) async fn notify_download(&self, title: &str, description: &str) {
        let result = self
            .notifier
            .send(
                "download",
                vec![crate::adapters::Embed::new(title, description)],
                None,
            )
            .await;
        if !result.success {
            self.emit(Event::NotificationFailed {
                channel: "download".to_string(),
                error: result.error.unwrap_or_default(),
            });
        }
    }

    /// Best-effort send to the rss channel
    pub(crate) async fn notify_rss(&self, title: &str, description: &str) {
        let result = self
            .notifier
            .send(
                "rss",
                vec![crate::adapters::Embed::new(title, description)],
                None,
            )
            .await;
        if !result.success {
            self.emit(Event::NotificationFailed {
                channel: "rss".to_string(),
                error: result.error.unwrap_or_default(),
            });
        }
    }
}
