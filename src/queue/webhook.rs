//! Webhook queue payloads and event kinds
//!
//! Fan-in point for downloader lifecycle events. The HTTP webhook surface
//! validates and enqueues; handlers installed by the orchestrator do the
//! actual work on the queue's single consumer flow.

use serde::{Deserialize, Serialize};

use super::{QueuePayload, QueueWorker};

/// Event kinds delivered by the downloader webhook
pub mod webhook_events {
    /// Torrent finished downloading
    pub const TORRENT_COMPLETED: &str = "torrent_completed";
    /// Alias some downloader builds emit for completion
    pub const TORRENT_FINISHED: &str = "torrent_finished";
    /// Torrent accepted by the downloader
    pub const TORRENT_ADDED: &str = "torrent_added";
    /// Torrent paused
    pub const TORRENT_PAUSED: &str = "torrent_paused";
    /// Torrent resumed
    pub const TORRENT_RESUMED: &str = "torrent_resumed";
    /// Torrent removed from the downloader
    pub const TORRENT_DELETED: &str = "torrent_deleted";
    /// Torrent failed
    pub const TORRENT_ERROR: &str = "torrent_error";
}

/// Payload of a downloader webhook event
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// 40-hex torrent identifier (canonical key across the system)
    pub hash_id: String,
    /// Torrent display name
    #[serde(default)]
    pub name: String,
    /// Downloader category
    #[serde(default)]
    pub category: String,
    /// Downloader-reported status string
    #[serde(default)]
    pub status: String,
    /// Directory the torrent was saved into
    #[serde(default)]
    pub save_path: String,
    /// The raw webhook body, for fields the typed shape doesn't carry
    #[serde(default)]
    pub extra_data: serde_json::Value,
}

impl QueuePayload for WebhookPayload {
    fn display_name(&self) -> Option<String> {
        (!self.name.is_empty()).then(|| self.name.clone())
    }
}

/// The webhook queue: downloader completion events, one consumer flow
pub type WebhookQueue = QueueWorker<WebhookPayload>;
