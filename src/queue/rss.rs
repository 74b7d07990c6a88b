//! RSS queue payloads and event kinds
//!
//! The RSS queue carries two event strata: feed-level events (parse a feed
//! and expand it into items) and item-level events (one download candidate).
//! The split keeps one slow feed from blocking others past its expand step
//! and lets `clear_queue` cancel queued items without touching in-flight
//! downloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::MediaType;

use super::{QueuePayload, QueueWorker};

/// Event kinds carried by the RSS queue
pub mod rss_events {
    /// Feed-level: periodic scheduler tick
    pub const SCHEDULED_CHECK: &str = "scheduled_check";
    /// Feed-level: operator-initiated check
    pub const MANUAL_CHECK: &str = "manual_check";
    /// Feed-level: one configured feed
    pub const SINGLE_FEED: &str = "single_feed";
    /// Feed-level: per-anime fixed subscription
    pub const FIXED_SUBSCRIPTION: &str = "fixed_subscription";
    /// Item-level: one download candidate
    pub const SINGLE_ITEM: &str = "single_item";
}

/// Per-feed filter settings carried with both event strata
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Newline-separated keywords, case-insensitive substring match
    #[serde(default)]
    pub blocked_keywords: String,
    /// Newline-separated regex patterns, ORed
    #[serde(default)]
    pub blocked_regex: String,
    /// Library branch for items from this feed
    #[serde(default)]
    pub media_type: MediaType,
}

/// Feed-level payload: expand one feed into item events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedCheck {
    /// Feed URL
    pub rss_url: String,
    /// What triggered the check (scheduled, manual, startup)
    pub trigger_type: String,
    /// Filters applied during expansion
    #[serde(default)]
    pub filter: FilterConfig,
}

/// Item-level payload: one download candidate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SingleItem {
    /// Release title from the feed
    pub item_title: String,
    /// Torrent or magnet URL
    pub torrent_url: String,
    /// Info hash when it could be resolved from the feed entry
    pub hash_id: Option<String>,
    /// Feed the item came from
    pub rss_url: String,
    /// Library branch
    pub media_type: MediaType,
    /// What triggered the enclosing feed check
    pub trigger_type: String,
    /// RSS history row this item contributes to
    pub history_id: Option<i64>,
    /// Item description from the feed
    #[serde(default)]
    pub description: String,
    /// Publication date from the feed
    pub pub_date: Option<DateTime<Utc>>,
}

/// The RSS queue's two payload strata, disjoint by event kind
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RssPayload {
    /// Feed-level event
    Feed(FeedCheck),
    /// Item-level event
    Item(SingleItem),
}

impl RssPayload {
    /// Item payload when this is an item-level event
    pub fn as_item(&self) -> Option<&SingleItem> {
        match self {
            RssPayload::Item(item) => Some(item),
            RssPayload::Feed(_) => None,
        }
    }

    /// Feed payload when this is a feed-level event
    pub fn as_feed(&self) -> Option<&FeedCheck> {
        match self {
            RssPayload::Feed(feed) => Some(feed),
            RssPayload::Item(_) => None,
        }
    }
}

impl QueuePayload for RssPayload {
    fn display_name(&self) -> Option<String> {
        match self {
            RssPayload::Feed(feed) => Some(feed.rss_url.clone()),
            RssPayload::Item(item) => Some(item.item_title.clone()),
        }
    }

    fn history_id(&self) -> Option<i64> {
        match self {
            RssPayload::Feed(_) => None,
            RssPayload::Item(item) => item.history_id,
        }
    }

    fn item_title(&self) -> Option<String> {
        match self {
            RssPayload::Feed(_) => None,
            RssPayload::Item(item) => Some(item.item_title.clone()),
        }
    }
}

/// The RSS queue: feed expansion and item processing, one consumer flow
pub type RssQueue = QueueWorker<RssPayload>;
