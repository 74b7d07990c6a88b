//! RSS feed scheduling
//!
//! A fixed-period timer that expands the configured feeds into feed-level
//! queue events. One bootstrap tick runs at startup, then one tick per
//! `rss.check_interval`. The scheduler only enqueues — fetching, filtering
//! and fanout happen on the RSS queue's consumer flow — so a slow feed never
//! delays the timer.

use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::queue::{FeedCheck, FilterConfig, RssPayload, RssQueue, rss_events};

/// Granularity of the scheduler's cancellation polling
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic feed-event emitter
pub struct RssScheduler {
    config: Arc<Config>,
    rss_queue: RssQueue,
    cancel: CancellationToken,
}

impl RssScheduler {
    /// Create a scheduler over the configured feeds
    pub fn new(config: Arc<Config>, rss_queue: RssQueue, cancel: CancellationToken) -> Self {
        Self {
            config,
            rss_queue,
            cancel,
        }
    }

    /// Run until cancelled. Emits a bootstrap tick immediately, then one
    /// tick per check interval (floored at 60 s).
    pub async fn run(self) {
        let interval = self.config.rss.check_interval.max(60);
        info!(
            feeds = self.config.rss.fixed_urls.len(),
            interval_seconds = interval,
            "RSS scheduler started"
        );

        self.enqueue_feeds("startup");

        let mut elapsed: u64 = 0;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("RSS scheduler shutting down");
                    break;
                }
                _ = sleep(TICK_INTERVAL) => {
                    elapsed += 1;
                }
            }

            if elapsed >= interval {
                elapsed = 0;
                self.enqueue_feeds("scheduled");
            }
        }

        info!("RSS scheduler stopped");
    }

    /// Enqueue one `single_feed` event per configured feed
    fn enqueue_feeds(&self, triggered_by: &str) {
        let feeds = &self.config.rss.fixed_urls;
        if feeds.is_empty() {
            debug!("no RSS feeds configured");
            return;
        }

        for feed in feeds {
            self.rss_queue.enqueue(
                rss_events::SINGLE_FEED,
                RssPayload::Feed(FeedCheck {
                    rss_url: feed.url.clone(),
                    trigger_type: triggered_by.to_string(),
                    filter: FilterConfig {
                        blocked_keywords: feed.blocked_keywords.clone(),
                        blocked_regex: feed.blocked_regex.clone(),
                        media_type: feed.media_type,
                    },
                }),
            );
        }
        info!(
            count = feeds.len(),
            triggered_by, "feeds enqueued for processing"
        );
    }
}
