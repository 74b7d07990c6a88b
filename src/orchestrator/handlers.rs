//! Queue handler wiring
//!
//! Installs the dispatch tables on the webhook and RSS queues. Feed-level
//! events expand a feed into `single_item` events (opening an RSS history
//! row first); item-level events deduplicate, submit, and record their
//! outcome against that history row.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::queue::{
    FeedCheck, QueueEvent, RssPayload, RssQueue, SingleItem, WebhookPayload, WebhookQueue,
    rss_events, webhook_events,
};
use crate::rss::{FeedFilter, RssFetcher};
use crate::types::{Event, TorrentHash};

use super::DownloadOrchestrator;

/// How long an item handler sleeps before requeueing when the breaker is open
const CIRCUIT_OPEN_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// Install all webhook and RSS handlers.
///
/// Call once from the composition root before starting the queues.
pub fn install_queue_handlers(
    orchestrator: Arc<DownloadOrchestrator>,
    webhook_queue: &WebhookQueue,
    rss_queue: &RssQueue,
    fetcher: Arc<RssFetcher>,
) {
    install_webhook_handlers(orchestrator.clone(), webhook_queue);
    install_rss_handlers(orchestrator, rss_queue, fetcher);
}

fn install_webhook_handlers(orchestrator: Arc<DownloadOrchestrator>, queue: &WebhookQueue) {
    for kind in [
        webhook_events::TORRENT_COMPLETED,
        webhook_events::TORRENT_FINISHED,
    ] {
        let orchestrator = orchestrator.clone();
        queue.register_handler(kind, move |event: QueueEvent<WebhookPayload>| {
            let orchestrator = orchestrator.clone();
            async move {
                let hash = TorrentHash::parse(&event.payload.hash_id)?;
                orchestrator.handle_torrent_completed(&hash).await
            }
        });
    }

    {
        let orchestrator = orchestrator.clone();
        queue.register_handler(
            webhook_events::TORRENT_ADDED,
            move |event: QueueEvent<WebhookPayload>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let hash = TorrentHash::parse(&event.payload.hash_id)?;
                    orchestrator.handle_torrent_added(&hash).await
                }
            },
        );
    }

    {
        let orchestrator = orchestrator.clone();
        queue.register_handler(
            webhook_events::TORRENT_ERROR,
            move |event: QueueEvent<WebhookPayload>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let hash = TorrentHash::parse(&event.payload.hash_id)?;
                    let message = event.payload.extra_data["error"]
                        .as_str()
                        .unwrap_or("downloader reported an error")
                        .to_string();
                    orchestrator.handle_torrent_error(&hash, &message).await
                }
            },
        );
    }

    // Lifecycle hints: paused/resumed are informational, deleted retires the
    // record into the deletion history
    for kind in [webhook_events::TORRENT_PAUSED, webhook_events::TORRENT_RESUMED] {
        queue.register_handler(kind, move |event: QueueEvent<WebhookPayload>| async move {
            tracing::debug!(
                kind = %event.event_kind,
                hash = %event.payload.hash_id.chars().take(8).collect::<String>(),
                "torrent lifecycle hint"
            );
            Ok(())
        });
    }

    {
        let orchestrator = orchestrator.clone();
        queue.register_handler(
            webhook_events::TORRENT_DELETED,
            move |event: QueueEvent<WebhookPayload>| {
                let orchestrator = orchestrator.clone();
                async move {
                    let hash = TorrentHash::parse(&event.payload.hash_id)?;
                    orchestrator.handle_torrent_deleted(&hash).await
                }
            },
        );
    }
}

fn install_rss_handlers(
    orchestrator: Arc<DownloadOrchestrator>,
    queue: &RssQueue,
    fetcher: Arc<RssFetcher>,
) {
    // All feed-level kinds share the expansion handler
    for kind in [
        rss_events::SCHEDULED_CHECK,
        rss_events::MANUAL_CHECK,
        rss_events::SINGLE_FEED,
        rss_events::FIXED_SUBSCRIPTION,
    ] {
        let orchestrator = orchestrator.clone();
        let fetcher = fetcher.clone();
        let queue_for_handler = queue.clone();
        queue.register_handler(kind, move |event: QueueEvent<RssPayload>| {
            let orchestrator = orchestrator.clone();
            let fetcher = fetcher.clone();
            let queue = queue_for_handler.clone();
            async move {
                let Some(feed) = event.payload.as_feed().cloned() else {
                    return Err(Error::Validation(format!(
                        "feed-level event '{}' carried an item payload",
                        event.event_kind
                    )));
                };
                expand_feed(&orchestrator, &queue, &fetcher, feed).await
            }
        });
    }

    {
        let orchestrator = orchestrator.clone();
        let queue_for_handler = queue.clone();
        queue.register_handler(
            rss_events::SINGLE_ITEM,
            move |event: QueueEvent<RssPayload>| {
                let orchestrator = orchestrator.clone();
                let queue = queue_for_handler.clone();
                async move {
                    let Some(item) = event.payload.as_item().cloned() else {
                        return Err(Error::Validation(
                            "single_item event carried a feed payload".into(),
                        ));
                    };
                    process_item(&orchestrator, &queue, item).await
                }
            },
        );
    }
}

/// Feed-level handler: parse the feed, filter, and fan out item events.
async fn expand_feed(
    orchestrator: &DownloadOrchestrator,
    queue: &RssQueue,
    fetcher: &RssFetcher,
    feed: FeedCheck,
) -> crate::error::Result<()> {
    let db = &orchestrator.db;
    let history_id = db.insert_rss_history(&feed.rss_url, &feed.trigger_type).await?;

    orchestrator.emit(Event::RssCheckStarted {
        rss_url: feed.rss_url.clone(),
        triggered_by: feed.trigger_type.clone(),
    });

    let items = match fetcher.check_feed(&feed.rss_url).await {
        Ok(items) => items,
        Err(e) => {
            db.set_rss_history_status(history_id, "failed").await?;
            return Err(e);
        }
    };

    if items.is_empty() {
        db.set_rss_history_status(history_id, "completed").await?;
        tracing::info!(url = %feed.rss_url, "feed carried no items");
        return Ok(());
    }

    let filter = FeedFilter::new(&feed.filter.blocked_keywords, &feed.filter.blocked_regex);
    let mut enqueued = 0usize;
    let mut exists = 0usize;
    let mut filtered = 0usize;

    for item in &items {
        let known = match &item.hash {
            Some(hash) => db.hash_is_known(hash).await?,
            None => false,
        };
        if known {
            db.insert_rss_detail(history_id, &item.title, "exists", Some("already tracked"))
                .await?;
            exists += 1;
            continue;
        }

        if !filter.is_empty() && filter.should_filter(&item.title) {
            tracing::info!(title = %item.title, "item filtered");
            db.insert_rss_detail(history_id, &item.title, "filtered", Some("matched filter"))
                .await?;
            filtered += 1;
            continue;
        }

        let Some(torrent_url) = item.torrent_url.clone().or_else(|| item.link.clone()) else {
            db.insert_rss_detail(history_id, &item.title, "failed", Some("no torrent url"))
                .await?;
            continue;
        };

        queue.enqueue(
            rss_events::SINGLE_ITEM,
            RssPayload::Item(SingleItem {
                item_title: item.title.clone(),
                torrent_url,
                hash_id: item.hash.clone(),
                rss_url: feed.rss_url.clone(),
                media_type: feed.filter.media_type,
                trigger_type: feed.trigger_type.clone(),
                history_id: Some(history_id),
                description: item.description.clone().unwrap_or_default(),
                pub_date: item.pub_date,
            }),
        );
        enqueued += 1;
    }

    db.update_rss_history_counts(history_id, items.len() as i64, enqueued as i64)
        .await?;
    if enqueued == 0 {
        db.set_rss_history_status(history_id, "completed").await?;
    }

    tracing::info!(
        url = %feed.rss_url,
        found = items.len(),
        exists,
        filtered,
        enqueued,
        "feed expansion complete"
    );
    orchestrator.emit(Event::RssCheckCompleted {
        rss_url: feed.rss_url.clone(),
        items_found: items.len(),
        items_enqueued: enqueued,
    });
    orchestrator
        .notify_rss(
            "RSS check",
            &format!(
                "{}\nfound {} · new {} · known {} · filtered {}",
                feed.rss_url,
                items.len(),
                enqueued,
                exists,
                filtered
            ),
        )
        .await;

    Ok(())
}

/// Item-level handler: dedup, submit, record the outcome.
async fn process_item(
    orchestrator: &DownloadOrchestrator,
    queue: &RssQueue,
    item: SingleItem,
) -> crate::error::Result<()> {
    let db = &orchestrator.db;

    // Dedup again at dequeue time: an earlier item of the same batch may have
    // submitted the hash since the feed was expanded
    let known = match &item.hash_id {
        Some(hash) => db.hash_is_known(hash).await?,
        None => false,
    };
    if known {
        if let Some(history_id) = item.history_id {
            db.insert_rss_detail(history_id, &item.item_title, "exists", Some("already tracked"))
                .await?;
            db.increment_rss_history_processed(history_id).await?;
        }
        return Ok(());
    }

    match orchestrator.process_single_item(&item).await {
        Ok(()) => {
            if let Some(history_id) = item.history_id {
                db.insert_rss_detail(history_id, &item.item_title, "success", None)
                    .await?;
                db.increment_rss_history_processed(history_id).await?;
            }
            Ok(())
        }
        Err(Error::Duplicate(_)) => {
            // Not an error: the duplicate surfaced at submit rather than dedup
            if let Some(history_id) = item.history_id {
                db.insert_rss_detail(history_id, &item.item_title, "exists", Some("already tracked"))
                    .await?;
                db.increment_rss_history_processed(history_id).await?;
            }
            Ok(())
        }
        Err(Error::CircuitOpen {
            remaining_seconds, ..
        }) => {
            // The item stays queued and is reattempted as the breaker
            // recloses; the delay keeps a short queue from spinning hot
            tracing::warn!(
                title = %item.item_title,
                remaining_seconds,
                "circuit open, requeueing item"
            );
            tokio::time::sleep(CIRCUIT_OPEN_REQUEUE_DELAY).await;
            queue.enqueue(rss_events::SINGLE_ITEM, RssPayload::Item(item));
            Ok(())
        }
        Err(e) => {
            let reason = match &e {
                Error::KeysExhausted { .. } => "keys_exhausted".to_string(),
                other => other.to_string(),
            };
            if let Some(history_id) = item.history_id {
                db.insert_rss_detail(history_id, &item.item_title, "failed", Some(&reason))
                    .await?;
                db.increment_rss_history_processed(history_id).await?;
            }
            Err(e)
        }
    }
}
