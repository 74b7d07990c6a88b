use super::*;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

#[derive(Clone, Debug)]
struct TestPayload {
    label: String,
    history_id: Option<i64>,
    work_ms: u64,
}

impl TestPayload {
    fn quick(label: &str) -> Self {
        Self {
            label: label.to_string(),
            history_id: None,
            work_ms: 0,
        }
    }

    fn with_history(label: &str, history_id: i64) -> Self {
        Self {
            history_id: Some(history_id),
            ..Self::quick(label)
        }
    }
}

impl QueuePayload for TestPayload {
    fn display_name(&self) -> Option<String> {
        Some(self.label.clone())
    }

    fn history_id(&self) -> Option<i64> {
        self.history_id
    }

    fn item_title(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

/// Worker whose "seen" handler records processed labels in order
fn recording_worker() -> (QueueWorker<TestPayload>, Arc<StdMutex<Vec<String>>>) {
    let worker = QueueWorker::with_name("test-queue");
    let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));

    let seen_clone = seen.clone();
    worker.register_handler("seen", move |event: QueueEvent<TestPayload>| {
        let seen = seen_clone.clone();
        async move {
            if event.payload.work_ms > 0 {
                tokio::time::sleep(Duration::from_millis(event.payload.work_ms)).await;
            }
            seen.lock().unwrap().push(event.payload.label.clone());
            Ok(())
        }
    });

    (worker, seen)
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// FIFO ordering and dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_are_processed_in_fifo_order() {
    let (worker, seen) = recording_worker();

    for i in 0..20 {
        worker.enqueue("seen", TestPayload::quick(&format!("e{i}")));
    }
    worker.start().await;

    assert!(
        wait_until(|| seen.lock().unwrap().len() == 20, Duration::from_secs(5)).await,
        "all events should be processed"
    );
    let order = seen.lock().unwrap().clone();
    let expected: Vec<String> = (0..20).map(|i| format!("e{i}")).collect();
    assert_eq!(order, expected);

    worker.stop().await;
}

#[tokio::test]
async fn unknown_event_kind_does_not_advance_statistics() {
    let (worker, seen) = recording_worker();
    worker.start().await;

    worker.enqueue("bogus_kind", TestPayload::quick("ignored"));
    worker.enqueue("seen", TestPayload::quick("handled"));

    assert!(wait_until(|| seen.lock().unwrap().len() == 1, Duration::from_secs(5)).await);

    let status = worker.status().await;
    assert_eq!(status.stats.total_processed, 1);
    assert_eq!(status.stats.total_success, 1);
    assert_eq!(status.stats.total_failed, 0);

    worker.stop().await;
}

#[tokio::test]
async fn handler_errors_are_counted_and_reset_on_success() {
    let worker: QueueWorker<TestPayload> = QueueWorker::with_name("failing");
    worker.register_handler("fail", |_event: QueueEvent<TestPayload>| async {
        Err(crate::error::Error::Other("boom".into()))
    });
    let done = Arc::new(StdMutex::new(false));
    let done_clone = done.clone();
    worker.register_handler("ok", move |_event: QueueEvent<TestPayload>| {
        let done = done_clone.clone();
        async move {
            *done.lock().unwrap() = true;
            Ok(())
        }
    });
    worker.start().await;

    worker.enqueue("fail", TestPayload::quick("f1"));
    worker.enqueue("fail", TestPayload::quick("f2"));
    worker.enqueue("ok", TestPayload::quick("s1"));

    assert!(wait_until(|| *done.lock().unwrap(), Duration::from_secs(5)).await);

    let status = worker.status().await;
    assert_eq!(status.stats.total_processed, 3);
    assert_eq!(status.stats.total_failed, 2);
    assert_eq!(status.stats.total_success, 1);
    assert_eq!(
        status.consecutive_failures, 0,
        "success resets the consecutive counter"
    );
    assert!((status.stats.success_rate - 33.33).abs() < 0.01);

    worker.stop().await;
}

// ---------------------------------------------------------------------------
// Lifecycle: start / pause / resume / stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_is_idempotent() {
    let (worker, seen) = recording_worker();
    worker.start().await;
    worker.start().await;
    worker.start().await;

    worker.enqueue("seen", TestPayload::quick("only-once"));
    assert!(wait_until(|| seen.lock().unwrap().len() == 1, Duration::from_secs(5)).await);

    // A second start must not have spawned a second consumer: give any
    // duplicate a chance to double-process, then re-check
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    worker.stop().await;
}

#[tokio::test]
async fn pause_suspends_consumption_but_not_enqueue() {
    let (worker, seen) = recording_worker();
    worker.start().await;
    worker.pause();
    assert!(worker.is_paused());

    worker.enqueue("seen", TestPayload::quick("queued-while-paused"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.lock().unwrap().is_empty(), "paused worker must not consume");
    assert_eq!(worker.queue_len(), 1);

    worker.resume();
    assert!(wait_until(|| seen.lock().unwrap().len() == 1, Duration::from_secs(5)).await);

    worker.stop().await;
}

#[tokio::test]
async fn stop_finishes_in_flight_and_preserves_pending() {
    let (worker, seen) = recording_worker();

    // First event takes a while; the rest stay pending
    worker.enqueue(
        "seen",
        TestPayload {
            label: "slow".to_string(),
            history_id: None,
            work_ms: 300,
        },
    );
    for i in 0..3 {
        worker.enqueue("seen", TestPayload::quick(&format!("pending{i}")));
    }
    worker.start().await;

    // Let the slow handler get picked up, then stop
    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.stop().await;

    let processed = seen.lock().unwrap().clone();
    assert_eq!(processed, vec!["slow".to_string()], "in-flight handler ran to completion");
    assert_eq!(worker.queue_len(), 3, "pending events preserved across stop");
    assert!(!worker.is_running().await);
}

#[tokio::test]
async fn worker_can_restart_after_stop() {
    let (worker, seen) = recording_worker();
    worker.start().await;
    worker.stop().await;

    worker.enqueue("seen", TestPayload::quick("after-restart"));
    worker.start().await;
    assert!(wait_until(|| seen.lock().unwrap().len() == 1, Duration::from_secs(5)).await);

    worker.stop().await;
}

// ---------------------------------------------------------------------------
// clear_queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clear_drops_only_pending_events() {
    let (worker, seen) = recording_worker();

    worker.enqueue(
        "seen",
        TestPayload {
            label: "in-flight".to_string(),
            history_id: Some(7),
            work_ms: 300,
        },
    );
    for i in 0..5 {
        worker.enqueue("seen", TestPayload::with_history(&format!("pending{i}"), 7));
    }
    worker.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cleared = worker.clear_queue();
    assert_eq!(cleared.count, 5, "only pending events are dropped");
    assert_eq!(cleared.history_ids, vec![7]);
    assert_eq!(cleared.cleared_items.len(), 5);
    assert!(cleared.cleared_items.iter().all(|(id, _)| *id == 7));

    // The in-flight event still completes
    assert!(wait_until(|| seen.lock().unwrap().len() == 1, Duration::from_secs(5)).await);
    assert_eq!(seen.lock().unwrap()[0], "in-flight");
    assert_eq!(worker.queue_len(), 0);

    worker.stop().await;
}

#[tokio::test]
async fn clear_collects_distinct_history_ids() {
    let worker: QueueWorker<TestPayload> = QueueWorker::with_name("clear-test");
    worker.enqueue("seen", TestPayload::with_history("a", 1));
    worker.enqueue("seen", TestPayload::with_history("b", 2));
    worker.enqueue("seen", TestPayload::with_history("c", 1));
    worker.enqueue("seen", TestPayload::quick("no-history"));

    let cleared = worker.clear_queue();
    assert_eq!(cleared.count, 4);
    assert_eq!(cleared.history_ids, vec![1, 2]);
    assert_eq!(cleared.cleared_items.len(), 3, "history-less events carry no detail row");
}

// ---------------------------------------------------------------------------
// Status snapshots
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reports_queue_and_preview() {
    let worker: QueueWorker<TestPayload> = QueueWorker::with_name("status-test");
    for i in 0..15 {
        worker.enqueue("seen", TestPayload::quick(&format!("e{i}")));
    }

    let status = worker.status().await;
    assert_eq!(status.name, "status-test");
    assert_eq!(status.queue_len, 15);
    assert!(!status.worker_alive);
    assert_eq!(status.pending_events.len(), 10, "preview capped at 10");
    assert_eq!(status.pending_events[0].display_name.as_deref(), Some("e0"));
    assert_eq!(status.pending_events[0].queue_id.len(), 8);
}

#[tokio::test]
async fn queue_ids_are_unique_tokens() {
    let worker: QueueWorker<TestPayload> = QueueWorker::with_name("token-test");
    let mut ids = std::collections::HashSet::new();
    for i in 0..100 {
        let (id, _) = worker.enqueue("seen", TestPayload::quick(&format!("e{i}")));
        assert_eq!(id.len(), 8);
        ids.insert(id);
    }
    assert_eq!(ids.len(), 100);
}

// ---------------------------------------------------------------------------
// RSS payload contract
// ---------------------------------------------------------------------------

#[test]
fn rss_item_payload_exposes_history_identity() {
    let payload = RssPayload::Item(SingleItem {
        item_title: "[ANi] X - 01".to_string(),
        torrent_url: "https://example.com/x.torrent".to_string(),
        hash_id: None,
        rss_url: "https://example.com/rss".to_string(),
        media_type: crate::types::MediaType::Anime,
        trigger_type: "scheduled".to_string(),
        history_id: Some(42),
        description: String::new(),
        pub_date: None,
    });

    assert_eq!(payload.history_id(), Some(42));
    assert_eq!(payload.item_title().as_deref(), Some("[ANi] X - 01"));
    assert!(payload.as_item().is_some());
    assert!(payload.as_feed().is_none());
}

#[test]
fn rss_feed_payload_has_no_history_identity() {
    let payload = RssPayload::Feed(FeedCheck {
        rss_url: "https://example.com/rss".to_string(),
        trigger_type: "manual".to_string(),
        filter: FilterConfig::default(),
    });

    assert_eq!(payload.history_id(), None);
    assert_eq!(payload.item_title(), None);
    assert_eq!(
        payload.display_name().as_deref(),
        Some("https://example.com/rss")
    );
}
