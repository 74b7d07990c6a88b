//! Generic FIFO queue worker
//!
//! A [`QueueWorker`] owns an unbounded in-memory FIFO and exactly one
//! consumer task. Events are dispatched by kind through a handler table;
//! ordering is strictly FIFO and no two events from the same queue are ever
//! processed concurrently.
//!
//! Lifecycle is cooperative: `stop` lets the in-flight handler finish and
//! preserves pending events, `pause` suspends consumption while producers
//! keep enqueueing, and `clear_queue` atomically drops pending events and
//! reports which history records they belonged to.

mod rss;
mod webhook;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use rss::{FeedCheck, FilterConfig, RssPayload, RssQueue, SingleItem, rss_events};
pub use webhook::{WebhookPayload, WebhookQueue, webhook_events};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Poll timeout of the consumer loop when the queue is empty
const DEQUEUE_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Re-check interval while paused
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// How long stop() waits for the consumer task to wind down
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Payload contract: lets the queue surface identity fields for status
/// snapshots and for `clear_queue`'s interruption reporting.
pub trait QueuePayload: Clone + Send + Sync + 'static {
    /// Name shown in status previews
    fn display_name(&self) -> Option<String> {
        None
    }

    /// RSS history row this event contributes to, when any
    fn history_id(&self) -> Option<i64> {
        None
    }

    /// Item title for interruption detail rows, when any
    fn item_title(&self) -> Option<String> {
        None
    }
}

/// One queued event
#[derive(Clone, Debug)]
pub struct QueueEvent<P> {
    /// 8-character opaque token identifying the event
    pub queue_id: String,
    /// Dispatch tag
    pub event_kind: String,
    /// Event data
    pub payload: P,
    /// When the event entered the queue
    pub received_at: DateTime<Utc>,
}

impl<P: QueuePayload> QueueEvent<P> {
    /// Create an event with a fresh queue id
    pub fn new(event_kind: impl Into<String>, payload: P) -> Self {
        Self {
            queue_id: new_queue_token(),
            event_kind: event_kind.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

fn new_queue_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Async handler invoked per event kind
pub type Handler<P> =
    Arc<dyn Fn(QueueEvent<P>) -> BoxFuture<'static, crate::error::Result<()>> + Send + Sync>;

/// Processing statistics
#[derive(Clone, Debug, Default, Serialize)]
pub struct QueueStats {
    /// Events dispatched to a handler
    pub total_processed: u64,
    /// Handler runs that returned Ok
    pub total_success: u64,
    /// Handler runs that returned Err
    pub total_failed: u64,
    /// Success percentage over processed events
    pub success_rate: f64,
}

/// Preview row for a pending or in-flight event
#[derive(Clone, Debug, Serialize)]
pub struct EventSnapshot {
    /// Event token
    pub queue_id: String,
    /// Dispatch tag
    pub event_kind: String,
    /// Payload display name, when the payload carries one
    pub display_name: Option<String>,
    /// When the event entered the queue
    pub received_at_utc: DateTime<Utc>,
    /// When processing started (in-flight events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at_utc: Option<DateTime<Utc>>,
}

/// Full queue status snapshot
#[derive(Clone, Debug, Serialize)]
pub struct QueueStatus {
    /// Queue name
    pub name: String,
    /// Pending event count
    pub queue_len: usize,
    /// Whether the consumer task is alive
    pub worker_alive: bool,
    /// Whether stop was requested
    pub stopped: bool,
    /// Whether consumption is paused
    pub paused: bool,
    /// Consecutive handler failures
    pub consecutive_failures: u32,
    /// Warning threshold for consecutive failures
    pub max_consecutive_failures: u32,
    /// The event currently being handled, if any
    pub current_event: Option<EventSnapshot>,
    /// Up to 10 pending events
    pub pending_events: Vec<EventSnapshot>,
    /// Processing statistics
    pub stats: QueueStats,
}

/// Result of draining the pending queue
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClearResult {
    /// Events dropped
    pub count: usize,
    /// Distinct history ids the dropped events belonged to
    pub history_ids: Vec<i64>,
    /// (history_id, item_title) pairs for interruption detail rows
    pub cleared_items: Vec<(i64, String)>,
}

#[derive(Default)]
struct StatsInner {
    total_processed: u64,
    total_success: u64,
    total_failed: u64,
}

struct Inner<P: QueuePayload> {
    name: String,
    queue: Mutex<VecDeque<QueueEvent<P>>>,
    handlers: RwLock<HashMap<String, Handler<P>>>,
    notify: tokio::sync::Notify,
    stop: AtomicBool,
    paused: AtomicBool,
    consecutive_failures: AtomicU32,
    max_failures: u32,
    current: Mutex<Option<EventSnapshot>>,
    stats: Mutex<StatsInner>,
    worker: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Generic FIFO task runner with a lifecycle and per-kind dispatch
#[derive(Clone)]
pub struct QueueWorker<P: QueuePayload> {
    inner: Arc<Inner<P>>,
}

impl<P: QueuePayload> QueueWorker<P> {
    /// Create a worker; `max_failures` is the consecutive-failure warning
    /// threshold (default 5 via [`QueueWorker::with_name`]).
    pub fn new(name: impl Into<String>, max_failures: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                queue: Mutex::new(VecDeque::new()),
                handlers: RwLock::new(HashMap::new()),
                notify: tokio::sync::Notify::new(),
                stop: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                max_failures,
                current: Mutex::new(None),
                stats: Mutex::new(StatsInner::default()),
                worker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Create a worker with the default failure threshold
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::new(name, 5)
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register the handler for an event kind
    pub fn register_handler<F, Fut>(&self, event_kind: impl Into<String>, handler: F)
    where
        F: Fn(QueueEvent<P>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        let event_kind = event_kind.into();
        let boxed: Handler<P> = Arc::new(move |event| Box::pin(handler(event)));
        if let Ok(mut handlers) = self.inner.handlers.write() {
            tracing::debug!(queue = %self.inner.name, kind = %event_kind, "handler registered");
            handlers.insert(event_kind, boxed);
        }
    }

    /// Remove the handler for an event kind
    pub fn unregister_handler(&self, event_kind: &str) {
        if let Ok(mut handlers) = self.inner.handlers.write() {
            handlers.remove(event_kind);
        }
    }

    /// Append an event; producers may enqueue regardless of pause state.
    ///
    /// Returns the enqueued event's token and the new queue length.
    pub fn enqueue(&self, event_kind: impl Into<String>, payload: P) -> (String, usize) {
        let event = QueueEvent::new(event_kind, payload);
        let queue_id = event.queue_id.clone();
        let len = {
            let mut queue = lock(&self.inner.queue);
            queue.push_back(event);
            queue.len()
        };
        tracing::debug!(queue = %self.inner.name, queue_len = len, "event enqueued");
        self.inner.notify.notify_one();
        (queue_id, len)
    }

    /// Launch the consumer task; a no-op when it is already running
    pub async fn start(&self) {
        let mut worker = self.inner.worker.lock().await;
        if let Some(handle) = worker.as_ref()
            && !handle.is_finished()
        {
            tracing::debug!(queue = %self.inner.name, "worker already running");
            return;
        }

        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move {
            run_loop(inner).await;
        }));
        tracing::info!(queue = %self.inner.name, "worker started");
    }

    /// Request termination: the in-flight handler finishes, pending events
    /// stay queued, and the consumer task is joined (5 s grace).
    pub async fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();

        let handle = self.inner.worker.lock().await.take();
        if let Some(handle) = handle
            && tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await.is_err()
        {
            tracing::warn!(queue = %self.inner.name, "worker did not stop cleanly");
        }
        tracing::info!(queue = %self.inner.name, "worker stopped");
    }

    /// Suspend consumption; producers may still enqueue
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        tracing::info!(queue = %self.inner.name, "worker paused");
    }

    /// Clear the pause flag
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
        tracing::info!(queue = %self.inner.name, "worker resumed");
    }

    /// Whether consumption is paused (and not stopped)
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst) && !self.inner.stop.load(Ordering::SeqCst)
    }

    /// Whether the consumer task is alive and not stopping
    pub async fn is_running(&self) -> bool {
        let worker = self.inner.worker.lock().await;
        worker.as_ref().is_some_and(|h| !h.is_finished())
            && !self.inner.stop.load(Ordering::SeqCst)
    }

    /// Pending event count
    pub fn queue_len(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Atomically drop all pending events.
    ///
    /// The in-flight event (if any) is untouched and runs to completion.
    /// Returns the dropped count plus the history records the dropped events
    /// belonged to, so their detail rows can be marked interrupted.
    pub fn clear_queue(&self) -> ClearResult {
        let drained: Vec<QueueEvent<P>> = {
            let mut queue = lock(&self.inner.queue);
            queue.drain(..).collect()
        };

        let mut history_ids = BTreeSet::new();
        let mut cleared_items = Vec::new();
        for event in &drained {
            if let Some(history_id) = event.payload.history_id() {
                history_ids.insert(history_id);
                if let Some(title) = event.payload.item_title() {
                    cleared_items.push((history_id, title));
                }
            }
        }

        tracing::info!(
            queue = %self.inner.name,
            count = drained.len(),
            "cleared pending events"
        );
        ClearResult {
            count: drained.len(),
            history_ids: history_ids.into_iter().collect(),
            cleared_items,
        }
    }

    /// Snapshot queue state for the status API
    pub async fn status(&self) -> QueueStatus {
        let (queue_len, pending_events) = {
            let queue = lock(&self.inner.queue);
            let preview = queue
                .iter()
                .take(10)
                .map(|event| EventSnapshot {
                    queue_id: event.queue_id.clone(),
                    event_kind: event.event_kind.clone(),
                    display_name: event.payload.display_name(),
                    received_at_utc: event.received_at,
                    started_at_utc: None,
                })
                .collect();
            (queue.len(), preview)
        };

        let stats = {
            let stats = lock(&self.inner.stats);
            let success_rate = if stats.total_processed == 0 {
                0.0
            } else {
                (stats.total_success as f64 / stats.total_processed as f64) * 100.0
            };
            QueueStats {
                total_processed: stats.total_processed,
                total_success: stats.total_success,
                total_failed: stats.total_failed,
                success_rate: (success_rate * 100.0).round() / 100.0,
            }
        };

        QueueStatus {
            name: self.inner.name.clone(),
            queue_len,
            worker_alive: self.is_running().await,
            stopped: self.inner.stop.load(Ordering::SeqCst),
            paused: self.is_paused(),
            consecutive_failures: self.inner.consecutive_failures.load(Ordering::SeqCst),
            max_consecutive_failures: self.inner.max_failures,
            current_event: lock(&self.inner.current).clone(),
            pending_events,
            stats,
        }
    }
}

async fn run_loop<P: QueuePayload>(inner: Arc<Inner<P>>) {
    tracing::debug!(queue = %inner.name, "worker loop started");

    loop {
        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        if inner.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
            continue;
        }

        let event = lock(&inner.queue).pop_front();
        match event {
            Some(event) => process_event(&inner, event).await,
            None => {
                // Sleep until an enqueue/stop/resume signal or the poll timeout
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(DEQUEUE_POLL_TIMEOUT) => {}
                }
            }
        }
    }

    tracing::debug!(queue = %inner.name, "worker loop exiting");
}

async fn process_event<P: QueuePayload>(inner: &Arc<Inner<P>>, event: QueueEvent<P>) {
    let handler = inner
        .handlers
        .read()
        .ok()
        .and_then(|handlers| handlers.get(&event.event_kind).cloned());

    let Some(handler) = handler else {
        tracing::warn!(
            queue = %inner.name,
            kind = %event.event_kind,
            "no handler for event kind"
        );
        return;
    };

    *lock(&inner.current) = Some(EventSnapshot {
        queue_id: event.queue_id.clone(),
        event_kind: event.event_kind.clone(),
        display_name: event.payload.display_name(),
        received_at_utc: event.received_at,
        started_at_utc: Some(Utc::now()),
    });

    tracing::debug!(queue = %inner.name, kind = %event.event_kind, "processing event");
    let outcome = handler(event).await;

    {
        let mut stats = lock(&inner.stats);
        stats.total_processed += 1;
        match &outcome {
            Ok(()) => {
                stats.total_success += 1;
                inner.consecutive_failures.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                stats.total_failed += 1;
                let failures = inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::error!(queue = %inner.name, error = %e, "event processing failed");
                if failures >= inner.max_failures {
                    tracing::warn!(
                        queue = %inner.name,
                        consecutive_failures = failures,
                        max = inner.max_failures,
                        "consecutive failure threshold reached"
                    );
                }
            }
        }
    }

    *lock(&inner.current) = None;
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
