//! Per-purpose circuit breaker
//!
//! A simple two-state gate: closed lets calls through, open rejects them.
//! The breaker never trips on its own; the AI caller trips it when the key
//! pool reports fleet-wide exhaustion (`all_in_long_cooling`). An open
//! breaker recloses implicitly once its deadline passes, or explicitly via
//! [`CircuitBreaker::reset`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default open duration when trip() gets no explicit duration
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct BreakerState {
    open_until: Option<Instant>,
    trip_count: u64,
    last_trip_time: Option<DateTime<Utc>>,
    last_trip_reason: Option<String>,
}

/// Snapshot of a breaker, as exposed through the status API
#[derive(Clone, Debug, Serialize)]
pub struct BreakerStatus {
    /// Purpose tag
    pub purpose: String,
    /// Whether the breaker currently rejects calls
    pub is_open: bool,
    /// Seconds until the breaker recloses (0 when closed)
    pub remaining_seconds: f64,
    /// Wall-clock reclose time, when open
    pub open_until_utc: Option<DateTime<Utc>>,
    /// Times the breaker has tripped since construction
    pub trip_count: u64,
    /// When the breaker last tripped
    pub last_trip_time_utc: Option<DateTime<Utc>>,
    /// Why the breaker last tripped
    pub last_trip_reason: Option<String>,
}

/// Per-purpose open/closed gate
pub struct CircuitBreaker {
    purpose: String,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a purpose
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Breaker purpose tag
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Open the breaker for `duration` (default 300 s when `None`)
    pub fn trip(&self, duration: Option<Duration>, reason: Option<&str>) {
        let duration = duration.unwrap_or(DEFAULT_OPEN_DURATION);
        let mut state = self.lock_state();
        state.open_until = Some(Instant::now() + duration);
        state.trip_count += 1;
        state.last_trip_time = Some(Utc::now());
        state.last_trip_reason = reason.map(str::to_string);
        tracing::error!(
            purpose = %self.purpose,
            seconds = duration.as_secs(),
            reason = reason.unwrap_or("unspecified"),
            "circuit breaker tripped"
        );
    }

    /// Unconditionally close the breaker
    pub fn reset(&self) {
        let mut state = self.lock_state();
        let was_open = state.open_until.is_some();
        state.open_until = None;
        if was_open {
            tracing::info!(purpose = %self.purpose, "circuit breaker reset");
        }
    }

    /// Whether the breaker rejects calls right now.
    ///
    /// An expired deadline closes the breaker as a side effect of the read.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock_state();
        match state.open_until {
            Some(until) if Instant::now() >= until => {
                state.open_until = None;
                tracing::info!(purpose = %self.purpose, "circuit breaker reclosed");
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Seconds until the breaker recloses (0 when closed)
    pub fn remaining_seconds(&self) -> f64 {
        let state = self.lock_state();
        match state.open_until {
            Some(until) => until.saturating_duration_since(Instant::now()).as_secs_f64(),
            None => 0.0,
        }
    }

    /// Snapshot breaker state
    pub fn get_status(&self) -> BreakerStatus {
        let mut state = self.lock_state();
        let remaining = match state.open_until {
            Some(until) => {
                let rem = until.saturating_duration_since(Instant::now());
                if rem.is_zero() {
                    state.open_until = None;
                }
                rem
            }
            None => Duration::ZERO,
        };
        let is_open = !remaining.is_zero();

        BreakerStatus {
            purpose: self.purpose.clone(),
            is_open,
            remaining_seconds: (remaining.as_secs_f64() * 10.0).round() / 10.0,
            open_until_utc: is_open.then(|| {
                Utc::now() + ChronoDuration::milliseconds(remaining.as_millis() as i64)
            }),
            trip_count: state.trip_count,
            last_trip_time_utc: state.last_trip_time,
            last_trip_reason: state.last_trip_reason.clone(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_breaker_is_closed() {
        let breaker = CircuitBreaker::new("title_parse");
        assert!(!breaker.is_open());
        assert_eq!(breaker.remaining_seconds(), 0.0);
    }

    #[test]
    fn trip_opens_with_default_duration() {
        let breaker = CircuitBreaker::new("title_parse");
        breaker.trip(None, Some("all keys in long cooling"));

        assert!(breaker.is_open());
        let remaining = breaker.remaining_seconds();
        assert!(remaining > 295.0 && remaining <= 300.0, "remaining={remaining}");
    }

    #[test]
    fn trip_records_count_and_reason() {
        let breaker = CircuitBreaker::new("title_parse");
        breaker.trip(Some(Duration::from_secs(60)), Some("first"));
        breaker.trip(Some(Duration::from_secs(60)), Some("second"));

        let status = breaker.get_status();
        assert_eq!(status.trip_count, 2);
        assert_eq!(status.last_trip_reason.as_deref(), Some("second"));
        assert!(status.last_trip_time_utc.is_some());
        assert!(status.open_until_utc.is_some());
    }

    #[test]
    fn reset_closes_immediately() {
        let breaker = CircuitBreaker::new("title_parse");
        breaker.trip(Some(Duration::from_secs(300)), None);
        assert!(breaker.is_open());

        breaker.reset();
        assert!(!breaker.is_open());
        assert_eq!(breaker.remaining_seconds(), 0.0);
    }

    #[test]
    fn expired_deadline_closes_on_read() {
        let breaker = CircuitBreaker::new("title_parse");
        breaker.trip(Some(Duration::from_millis(0)), None);

        // Deadline already passed: the read itself must reclose
        assert!(!breaker.is_open());
        let status = breaker.get_status();
        assert!(!status.is_open);
        assert_eq!(status.remaining_seconds, 0.0);
        assert!(status.open_until_utc.is_none());
    }

    #[tokio::test]
    async fn breaker_recloses_after_open_duration() {
        let breaker = CircuitBreaker::new("title_parse");
        breaker.trip(Some(Duration::from_millis(20)), None);
        assert!(breaker.is_open());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!breaker.is_open());
    }
}
