//! API key pool with rotation, budgeting and cooldown
//!
//! Each upstream purpose (title parsing, multi-file rename, subtitle match)
//! owns a pool of credentials. The pool hands out reservations round-robin
//! among keys that are enabled, not disabled, not cooling, and within their
//! RPM/RPD budgets. Error reports drive a three-tier cooldown machine:
//!
//! - rate-limit cooldown (10 s, or the upstream's Retry-After) on HTTP 429
//! - short cooldown (30 s) on a single transient error
//! - long cooldown ladder (60/120/180 s) once errors become consecutive or
//!   dense inside the 300 s sliding window
//!
//! Auth-class faults (400/403/404) disable the key outright until an operator
//! re-enables it. When every key sits in long cooldown or disabled, the pool
//! reports `all_in_long_cooling`, which is the circuit breaker's tripwire.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Sliding error window length
const ERROR_WINDOW: Duration = Duration::from_secs(300);
/// Errors inside the window that force long cooldown
const ERROR_THRESHOLD_IN_WINDOW: usize = 5;
/// Ring buffer capacity for the error window
const ERROR_HISTORY_CAPACITY: usize = 20;
/// Cooldown applied on HTTP 429 when the upstream gives no Retry-After
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(10);
/// Longest RPM wait reserve() will sleep through (just over one window)
const RPM_MAX_WAIT: Duration = Duration::from_secs(65);
/// Extra slack added to a computed RPM wait
const RPM_WAIT_BUFFER: Duration = Duration::from_secs(1);

/// Immutable credential record
#[derive(Clone, Debug)]
pub struct KeySpec {
    /// Unique id within the pool (e.g. `tp_key_0`)
    pub key_id: String,
    /// Display name for logs and status
    pub name: String,
    /// Secret key value
    pub api_key: String,
    /// Upstream base URL
    pub base_url: String,
    /// Model name used with this key
    pub model: String,
    /// Requests-per-minute budget (0 = unbounded)
    pub rpm_limit: u32,
    /// Requests-per-day budget (0 = unbounded)
    pub rpd_limit: u32,
    /// Whether the key participates in rotation
    pub enabled: bool,
}

/// Short-lived handoff returned by a successful reserve
///
/// Accounting is committed at reserve time; the reservation carries no lock.
#[derive(Clone, Debug)]
pub struct KeyReservation {
    /// Id of the reserved key, for the follow-up report call
    pub key_id: String,
    /// Secret key value
    pub api_key: String,
    /// Upstream base URL
    pub base_url: String,
    /// Model name
    pub model: String,
}

/// Classification of an upstream error by HTTP status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 400 — malformed or revoked credential
    InvalidKey,
    /// 403 — credential lacks permission
    PermissionDenied,
    /// 404 — endpoint or model missing for this credential
    NotFound,
    /// 429 — budget exceeded upstream
    RateLimited,
    /// 500 — upstream internal error
    ServerError,
    /// 503 — upstream unavailable
    ServiceUnavailable,
    /// 504 — upstream timeout
    Timeout,
    /// Anything else (network faults, unexpected statuses)
    Unknown,
}

impl ErrorKind {
    /// Classify an HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorKind::InvalidKey,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            500 => ErrorKind::ServerError,
            503 => ErrorKind::ServiceUnavailable,
            504 => ErrorKind::Timeout,
            _ => ErrorKind::Unknown,
        }
    }

    /// Auth-class faults disable the key instead of cooling it
    pub fn should_disable_key(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidKey | ErrorKind::PermissionDenied | ErrorKind::NotFound
        )
    }

    /// Whether this is an upstream budget rejection
    pub fn is_rate_limit(&self) -> bool {
        *self == ErrorKind::RateLimited
    }

    /// Stable string form for status snapshots and persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Derived key state exposed through status snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Reservable right now
    Available,
    /// Short or rate-limit cooldown
    Cooling,
    /// Escalated cooldown after repeated errors
    LongCooling,
    /// Disabled until an operator re-enables it
    Disabled,
}

/// Mutable per-key runtime state
#[derive(Debug, Default)]
struct KeyUsage {
    rpm_count: u32,
    rpm_window_start: Option<Instant>,
    rpd_count: u32,
    rpd_date: String,
    error_count: u32,
    last_error: Option<String>,
    last_error_kind: Option<ErrorKind>,
    last_response_time_ms: Option<u64>,
    cooldown_until: Option<Instant>,
    disabled: bool,
    disabled_reason: Option<String>,
    disabled_at: Option<DateTime<Utc>>,
    error_history: VecDeque<Instant>,
}

impl KeyUsage {
    fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.cooldown_until {
            Some(until) if until > now => until - now,
            _ => Duration::ZERO,
        }
    }

    fn push_error(&mut self, now: Instant) {
        if self.error_history.len() == ERROR_HISTORY_CAPACITY {
            self.error_history.pop_front();
        }
        self.error_history.push_back(now);
        // Reap entries that fell out of the sliding window
        while let Some(front) = self.error_history.front() {
            if now.duration_since(*front) > ERROR_WINDOW {
                self.error_history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Status of a single key, as reported by [`KeyPool::get_status`]
#[derive(Clone, Debug, Serialize)]
pub struct KeyStatus {
    /// Key id
    pub key_id: String,
    /// Display name
    pub name: String,
    /// Derived state
    pub state: KeyState,
    /// Requests in the current RPM window
    pub rpm_count: u32,
    /// RPM budget (0 = unbounded)
    pub rpm_limit: u32,
    /// Whether the RPM budget is currently exhausted
    pub rpm_blocked: bool,
    /// Seconds until the RPM window resets, when blocked
    pub rpm_window_remaining_seconds: f64,
    /// Requests today (UTC)
    pub rpd_count: u32,
    /// RPD budget (0 = unbounded)
    pub rpd_limit: u32,
    /// Whether the RPD budget is currently exhausted
    pub rpd_blocked: bool,
    /// Consecutive error count
    pub error_count: u32,
    /// Errors inside the 300 s sliding window
    pub errors_in_window: usize,
    /// Most recent error summary
    pub last_error: Option<String>,
    /// Most recent error classification
    pub last_error_kind: Option<&'static str>,
    /// Most recent successful response time
    pub last_response_time_ms: Option<u64>,
    /// Seconds of cooldown remaining
    pub cooldown_remaining_seconds: f64,
    /// Wall-clock end of the cooldown, when cooling
    pub cooldown_until_utc: Option<DateTime<Utc>>,
    /// Whether the key is disabled
    pub disabled: bool,
    /// Why the key was disabled
    pub disabled_reason: Option<String>,
    /// When the key was disabled
    pub disabled_at_utc: Option<DateTime<Utc>>,
}

/// Aggregate pool status
#[derive(Clone, Debug, Serialize)]
pub struct PoolStatus {
    /// Pool purpose tag
    pub purpose: String,
    /// Per-key status rows
    pub keys: Vec<KeyStatus>,
    /// Total configured keys
    pub total_count: usize,
    /// Keys reservable right now
    pub available_count: usize,
    /// Keys disabled
    pub disabled_count: usize,
    /// Keys blocked by their RPM budget
    pub rpm_blocked_count: usize,
    /// Keys blocked by their RPD budget
    pub rpd_blocked_count: usize,
    /// True iff every key is long-cooling or disabled (the breaker tripwire)
    pub all_in_long_cooling: bool,
}

/// Reason the pool could not hand out a key immediately
#[derive(Debug, PartialEq)]
enum WaitReason {
    RpmLimit,
    RpdLimit,
}

struct WaitInfo {
    wait: Duration,
    reason: WaitReason,
}

struct PoolState {
    keys: Vec<KeySpec>,
    usage: HashMap<String, KeyUsage>,
    rr_index: usize,
}

/// Callback invoked when a key gets disabled: (key_id, display_name, reason)
pub type OnKeyDisabled = Box<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Purpose-scoped pool of upstream credentials
///
/// All public operations take the single pool lock; operations are O(n) in
/// the number of keys. [`KeyPool::reserve`] may sleep (outside the lock) when
/// every key is RPM-blocked and the caller opted into waiting.
pub struct KeyPool {
    purpose: String,
    state: Mutex<PoolState>,
    limits: RateLimitConfig,
    on_disabled: RwLock<Option<OnKeyDisabled>>,
}

impl KeyPool {
    /// Create an empty pool for a purpose with default thresholds
    pub fn new(purpose: impl Into<String>) -> Self {
        Self::with_limits(purpose, RateLimitConfig::default())
    }

    /// Create an empty pool with explicit cooldown thresholds
    pub fn with_limits(purpose: impl Into<String>, limits: RateLimitConfig) -> Self {
        Self {
            purpose: purpose.into(),
            state: Mutex::new(PoolState {
                keys: Vec::new(),
                usage: HashMap::new(),
                rr_index: 0,
            }),
            limits,
            on_disabled: RwLock::new(None),
        }
    }

    /// Pool purpose tag
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Install the disabled-key callback (for out-of-band notification)
    pub fn set_on_key_disabled(&self, callback: OnKeyDisabled) {
        if let Ok(mut slot) = self.on_disabled.write() {
            *slot = Some(callback);
        }
    }

    /// Replace the pool's key set; only enabled keys are admitted.
    ///
    /// Usage statistics for keys that survive the reconfiguration are kept.
    pub fn configure(&self, keys: Vec<KeySpec>) {
        let mut state = self.lock_state();
        state.keys = keys.into_iter().filter(|k| k.enabled).collect();
        let ids: Vec<_> = state.keys.iter().map(|key| key.key_id.clone()).collect();
        for id in ids {
            state.usage.entry(id).or_default();
        }
        tracing::info!(
            purpose = %self.purpose,
            count = state.keys.len(),
            "key pool configured"
        );
    }

    /// Reserve a key, committing its RPM/RPD accounting.
    ///
    /// Selection is round-robin over keys that are enabled, not disabled, not
    /// cooling, and within budget. When nothing is reservable:
    /// - an RPM-bounded wait of at most 65 s is slept through (once) when
    ///   `wait_for_rpm` is set;
    /// - an RPD wait (until UTC midnight) is slept through only when
    ///   `wait_for_rpd` is set, which callers rarely want.
    ///
    /// Returns `None` when no key is reservable after any permitted wait.
    pub async fn reserve(&self, wait_for_rpm: bool, wait_for_rpd: bool) -> Option<KeyReservation> {
        if let Some(reservation) = self.try_reserve() {
            return Some(reservation);
        }

        let wait_info = self.calculate_wait()?;
        match wait_info.reason {
            WaitReason::RpmLimit if wait_for_rpm => {
                if wait_info.wait <= RPM_MAX_WAIT {
                    tracing::info!(
                        purpose = %self.purpose,
                        wait_seconds = wait_info.wait.as_secs_f64(),
                        "all keys RPM-blocked, waiting for window reset"
                    );
                    tokio::time::sleep(wait_info.wait).await;
                    return self.try_reserve();
                }
                tracing::warn!(
                    purpose = %self.purpose,
                    wait_seconds = wait_info.wait.as_secs_f64(),
                    "RPM wait exceeds maximum, giving up"
                );
                None
            }
            WaitReason::RpdLimit if wait_for_rpd => {
                tracing::info!(
                    purpose = %self.purpose,
                    wait_hours = wait_info.wait.as_secs_f64() / 3600.0,
                    "all keys RPD-blocked, waiting for UTC midnight"
                );
                tokio::time::sleep(wait_info.wait).await;
                self.try_reserve()
            }
            _ => None,
        }
    }

    /// Single reservation attempt without waiting
    pub fn try_reserve(&self) -> Option<KeyReservation> {
        let mut state = self.lock_state();
        let now = Instant::now();
        let today = utc_today();

        let mut available: Vec<usize> = Vec::new();
        for (idx, spec) in state.keys.iter().enumerate() {
            let Some(usage) = state.usage.get(&spec.key_id) else {
                continue;
            };
            if usage.disabled || usage.cooldown_remaining(now) > Duration::ZERO {
                continue;
            }
            if spec.rpm_limit > 0 {
                let window_expired = usage
                    .rpm_window_start
                    .is_none_or(|start| now.duration_since(start) >= Duration::from_secs(60));
                if !window_expired && usage.rpm_count >= spec.rpm_limit {
                    continue;
                }
            }
            if spec.rpd_limit > 0 && usage.rpd_date == today && usage.rpd_count >= spec.rpd_limit {
                continue;
            }
            available.push(idx);
        }

        if available.is_empty() {
            tracing::debug!(purpose = %self.purpose, "no reservable key");
            return None;
        }

        let pick = available[state.rr_index % available.len()];
        state.rr_index = state.rr_index.wrapping_add(1);

        let spec = state.keys[pick].clone();
        let usage = state
            .usage
            .get_mut(&spec.key_id)
            .unwrap_or_else(|| unreachable!("usage exists for every configured key"));

        // Lazy RPM window reset, then commit accounting
        let window_expired = usage
            .rpm_window_start
            .is_none_or(|start| now.duration_since(start) >= Duration::from_secs(60));
        if window_expired {
            usage.rpm_count = 0;
            usage.rpm_window_start = Some(now);
        }
        if usage.rpd_date != today {
            usage.rpd_count = 0;
            usage.rpd_date = today;
        }
        usage.rpm_count += 1;
        usage.rpd_count += 1;

        tracing::debug!(
            purpose = %self.purpose,
            key = %spec.name,
            rpm = usage.rpm_count,
            rpd = usage.rpd_count,
            "key reserved"
        );

        Some(KeyReservation {
            key_id: spec.key_id,
            api_key: spec.api_key,
            base_url: spec.base_url,
            model: spec.model,
        })
    }

    /// Compute the shortest wait that would free a key, preferring RPM waits
    fn calculate_wait(&self) -> Option<WaitInfo> {
        let state = self.lock_state();
        let now = Instant::now();
        let today = utc_today();

        let mut rpm_min_wait: Option<Duration> = None;
        let mut rpm_blocked = 0usize;
        let mut rpd_blocked = 0usize;
        let mut cooling = 0usize;
        let mut disabled = 0usize;
        let mut total = 0usize;

        for spec in &state.keys {
            let Some(usage) = state.usage.get(&spec.key_id) else {
                continue;
            };
            total += 1;

            if usage.disabled {
                disabled += 1;
                continue;
            }
            if usage.cooldown_remaining(now) > Duration::ZERO {
                cooling += 1;
                continue;
            }
            if spec.rpd_limit > 0 && usage.rpd_date == today && usage.rpd_count >= spec.rpd_limit {
                rpd_blocked += 1;
                continue;
            }
            if spec.rpm_limit > 0
                && let Some(start) = usage.rpm_window_start
            {
                let elapsed = now.duration_since(start);
                if elapsed < Duration::from_secs(60) && usage.rpm_count >= spec.rpm_limit {
                    let wait = Duration::from_secs(60) - elapsed + RPM_WAIT_BUFFER;
                    rpm_min_wait = Some(match rpm_min_wait {
                        Some(current) if current <= wait => current,
                        _ => wait,
                    });
                    rpm_blocked += 1;
                    continue;
                }
            }
        }

        if rpm_blocked > 0
            && let Some(wait) = rpm_min_wait
        {
            return Some(WaitInfo {
                wait,
                reason: WaitReason::RpmLimit,
            });
        }

        // Every key that is neither cooling nor disabled is RPD-blocked
        if rpd_blocked > 0 && rpd_blocked == total - cooling - disabled {
            return Some(WaitInfo {
                wait: seconds_until_utc_midnight(),
                reason: WaitReason::RpdLimit,
            });
        }

        None
    }

    /// Report a successful call: clears the consecutive-error streak
    pub fn report_success(&self, key_id: &str, response_time_ms: Option<u64>) {
        let mut state = self.lock_state();
        if let Some(usage) = state.usage.get_mut(key_id) {
            usage.error_count = 0;
            usage.last_error = None;
            usage.last_error_kind = None;
            if let Some(ms) = response_time_ms {
                usage.last_response_time_ms = Some(ms);
            }
            tracing::debug!(purpose = %self.purpose, key_id, "key call succeeded");
        }
    }

    /// Report a failed call and apply the matching cooldown or disable.
    ///
    /// Counters committed at reserve time are left untouched; only error
    /// state and cooldown change.
    pub fn report_error(
        &self,
        key_id: &str,
        message: &str,
        status_code: Option<u16>,
        retry_after: Option<f64>,
    ) {
        let mut fired_disable: Option<(String, String, String)> = None;

        {
            let mut state = self.lock_state();
            let key_name = state
                .keys
                .iter()
                .find(|k| k.key_id == key_id)
                .map_or_else(|| key_id.to_string(), |k| k.name.clone());
            let Some(usage) = state.usage.get_mut(key_id) else {
                return;
            };
            let now = Instant::now();

            let kind = status_code.map_or(ErrorKind::Unknown, ErrorKind::from_status);

            usage.error_count += 1;
            let mut summary = message.to_string();
            summary.truncate(200);
            usage.last_error = Some(summary);
            usage.last_error_kind = Some(kind);
            usage.push_error(now);

            if kind.should_disable_key() {
                let reason = format!("{}: {}", kind.as_str(), message);
                usage.disabled = true;
                usage.disabled_reason = Some(reason.clone());
                usage.disabled_at = Some(Utc::now());
                tracing::error!(
                    purpose = %self.purpose,
                    key = %key_name,
                    reason = %reason,
                    "key disabled"
                );
                fired_disable = Some((key_id.to_string(), key_name, reason));
            } else {
                let cooldown = if kind.is_rate_limit() {
                    let cooldown = retry_after
                        .filter(|s| s.is_finite() && *s > 0.0)
                        .map_or(RATE_LIMIT_COOLDOWN, Duration::from_secs_f64);
                    tracing::info!(
                        purpose = %self.purpose,
                        key = %key_name,
                        seconds = cooldown.as_secs_f64(),
                        "rate-limit cooldown"
                    );
                    cooldown
                } else if Self::should_long_cooldown(usage, &self.limits) {
                    let ladder = &self.limits.long_cooldown_ladder;
                    let over = usage
                        .error_count
                        .saturating_sub(self.limits.max_consecutive_errors)
                        as usize;
                    let cooldown =
                        Duration::from_secs(ladder[over.min(ladder.len().saturating_sub(1))]);
                    tracing::warn!(
                        purpose = %self.purpose,
                        key = %key_name,
                        seconds = cooldown.as_secs(),
                        consecutive_errors = usage.error_count,
                        errors_in_window = usage.error_history.len(),
                        "long cooldown"
                    );
                    cooldown
                } else {
                    let cooldown = Duration::from_secs(self.limits.short_cooldown_seconds);
                    tracing::warn!(
                        purpose = %self.purpose,
                        key = %key_name,
                        seconds = cooldown.as_secs(),
                        consecutive_errors = usage.error_count,
                        "short cooldown"
                    );
                    cooldown
                };
                usage.cooldown_until = Some(now + cooldown);
            }
        }

        // Callback runs outside the lock; failures are the callback's problem
        if let Some((key_id, key_name, reason)) = fired_disable
            && let Ok(slot) = self.on_disabled.read()
            && let Some(callback) = slot.as_ref()
        {
            callback(&key_id, &key_name, &reason);
        }
    }

    fn should_long_cooldown(usage: &KeyUsage, limits: &RateLimitConfig) -> bool {
        usage.error_count >= limits.max_consecutive_errors
            || usage.error_history.len() >= ERROR_THRESHOLD_IN_WINDOW
    }

    /// Restore persisted usage state for a key (startup only).
    ///
    /// Re-applies the daily budget spent before the restart and the disable
    /// flag, so a restart neither resets RPD accounting nor resurrects a
    /// banned credential.
    pub fn restore_usage(
        &self,
        key_id: &str,
        rpd_count: u32,
        rpd_date: &str,
        disabled: bool,
        disabled_reason: Option<&str>,
    ) {
        let mut state = self.lock_state();
        let Some(usage) = state.usage.get_mut(key_id) else {
            return;
        };
        if rpd_date == utc_today() {
            usage.rpd_count = rpd_count;
            usage.rpd_date = rpd_date.to_string();
        }
        if disabled {
            usage.disabled = true;
            usage.disabled_reason = disabled_reason.map(str::to_string);
            usage.disabled_at = Some(Utc::now());
        }
        tracing::debug!(purpose = %self.purpose, key_id, disabled, "key usage restored");
    }

    /// Re-enable a disabled key, clearing its error state
    pub fn enable_key(&self, key_id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(usage) = state.usage.get_mut(key_id) else {
            return false;
        };
        if !usage.disabled {
            return false;
        }
        usage.disabled = false;
        usage.disabled_reason = None;
        usage.disabled_at = None;
        usage.error_count = 0;
        usage.cooldown_until = None;
        usage.error_history.clear();
        tracing::info!(purpose = %self.purpose, key_id, "key re-enabled");
        true
    }

    /// Clear a key's cooldown and error streak (does not touch the disable flag)
    pub fn reset_cooldown(&self, key_id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(usage) = state.usage.get_mut(key_id) else {
            return false;
        };
        usage.cooldown_until = None;
        usage.error_count = 0;
        usage.error_history.clear();
        tracing::info!(purpose = %self.purpose, key_id, "cooldown reset");
        true
    }

    /// Clear a key's RPM counter and window
    pub fn reset_rpm(&self, key_id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(usage) = state.usage.get_mut(key_id) else {
            return false;
        };
        usage.rpm_count = 0;
        usage.rpm_window_start = None;
        tracing::info!(purpose = %self.purpose, key_id, "RPM counter reset");
        true
    }

    /// Clear a key's RPD counter
    pub fn reset_rpd(&self, key_id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(usage) = state.usage.get_mut(key_id) else {
            return false;
        };
        usage.rpd_count = 0;
        usage.rpd_date = String::new();
        tracing::info!(purpose = %self.purpose, key_id, "RPD counter reset");
        true
    }

    /// Clear every limit on a key (cooldown, RPM, RPD); leaves the disable flag
    pub fn reset_all_limits(&self, key_id: &str) -> bool {
        let mut state = self.lock_state();
        let Some(usage) = state.usage.get_mut(key_id) else {
            return false;
        };
        usage.cooldown_until = None;
        usage.error_count = 0;
        usage.error_history.clear();
        usage.rpm_count = 0;
        usage.rpm_window_start = None;
        usage.rpd_count = 0;
        usage.rpd_date = String::new();
        tracing::info!(purpose = %self.purpose, key_id, "all limits reset");
        true
    }

    /// Snapshot the full pool state
    pub fn get_status(&self) -> PoolStatus {
        let state = self.lock_state();
        let now = Instant::now();
        let wall_now = Utc::now();
        let today = utc_today();

        let mut keys = Vec::with_capacity(state.keys.len());
        for spec in &state.keys {
            let Some(usage) = state.usage.get(&spec.key_id) else {
                continue;
            };
            let cooldown_remaining = usage.cooldown_remaining(now);

            let key_state = if usage.disabled {
                KeyState::Disabled
            } else if cooldown_remaining > Duration::ZERO {
                if usage.error_count >= self.limits.max_consecutive_errors {
                    KeyState::LongCooling
                } else {
                    KeyState::Cooling
                }
            } else {
                KeyState::Available
            };

            let mut rpm_blocked = false;
            let mut rpm_window_remaining = Duration::ZERO;
            if spec.rpm_limit > 0
                && usage.rpm_count >= spec.rpm_limit
                && let Some(start) = usage.rpm_window_start
            {
                let elapsed = now.duration_since(start);
                if elapsed < Duration::from_secs(60) {
                    rpm_window_remaining = Duration::from_secs(60) - elapsed;
                    rpm_blocked = true;
                }
            }

            let rpd_blocked = spec.rpd_limit > 0
                && usage.rpd_date == today
                && usage.rpd_count >= spec.rpd_limit;

            keys.push(KeyStatus {
                key_id: spec.key_id.clone(),
                name: spec.name.clone(),
                state: key_state,
                rpm_count: usage.rpm_count,
                rpm_limit: spec.rpm_limit,
                rpm_blocked,
                rpm_window_remaining_seconds: round1(rpm_window_remaining.as_secs_f64()),
                rpd_count: usage.rpd_count,
                rpd_limit: spec.rpd_limit,
                rpd_blocked,
                error_count: usage.error_count,
                errors_in_window: usage.error_history.len(),
                last_error: usage.last_error.clone(),
                last_error_kind: usage.last_error_kind.map(|k| k.as_str()),
                last_response_time_ms: usage.last_response_time_ms,
                cooldown_remaining_seconds: round1(cooldown_remaining.as_secs_f64()),
                cooldown_until_utc: (cooldown_remaining > Duration::ZERO).then(|| {
                    wall_now
                        + ChronoDuration::milliseconds(cooldown_remaining.as_millis() as i64)
                }),
                disabled: usage.disabled,
                disabled_reason: usage.disabled_reason.clone(),
                disabled_at_utc: usage.disabled_at,
            });
        }

        let all_in_long_cooling = !keys.is_empty()
            && keys
                .iter()
                .all(|k| matches!(k.state, KeyState::LongCooling | KeyState::Disabled));

        PoolStatus {
            purpose: self.purpose.clone(),
            total_count: keys.len(),
            available_count: keys
                .iter()
                .filter(|k| k.state == KeyState::Available)
                .count(),
            disabled_count: keys.iter().filter(|k| k.state == KeyState::Disabled).count(),
            rpm_blocked_count: keys.iter().filter(|k| k.rpm_blocked).count(),
            rpd_blocked_count: keys.iter().filter(|k| k.rpd_blocked).count(),
            all_in_long_cooling,
            keys,
        }
    }

    /// Convenience: whether the breaker tripwire condition holds
    pub fn all_in_long_cooling(&self) -> bool {
        self.get_status().all_in_long_cooling
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // Poisoning means a panic mid-update elsewhere; continuing with the
        // inner state is the least-bad option for an in-memory pool.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn utc_today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

fn seconds_until_utc_midnight() -> Duration {
    let now = Utc::now();
    let tomorrow = (now + ChronoDuration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_utc());
    let delta = tomorrow - now.naive_utc();
    delta.to_std().unwrap_or(Duration::ZERO)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, rpm: u32, rpd: u32) -> KeySpec {
        KeySpec {
            key_id: id.to_string(),
            name: format!("Key {id}"),
            api_key: format!("sk-{id}"),
            base_url: "https://api.example/v1".to_string(),
            model: "test-model".to_string(),
            rpm_limit: rpm,
            rpd_limit: rpd,
            enabled: true,
        }
    }

    fn pool_with(keys: Vec<KeySpec>) -> KeyPool {
        let pool = KeyPool::new("test");
        pool.configure(keys);
        pool
    }

    // -----------------------------------------------------------------------
    // Reservation and round-robin
    // -----------------------------------------------------------------------

    #[test]
    fn reserve_rotates_round_robin_over_available_keys() {
        let pool = pool_with(vec![spec("a", 0, 0), spec("b", 0, 0), spec("c", 0, 0)]);

        // Two full cycles: each key appears exactly twice
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..6 {
            let r = pool.try_reserve().unwrap();
            *counts.entry(r.key_id).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 2), "counts: {counts:?}");
    }

    #[test]
    fn reserve_commits_rpm_and_rpd_accounting() {
        let pool = pool_with(vec![spec("a", 5, 50)]);

        pool.try_reserve().unwrap();
        pool.try_reserve().unwrap();

        let status = pool.get_status();
        assert_eq!(status.keys[0].rpm_count, 2);
        assert_eq!(status.keys[0].rpd_count, 2);
    }

    #[test]
    fn rpm_budget_blocks_further_reservations() {
        let pool = pool_with(vec![spec("a", 2, 0)]);

        assert!(pool.try_reserve().is_some());
        assert!(pool.try_reserve().is_some());
        assert!(pool.try_reserve().is_none(), "third call exceeds rpm=2");

        let status = pool.get_status();
        assert!(status.keys[0].rpm_blocked);
        assert!(status.keys[0].rpm_window_remaining_seconds > 0.0);
        assert_eq!(status.rpm_blocked_count, 1);
    }

    #[test]
    fn rpd_budget_blocks_further_reservations() {
        let pool = pool_with(vec![spec("a", 0, 1)]);

        assert!(pool.try_reserve().is_some());
        assert!(pool.try_reserve().is_none());

        let status = pool.get_status();
        assert!(status.keys[0].rpd_blocked);
    }

    #[tokio::test]
    async fn reserve_without_rpd_wait_returns_none_when_budget_spent() {
        let pool = pool_with(vec![spec("a", 0, 1)]);
        pool.try_reserve().unwrap();

        let result = pool.reserve(true, false).await;
        assert!(result.is_none());
    }

    #[test]
    fn disabled_keys_are_invisible_to_reserve() {
        let pool = pool_with(vec![spec("a", 0, 0), spec("b", 0, 0)]);
        pool.report_error("a", "bad key", Some(403), None);

        for _ in 0..4 {
            let r = pool.try_reserve().unwrap();
            assert_eq!(r.key_id, "b");
        }
    }

    // -----------------------------------------------------------------------
    // Success / error accounting
    // -----------------------------------------------------------------------

    #[test]
    fn report_success_clears_error_streak_but_not_counters() {
        let pool = pool_with(vec![spec("a", 10, 10)]);
        let r = pool.try_reserve().unwrap();

        pool.report_error(&r.key_id, "boom", Some(500), None);
        pool.reset_cooldown(&r.key_id);
        pool.report_success(&r.key_id, Some(123));

        let status = pool.get_status();
        assert_eq!(status.keys[0].error_count, 0);
        assert_eq!(status.keys[0].last_error, None);
        assert_eq!(status.keys[0].last_response_time_ms, Some(123));
        // reserve-time accounting is untouched by reports
        assert_eq!(status.keys[0].rpm_count, 1);
        assert_eq!(status.keys[0].rpd_count, 1);
    }

    #[test]
    fn first_server_error_applies_short_cooldown() {
        let pool = pool_with(vec![spec("a", 0, 0)]);
        pool.report_error("a", "internal error", Some(500), None);

        let status = pool.get_status();
        assert_eq!(status.keys[0].state, KeyState::Cooling);
        let remaining = status.keys[0].cooldown_remaining_seconds;
        assert!(remaining > 25.0 && remaining <= 30.0, "remaining={remaining}");
        assert!(pool.try_reserve().is_none());
    }

    #[test]
    fn rate_limit_uses_retry_after_when_present() {
        let pool = pool_with(vec![spec("a", 0, 0)]);
        pool.report_error("a", "429 too many requests", Some(429), Some(42.0));

        let status = pool.get_status();
        let remaining = status.keys[0].cooldown_remaining_seconds;
        assert!(remaining > 40.0 && remaining <= 42.0, "remaining={remaining}");
        assert_eq!(status.keys[0].last_error_kind, Some("rate_limited"));
    }

    #[test]
    fn rate_limit_defaults_to_ten_seconds() {
        let pool = pool_with(vec![spec("a", 0, 0)]);
        pool.report_error("a", "429", Some(429), None);

        let remaining = pool.get_status().keys[0].cooldown_remaining_seconds;
        assert!(remaining > 8.0 && remaining <= 10.0, "remaining={remaining}");
    }

    #[test]
    fn cooldown_escalates_monotonically_with_consecutive_errors() {
        let pool = pool_with(vec![spec("a", 0, 0)]);
        let ladder = [60.0, 120.0, 180.0, 180.0];

        for (i, &expected_min) in ladder.iter().enumerate() {
            // Errors 1..2 are short cooldowns; from the 3rd on the ladder applies
            for _ in 0..if i == 0 { 3 } else { 1 } {
                pool.report_error("a", "boom", Some(503), None);
            }
            let remaining = pool.get_status().keys[0].cooldown_remaining_seconds;
            assert!(
                remaining > expected_min - 5.0 && remaining <= expected_min,
                "step {i}: remaining={remaining}, expected around {expected_min}"
            );
        }
    }

    #[test]
    fn five_errors_in_window_force_long_cooldown() {
        let pool = pool_with(vec![spec("a", 0, 0)]);

        // Keep the consecutive streak below the threshold after each report so
        // only the sliding-window density can trigger the escalation
        for _ in 0..4 {
            pool.report_error("a", "boom", Some(500), None);
            let mut state = pool.state.lock().unwrap();
            let usage = state.usage.get_mut("a").unwrap();
            usage.cooldown_until = None;
            usage.error_count = 0;
        }
        pool.report_error("a", "boom", Some(500), None);

        let remaining = pool.get_status().keys[0].cooldown_remaining_seconds;
        assert!(remaining > 55.0, "window density should force long cooldown, got {remaining}");
    }

    // -----------------------------------------------------------------------
    // Disable semantics
    // -----------------------------------------------------------------------

    #[test]
    fn auth_faults_disable_the_key() {
        for status in [400u16, 403, 404] {
            let pool = pool_with(vec![spec("a", 0, 0)]);
            pool.report_error("a", "denied", Some(status), None);

            let snapshot = pool.get_status();
            assert!(snapshot.keys[0].disabled, "status {status} should disable");
            assert_eq!(snapshot.keys[0].state, KeyState::Disabled);
            assert!(snapshot.keys[0].disabled_reason.is_some());
        }
    }

    #[test]
    fn disable_fires_callback_with_key_identity_and_reason() {
        use std::sync::mpsc;

        let pool = pool_with(vec![spec("a", 0, 0)]);
        let (tx, rx) = mpsc::channel();
        pool.set_on_key_disabled(Box::new(move |key_id, name, reason| {
            tx.send((key_id.to_string(), name.to_string(), reason.to_string()))
                .ok();
        }));

        pool.report_error("a", "no permission", Some(403), None);

        let (key_id, name, reason) = rx.try_recv().unwrap();
        assert_eq!(key_id, "a");
        assert_eq!(name, "Key a");
        assert!(reason.contains("permission_denied"));
    }

    #[test]
    fn enable_key_restores_reservation() {
        let pool = pool_with(vec![spec("a", 0, 0)]);
        pool.report_error("a", "denied", Some(403), None);
        assert!(pool.try_reserve().is_none());

        assert!(pool.enable_key("a"));
        assert!(pool.try_reserve().is_some());
        // Enabling twice is a no-op
        assert!(!pool.enable_key("a"));
    }

    // -----------------------------------------------------------------------
    // Aggregate status / breaker tripwire
    // -----------------------------------------------------------------------

    #[test]
    fn all_in_long_cooling_requires_every_key_unavailable() {
        let pool = pool_with(vec![spec("a", 0, 0), spec("b", 0, 0)]);

        // Drive key a into long cooling
        for _ in 0..3 {
            pool.report_error("a", "boom", Some(500), None);
        }
        assert!(!pool.all_in_long_cooling(), "key b still available");

        // Disable key b — mixed long-cooling + disabled still counts
        pool.report_error("b", "denied", Some(403), None);
        assert!(pool.all_in_long_cooling());
    }

    #[test]
    fn short_cooling_key_does_not_trip_the_tripwire() {
        let pool = pool_with(vec![spec("a", 0, 0)]);
        pool.report_error("a", "boom", Some(500), None);

        let status = pool.get_status();
        assert_eq!(status.keys[0].state, KeyState::Cooling);
        assert!(!status.all_in_long_cooling);
    }

    #[test]
    fn empty_pool_reports_no_tripwire() {
        let pool = KeyPool::new("empty");
        assert!(!pool.all_in_long_cooling());
    }

    #[test]
    fn restore_usage_reapplies_todays_budget_and_disable_flag() {
        let pool = pool_with(vec![spec("a", 0, 10), spec("b", 0, 0)]);

        pool.restore_usage("a", 7, &utc_today(), false, None);
        pool.restore_usage("b", 0, "", true, Some("invalid_key: revoked"));

        let status = pool.get_status();
        assert_eq!(status.keys[0].rpd_count, 7);
        assert!(status.keys[1].disabled);
        assert_eq!(
            status.keys[1].disabled_reason.as_deref(),
            Some("invalid_key: revoked")
        );

        // Stale snapshots from a previous UTC day do not restore the counter
        let pool = pool_with(vec![spec("c", 0, 10)]);
        pool.restore_usage("c", 9, "2000-01-01", false, None);
        assert_eq!(pool.get_status().keys[0].rpd_count, 0);
    }

    #[test]
    fn reset_all_limits_clears_counters_but_not_disable() {
        let pool = pool_with(vec![spec("a", 5, 5)]);
        pool.try_reserve().unwrap();
        pool.report_error("a", "denied", Some(403), None);

        assert!(pool.reset_all_limits("a"));

        let status = pool.get_status();
        assert_eq!(status.keys[0].rpm_count, 0);
        assert_eq!(status.keys[0].rpd_count, 0);
        assert!(status.keys[0].disabled, "disable flag survives limit resets");
    }
}
