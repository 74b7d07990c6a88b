//! Stateless AI upstream caller
//!
//! Hands a prompt + strict schema to an OpenAI-compatible chat-completions
//! endpoint through a reserved pool credential, reports the outcome back to
//! the pool, and trips the purpose's circuit breaker when the pool reports
//! fleet-wide exhaustion. Retries transient failures with exponential
//! backoff; schema mismatches are retried without backoff since the HTTP
//! round-trip itself succeeded.

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::breaker::CircuitBreaker;
use crate::config::AiTaskConfig;
use crate::error::{Error, Result};
use crate::keypool::{KeyPool, KeyReservation};
use crate::utils::strip_markdown_fences;

use super::trace::{AiTrace, TraceOutcome};

/// Request body fields that pass-through extras may never overwrite
const RESERVED_FIELDS: [&str; 5] = [
    "model",
    "messages",
    "temperature",
    "stream",
    "response_format",
];

enum CallOutcome {
    Success {
        content: String,
        response_time_ms: u64,
    },
    HttpError {
        status: u16,
        message: String,
        retry_after: Option<f64>,
    },
    Transport {
        message: String,
    },
}

/// Single-purpose caller wrapping a key pool and circuit breaker
pub struct AiCaller {
    purpose: String,
    pool: Arc<KeyPool>,
    breaker: Arc<CircuitBreaker>,
    http: reqwest::Client,
    max_retries: u32,
    extra_body: Option<Value>,
    breaker_open: Duration,
    trace: Option<Arc<AiTrace>>,
}

impl AiCaller {
    /// Build a caller from a task config.
    ///
    /// `breaker_open_seconds` comes from the shared rate-limit config and
    /// sets how long the breaker stays open after a fleet-wide trip.
    pub fn new(
        purpose: impl Into<String>,
        pool: Arc<KeyPool>,
        breaker: Arc<CircuitBreaker>,
        task: &AiTaskConfig,
        breaker_open_seconds: u64,
        trace: Option<Arc<AiTrace>>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(task.timeout))
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            purpose: purpose.into(),
            pool,
            breaker,
            http,
            max_retries: task.retries.max(1),
            extra_body: task.extra_body.clone(),
            breaker_open: Duration::from_secs(breaker_open_seconds),
            trace,
        })
    }

    /// Purpose tag this caller serves
    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    /// Call the upstream and deserialize its JSON content into `T`.
    ///
    /// # Errors
    ///
    /// - [`Error::CircuitOpen`] when the breaker rejects the call, or trips
    ///   mid-loop because every key entered long cooling
    /// - [`Error::KeysExhausted`] when no credential is reservable
    /// - [`Error::UpstreamFault`] after `max_retries` failed attempts
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        user_message: &str,
        response_format: &Value,
    ) -> Result<T> {
        if self.breaker.is_open() {
            let remaining = self.breaker.remaining_seconds();
            tracing::warn!(
                purpose = %self.purpose,
                remaining_seconds = remaining,
                "circuit breaker open, rejecting call"
            );
            return Err(Error::CircuitOpen {
                purpose: self.purpose.clone(),
                remaining_seconds: remaining,
            });
        }

        for attempt in 1..=self.max_retries {
            let Some(reservation) = self.pool.reserve(true, false).await else {
                tracing::error!(purpose = %self.purpose, "no available API key");
                return Err(Error::KeysExhausted {
                    purpose: self.purpose.clone(),
                });
            };

            tracing::debug!(
                purpose = %self.purpose,
                attempt,
                max = self.max_retries,
                key_id = %reservation.key_id,
                "calling AI upstream"
            );

            let outcome = self
                .call_once(&reservation, system_prompt, user_message, response_format)
                .await;

            match outcome {
                CallOutcome::Success {
                    content,
                    response_time_ms,
                } => {
                    self.pool
                        .report_success(&reservation.key_id, Some(response_time_ms));

                    let cleaned = strip_markdown_fences(&content);
                    match serde_json::from_str::<T>(cleaned) {
                        Ok(parsed) => {
                            self.trace(
                                &reservation,
                                TraceOutcome::Success,
                                response_time_ms,
                                system_prompt,
                                user_message,
                                &content,
                            );
                            return Ok(parsed);
                        }
                        Err(e) => {
                            tracing::warn!(
                                purpose = %self.purpose,
                                attempt,
                                error = %e,
                                "response failed schema validation, retrying"
                            );
                            self.trace(
                                &reservation,
                                TraceOutcome::ParseError,
                                response_time_ms,
                                system_prompt,
                                user_message,
                                &content,
                            );
                            // The HTTP round-trip succeeded; retry immediately
                            continue;
                        }
                    }
                }
                CallOutcome::HttpError {
                    status,
                    message,
                    retry_after,
                } => {
                    self.pool
                        .report_error(&reservation.key_id, &message, Some(status), retry_after);
                    self.trace(
                        &reservation,
                        TraceOutcome::HttpError,
                        0,
                        system_prompt,
                        user_message,
                        &message,
                    );
                    self.check_tripwire()?;
                }
                CallOutcome::Transport { message } => {
                    self.pool
                        .report_error(&reservation.key_id, &message, None, None);
                    self.trace(
                        &reservation,
                        TraceOutcome::Transport,
                        0,
                        system_prompt,
                        user_message,
                        &message,
                    );
                    self.check_tripwire()?;
                }
            }

            if attempt < self.max_retries {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                tracing::debug!(
                    purpose = %self.purpose,
                    seconds = backoff.as_secs(),
                    "backing off before retry"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(Error::UpstreamFault(format!(
            "max retries exceeded after {} attempts for '{}'",
            self.max_retries, self.purpose
        )))
    }

    async fn call_once(
        &self,
        reservation: &KeyReservation,
        system_prompt: &str,
        user_message: &str,
        response_format: &Value,
    ) -> CallOutcome {
        let mut body = json!({
            "model": reservation.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_message }
            ],
            "temperature": 0.1,
        });
        if !response_format.is_null() {
            body["response_format"] = response_format.clone();
        }
        apply_extra_body(&mut body, self.extra_body.as_ref());

        let url = format!("{}/chat/completions", reservation.base_url);
        let started = Instant::now();

        let response = match self
            .http
            .post(&url)
            .bearer_auth(&reservation.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(purpose = %self.purpose, error = %e, "AI request failed");
                return CallOutcome::Transport {
                    message: format!("request error: {e}"),
                };
            }
        };

        let status = response.status().as_u16();
        let response_time_ms = started.elapsed().as_millis() as u64;

        if status == 200 {
            let payload: Value = match response.json().await {
                Ok(v) => v,
                Err(e) => {
                    return CallOutcome::Transport {
                        message: format!("failed to read response body: {e}"),
                    };
                }
            };
            let Some(content) = payload["choices"][0]["message"]["content"].as_str() else {
                return CallOutcome::HttpError {
                    status,
                    message: "response carried no message content".to_string(),
                    retry_after: None,
                };
            };
            tracing::debug!(
                purpose = %self.purpose,
                response_time_ms,
                "AI request succeeded"
            );
            CallOutcome::Success {
                content: content.trim().to_string(),
                response_time_ms,
            }
        } else {
            let header_retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok());
            let text = response.text().await.unwrap_or_default();
            let message = extract_error_message(&text, status);
            let retry_after = if status == 429 {
                header_retry_after.or_else(|| extract_retry_after(&message))
            } else {
                None
            };
            tracing::warn!(
                purpose = %self.purpose,
                status,
                message = %truncate(&message, 100),
                "AI request failed"
            );
            CallOutcome::HttpError {
                status,
                message,
                retry_after,
            }
        }
    }

    /// Trip the breaker when the pool has just reported fleet-wide exhaustion
    fn check_tripwire(&self) -> Result<()> {
        if self.pool.all_in_long_cooling() {
            self.breaker
                .trip(Some(self.breaker_open), Some("all keys in long cooling"));
            return Err(Error::CircuitOpen {
                purpose: self.purpose.clone(),
                remaining_seconds: self.breaker.remaining_seconds(),
            });
        }
        Ok(())
    }

    fn trace(
        &self,
        reservation: &KeyReservation,
        outcome: TraceOutcome,
        response_time_ms: u64,
        system_prompt: &str,
        user_message: &str,
        response_body: &str,
    ) {
        if let Some(trace) = &self.trace {
            trace.record(
                &self.purpose,
                &reservation.model,
                outcome,
                response_time_ms,
                system_prompt,
                user_message,
                response_body,
            );
        }
    }
}

/// Merge pass-through fields into the request body, skipping reserved keys
fn apply_extra_body(body: &mut Value, extra: Option<&Value>) {
    let Some(Value::Object(extra)) = extra else {
        return;
    };
    let Some(target) = body.as_object_mut() else {
        return;
    };
    for (key, value) in extra {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            tracing::debug!(field = %key, "ignoring reserved field in extra_body");
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

/// Pull a human-readable message out of an upstream error body
fn extract_error_message(text: &str, status: u16) -> String {
    if let Ok(parsed) = serde_json::from_str::<Value>(text) {
        match &parsed["error"] {
            Value::Object(obj) => {
                if let Some(message) = obj.get("message").and_then(Value::as_str) {
                    return message.to_string();
                }
                return Value::Object(obj.clone()).to_string();
            }
            Value::String(s) => return s.clone(),
            _ => {}
        }
    }
    if text.is_empty() {
        format!("HTTP {status}")
    } else {
        truncate(text, 500).to_string()
    }
}

/// Extract a retry-after hint from an upstream error message
fn extract_retry_after(message: &str) -> Option<f64> {
    static PATTERNS: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"(?i)retry.?after[:\s]+(\d+(?:\.\d+)?)\s*(?:s|seconds?)?",
            r"(?i)wait[:\s]+(\d+(?:\.\d+)?)\s*(?:s|seconds?)?",
            r"(?i)(\d+(?:\.\d+)?)\s*(?:s|seconds?)\s*(?:before|until)",
        ]
        .iter()
        .filter_map(|p| regex::Regex::new(p).ok())
        .collect()
    });

    for pattern in patterns {
        if let Some(captures) = pattern.captures(message)
            && let Some(value) = captures.get(1)
            && let Ok(seconds) = value.as_str().parse::<f64>()
        {
            return Some(seconds);
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypool::KeySpec;
    use serde::Deserialize;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        answer: String,
    }

    fn pool_for(server: &MockServer, key_count: usize) -> Arc<KeyPool> {
        let pool = KeyPool::new("test");
        pool.configure(
            (0..key_count)
                .map(|i| KeySpec {
                    key_id: format!("k{i}"),
                    name: format!("Key {i}"),
                    api_key: format!("sk-test-{i}"),
                    base_url: server.uri(),
                    model: "test-model".to_string(),
                    rpm_limit: 0,
                    rpd_limit: 0,
                    enabled: true,
                })
                .collect(),
        );
        Arc::new(pool)
    }

    fn caller_for(pool: Arc<KeyPool>, breaker: Arc<CircuitBreaker>, retries: u32) -> AiCaller {
        let task = AiTaskConfig {
            retries,
            timeout: 10,
            ..Default::default()
        };
        AiCaller::new("test", pool, breaker, &task, 300, None).unwrap()
    }

    fn chat_response(content: &str) -> serde_json::Value {
        json!({
            "choices": [
                { "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    #[tokio::test]
    async fn successful_call_returns_typed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test-0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_response(r#"{"answer":"42"}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let pool = pool_for(&server, 1);
        let breaker = Arc::new(CircuitBreaker::new("test"));
        let caller = caller_for(pool.clone(), breaker, 3);

        let result: Echo = caller
            .call_json("system", "user", &Value::Null)
            .await
            .unwrap();

        assert_eq!(result.answer, "42");
        let status = pool.get_status();
        assert_eq!(status.keys[0].error_count, 0);
        assert!(status.keys[0].last_response_time_ms.is_some());
    }

    #[tokio::test]
    async fn markdown_fenced_content_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
                "```json\n{\"answer\":\"fenced\"}\n```",
            )))
            .mount(&server)
            .await;

        let caller = caller_for(
            pool_for(&server, 1),
            Arc::new(CircuitBreaker::new("test")),
            1,
        );
        let result: Echo = caller
            .call_json("system", "user", &Value::Null)
            .await
            .unwrap();
        assert_eq!(result.answer, "fenced");
    }

    #[tokio::test]
    async fn request_body_pins_model_messages_and_temperature() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "temperature": 0.1,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_response(r#"{"answer":"ok"}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let caller = caller_for(
            pool_for(&server, 1),
            Arc::new(CircuitBreaker::new("test")),
            1,
        );
        let _: Echo = caller
            .call_json("sys", "user", &Value::Null)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn extra_body_cannot_overwrite_reserved_fields() {
        let server = MockServer::start().await;

        let captured: Arc<std::sync::Mutex<Option<Value>>> =
            Arc::new(std::sync::Mutex::new(None));
        let captured_clone = captured.clone();
        Mock::given(method("POST"))
            .respond_with(move |req: &Request| {
                *captured_clone.lock().unwrap() =
                    Some(serde_json::from_slice(&req.body).unwrap());
                ResponseTemplate::new(200).set_body_json(chat_response(r#"{"answer":"ok"}"#))
            })
            .mount(&server)
            .await;

        let task = AiTaskConfig {
            retries: 1,
            timeout: 10,
            extra_body: Some(json!({
                "model": "evil-model",
                "temperature": 2.0,
                "stream": true,
                "top_p": 0.5,
            })),
            ..Default::default()
        };
        let caller = AiCaller::new(
            "test",
            pool_for(&server, 1),
            Arc::new(CircuitBreaker::new("test")),
            &task,
            300,
            None,
        )
        .unwrap();

        let _: Echo = caller
            .call_json("sys", "user", &Value::Null)
            .await
            .unwrap();

        let body = captured.lock().unwrap().clone().unwrap();
        assert_eq!(body["model"], "test-model", "model must not be overwritten");
        assert_eq!(body["temperature"], 0.1);
        assert!(body.get("stream").is_none(), "stream must be filtered");
        assert_eq!(body["top_p"], 0.5, "non-reserved extras pass through");
    }

    #[tokio::test]
    async fn open_breaker_rejects_immediately() {
        let server = MockServer::start().await;
        let breaker = Arc::new(CircuitBreaker::new("test"));
        breaker.trip(Some(Duration::from_secs(300)), Some("test"));

        let caller = caller_for(pool_for(&server, 1), breaker, 3);
        let err = caller
            .call_json::<Echo>("sys", "user", &Value::Null)
            .await
            .unwrap_err();

        match err {
            Error::CircuitOpen {
                remaining_seconds, ..
            } => assert!(remaining_seconds > 0.0),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn empty_pool_fails_with_keys_exhausted() {
        let _server = MockServer::start().await;
        let pool = Arc::new(KeyPool::new("test"));
        let caller = caller_for(pool, Arc::new(CircuitBreaker::new("test")), 3);

        let err = caller
            .call_json::<Echo>("sys", "user", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeysExhausted { .. }));
    }

    #[tokio::test]
    async fn http_429_reports_rate_limit_to_pool() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "rate limit, retry after 30 seconds" }
            })))
            .mount(&server)
            .await;

        let pool = pool_for(&server, 1);
        let caller = caller_for(pool.clone(), Arc::new(CircuitBreaker::new("test")), 1);

        let err = caller
            .call_json::<Echo>("sys", "user", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamFault(_)));

        let status = pool.get_status();
        assert_eq!(status.keys[0].last_error_kind, Some("rate_limited"));
        // Retry-after extracted from the error body (30 s), not the default 10 s
        assert!(status.keys[0].cooldown_remaining_seconds > 15.0);
    }

    #[tokio::test]
    async fn fleet_exhaustion_trips_the_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        // A single key that long-cools on its first error: the caller's own
        // error report exhausts the fleet, which must trip the breaker
        let limits = crate::config::RateLimitConfig {
            max_consecutive_errors: 1,
            ..Default::default()
        };
        let pool = KeyPool::with_limits("test", limits);
        pool.configure(vec![KeySpec {
            key_id: "k0".to_string(),
            name: "Key 0".to_string(),
            api_key: "sk-test-0".to_string(),
            base_url: server.uri(),
            model: "test-model".to_string(),
            rpm_limit: 0,
            rpd_limit: 0,
            enabled: true,
        }]);
        let pool = Arc::new(pool);
        let breaker = Arc::new(CircuitBreaker::new("test"));
        let caller = caller_for(pool.clone(), breaker.clone(), 3);

        let err = caller
            .call_json::<Echo>("sys", "user", &Value::Null)
            .await
            .unwrap_err();

        match err {
            Error::CircuitOpen {
                remaining_seconds, ..
            } => assert!(remaining_seconds > 0.0),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
        assert!(breaker.is_open());
        assert!(pool.all_in_long_cooling());
    }

    #[tokio::test]
    async fn parse_failure_retries_and_eventually_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_response("not json at all")),
            )
            .expect(2)
            .mount(&server)
            .await;

        let caller = caller_for(
            pool_for(&server, 1),
            Arc::new(CircuitBreaker::new("test")),
            2,
        );
        let err = caller
            .call_json::<Echo>("sys", "user", &Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamFault(_)));
    }

    // -----------------------------------------------------------------------
    // Helper coverage
    // -----------------------------------------------------------------------

    #[test]
    fn extract_retry_after_parses_common_formats() {
        assert_eq!(extract_retry_after("Retry-After: 30"), Some(30.0));
        assert_eq!(extract_retry_after("retry after 12.5 seconds"), Some(12.5));
        assert_eq!(extract_retry_after("please wait 7s"), Some(7.0));
        assert_eq!(extract_retry_after("60 seconds until reset"), Some(60.0));
        assert_eq!(extract_retry_after("try again later"), None);
    }

    #[test]
    fn extract_error_message_prefers_error_object() {
        let body = r#"{"error": {"message": "quota exceeded", "type": "rate"}}"#;
        assert_eq!(extract_error_message(body, 429), "quota exceeded");

        assert_eq!(extract_error_message("", 502), "HTTP 502");
        assert_eq!(extract_error_message("plain failure", 500), "plain failure");
    }

    #[test]
    fn apply_extra_body_skips_every_reserved_field() {
        let mut body = json!({"model": "m", "messages": [], "temperature": 0.1});
        apply_extra_body(
            &mut body,
            Some(&json!({
                "model": "x",
                "messages": "y",
                "temperature": 1.0,
                "stream": true,
                "response_format": {},
                "max_tokens": 100,
            })),
        );

        assert_eq!(body["model"], "m");
        assert_eq!(body["temperature"], 0.1);
        assert!(body.get("stream").is_none());
        assert_eq!(body["max_tokens"], 100);
    }
}
