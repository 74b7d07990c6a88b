//! Error types for ani-dl
//!
//! This module provides comprehensive error handling for the library, including:
//! - Domain-specific error types (validation, duplicate, circuit breaker, filesystem)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//! - Context information (purpose, torrent hash, remaining cooldown, etc.)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for ani-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ani-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input from a caller (malformed hash, empty title, bad regex, ...)
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Torrent hash already known (live table or deletion history)
    #[error("duplicate download: {0}")]
    Duplicate(String),

    /// No reservable credential in the key pool
    #[error("no available API key for purpose '{purpose}'")]
    KeysExhausted {
        /// Purpose tag of the exhausted pool
        purpose: String,
    },

    /// Upstream returned HTTP 429
    #[error("rate limited by upstream")]
    RateLimited {
        /// Suggested wait before retrying, when the upstream provided one
        retry_after_seconds: Option<f64>,
    },

    /// Upstream 5xx or network-level fault
    #[error("upstream fault: {0}")]
    UpstreamFault(String),

    /// Circuit breaker denies the call
    #[error("circuit breaker open for '{purpose}', {remaining_seconds:.0}s remaining")]
    CircuitOpen {
        /// Purpose tag of the tripped breaker
        purpose: String,
        /// Seconds until the breaker recloses
        remaining_seconds: f64,
    },

    /// AI response did not conform to the expected schema
    #[error("response parse failure: {0}")]
    ParseFailure(String),

    /// Hardlink or directory creation failed
    #[error("filesystem fault at {path}: {reason}")]
    Filesystem {
        /// Path that the operation targeted
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Operation is illegal in the torrent's current state
    #[error("cannot {operation} torrent {hash} in state {current_state}")]
    StateConflict {
        /// The torrent hash the operation targeted
        hash: String,
        /// The operation that was attempted (e.g., "archive", "complete")
        operation: String,
        /// The state that prevents the operation
        current_state: String,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "rss.check_interval")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Invariant violation that should never occur
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// API error response format
///
/// Returned by API endpoints when an error occurs. Follows a standard format
/// with machine-readable error codes, human-readable messages, and optional
/// contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "circuit_open",
///     "message": "circuit breaker open for 'title_parse', 280s remaining",
///     "details": {
///       "purpose": "title_parse",
///       "remaining_seconds": 280.0
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create a "conflict" error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create a "service unavailable" error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("service_unavailable", message)
    }
}

/// Convert errors to HTTP status codes for API responses
///
/// This trait maps domain errors to appropriate HTTP status codes.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Validation(_) => 400,
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            // 409 Conflict
            Error::Duplicate(_) => 409,
            Error::StateConflict { .. } => 409,

            // 422 Unprocessable Entity - Semantic errors
            Error::ParseFailure(_) => 422,

            // 429 Too Many Requests
            Error::RateLimited { .. } => 429,

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Filesystem { .. } => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Unreachable(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::UpstreamFault(_) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::CircuitOpen { .. } => 503,
            Error::KeysExhausted { .. } => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Duplicate(_) => "duplicate",
            Error::KeysExhausted { .. } => "keys_exhausted",
            Error::RateLimited { .. } => "rate_limited",
            Error::UpstreamFault(_) => "upstream_fault",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::ParseFailure(_) => "parse_failure",
            Error::Filesystem { .. } => "filesystem_fault",
            Error::StateConflict { .. } => "state_conflict",
            Error::Config { .. } => "config_error",
            Error::Database(DatabaseError::NotFound(_)) => "not_found",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
            Error::Unreachable(_) => "unreachable",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Add contextual details for specific error types
        let details = match &error {
            Error::CircuitOpen {
                purpose,
                remaining_seconds,
            } => Some(serde_json::json!({
                "purpose": purpose,
                "remaining_seconds": remaining_seconds,
            })),
            Error::KeysExhausted { purpose } => Some(serde_json::json!({
                "purpose": purpose,
            })),
            Error::RateLimited {
                retry_after_seconds,
            } => retry_after_seconds.map(|secs| {
                serde_json::json!({
                    "retry_after_seconds": secs,
                })
            }),
            Error::StateConflict {
                hash,
                operation,
                current_state,
            } => Some(serde_json::json!({
                "hash": hash,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Filesystem { path, reason } => Some(serde_json::json!({
                "path": path,
                "reason": reason,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Helpers: construct representative Error variants for status/code tests
    // -----------------------------------------------------------------------

    /// Returns a vec of (Error, expected_status_code, expected_error_code) for
    /// every reachable match arm in ToHttpStatus.
    fn all_error_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Validation("hash must be 40 hex chars".into()),
                400,
                "validation_error",
            ),
            (
                Error::Config {
                    message: "interval below 60s".into(),
                    key: Some("rss.check_interval".into()),
                },
                400,
                "config_error",
            ),
            (Error::NotFound("anime 99".into()), 404, "not_found"),
            (
                Error::Duplicate("hash already tracked".into()),
                409,
                "duplicate",
            ),
            (
                Error::StateConflict {
                    hash: "a".repeat(40),
                    operation: "archive".into(),
                    current_state: "pending".into(),
                },
                409,
                "state_conflict",
            ),
            (
                Error::ParseFailure("missing field 'season'".into()),
                422,
                "parse_failure",
            ),
            (
                Error::RateLimited {
                    retry_after_seconds: Some(12.0),
                },
                429,
                "rate_limited",
            ),
            (
                Error::Database(DatabaseError::QueryFailed("timeout".into())),
                500,
                "database_error",
            ),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                500,
                "io_error",
            ),
            (
                Error::Filesystem {
                    path: PathBuf::from("/library/a.mkv"),
                    reason: "cross-device link".into(),
                },
                500,
                "filesystem_fault",
            ),
            (
                Error::ApiServerError("bind failed".into()),
                500,
                "api_server_error",
            ),
            (Error::Unreachable("impossible state".into()), 500, "unreachable"),
            (Error::Other("unknown".into()), 500, "internal_error"),
            (
                Error::UpstreamFault("HTTP 503 from upstream".into()),
                502,
                "upstream_fault",
            ),
            (
                Error::CircuitOpen {
                    purpose: "title_parse".into(),
                    remaining_seconds: 120.0,
                },
                503,
                "circuit_open",
            ),
            (
                Error::KeysExhausted {
                    purpose: "multi_file_rename".into(),
                },
                503,
                "keys_exhausted",
            ),
            (Error::ShuttingDown, 503, "shutting_down"),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_status_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let actual_status = error.status_code();
            assert_eq!(
                actual_status, expected_status,
                "Error variant with error_code={expected_code} returned status {actual_status}, expected {expected_status}"
            );
        }
    }

    #[test]
    fn every_variant_maps_to_expected_error_code() {
        for (error, expected_status, expected_code) in all_error_variants() {
            let actual_code = error.error_code();
            assert_eq!(
                actual_code, expected_code,
                "Error variant with expected status={expected_status} returned error_code={actual_code}, expected {expected_code}"
            );
        }
    }

    #[test]
    fn database_not_found_is_404() {
        let err = Error::Database(DatabaseError::NotFound("download abc".into()));
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.error_code(), "not_found");
    }

    #[test]
    fn duplicate_is_409_conflict() {
        let err = Error::Duplicate("same hash".into());
        assert_eq!(err.status_code(), 409);
    }

    // -----------------------------------------------------------------------
    // Error -> ApiError preserves structured details
    // -----------------------------------------------------------------------

    #[test]
    fn api_error_from_circuit_open_has_purpose_and_remaining() {
        let err = Error::CircuitOpen {
            purpose: "title_parse".into(),
            remaining_seconds: 280.0,
        };
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "circuit_open");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["purpose"], "title_parse");
        assert_eq!(details["remaining_seconds"], 280.0);
    }

    #[test]
    fn api_error_from_keys_exhausted_has_purpose() {
        let err = Error::KeysExhausted {
            purpose: "subtitle_match".into(),
        };
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "keys_exhausted");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["purpose"], "subtitle_match");
    }

    #[test]
    fn api_error_from_state_conflict_has_hash_operation_state() {
        let err = Error::StateConflict {
            hash: "f".repeat(40),
            operation: "complete".into(),
            current_state: "error".into(),
        };
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "state_conflict");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["hash"], "f".repeat(40));
        assert_eq!(details["operation"], "complete");
        assert_eq!(details["current_state"], "error");
    }

    #[test]
    fn api_error_from_rate_limited_without_hint_has_no_details() {
        let err = Error::RateLimited {
            retry_after_seconds: None,
        };
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "rate_limited");
        assert!(api.error.details.is_none());
    }

    #[test]
    fn api_error_from_filesystem_has_path_and_reason() {
        let err = Error::Filesystem {
            path: PathBuf::from("/library/Season 1/ep.mkv"),
            reason: "name collision".into(),
        };
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "filesystem_fault");
        let details = api.error.details.expect("should have details");
        assert_eq!(details["path"], "/library/Season 1/ep.mkv");
        assert_eq!(details["reason"], "name collision");
    }

    #[test]
    fn api_error_from_validation_has_no_details() {
        let err = Error::Validation("empty title".into());
        let api: ApiError = err.into();

        assert_eq!(api.error.code, "validation_error");
        assert!(api.error.details.is_none());
    }

    // -----------------------------------------------------------------------
    // ApiError factory methods and serialization
    // -----------------------------------------------------------------------

    #[test]
    fn api_error_not_found_factory() {
        let api = ApiError::not_found("Torrent abcdef12");

        assert_eq!(api.error.code, "not_found");
        assert_eq!(api.error.message, "Torrent abcdef12 not found");
        assert!(api.error.details.is_none());
    }

    #[test]
    fn api_error_validation_factory() {
        let api = ApiError::validation("hash is required");

        assert_eq!(api.error.code, "validation_error");
        assert_eq!(api.error.message, "hash is required");
    }

    #[test]
    fn api_error_without_details_omits_details_in_json() {
        let api = ApiError::new("test_code", "test message");

        let json_str = serde_json::to_string(&api).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

        assert_eq!(parsed["error"]["code"], "test_code");
        assert!(
            parsed["error"].get("details").is_none(),
            "details field should be omitted from JSON when None"
        );
    }

    #[test]
    fn api_error_message_matches_error_display() {
        let err = Error::StateConflict {
            hash: "0".repeat(40),
            operation: "archive".into(),
            current_state: "pending".into(),
        };
        let display_msg = err.to_string();
        let api: ApiError = err.into();

        assert_eq!(
            api.error.message, display_msg,
            "ApiError message should match the Error's Display output"
        );
    }
}
