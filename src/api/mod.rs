//! Webhook HTTP surface
//!
//! The inbound edge of the system: the downloader posts lifecycle events to
//! `POST /webhook/qbit`, which are validated, wrapped into queue events and
//! answered with `202` plus the queue position. Nothing is processed
//! synchronously on the HTTP flow. Health and status endpoints round out
//! the surface for monitoring.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::keypool::KeyPool;
use crate::queue::{RssQueue, WebhookPayload, WebhookQueue};

/// Response body for an accepted webhook event
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAccepted {
    /// Always true on 202
    pub success: bool,
    /// Always true on 202
    pub queued: bool,
    /// Token of the enqueued event
    pub queue_id: String,
    /// Server receive time
    pub received_at_utc: String,
    /// Queue length after the enqueue
    pub queue_len: usize,
}

/// Shared state behind the HTTP surface
#[derive(Clone)]
pub struct ApiState {
    /// Webhook event queue
    pub webhook_queue: WebhookQueue,
    /// RSS event queue (status only)
    pub rss_queue: RssQueue,
    /// Key pools, for the status endpoint
    pub pools: Vec<Arc<KeyPool>>,
    /// Circuit breakers, for the status endpoint
    pub breakers: Vec<Arc<CircuitBreaker>>,
}

/// Build the router for the webhook surface
///
/// # Routes
///
/// - `POST /webhook/qbit` — enqueue a downloader event (202, or 400 on a
///   missing hash)
/// - `GET /webhook/health` — liveness probe
/// - `GET /webhook/status` — webhook queue snapshot
/// - `GET /status/queues` — both queue snapshots
/// - `GET /status/keys` — key pool and breaker snapshots
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/webhook/qbit", post(handle_qbit_webhook))
        .route("/webhook/health", get(webhook_health))
        .route("/webhook/status", get(webhook_status))
        .route("/status/queues", get(queues_status))
        .route("/status/keys", get(keys_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the webhook surface until cancelled
pub async fn serve(state: ApiState, addr: SocketAddr, cancel: CancellationToken) -> Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ApiServerError(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(%addr, "webhook surface listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::ApiServerError(format!("webhook server failed: {e}")))?;

    Ok(())
}

async fn handle_qbit_webhook(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let hash = body
        .get("hash")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if hash.is_empty() {
        tracing::warn!("webhook missing hash");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing hash" })),
        );
    }

    let event_kind = body
        .get("event_type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let name = body
        .get("name")
        .or_else(|| body.get("torrent_name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let save_path = body
        .get("save_path")
        .or_else(|| body.get("content_path"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    tracing::info!(
        event = %event_kind,
        hash = %hash.chars().take(8).collect::<String>(),
        name = %name,
        "webhook received"
    );

    let payload = WebhookPayload {
        hash_id: hash,
        name,
        category: body
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        status: body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        save_path,
        extra_data: body,
    };

    let (queue_id, queue_len) = state.webhook_queue.enqueue(event_kind, payload);

    let accepted = WebhookAccepted {
        success: true,
        queued: true,
        queue_id,
        received_at_utc: Utc::now().to_rfc3339(),
        queue_len,
    };
    (
        StatusCode::ACCEPTED,
        Json(serde_json::to_value(accepted).unwrap_or_else(|_| json!({ "success": true }))),
    )
}

async fn webhook_health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "webhook" }))
}

async fn webhook_status(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.webhook_queue.status().await;
    Json(json!({ "success": true, "data": status }))
}

async fn queues_status(State(state): State<ApiState>) -> impl IntoResponse {
    let webhook = state.webhook_queue.status().await;
    let rss = state.rss_queue.status().await;
    Json(json!({
        "success": true,
        "data": { "webhook": webhook, "rss": rss }
    }))
}

async fn keys_status(State(state): State<ApiState>) -> impl IntoResponse {
    let pools: Vec<_> = state.pools.iter().map(|p| p.get_status()).collect();
    let breakers: Vec<_> = state.breakers.iter().map(|b| b.get_status()).collect();
    Json(json!({
        "success": true,
        "data": { "pools": pools, "breakers": breakers }
    }))
}
