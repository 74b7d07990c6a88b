//! # ani-dl
//!
//! Anime download orchestrator: ingests torrent candidates from RSS feeds,
//! webhook events and manual submissions, drives a qBittorrent back-end, and
//! curates a hardlink library with AI-assisted title parsing and renaming.
//!
//! ## Architecture
//!
//! Work flows through two single-consumer queues. The RSS scheduler expands
//! configured feeds into feed-level events; the RSS queue turns those into
//! per-item download candidates and submits them. Independently, downloader
//! webhooks land on the webhook queue, whose completion handler runs the
//! rename/hardlink pipeline. AI calls go through per-purpose key pools with
//! RPM/RPD budgeting and a circuit breaker that opens when every credential
//! is cooling.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ani_dl::config::Config;
//! use ani_dl::db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(std::path::Path::new("config.json"))?;
//!     let db = Database::new(&config.persistence.database_path).await?;
//!     // wire pools, breakers, queues and the orchestrator; see src/main.rs
//!     # let _ = db;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Adapter seams: downloader, metadata provider, notifications
pub mod adapters;
/// AI upstream callers (title parse, rename, subtitle match)
pub mod ai;
/// Webhook HTTP surface
pub mod api;
/// Circuit breaker
pub mod breaker;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Hardlink materialisation
pub mod hardlink;
/// API key pool with budgeting and cooldown
pub mod keypool;
/// Download orchestrator
pub mod orchestrator;
/// Generic FIFO queue workers
pub mod queue;
/// Rename decision service
pub mod rename;
/// RSS feed fetching and filtering
pub mod rss;
/// RSS feed scheduler
pub mod rss_scheduler;
/// Core types
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use breaker::CircuitBreaker;
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus};
pub use keypool::{KeyPool, KeyReservation, KeySpec};
pub use orchestrator::DownloadOrchestrator;
pub use types::{AnimeId, Category, DownloadStatus, Event, MediaType, TorrentHash};

use tokio_util::sync::CancellationToken;

/// Wait for a termination signal, then cancel the token so every background
/// flow (queues, scheduler, HTTP surface) can wind down cooperatively.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_until_shutdown(cancel: CancellationToken) {
    wait_for_signal().await;
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
