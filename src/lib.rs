//! # report-sync
//!
//! Incremental, history-aware bulk sync of service reports and their photos from a remote
//! catalog onto local storage.
//!
//! ## How a run works
//!
//! - **List** - the catalog is asked for reports and images matching a [`SyncFilter`]
//!   (date range, technicians, kinds); results are re-checked locally
//! - **Diff** - anything already recorded in the SQLite history is skipped without
//!   touching the network
//! - **Fetch** - images are downloaded by a bounded worker pool; reports are rendered to PDF
//!   by a headless browser in their own pool
//! - **Record** - each file is written atomically and committed to history only once it is
//!   complete, so a crash never leaves a recorded-but-missing artifact
//!
//! Per-item failures are retried with exponential backoff and reported in the
//! [`SyncResult`]; they are picked up again on the next run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use report_sync::catalog::HttpCatalogClient;
//! use report_sync::fetcher::HttpImageSource;
//! use report_sync::renderer::ChromeRenderer;
//! use report_sync::{Config, Database, KindSelection, SmartSync, SyncFilter};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let db = Arc::new(Database::open(&config.persistence.database_path).await?);
//!
//!     let catalog = HttpCatalogClient::new(&config.catalog)?;
//!     let technicians = catalog.login(&config.credentials).await?;
//!
//!     // Uploaded photos are served behind the same login
//!     let mut images = HttpImageSource::new(
//!         config.concurrency.download_timeout,
//!         &config.catalog.user_agent,
//!     )?;
//!     if let Some(token) = catalog.session_token().await {
//!         images = images.with_bearer_token(catalog.base_url(), token)?;
//!     }
//!
//!     let sync = SmartSync::new(
//!         config.clone(),
//!         db,
//!         Arc::new(catalog),
//!         Arc::new(ChromeRenderer::from_config(&config.renderer)),
//!         Arc::new(images),
//!     )?;
//!
//!     let range = config.initial_range(chrono::Local::now().date_naive());
//!     let filter = SyncFilter::new(
//!         range.start,
//!         range.end,
//!         technicians.iter().map(|t| t.name.clone()),
//!         KindSelection::Both,
//!     )?;
//!
//!     let cancel = CancellationToken::new();
//!     report_sync::cancel_on_shutdown_signal(cancel.clone());
//!
//!     let result = sync.run(&filter, cancel).await?;
//!     println!("{} new, {} already synced, {} failed", result.fetched, result.skipped, result.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote catalog access
pub mod catalog;
/// Configuration types
pub mod config;
/// History store
pub mod db;
/// Error types
pub mod error;
/// Image downloads
pub mod fetcher;
/// Destination paths and atomic file writes
pub mod organizer;
/// Bounded worker pools
pub mod pool;
/// Report rendering
pub mod renderer;
/// Retry logic with exponential backoff
pub mod retry;
/// Sync orchestration
pub mod sync;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, Credentials, DateRange};
pub use db::Database;
pub use error::{CatalogError, DatabaseError, Error, ItemError, RenderError, Result};
pub use sync::SmartSync;
pub use types::{
    ArtifactKind, ArtifactRef, Event, HistoryEntry, ItemFailure, KindSelection, SyncFilter,
    SyncPhase, SyncResult,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// Spawns a task that waits for the signal; the task ends early if the token is cancelled
/// some other way. A cancelled run stops dispatching and returns once in-flight items are
/// done, with everything completed so far recorded.
///
/// - **Unix:** SIGTERM and SIGINT, falling back to whichever can be registered.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("Cancelling sync run on shutdown signal");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "Received shutdown signal"),
                _ = sigint.recv() => tracing::info!(signal = "SIGINT", "Received shutdown signal"),
            }
        }
        (sigterm, sigint) => {
            for e in [sigterm.as_ref().err(), sigint.as_ref().err()].into_iter().flatten() {
                tracing::warn!(error = %e, "Could not register signal handler");
            }
            match sigterm.or(sigint) {
                Ok(mut only) => {
                    only.recv().await;
                    tracing::info!("Received shutdown signal");
                }
                Err(_) => {
                    tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                    tokio::signal::ctrl_c().await.ok();
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        // Never resolve; the run can still be cancelled through its token
        std::future::pending::<()>().await;
    }
}
