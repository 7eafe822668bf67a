//! Sync orchestration
//!
//! [`SmartSync`] runs the incremental sync. One call to [`SmartSync::run`] walks through
//! the phases of [`SyncPhase`]:
//!
//! - [`run`] - phase sequencing, pre-dispatch checks, run-level events
//! - [`listing`] - catalog listing with local re-validation, then the diff against history
//! - [`dispatch`] - feeding the render and fetcher pools, committing history as items finish
//!
//! Only one run may be active per instance. Progress is published on a broadcast channel
//! (see [`SmartSync::subscribe`]) and the current phase on a watch channel.

mod dispatch;
mod listing;
mod run;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::fetcher::ImageSource;
use crate::renderer::DocumentRenderer;
use crate::types::{Event, SyncPhase};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;

/// Incremental, history-aware sync engine (cloneable - all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use report_sync::catalog::HttpCatalogClient;
/// use report_sync::fetcher::HttpImageSource;
/// use report_sync::renderer::ChromeRenderer;
/// use report_sync::{Config, Database, KindSelection, SmartSync, SyncFilter};
/// use chrono::NaiveDate;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let db = Arc::new(Database::open(&config.persistence.database_path).await?);
///
///     let catalog = HttpCatalogClient::new(&config.catalog)?;
///     catalog.login(&config.credentials).await?;
///
///     let images = HttpImageSource::new(
///         config.concurrency.download_timeout,
///         &config.catalog.user_agent,
///     )?;
///     let sync = SmartSync::new(
///         config.clone(),
///         db,
///         Arc::new(catalog),
///         Arc::new(ChromeRenderer::from_config(&config.renderer)),
///         Arc::new(images),
///     )?;
///
///     let mut events = sync.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             println!("{:?}", event);
///         }
///     });
///
///     let filter = SyncFilter::new(
///         NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
///         NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
///         ["Budi Santoso"],
///         KindSelection::Both,
///     )?;
///     let result = sync.run(&filter, CancellationToken::new()).await?;
///     println!("fetched {} / skipped {} / failed {}", result.fetched, result.skipped, result.failed);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct SmartSync {
    /// History store (public for front ends that browse or clear history)
    pub db: Arc<Database>,
    /// Configuration, fixed for the lifetime of the instance
    pub(crate) config: Arc<Config>,
    /// Where candidates come from
    pub(crate) catalog: Arc<dyn CatalogClient>,
    /// Engine behind report rendering
    pub(crate) renderer: Arc<dyn DocumentRenderer>,
    /// Transport behind image downloads
    pub(crate) images: Arc<dyn ImageSource>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Current phase
    pub(crate) phase_tx: Arc<watch::Sender<SyncPhase>>,
    /// Set while a run is in progress
    pub(crate) running: Arc<AtomicBool>,
}

impl SmartSync {
    /// Create a sync engine from validated configuration and injected collaborators
    pub fn new(
        config: Config,
        db: Arc<Database>,
        catalog: Arc<dyn CatalogClient>,
        renderer: Arc<dyn DocumentRenderer>,
        images: Arc<dyn ImageSource>,
    ) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let (phase_tx, _rx) = watch::channel(SyncPhase::Idle);

        tracing::info!(
            renderer = renderer.name(),
            max_workers = config.concurrency.max_workers,
            render_workers = config.concurrency.render_workers,
            output = %config.output.base_dir.display(),
            "Sync engine initialized"
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            catalog,
            renderer,
            images,
            event_tx,
            phase_tx: Arc::new(phase_tx),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to progress events
    ///
    /// Each subscriber receives all events independently. A subscriber that falls more than
    /// 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Progress events as a [`Stream`](futures::Stream)
    ///
    /// Lagged gaps surface as `Err` items rather than ending the stream.
    pub fn progress_stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Watch the orchestrator phase
    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Get the configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn set_phase(&self, phase: SyncPhase) {
        tracing::debug!(?phase, "Sync phase");
        self.phase_tx.send_replace(phase);
        self.emit_event(Event::PhaseChanged { phase });
    }
}
