//! Run sequencing

use super::SmartSync;
use crate::error::{Error, Result};
use crate::organizer;
use crate::types::{Event, SyncFilter, SyncPhase, SyncResult};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Clears the running flag when the run ends, however it ends
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::AlreadyRunning)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl SmartSync {
    /// Run one sync over `filter`
    ///
    /// Lists candidates, skips everything already in history, fetches or renders the rest
    /// and records each success as soon as its file is in place.
    ///
    /// Per-item failures never make this return `Err`; they are reported in
    /// [`SyncResult::failures`] and retried on the next run. `Err` means the run could not
    /// proceed at all: catalog or history store failure, an unwritable output directory, or
    /// a missing render engine. Entries committed before a fatal error stay recorded.
    ///
    /// Cancelling `cancel` stops dispatch; queued items come back as cancelled and in-flight
    /// items finish.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if another run is in progress on this instance
    /// - [`Error::Catalog`] if listing fails ([`CatalogError::AuthExpired`] when the session
    ///   needs renewing)
    /// - [`Error::Database`] if the history store fails during the diff
    /// - [`Error::OutputNotWritable`] if the output directory cannot be written
    /// - [`Error::Render`] if the render engine is unavailable
    ///
    /// [`CatalogError::AuthExpired`]: crate::error::CatalogError::AuthExpired
    pub async fn run(&self, filter: &SyncFilter, cancel: CancellationToken) -> Result<SyncResult> {
        let _guard = RunGuard::acquire(&self.running)?;

        tracing::info!(
            start = %filter.start(),
            end = %filter.end(),
            technicians = filter.technicians().len(),
            kinds = ?filter.kinds(),
            "Sync run started"
        );

        let outcome = self.run_phases(filter, &cancel).await;

        match &outcome {
            Ok(result) => {
                tracing::info!(
                    fetched = result.fetched,
                    skipped = result.skipped,
                    failed = result.failed,
                    cancelled = result.cancelled,
                    "Sync run finished"
                );
                self.emit_event(Event::Finished(result.clone()));
            }
            Err(e) => {
                tracing::error!(error = %e, "Sync run aborted");
                self.emit_event(Event::Aborted {
                    reason: e.to_string(),
                });
            }
        }
        self.set_phase(SyncPhase::Idle);

        outcome
    }

    async fn run_phases(
        &self,
        filter: &SyncFilter,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        let mut result = SyncResult::default();

        self.set_phase(SyncPhase::Listing);
        let candidates = self.list_candidates(filter).await?;

        self.set_phase(SyncPhase::Diffing);
        let plan = self.diff(candidates, &mut result).await?;

        if !plan.is_empty() {
            organizer::ensure_writable(&self.config.output.base_dir).await?;
            if !plan.reports.is_empty() {
                self.renderer.check_available().await?;
            }

            self.set_phase(SyncPhase::Dispatching);
            self.dispatch(plan, &mut result, cancel).await?;
        }

        self.set_phase(SyncPhase::Reporting);
        Ok(result)
    }
}
