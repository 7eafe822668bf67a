//! Dispatching work to the pools and settling outcomes
//!
//! Reports go to the render pool, images to the fetcher pool. Queues are bounded, so while
//! waiting for queue space the orchestrator keeps receiving outcomes; neither side can
//! block the other. Each completed item is committed to history as soon as its outcome
//! arrives, never in a batch at the end.

use super::SmartSync;
use super::listing::Plan;
use crate::error::{Error, ItemError, RenderError, Result};
use crate::fetcher::ImageFetcher;
use crate::pool::WorkerPool;
use crate::renderer::ReportRenderer;
use crate::types::{
    ArtifactKind, Event, HistoryEntry, ItemFailure, Outcome, SyncPhase, SyncResult, WorkItem,
    WorkOutcome,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Running totals for one dispatch
struct Tally<'a> {
    result: &'a mut SyncResult,
    settled: usize,
    total: usize,
    /// First fatal error seen; stops further work
    fatal: Option<RenderError>,
}

impl SmartSync {
    /// Run every planned item through the pools and commit the successes
    ///
    /// Returns `Err` only for a fatal renderer failure; per-item failures land in `result`.
    pub(crate) async fn dispatch(
        &self,
        plan: Plan,
        result: &mut SyncResult,
        cancel: &CancellationToken,
    ) -> Result<()> {
        // Cancelled on a fatal error without touching the caller's token
        let run_token = cancel.child_token();
        let concurrency = &self.config.concurrency;
        let (results_tx, mut results_rx) = mpsc::channel(concurrency.queue_capacity);

        let render_pool = (!plan.reports.is_empty()).then(|| {
            WorkerPool::spawn(
                "render",
                concurrency.render_workers,
                concurrency.queue_capacity,
                Arc::new(
                    ReportRenderer::new(Arc::clone(&self.renderer))
                        .with_image_source(Arc::clone(&self.images)),
                ),
                self.config.retry.clone(),
                results_tx.clone(),
                self.event_tx.clone(),
                run_token.clone(),
            )
        });
        let fetch_pool = (!plan.images.is_empty()).then(|| {
            WorkerPool::spawn(
                "fetch",
                concurrency.max_workers,
                concurrency.queue_capacity,
                Arc::new(ImageFetcher::new(Arc::clone(&self.images))),
                self.config.retry.clone(),
                results_tx.clone(),
                self.event_tx.clone(),
                run_token.clone(),
            )
        });
        // Workers hold the remaining senders; the channel closes when the last one exits
        drop(results_tx);

        let mut tally = Tally {
            result,
            settled: 0,
            total: plan.len(),
            fatal: None,
        };

        // Alternate kinds so one slow pool does not hold back the other's queue
        let mut queue: VecDeque<WorkItem> = interleave(plan.reports, plan.images);

        while let Some(item) = queue.pop_front() {
            if run_token.is_cancelled() {
                let unsent = 1 + queue.len();
                queue.clear();
                tracing::info!(unsent, "Run cancelled, not dispatching remaining items");
                tally.result.cancelled += unsent;
                tally.settled += unsent;
                self.emit_progress(&tally);
                break;
            }

            let pool = match item.artifact.kind {
                ArtifactKind::Report => render_pool.as_ref(),
                ArtifactKind::Image => fetch_pool.as_ref(),
            };
            let Some(pool) = pool else {
                continue;
            };

            loop {
                tokio::select! {
                    permit = pool.reserve() => {
                        match permit {
                            Ok(permit) => {
                                permit.send(item);
                                break;
                            }
                            Err(_) => {
                                return Err(Error::Other(format!(
                                    "{} pool stopped unexpectedly",
                                    pool.name()
                                )));
                            }
                        }
                    }
                    Some(outcome) = results_rx.recv() => {
                        self.settle(outcome, &mut tally, &run_token).await;
                    }
                }
            }
        }

        self.set_phase(SyncPhase::Draining);

        let shutdown = async move {
            if let Some(pool) = render_pool {
                pool.shutdown().await;
            }
            if let Some(pool) = fetch_pool {
                pool.shutdown().await;
            }
        };
        let drain = async {
            while let Some(outcome) = results_rx.recv().await {
                self.settle(outcome, &mut tally, &run_token).await;
            }
        };
        tokio::join!(shutdown, drain);

        match tally.fatal {
            Some(e) => Err(Error::Render(e)),
            None => Ok(()),
        }
    }

    /// Record one outcome, committing history for a completed item
    async fn settle(
        &self,
        outcome: WorkOutcome,
        tally: &mut Tally<'_>,
        run_token: &CancellationToken,
    ) {
        let WorkOutcome { item, outcome } = outcome;
        let kind = item.artifact.kind;

        match outcome {
            Outcome::Completed { fingerprint } => {
                let entry = HistoryEntry {
                    kind,
                    remote_id: item.artifact.remote_id.clone(),
                    local_path: item.destination.clone(),
                    completed_at: chrono::Utc::now(),
                    content_fingerprint: fingerprint,
                };
                match self.db.commit(&entry).await {
                    Ok(()) => {
                        tracing::info!(
                            kind = %kind,
                            remote_id = %item.artifact.remote_id,
                            path = %item.destination.display(),
                            attempts = item.attempts,
                            "Artifact synced"
                        );
                        tally.result.record_fetched(kind);
                        self.emit_event(Event::ItemCompleted {
                            kind,
                            remote_id: item.artifact.remote_id,
                            path: item.destination,
                        });
                    }
                    Err(e) => {
                        // The file stays on disk; without a history row the next run fetches it again
                        tracing::error!(
                            kind = %kind,
                            remote_id = %item.artifact.remote_id,
                            error = %e,
                            "Failed to record completed artifact"
                        );
                        self.record_item_failure(tally, &item, ItemError::Commit(e.to_string()));
                    }
                }
            }
            Outcome::Failed(ItemError::Render(RenderError::EngineMissing(message))) => {
                if tally.fatal.is_none() {
                    tracing::error!(
                        kind = %kind,
                        remote_id = %item.artifact.remote_id,
                        error = %message,
                        "Renderer unavailable, stopping run"
                    );
                    run_token.cancel();
                    tally.fatal = Some(RenderError::EngineMissing(message.clone()));
                }
                self.record_item_failure(
                    tally,
                    &item,
                    ItemError::Render(RenderError::EngineMissing(message)),
                );
            }
            Outcome::Failed(e) => {
                tracing::error!(
                    kind = %kind,
                    remote_id = %item.artifact.remote_id,
                    attempts = item.attempts,
                    error = %e,
                    "Artifact failed"
                );
                self.record_item_failure(tally, &item, e);
            }
            Outcome::Cancelled => {
                tracing::debug!(
                    kind = %kind,
                    remote_id = %item.artifact.remote_id,
                    "Item cancelled before starting"
                );
                tally.result.cancelled += 1;
            }
        }

        tally.settled += 1;
        self.emit_progress(tally);
    }

    fn record_item_failure(&self, tally: &mut Tally<'_>, item: &WorkItem, error: ItemError) {
        self.emit_event(Event::ItemFailed {
            kind: item.artifact.kind,
            remote_id: item.artifact.remote_id.clone(),
            error: error.to_string(),
        });
        tally.result.record_failure(ItemFailure {
            kind: item.artifact.kind,
            remote_id: item.artifact.remote_id.clone(),
            description: item.artifact.describe(),
            reason: error.to_string(),
            attempts: item.attempts,
        });
    }

    fn emit_progress(&self, tally: &Tally<'_>) {
        self.emit_event(Event::Progress {
            completed: tally.settled,
            total: tally.total,
            fetched: tally.result.fetched,
            skipped: tally.result.skipped,
            failed: tally.result.failed,
        });
    }
}

/// Merge two lists, alternating while both have items
fn interleave(a: Vec<WorkItem>, b: Vec<WorkItem>) -> VecDeque<WorkItem> {
    let mut merged = VecDeque::with_capacity(a.len() + b.len());
    let mut a = a.into_iter();
    let mut b = b.into_iter();
    loop {
        match (a.next(), b.next()) {
            (None, None) => break,
            (x, y) => {
                merged.extend(x);
                merged.extend(y);
            }
        }
    }
    merged
}
