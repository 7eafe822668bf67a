//! Bounded worker pools
//!
//! A [`WorkerPool`] owns a bounded queue of [`WorkItem`]s shared by a fixed number of worker
//! tasks. Each worker repeatedly:
//! 1. Takes the next item from the queue
//! 2. Hands it back as [`Outcome::Cancelled`] if the run has been cancelled
//! 3. Otherwise runs the pool's [`WorkHandler`] under the retry policy
//! 4. Sends the [`WorkOutcome`] to the results channel
//!
//! Workers exit once the queue is closed and empty. No ordering is guaranteed across
//! items; the number of items in flight never exceeds the worker count.

use crate::config::RetryConfig;
use crate::error::ItemError;
use crate::retry::with_retry_notify;
use crate::types::{Event, Outcome, WorkItem, WorkOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Performs one attempt at materializing a work item
///
/// The pool takes care of retries, so an implementation only makes a single attempt and
/// reports whether the failure is worth retrying through
/// [`IsRetryable`](crate::retry::IsRetryable) on the returned [`ItemError`]. On success the
/// file must be complete at `item.destination`; the returned string is its fingerprint.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Make one attempt
    async fn attempt(&self, item: &WorkItem) -> Result<Option<String>, ItemError>;
}

/// Fixed-size pool of workers draining one bounded queue
pub struct WorkerPool {
    name: &'static str,
    queue_tx: mpsc::Sender<WorkItem>,
    workers: Vec<JoinHandle<()>>,
}

/// Everything a worker task needs, cloned once per worker
struct WorkerContext {
    pool: &'static str,
    index: usize,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    handler: Arc<dyn WorkHandler>,
    retry: RetryConfig,
    results: mpsc::Sender<WorkOutcome>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `workers` worker tasks sharing a queue of `capacity` items
    ///
    /// Both values are clamped to at least one.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        name: &'static str,
        workers: usize,
        capacity: usize,
        handler: Arc<dyn WorkHandler>,
        retry: RetryConfig,
        results: mpsc::Sender<WorkOutcome>,
        event_tx: broadcast::Sender<Event>,
        cancel: CancellationToken,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        let queue = Arc::new(Mutex::new(queue_rx));

        let workers = (0..workers.max(1))
            .map(|index| {
                let ctx = WorkerContext {
                    pool: name,
                    index,
                    queue: Arc::clone(&queue),
                    handler: Arc::clone(&handler),
                    retry: retry.clone(),
                    results: results.clone(),
                    event_tx: event_tx.clone(),
                    cancel: cancel.clone(),
                };
                tokio::spawn(run_worker(ctx))
            })
            .collect::<Vec<_>>();

        tracing::debug!(pool = name, workers = workers.len(), "Worker pool started");

        Self {
            name,
            queue_tx,
            workers,
        }
    }

    /// Pool name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of worker tasks
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for queue space and return a permit to enqueue one item
    ///
    /// Fails only if every worker has exited.
    pub async fn reserve(&self) -> Result<mpsc::Permit<'_, WorkItem>, mpsc::error::SendError<()>> {
        self.queue_tx.reserve().await
    }

    /// Close the queue and wait for every worker to finish its remaining items
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(pool = self.name, error = %e, "Worker task panicked");
            }
        }
        tracing::debug!(pool = self.name, "Worker pool stopped");
    }
}

async fn run_worker(ctx: WorkerContext) {
    loop {
        // Hold the lock only while waiting for the next item
        let next = {
            let mut queue = ctx.queue.lock().await;
            queue.recv().await
        };
        let Some(mut item) = next else {
            break;
        };

        let outcome = if ctx.cancel.is_cancelled() {
            Outcome::Cancelled
        } else {
            process_item(&ctx, &mut item).await
        };

        if ctx.results.send(WorkOutcome { item, outcome }).await.is_err() {
            tracing::warn!(
                pool = ctx.pool,
                worker = ctx.index,
                "Results channel closed, worker exiting"
            );
            break;
        }
    }
}

async fn process_item(ctx: &WorkerContext, item: &mut WorkItem) -> Outcome {
    let kind = item.artifact.kind;
    let remote_id = item.artifact.remote_id.clone();

    tracing::debug!(
        pool = ctx.pool,
        worker = ctx.index,
        kind = %kind,
        remote_id = %remote_id,
        "Processing item"
    );
    ctx.event_tx
        .send(Event::ItemStarted {
            kind,
            remote_id: remote_id.clone(),
            description: item.artifact.describe(),
        })
        .ok();

    let mut attempts = item.attempts;
    let result = {
        let item = &*item;
        let handler = &ctx.handler;
        with_retry_notify(
            &ctx.retry,
            || {
                attempts += 1;
                handler.attempt(item)
            },
            |attempt, e: &ItemError| {
                ctx.event_tx
                    .send(Event::ItemRetrying {
                        kind,
                        remote_id: remote_id.clone(),
                        attempt,
                        error: e.to_string(),
                    })
                    .ok();
            },
        )
        .await
    };
    item.attempts = attempts;

    match result {
        Ok(fingerprint) => Outcome::Completed { fingerprint },
        Err(e) => Outcome::Failed(e),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtifactKind, ArtifactRef};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn item(id: usize) -> WorkItem {
        WorkItem::new(
            ArtifactRef {
                kind: ArtifactKind::Image,
                remote_id: id.to_string(),
                technician_name: "Alice".into(),
                client_name: "Acme".into(),
                created_at: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                source_url: format!("https://cdn.example.com/{id}.jpg"),
                details: None,
            },
            PathBuf::from(format!("/tmp/{id}.jpg")),
        )
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Tracks how many attempts run at once
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    #[async_trait]
    impl WorkHandler for Gauge {
        async fn attempt(&self, _item: &WorkItem) -> Result<Option<String>, ItemError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl WorkHandler for AlwaysDown {
        async fn attempt(&self, _item: &WorkItem) -> Result<Option<String>, ItemError> {
            Err(ItemError::HttpStatus {
                status: 503,
                url: "https://cdn.example.com".into(),
            })
        }
    }

    async fn run_all(
        handler: Arc<dyn WorkHandler>,
        workers: usize,
        items: usize,
        cancel: CancellationToken,
    ) -> Vec<WorkOutcome> {
        let (results_tx, mut results_rx) = mpsc::channel(items.max(1));
        let (event_tx, _) = broadcast::channel(1000);
        let pool = WorkerPool::spawn(
            "test",
            workers,
            2,
            handler,
            fast_retry(),
            results_tx,
            event_tx,
            cancel,
        );

        let producer = async move {
            for i in 0..items {
                pool.reserve().await.unwrap().send(item(i));
            }
            pool.shutdown().await;
        };
        let consumer = async move {
            let mut outcomes = Vec::new();
            while let Some(outcome) = results_rx.recv().await {
                outcomes.push(outcome);
            }
            outcomes
        };
        let ((), outcomes) = tokio::join!(producer, consumer);
        outcomes
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_worker_count() {
        let gauge = Arc::new(Gauge::default());
        let outcomes = run_all(gauge.clone(), 3, 20, CancellationToken::new()).await;

        assert_eq!(outcomes.len(), 20);
        assert!(
            outcomes
                .iter()
                .all(|o| matches!(o.outcome, Outcome::Completed { .. }))
        );
        let max = gauge.max.load(Ordering::SeqCst);
        assert!(max <= 3, "observed {max} concurrent attempts");
        assert!(max >= 2, "work should overlap, observed {max}");
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        let outcomes = run_all(Arc::new(AlwaysDown), 1, 2, CancellationToken::new()).await;

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert!(matches!(
                outcome.outcome,
                Outcome::Failed(ItemError::HttpStatus { status: 503, .. })
            ));
            assert_eq!(outcome.item.attempts, 3);
        }
    }

    #[tokio::test]
    async fn cancelled_pool_returns_items_unstarted() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let gauge = Arc::new(Gauge::default());

        let outcomes = run_all(gauge.clone(), 2, 5, cancel).await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| matches!(o.outcome, Outcome::Cancelled)));
        assert_eq!(gauge.max.load(Ordering::SeqCst), 0, "nothing ran");
    }
}
