//! Retry logic with exponential backoff
//!
//! Every work item (image download, report render) runs through [`with_retry`]. Transient
//! failures are retried with exponential backoff and optional jitter until
//! [`RetryConfig::max_attempts`] attempts have been made; permanent failures return at once.
//!
//! # Example
//!
//! ```no_run
//! use report_sync::retry::{IsRetryable, with_retry};
//! use report_sync::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let value = with_retry(&config, || async { Ok::<_, MyError>(7) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{ItemError, RenderError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, resets, 5xx, renderer crash) should return `true`.
/// Permanent failures (404, missing source, engine not installed) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for RenderError {
    fn is_retryable(&self) -> bool {
        match self {
            // Nothing to retry without an engine
            RenderError::EngineMissing(_) => false,
            RenderError::Timeout { .. } => true,
            RenderError::Crashed { .. } => true,
            // Browsers occasionally exit 0 with an empty file under memory pressure
            RenderError::InvalidOutput(_) => true,
            RenderError::Io(e) => is_transient_io(e),
        }
    }
}

impl IsRetryable for ItemError {
    fn is_retryable(&self) -> bool {
        match self {
            ItemError::MissingSource => false,
            // Server-side trouble and rate limiting are worth another try, client errors are not
            ItemError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ItemError::Network(_) => true,
            ItemError::EmptyBody(_) => true,
            ItemError::Render(e) => e.is_retryable(),
            ItemError::Io(e) => is_transient_io(e),
            // Commit happens outside the retry loop
            ItemError::Commit(_) => false,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::ResourceBusy
    )
}

/// Delay schedule between attempts of one work item
///
/// Starts at `initial_delay`, grows by `backoff_multiplier` and is capped at `max_delay`.
/// With jitter on, each returned delay lands somewhere in `[d, 2d]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    /// Fresh schedule for `config`
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            multiplier: config.backoff_multiplier,
            cap: config.max_delay,
            jitter: config.jitter,
        }
    }

    /// Delay before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = scale(base, self.multiplier).min(self.cap);
        if self.jitter { add_jitter(base) } else { base }
    }
}

/// Run `operation` until it succeeds, fails permanently, or `config.max_attempts` is used up
///
/// Returns the successful result or the last error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    with_retry_notify(config, operation, |_, _| {}).await
}

/// Like [`with_retry`], calling `on_retry(attempt, &error)` before each backoff sleep
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub async fn with_retry_notify<F, Fut, T, E, N>(
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
    N: FnMut(u32, &E),
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = Backoff::new(config);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let e = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "Item succeeded on retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !e.is_retryable() {
            tracing::debug!(error = %e, attempt, "Permanent failure, not retrying");
            return Err(e);
        }
        if attempt >= max_attempts {
            tracing::warn!(error = %e, attempts = attempt, "Retries exhausted");
            return Err(e);
        }

        let delay = backoff.next_delay();
        tracing::warn!(
            error = %e,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, backing off"
        );
        on_retry(attempt, &e);
        tokio::time::sleep(delay).await;
    }
}

/// Stretch `delay` by a random factor in `[1, 2]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    scale(delay, factor)
}

/// `delay * factor`, saturating at [`Duration::MAX`] (NaN and negative factors included)
fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_max_attempts_counts_the_first_try() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "three attempts in total, not three retries"
        );
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Permanent)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notify_reports_each_failed_attempt() {
        let mut seen = Vec::new();
        let result = with_retry_notify(
            &fast_config(3),
            || async { Err::<(), _>(TestError::Transient) },
            |attempt, e| seen.push((attempt, e.to_string())),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(
            seen,
            vec![(1, "transient error".to_string()), (2, "transient error".to_string())],
            "no notification after the final attempt"
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(&RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
            jitter: false,
        });
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 300, 300]);
    }

    #[test]
    fn oversized_backoff_saturates_at_the_cap() {
        let mut backoff = Backoff::new(&RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1e30,
            jitter: true,
        });
        for _ in 0..5 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }

        let mut nan = Backoff::new(&RetryConfig {
            backoff_multiplier: f64::NAN,
            jitter: false,
            ..fast_config(3)
        });
        assert_eq!(nan.next_delay(), Duration::from_millis(5));
        assert_eq!(nan.next_delay(), Duration::from_millis(20), "clamped to max_delay");
    }

    #[test]
    fn jitter_on_a_huge_delay_does_not_overflow() {
        assert_eq!(add_jitter(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_jitter_stays_within_double_delay() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = add_jitter(base);
            assert!(jittered >= base && jittered <= base * 2);
        }
    }

    #[test]
    fn http_status_classification() {
        let status = |code| ItemError::HttpStatus {
            status: code,
            url: "https://cdn.example.com/x.jpg".into(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
    }

    #[test]
    fn render_error_classification() {
        assert!(!RenderError::EngineMissing("none".into()).is_retryable());
        assert!(RenderError::Timeout { secs: 1 }.is_retryable());
        assert!(
            RenderError::Crashed {
                status: "exit status: 1".into(),
                stderr: String::new()
            }
            .is_retryable()
        );
        assert!(ItemError::Render(RenderError::Timeout { secs: 1 }).is_retryable());
        assert!(!ItemError::MissingSource.is_retryable());
    }
}
