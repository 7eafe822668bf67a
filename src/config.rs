//! Configuration types for report-sync
//!
//! The core never parses config files itself. Callers deserialize [`Config`] from whatever
//! format they keep on disk (all sub-configs are serde-friendly with defaults), call
//! [`Config::validate`], and hand the value to [`SmartSync`](crate::SmartSync). It is not
//! re-read during a run.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Largest accepted `retry.backoff_multiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Remote service login
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Account user name
    #[serde(default)]
    pub username: String,
    /// Account password
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Remote catalog API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// API base URL (default: "https://api.pestcare.id")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for a single catalog request (default: 20 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Where synced files land
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output base directory (default: "./downloads")
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

/// Worker pool sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Concurrent image downloads (default: 4)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Concurrent report renders (default: 1)
    ///
    /// Each render launches a full browser process, so keep this small.
    #[serde(default = "default_render_workers")]
    pub render_workers: usize,

    /// Capacity of each pool's input queue (default: 64)
    ///
    /// Dispatch waits for free space once a queue is full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for a single image download (default: 60 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub download_timeout: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            render_workers: default_render_workers(),
            queue_capacity: default_queue_capacity(),
            download_timeout: default_download_timeout(),
        }
    }
}

/// Headless browser settings for report rendering
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Path to a Chrome/Chromium executable (auto-detected if None)
    #[serde(default)]
    pub executable_path: Option<PathBuf>,

    /// Whether to search PATH and well-known install locations if no explicit path is set
    /// (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Timeout for rendering one document (default: 90 seconds)
    #[serde(default = "default_render_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            search_path: true,
            timeout: default_render_timeout(),
        }
    }
}

/// Retry behavior for per-item work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per item, including the first one (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// History store location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite history database path (default: "./download_history.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Inclusive date range remembered between sessions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day included
    pub start: NaiveDate,
    /// Last day included
    pub end: NaiveDate,
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote service login
    #[serde(default)]
    pub credentials: Credentials,

    /// Remote catalog API settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Output location
    #[serde(default)]
    pub output: OutputConfig,

    /// Worker pool sizing and per-download timeout
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Report renderer settings
    #[serde(default)]
    pub renderer: RendererConfig,

    /// Per-item retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// History store location
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Date range used by the previous session, if any
    #[serde(default)]
    pub last_range: Option<DateRange>,
}

impl Config {
    /// Check invariants the sync engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.max_workers == 0 {
            return Err(invalid("concurrency.max_workers", "must be at least 1"));
        }
        if self.concurrency.render_workers == 0 {
            return Err(invalid("concurrency.render_workers", "must be at least 1"));
        }
        if self.concurrency.queue_capacity == 0 {
            return Err(invalid("concurrency.queue_capacity", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.retry.backoff_multiplier) {
            return Err(invalid(
                "retry.backoff_multiplier",
                &format!("must be between 1.0 and {MAX_BACKOFF_MULTIPLIER}"),
            ));
        }
        if let Some(range) = self.last_range
            && range.start > range.end
        {
            return Err(invalid("last_range", "start is after end"));
        }
        url::Url::parse(&self.catalog.base_url)
            .map_err(|e| invalid("catalog.base_url", &format!("not a valid URL: {e}")))?;
        Ok(())
    }

    /// Date range to preselect: the remembered one, or the seven days ending `today`
    pub fn initial_range(&self, today: NaiveDate) -> DateRange {
        self.last_range.unwrap_or_else(|| DateRange {
            start: today.checked_sub_days(Days::new(7)).unwrap_or(today),
            end: today,
        })
    }
}

fn invalid(key: &str, message: &str) -> Error {
    Error::Config {
        message: format!("{key} {message}"),
        key: Some(key.to_string()),
    }
}

fn default_base_url() -> String {
    "https://api.pestcare.id".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_user_agent() -> String {
    concat!("report-sync/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_workers() -> usize {
    4
}

fn default_render_workers() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    64
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_render_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./download_history.db")
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.concurrency.max_workers, 4);
        assert_eq!(config.concurrency.render_workers, 1);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.renderer.search_path);
        assert!(config.renderer.executable_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_object_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.concurrency.max_workers, 4);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.persistence.database_path, default_database_path());
    }

    #[test]
    fn durations_are_read_as_seconds() {
        let json = r#"{"renderer": {"timeout": 5}, "retry": {"max_attempts": 2, "max_delay": 7}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.renderer.timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_delay, Duration::from_secs(7));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn zero_workers_is_rejected_with_key() {
        let mut config = Config::default();
        config.concurrency.max_workers = 0;
        match config.validate() {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("concurrency.max_workers"))
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn backoff_multiplier_must_be_finite_and_bounded() {
        for bad in [0.5, 1e30, f64::INFINITY, f64::NAN] {
            let mut config = Config::default();
            config.retry.backoff_multiplier = bad;
            match config.validate() {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("retry.backoff_multiplier"), "{bad}")
                }
                other => panic!("multiplier {bad} should be rejected, got {other:?}"),
            }
        }

        let mut config = Config::default();
        config.retry.backoff_multiplier = MAX_BACKOFF_MULTIPLIER;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let mut config = Config::default();
        config.catalog.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn initial_range_falls_back_to_last_week() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let range = Config::default().initial_range(today);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 3, 3).unwrap());
        assert_eq!(range.end, today);

        let remembered = DateRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        };
        let config = Config {
            last_range: Some(remembered),
            ..Default::default()
        };
        assert_eq!(config.initial_range(today), remembered);
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = Credentials {
            username: "tech@example.com".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("tech@example.com"));
        assert!(!shown.contains("hunter2"));
    }
}
