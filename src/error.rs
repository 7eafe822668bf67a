//! Error types for report-sync
//!
//! Errors are split by how far they propagate:
//! - [`Error`] terminates a sync run (catalog unreachable, history store unopenable,
//!   renderer missing, output directory unwritable, invalid configuration)
//! - [`ItemError`] belongs to a single work item and ends up in
//!   [`SyncResult::failures`](crate::types::SyncResult) instead of aborting the run
//! - [`CatalogError`], [`RenderError`] and [`DatabaseError`] describe failures of the
//!   individual collaborators and convert into either of the above

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for report-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for report-sync
///
/// Every variant is fatal for the run that produced it. Per-item problems never surface
/// here; see [`ItemError`].
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency.max_workers")
        key: Option<String>,
    },

    /// The sync filter is unusable (empty technician set, inverted date range)
    #[error("invalid sync filter: {0}")]
    InvalidFilter(String),

    /// History store operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Remote catalog could not be listed
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Document renderer cannot be used at all
    #[error("renderer error: {0}")]
    Render(#[from] RenderError),

    /// Output base directory cannot be created or written to
    #[error("output directory {path} is not writable: {source}")]
    OutputNotWritable {
        /// The directory that was checked
        path: PathBuf,
        /// The underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of a catalog listing (e.g. building the HTTP client)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A sync run is already in progress on this instance
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the remote session expired and the user must log in again
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::Catalog(CatalogError::AuthExpired(_)))
    }
}

/// History store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create the database file
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded into a domain value
    #[error("corrupt history row: {0}")]
    CorruptRow(String),
}

/// Remote catalog errors
///
/// All catalog errors are fatal for a run, but [`CatalogError::AuthExpired`] is kept apart
/// from transport failures so a front end can prompt for a new login instead of retrying.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The session token is missing, expired or was rejected
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Transport failure (DNS, connect, timeout, reset)
    #[error("catalog unreachable: {0}")]
    Network(String),

    /// Non-success HTTP status other than an authentication rejection
    #[error("catalog returned HTTP {status} for {endpoint}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Endpoint path that failed
        endpoint: String,
    },

    /// Response could not be understood
    #[error("unexpected catalog response from {endpoint}: {reason}")]
    Protocol {
        /// Endpoint path that returned the response
        endpoint: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Document renderer errors
#[derive(Debug, Error)]
pub enum RenderError {
    /// No usable browser engine executable could be found or started
    #[error("browser engine not available: {0}")]
    EngineMissing(String),

    /// Rendering did not finish within the configured timeout
    #[error("rendering timed out after {secs}s")]
    Timeout {
        /// Timeout that was exceeded, in seconds
        secs: u64,
    },

    /// The engine exited unsuccessfully
    #[error("browser engine exited with {status}: {stderr}")]
    Crashed {
        /// Exit status description
        status: String,
        /// Tail of the engine's stderr
        stderr: String,
    },

    /// The engine exited cleanly but produced no usable document
    #[error("invalid render output: {0}")]
    InvalidOutput(String),

    /// Staging or rename I/O failed
    #[error("render I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors scoped to a single work item
#[derive(Debug, Error)]
pub enum ItemError {
    /// The artifact has nothing to fetch or render from
    #[error("artifact has no source URL")]
    MissingSource,

    /// The remote answered with a non-success status
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// URL that was requested
        url: String,
    },

    /// Transport-level failure (connect, timeout, reset, truncated body)
    #[error("network error: {0}")]
    Network(String),

    /// The remote returned zero bytes
    #[error("empty response body from {0}")]
    EmptyBody(String),

    /// Rendering failed
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// Local write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Work finished but the history entry could not be committed
    #[error("history commit failed: {0}")]
    Commit(String),
}

impl ItemError {
    /// Whether this failure must stop the whole run rather than just this item
    pub fn is_fatal(&self) -> bool {
        matches!(self, ItemError::Render(RenderError::EngineMissing(_)))
    }
}

impl From<reqwest::Error> for ItemError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ItemError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => ItemError::Network(e.to_string()),
        }
    }
}
