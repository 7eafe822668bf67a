//! History store for report-sync
//!
//! SQLite ledger of every artifact that has been fully written to disk. Presence of a row
//! for `(kind, remote_id)` is what makes a later sync skip the artifact.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by concern:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`history`] - Lookups, commits and housekeeping on the `history` table

use crate::error::DatabaseError;
use crate::types::{ArtifactKind, HistoryEntry};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;
use tokio::sync::Mutex;

mod history;
mod migrations;

/// History record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// `report` or `image`
    pub kind: String,
    /// Catalog identifier
    pub remote_id: String,
    /// Final location of the file
    pub local_path: String,
    /// Unix timestamp when the file was committed
    pub completed_at: i64,
    /// Fingerprint of the committed bytes
    pub content_fingerprint: Option<String>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = DatabaseError;

    fn try_from(row: HistoryRow) -> std::result::Result<Self, Self::Error> {
        use chrono::{TimeZone, Utc};

        let kind = ArtifactKind::from_db(&row.kind).ok_or_else(|| {
            DatabaseError::CorruptRow(format!(
                "unknown artifact kind '{}' for {}",
                row.kind, row.remote_id
            ))
        })?;
        let completed_at = Utc
            .timestamp_opt(row.completed_at, 0)
            .single()
            .ok_or_else(|| {
                DatabaseError::CorruptRow(format!(
                    "invalid completion timestamp {} for {}",
                    row.completed_at, row.remote_id
                ))
            })?;

        Ok(HistoryEntry {
            kind,
            remote_id: row.remote_id,
            local_path: PathBuf::from(row.local_path),
            completed_at,
            content_fingerprint: row.content_fingerprint,
        })
    }
}

/// Database handle for report-sync
///
/// Reads go straight to the pool and may run concurrently with a commit; commits are
/// serialized through `write_lock` so there is only ever one writer.
pub struct Database {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
