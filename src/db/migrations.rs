//! Opening the history store and bringing its schema up to date.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use super::Database;

/// How long a statement waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// One schema step: version number, label for logs, statements run in order
struct Migration {
    version: i64,
    label: &'static str,
    statements: &'static [&'static str],
}

/// Every schema step, oldest first. Append only.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    label: "history ledger",
    statements: &[
        r#"
        CREATE TABLE history (
            kind TEXT NOT NULL,
            remote_id TEXT NOT NULL,
            local_path TEXT NOT NULL,
            completed_at INTEGER NOT NULL,
            content_fingerprint TEXT,
            PRIMARY KEY (kind, remote_id)
        )
        "#,
        "CREATE INDEX idx_history_completed ON history(completed_at DESC)",
    ],
}];

fn connection_failed(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::ConnectionFailed(format!("{}: {}", context, e)))
}

fn migration_failed(context: String, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::MigrationFailed(format!("{}: {}", context, e)))
}

impl Database {
    /// Open (or create) the history store at `path`
    ///
    /// Creates the parent directory and the database file if needed, switches to WAL with
    /// `synchronous = FULL` so a committed row survives a crash, and applies any pending
    /// schema steps.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| connection_failed("Failed to create database directory", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| connection_failed("Failed to parse database path", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| connection_failed("Failed to connect to database", e))?;

        let db = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        db.migrate().await?;

        tracing::debug!(path = %path.display(), "History store opened");
        Ok(db)
    }

    /// Apply every step in [`MIGRATIONS`] newer than the recorded schema version
    async fn migrate(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| connection_failed("Failed to acquire connection", e))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| migration_failed("Failed to create schema_version table".into(), e))?;

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| migration_failed("Failed to read schema version".into(), e))?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            Self::apply(&mut conn, migration).await?;
        }
        Ok(())
    }

    /// Run one step and record it, all in a single transaction
    async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
        tracing::info!(
            version = migration.version,
            label = migration.label,
            "Applying history store migration"
        );
        let step = |what: &str| {
            format!(
                "Migration v{} ({}): {}",
                migration.version, migration.label, what
            )
        };

        // Dropping the transaction without commit rolls the step back
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| migration_failed(step("begin"), e))?;

        for statement in migration.statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| migration_failed(step("statement failed"), e))?;
        }

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(migration.version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(|e| migration_failed(step("record version"), e))?;

        tx.commit()
            .await
            .map_err(|e| migration_failed(step("commit"), e))?;
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
