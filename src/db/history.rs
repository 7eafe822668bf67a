//! History lookups, commits and housekeeping.

use crate::error::DatabaseError;
use crate::types::{ArtifactKind, HistoryEntry};
use crate::{Error, Result};

use super::{Database, HistoryRow};

impl Database {
    /// Whether an artifact has already been committed
    ///
    /// Primary-key lookup; safe to call while a commit is in progress.
    pub async fn exists(&self, kind: ArtifactKind, remote_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM history WHERE kind = ? AND remote_id = ?")
                .bind(kind.as_str())
                .bind(remote_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(found.is_some())
    }

    /// Record that an artifact is complete on disk
    ///
    /// Replaces any previous entry for the same `(kind, remote_id)` by deleting and
    /// inserting inside one transaction. Returns only after the transaction has committed.
    pub async fn commit(&self, entry: &HistoryEntry) -> Result<()> {
        let local_path = entry.local_path.to_str().ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "local path is not valid UTF-8: {}",
                entry.local_path.display()
            )))
        })?;

        let _writer = self.write_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;

        sqlx::query("DELETE FROM history WHERE kind = ? AND remote_id = ?")
            .bind(entry.kind.as_str())
            .bind(&entry.remote_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO history (kind, remote_id, local_path, completed_at, content_fingerprint)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.kind.as_str())
        .bind(&entry.remote_id)
        .bind(local_path)
        .bind(entry.completed_at.timestamp())
        .bind(&entry.content_fingerprint)
        .execute(&mut *tx)
        .await
        .map_err(Error::Sqlx)?;

        tx.commit().await.map_err(Error::Sqlx)?;

        tracing::debug!(
            kind = %entry.kind,
            remote_id = %entry.remote_id,
            path = %entry.local_path.display(),
            "History entry committed"
        );

        Ok(())
    }

    /// Get the entry for one artifact
    pub async fn get(&self, kind: ArtifactKind, remote_id: &str) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT kind, remote_id, local_path, completed_at, content_fingerprint
            FROM history
            WHERE kind = ? AND remote_id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        row.map(HistoryEntry::try_from)
            .transpose()
            .map_err(Error::Database)
    }

    /// Query history with pagination and optional kind filter
    ///
    /// Returns entries ordered by completion time (most recent first).
    pub async fn list_history(
        &self,
        kind_filter: Option<ArtifactKind>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let query = if let Some(kind) = kind_filter {
            sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT kind, remote_id, local_path, completed_at, content_fingerprint
                FROM history
                WHERE kind = ?
                ORDER BY completed_at DESC, remote_id ASC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(kind.as_str())
            .bind(limit as i64)
            .bind(offset as i64)
        } else {
            sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT kind, remote_id, local_path, completed_at, content_fingerprint
                FROM history
                ORDER BY completed_at DESC, remote_id ASC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(limit as i64)
            .bind(offset as i64)
        };

        let rows = query.fetch_all(&self.pool).await.map_err(Error::Sqlx)?;

        rows.into_iter()
            .map(|row| HistoryEntry::try_from(row).map_err(Error::Database))
            .collect()
    }

    /// Count history entries (optionally filtered by kind)
    pub async fn count_history(&self, kind_filter: Option<ArtifactKind>) -> Result<i64> {
        let count = if let Some(kind) = kind_filter {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history WHERE kind = ?")
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM history")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        };

        Ok(count)
    }

    /// Forget every recorded artifact
    ///
    /// The next sync re-fetches everything in range. Files on disk are left alone.
    /// Returns the number of entries removed.
    pub async fn clear_history(&self) -> Result<u64> {
        let _writer = self.write_lock.lock().await;

        let result = sqlx::query("DELETE FROM history")
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        tracing::info!(removed = result.rows_affected(), "History cleared");
        Ok(result.rows_affected())
    }
}
