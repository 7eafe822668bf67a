use crate::db::Database;
use crate::types::{ArtifactKind, HistoryEntry};
use chrono::{TimeZone, Utc};
use std::path::PathBuf;


/// History entry completed at `completed_at` (unix seconds)
fn entry(kind: ArtifactKind, remote_id: &str, completed_at: i64) -> HistoryEntry {
    HistoryEntry {
        kind,
        remote_id: remote_id.to_string(),
        local_path: PathBuf::from(format!("/out/Alice/Hotel Mawar/{}_{}", kind, remote_id)),
        completed_at: Utc.timestamp_opt(completed_at, 0).unwrap(),
        content_fingerprint: Some(format!("size:{}", remote_id.len())),
    }
}

async fn open_temp() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("download_history.db"))
        .await
        .unwrap();
    (dir, db)
}
