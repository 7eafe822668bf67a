//! Core types for report-sync

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::{Error, ItemError, Result};

/// Class of a downloadable artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Service report, rendered to PDF
    Report,
    /// Photo attached to a report, downloaded as-is
    Image,
}

impl ArtifactKind {
    /// Text stored in the history table
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Report => "report",
            ArtifactKind::Image => "image",
        }
    }

    /// Parse the text stored in the history table
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "report" => Some(ArtifactKind::Report),
            "image" => Some(ArtifactKind::Image),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable unit as listed by the catalog
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Report or image
    pub kind: ArtifactKind,
    /// Identifier unique per kind and stable across catalog queries
    pub remote_id: String,
    /// Technician who performed the service
    pub technician_name: String,
    /// Client the service was performed for
    pub client_name: String,
    /// Service date
    pub created_at: NaiveDate,
    /// Where the bytes (images) or the web representation (reports) live
    pub source_url: String,
    /// Report payload from the catalog, rendered locally when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ArtifactRef {
    /// Short human-readable label for progress output
    pub fn describe(&self) -> String {
        format!(
            "{} {} ({} / {}, {})",
            self.kind, self.remote_id, self.technician_name, self.client_name, self.created_at
        )
    }

    /// Reject refs that can never be fetched, without retrying
    pub fn validate(&self) -> std::result::Result<(), ItemError> {
        let has_payload = self.kind == ArtifactKind::Report && self.details.is_some();
        if self.source_url.trim().is_empty() && !has_payload {
            return Err(ItemError::MissingSource);
        }
        Ok(())
    }
}

/// Persisted record that an artifact was materialized on disk
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Report or image
    pub kind: ArtifactKind,
    /// Catalog identifier
    pub remote_id: String,
    /// Final location of the file
    pub local_path: PathBuf,
    /// When the file was committed
    pub completed_at: DateTime<Utc>,
    /// `sha256:<hex>` of the bytes written, or `size:<n>` for rendered documents
    pub content_fingerprint: Option<String>,
}

/// Which artifact classes a run should sync
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindSelection {
    /// Reports only
    Reports,
    /// Images only
    Images,
    /// Reports and images
    #[default]
    Both,
}

impl KindSelection {
    /// Whether `kind` is selected
    pub fn includes(&self, kind: ArtifactKind) -> bool {
        match self {
            KindSelection::Reports => kind == ArtifactKind::Report,
            KindSelection::Images => kind == ArtifactKind::Image,
            KindSelection::Both => true,
        }
    }
}

/// Immutable selection criteria for one sync run
///
/// Only constructible through [`SyncFilter::new`], so every value has a valid range and at
/// least one technician.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncFilter {
    start: NaiveDate,
    end: NaiveDate,
    technicians: BTreeSet<String>,
    kinds: KindSelection,
}

impl SyncFilter {
    /// Build a filter over the inclusive range `[start, end]`
    pub fn new<I, S>(
        start: NaiveDate,
        end: NaiveDate,
        technicians: I,
        kinds: KindSelection,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if start > end {
            return Err(Error::InvalidFilter(format!(
                "start date {start} is after end date {end}"
            )));
        }
        let technicians: BTreeSet<String> = technicians.into_iter().map(Into::into).collect();
        if technicians.is_empty() {
            return Err(Error::InvalidFilter(
                "select at least one technician".to_string(),
            ));
        }
        Ok(Self {
            start,
            end,
            technicians,
            kinds,
        })
    }

    /// First day included
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day included
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Technician names included
    pub fn technicians(&self) -> &BTreeSet<String> {
        &self.technicians
    }

    /// Artifact classes included
    pub fn kinds(&self) -> KindSelection {
        self.kinds
    }

    /// Whether `date` lies inside the range
    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Local re-validation of a catalog result
    pub fn matches(&self, artifact: &ArtifactRef) -> bool {
        self.kinds.includes(artifact.kind)
            && self.contains_date(artifact.created_at)
            && self.technicians.contains(&artifact.technician_name)
    }
}

/// A scheduled unit of fetch or render work
///
/// Ownership moves from the orchestrator into a pool queue and from there to exactly one
/// worker, which hands it back inside a [`WorkOutcome`].
#[derive(Clone, Debug)]
pub struct WorkItem {
    /// What to fetch
    pub artifact: ArtifactRef,
    /// Where the finished file goes
    pub destination: PathBuf,
    /// Attempts made so far
    pub attempts: u32,
}

impl WorkItem {
    /// Wrap an artifact with its resolved destination
    pub fn new(artifact: ArtifactRef, destination: PathBuf) -> Self {
        Self {
            artifact,
            destination,
            attempts: 0,
        }
    }
}

/// How a work item ended
#[derive(Debug)]
pub enum Outcome {
    /// File is in place
    Completed {
        /// Fingerprint of what was written
        fingerprint: Option<String>,
    },
    /// All attempts failed or the failure was permanent
    Failed(ItemError),
    /// Never started because the run was cancelled
    Cancelled,
}

/// A work item handed back by a worker
#[derive(Debug)]
pub struct WorkOutcome {
    /// The item, with `attempts` updated
    pub item: WorkItem,
    /// How it ended
    pub outcome: Outcome,
}

/// One failed artifact in a [`SyncResult`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Report or image
    pub kind: ArtifactKind,
    /// Catalog identifier
    pub remote_id: String,
    /// Human-readable label
    pub description: String,
    /// Final error message
    pub reason: String,
    /// Attempts made before giving up
    pub attempts: u32,
}

/// Aggregate outcome of a sync run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Artifacts newly written and recorded
    pub fetched: usize,
    /// Reports among `fetched`
    pub fetched_reports: usize,
    /// Images among `fetched`
    pub fetched_images: usize,
    /// Artifacts already in history
    pub skipped: usize,
    /// Artifacts that failed (equals `failures.len()`)
    pub failed: usize,
    /// Work items not started because the run was cancelled
    pub cancelled: usize,
    /// Per-item failure details
    pub failures: Vec<ItemFailure>,
}

impl SyncResult {
    /// Count one newly fetched artifact
    pub fn record_fetched(&mut self, kind: ArtifactKind) {
        self.fetched += 1;
        match kind {
            ArtifactKind::Report => self.fetched_reports += 1,
            ArtifactKind::Image => self.fetched_images += 1,
        }
    }

    /// Count one failed artifact
    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failed += 1;
        self.failures.push(failure);
    }

    /// Whether every attempted artifact succeeded
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

/// Orchestrator state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// No run in progress
    #[default]
    Idle,
    /// Pulling candidates from the catalog
    Listing,
    /// Comparing candidates against history
    Diffing,
    /// Handing work items to the pools
    Dispatching,
    /// Waiting for outstanding work items
    Draining,
    /// Assembling the result
    Reporting,
}

/// Progress events emitted during a run
///
/// Front ends subscribe through [`SmartSync::subscribe`](crate::SmartSync::subscribe) or
/// [`SmartSync::progress_stream`](crate::SmartSync::progress_stream).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The orchestrator moved to another phase
    PhaseChanged {
        /// New phase
        phase: SyncPhase,
    },

    /// Catalog listing finished
    Listed {
        /// Report candidates that passed local filtering
        reports: usize,
        /// Image candidates that passed local filtering
        images: usize,
    },

    /// An artifact was already in history
    Skipped {
        /// Report or image
        kind: ArtifactKind,
        /// Catalog identifier
        remote_id: String,
    },

    /// A worker started on an item
    ItemStarted {
        /// Report or image
        kind: ArtifactKind,
        /// Catalog identifier
        remote_id: String,
        /// Human-readable label
        description: String,
    },

    /// An attempt failed and will be retried
    ItemRetrying {
        /// Report or image
        kind: ArtifactKind,
        /// Catalog identifier
        remote_id: String,
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Why it failed
        error: String,
    },

    /// File written and recorded
    ItemCompleted {
        /// Report or image
        kind: ArtifactKind,
        /// Catalog identifier
        remote_id: String,
        /// Final location
        path: PathBuf,
    },

    /// Item gave up
    ItemFailed {
        /// Report or image
        kind: ArtifactKind,
        /// Catalog identifier
        remote_id: String,
        /// Final error message
        error: String,
    },

    /// Running totals
    Progress {
        /// Work items resolved so far (any outcome)
        completed: usize,
        /// Work items scheduled in this run
        total: usize,
        /// Fetched so far
        fetched: usize,
        /// Skipped as already recorded
        skipped: usize,
        /// Failed so far
        failed: usize,
    },

    /// Run finished with a report
    Finished(SyncResult),

    /// Run stopped on a fatal error
    Aborted {
        /// Error message
        reason: String,
    },
}
