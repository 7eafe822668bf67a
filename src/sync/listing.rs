//! Listing and diffing

use super::SmartSync;
use crate::error::Result;
use crate::organizer;
use crate::types::{
    ArtifactKind, ArtifactRef, Event, ItemFailure, SyncFilter, SyncResult, WorkItem,
};
use futures::TryStreamExt;
use std::collections::HashSet;

/// Work left after the diff, split by the pool that handles it
#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub(crate) reports: Vec<WorkItem>,
    pub(crate) images: Vec<WorkItem>,
}

impl Plan {
    pub(crate) fn len(&self) -> usize {
        self.reports.len() + self.images.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SmartSync {
    /// Pull candidates for every selected kind
    ///
    /// Items the catalog returns outside the filter are dropped, as are repeats of a
    /// (kind, remote_id) already seen in this listing. Any catalog error ends the listing.
    pub(crate) async fn list_candidates(&self, filter: &SyncFilter) -> Result<Vec<ArtifactRef>> {
        let mut seen: HashSet<(ArtifactKind, String)> = HashSet::new();
        let mut candidates = Vec::new();
        let mut reports = 0;
        let mut images = 0;

        for kind in [ArtifactKind::Report, ArtifactKind::Image] {
            if !filter.kinds().includes(kind) {
                continue;
            }

            let mut stream = match kind {
                ArtifactKind::Report => self.catalog.list_reports(filter).await?,
                ArtifactKind::Image => self.catalog.list_images(filter).await?,
            };

            while let Some(artifact) = stream.try_next().await? {
                if artifact.kind != kind || !filter.matches(&artifact) {
                    tracing::debug!(
                        kind = %artifact.kind,
                        remote_id = %artifact.remote_id,
                        "Catalog returned an item outside the filter, ignoring"
                    );
                    continue;
                }
                if !seen.insert((artifact.kind, artifact.remote_id.clone())) {
                    tracing::debug!(
                        kind = %artifact.kind,
                        remote_id = %artifact.remote_id,
                        "Duplicate catalog item collapsed"
                    );
                    continue;
                }
                match kind {
                    ArtifactKind::Report => reports += 1,
                    ArtifactKind::Image => images += 1,
                }
                candidates.push(artifact);
            }
        }

        tracing::info!(reports, images, "Catalog listing complete");
        self.emit_event(Event::Listed { reports, images });
        Ok(candidates)
    }

    /// Split candidates into skipped, malformed and work to do
    pub(crate) async fn diff(
        &self,
        candidates: Vec<ArtifactRef>,
        result: &mut SyncResult,
    ) -> Result<Plan> {
        let base_dir = &self.config.output.base_dir;
        let mut plan = Plan::default();

        for artifact in candidates {
            if self.db.exists(artifact.kind, &artifact.remote_id).await? {
                result.skipped += 1;
                self.emit_event(Event::Skipped {
                    kind: artifact.kind,
                    remote_id: artifact.remote_id,
                });
                continue;
            }

            if let Err(e) = artifact.validate() {
                tracing::warn!(
                    kind = %artifact.kind,
                    remote_id = %artifact.remote_id,
                    error = %e,
                    "Malformed catalog item, not dispatching"
                );
                self.emit_event(Event::ItemFailed {
                    kind: artifact.kind,
                    remote_id: artifact.remote_id.clone(),
                    error: e.to_string(),
                });
                result.record_failure(ItemFailure {
                    kind: artifact.kind,
                    remote_id: artifact.remote_id.clone(),
                    description: artifact.describe(),
                    reason: e.to_string(),
                    attempts: 0,
                });
                continue;
            }

            let destination = organizer::resolve_path(&artifact, base_dir);
            let item = WorkItem::new(artifact, destination);
            match item.artifact.kind {
                ArtifactKind::Report => plan.reports.push(item),
                ArtifactKind::Image => plan.images.push(item),
            }
        }

        tracing::info!(
            skipped = result.skipped,
            malformed = result.failed,
            reports = plan.reports.len(),
            images = plan.images.len(),
            "Diff against history complete"
        );
        Ok(plan)
    }
}
