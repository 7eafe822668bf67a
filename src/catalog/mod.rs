//! Remote catalog access
//!
//! The orchestrator only sees the [`CatalogClient`] trait: two finite listings, one per
//! artifact kind, for a given [`SyncFilter`]. [`HttpCatalogClient`] implements it against
//! the service's JSON API.

use crate::error::CatalogError;
use crate::types::{ArtifactRef, SyncFilter};
use async_trait::async_trait;
use futures::stream::BoxStream;

mod http;

pub use http::{HttpCatalogClient, Technician};

/// Finite, non-restartable listing of candidate artifacts
pub type ArtifactStream = BoxStream<'static, Result<ArtifactRef, CatalogError>>;

/// Source of candidate artifacts
///
/// Implementations should return only items matching the filter, but callers re-check every
/// item with [`SyncFilter::matches`] and must not rely on it. `remote_id` must be stable
/// across repeated listings of the same item.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// List report candidates
    async fn list_reports(&self, filter: &SyncFilter) -> Result<ArtifactStream, CatalogError>;

    /// List image candidates
    async fn list_images(&self, filter: &SyncFilter) -> Result<ArtifactStream, CatalogError>;
}
