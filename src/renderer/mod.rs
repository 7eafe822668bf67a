//! Document rendering
//!
//! Reports are turned into PDF documents by an external browser engine behind the
//! [`DocumentRenderer`] trait. [`ChromeRenderer`] drives a headless Chrome/Chromium/Edge;
//! [`report_html`] builds the HTML it prints; [`ReportRenderer`] is the worker-pool handler
//! for report items.
//!
//! ## Contract
//!
//! A successful [`DocumentRenderer::render`] leaves a complete document at `destination`.
//! A failed one leaves no file there (any existing file is untouched).

use crate::error::{ItemError, RenderError};
use crate::fetcher::ImageSource;
use crate::organizer;
use crate::pool::WorkHandler;
use crate::types::WorkItem;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

mod chrome;
pub mod report_html;

pub use chrome::ChromeRenderer;

/// What to render
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderSource {
    /// A page the engine loads itself
    Url(String),
    /// A complete HTML document
    Html(String),
}

/// Converts a web document into a durable document file
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render `source` to `destination`
    ///
    /// Errors other than [`RenderError::EngineMissing`] are worth retrying.
    async fn render(&self, source: &RenderSource, destination: &Path) -> Result<(), RenderError>;

    /// Check that the engine can be used at all
    ///
    /// Called once before any report work is dispatched.
    async fn check_available(&self) -> Result<(), RenderError>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Worker-pool handler for report items
///
/// Renders from the report payload when the catalog supplied one, otherwise from the
/// report's URL. With an image source attached, photos and signatures are downloaded and
/// inlined; an image that cannot be fetched stays linked by URL. The fingerprint of a
/// rendered document is its size, since engines embed timestamps that make byte hashes
/// differ between identical renders.
pub struct ReportRenderer {
    renderer: Arc<dyn DocumentRenderer>,
    images: Option<Arc<dyn ImageSource>>,
}

impl ReportRenderer {
    /// Wrap a renderer
    pub fn new(renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self {
            renderer,
            images: None,
        }
    }

    /// Inline report images fetched through `images`
    pub fn with_image_source(mut self, images: Arc<dyn ImageSource>) -> Self {
        self.images = Some(images);
        self
    }

    async fn source_for(&self, item: &WorkItem) -> Result<RenderSource, ItemError> {
        let (Some(images), Some(details)) = (&self.images, &item.artifact.details) else {
            return report_source(item);
        };

        let mut embedded = report_html::EmbeddedImages::new();
        for url in report_html::image_urls(details) {
            match images.download(&url).await {
                Ok(bytes) => {
                    embedded.insert(url, report_html::data_uri(&bytes));
                }
                Err(e) => tracing::warn!(
                    remote_id = %item.artifact.remote_id,
                    url = %url,
                    error = %e,
                    "Could not inline report image, linking it instead"
                ),
            }
        }
        Ok(RenderSource::Html(report_html::build_embedded(details, &embedded)))
    }
}

/// Pick the source a report is rendered from
pub fn report_source(item: &WorkItem) -> Result<RenderSource, ItemError> {
    match &item.artifact.details {
        Some(details) => Ok(RenderSource::Html(report_html::build(details))),
        None if !item.artifact.source_url.trim().is_empty() => {
            Ok(RenderSource::Url(item.artifact.source_url.clone()))
        }
        None => Err(ItemError::MissingSource),
    }
}

#[async_trait]
impl WorkHandler for ReportRenderer {
    async fn attempt(&self, item: &WorkItem) -> Result<Option<String>, ItemError> {
        let source = self.source_for(item).await?;
        organizer::ensure_parent(&item.destination).await?;

        self.renderer.render(&source, &item.destination).await?;

        let len = tokio::fs::metadata(&item.destination).await?.len();
        tracing::debug!(
            remote_id = %item.artifact.remote_id,
            engine = self.renderer.name(),
            bytes = len,
            "Report rendered"
        );
        Ok(Some(format!("size:{}", len)))
    }
}
