//! Render engine stand-in

use async_trait::async_trait;
use report_sync::RenderError;
use report_sync::organizer;
use report_sync::renderer::{DocumentRenderer, RenderSource};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Writes `%PDF-` followed by the HTML it was given
#[derive(Default)]
pub struct RecordingRenderer {
    renders: AtomicUsize,
}

impl RecordingRenderer {
    /// Documents rendered so far
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentRenderer for RecordingRenderer {
    async fn render(&self, source: &RenderSource, destination: &Path) -> Result<(), RenderError> {
        let body = match source {
            RenderSource::Html(html) => html.clone(),
            RenderSource::Url(url) => url.clone(),
        };
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.extend_from_slice(body.as_bytes());
        organizer::write_atomic(&bytes, destination).await?;
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_available(&self) -> Result<(), RenderError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
