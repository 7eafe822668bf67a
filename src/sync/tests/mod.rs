//! Orchestrator tests against in-memory collaborators

use crate::catalog::{ArtifactStream, CatalogClient};
use crate::config::{Config, RetryConfig};
use crate::db::Database;
use crate::error::{CatalogError, ItemError, RenderError};
use crate::fetcher::ImageSource;
use crate::organizer;
use crate::renderer::{DocumentRenderer, RenderSource};
use crate::sync::SmartSync;
use crate::types::{ArtifactKind, ArtifactRef, KindSelection, SyncFilter};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;


pub(super) const TECH: &str = "Budi Santoso";

pub(super) fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

pub(super) fn report(id: u32) -> ArtifactRef {
    ArtifactRef {
        kind: ArtifactKind::Report,
        remote_id: id.to_string(),
        technician_name: TECH.to_string(),
        client_name: "Hotel Mawar".to_string(),
        created_at: day(10),
        source_url: String::new(),
        details: Some(serde_json::json!({"schedule_id": id, "client_name": "Hotel Mawar"})),
    }
}

pub(super) fn image(id: &str) -> ArtifactRef {
    ArtifactRef {
        kind: ArtifactKind::Image,
        remote_id: id.to_string(),
        technician_name: TECH.to_string(),
        client_name: "Hotel Mawar".to_string(),
        created_at: day(10),
        source_url: format!("https://cdn.example.com/uploads/{id}.jpg"),
        details: None,
    }
}

pub(super) fn march_filter() -> SyncFilter {
    SyncFilter::new(day(1), day(31), [TECH], KindSelection::Both).unwrap()
}

/// Catalog serving fixed lists
#[derive(Default)]
pub(super) struct FakeCatalog {
    pub(super) reports: Mutex<Vec<ArtifactRef>>,
    pub(super) images: Mutex<Vec<ArtifactRef>>,
    pub(super) auth_expired: AtomicBool,
    pub(super) listings: AtomicUsize,
}

impl FakeCatalog {
    pub(super) fn with(reports: Vec<ArtifactRef>, images: Vec<ArtifactRef>) -> Self {
        Self {
            reports: Mutex::new(reports),
            images: Mutex::new(images),
            ..Default::default()
        }
    }

    fn listing(&self, items: &Mutex<Vec<ArtifactRef>>) -> Result<ArtifactStream, CatalogError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.auth_expired.load(Ordering::SeqCst) {
            return Err(CatalogError::AuthExpired("token rejected".into()));
        }
        let items = items.lock().unwrap().clone();
        Ok(futures::stream::iter(items.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn list_reports(&self, _filter: &SyncFilter) -> Result<ArtifactStream, CatalogError> {
        self.listing(&self.reports)
    }

    async fn list_images(&self, _filter: &SyncFilter) -> Result<ArtifactStream, CatalogError> {
        self.listing(&self.images)
    }
}

/// Renderer writing a small PDF-looking file
#[derive(Default)]
pub(super) struct FakeRenderer {
    pub(super) renders: AtomicUsize,
    /// `check_available` reports the engine missing
    pub(super) missing: AtomicBool,
    /// `render` reports the engine missing (it disappeared after the check)
    pub(super) vanishes: AtomicBool,
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, _source: &RenderSource, destination: &Path) -> Result<(), RenderError> {
        if self.vanishes.load(Ordering::SeqCst) {
            return Err(RenderError::EngineMissing("browser uninstalled".into()));
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        organizer::write_atomic(b"%PDF-1.4 fake", destination).await?;
        Ok(())
    }

    async fn check_available(&self) -> Result<(), RenderError> {
        if self.missing.load(Ordering::SeqCst) {
            return Err(RenderError::EngineMissing("no browser".into()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Image source returning the URL as bytes
#[derive(Default)]
pub(super) struct FakeImages {
    pub(super) downloads: Mutex<HashMap<String, usize>>,
    /// URLs answering 503
    pub(super) failing: Mutex<HashSet<String>>,
    pub(super) delay: Mutex<Duration>,
    current: AtomicUsize,
    pub(super) max_concurrent: AtomicUsize,
}

impl FakeImages {
    pub(super) fn total_downloads(&self) -> usize {
        self.downloads.lock().unwrap().values().sum()
    }

    pub(super) fn downloads_of(&self, url: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn download(&self, url: &str) -> Result<Vec<u8>, ItemError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        *self
            .downloads
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(url) {
            return Err(ItemError::HttpStatus {
                status: 503,
                url: url.to_string(),
            });
        }
        Ok(url.as_bytes().to_vec())
    }
}

/// A sync engine wired to fakes, with its temp directory
pub(super) struct Harness {
    pub(super) dir: tempfile::TempDir,
    pub(super) sync: SmartSync,
    pub(super) catalog: Arc<FakeCatalog>,
    pub(super) renderer: Arc<FakeRenderer>,
    pub(super) images: Arc<FakeImages>,
}

impl Harness {
    pub(super) fn output_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    pub(super) fn path_of(&self, artifact: &ArtifactRef) -> PathBuf {
        organizer::resolve_path(artifact, &self.output_dir())
    }
}

pub(super) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.output.base_dir = dir.join("downloads");
    config.persistence.database_path = dir.join("download_history.db");
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

pub(super) async fn harness(reports: Vec<ArtifactRef>, images: Vec<ArtifactRef>) -> Harness {
    harness_with(reports, images, |_| {}).await
}

pub(super) async fn harness_with(
    reports: Vec<ArtifactRef>,
    images: Vec<ArtifactRef>,
    tweak: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);

    let db = Arc::new(
        Database::open(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let catalog = Arc::new(FakeCatalog::with(reports, images));
    let renderer = Arc::new(FakeRenderer::default());
    let images = Arc::new(FakeImages::default());

    let sync = SmartSync::new(
        config,
        db,
        catalog.clone(),
        renderer.clone(),
        images.clone(),
    )
    .unwrap();

    Harness {
        dir,
        sync,
        catalog,
        renderer,
        images,
    }
}
