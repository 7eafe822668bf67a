//! Common test utilities for report-sync integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod renderer;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use renderer::*;

use report_sync::catalog::HttpCatalogClient;
use report_sync::config::{CatalogConfig, RetryConfig};
use report_sync::fetcher::HttpImageSource;
use report_sync::renderer::DocumentRenderer;
use report_sync::{Config, Credentials, Database, SmartSync};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

/// Config pointing at `server`, with all paths inside `dir` and fast retries
pub fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.credentials = Credentials {
        username: "admin".to_string(),
        password: "secret".to_string(),
    };
    config.catalog = CatalogConfig {
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    config.output.base_dir = dir.path().join("downloads");
    config.persistence.database_path = dir.path().join("download_history.db");
    config.concurrency.download_timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Log in against `server` and build a sync engine over real HTTP collaborators
///
/// Returns the engine and the temp directory holding its output and history (keep it
/// alive for the test duration).
pub async fn logged_in_sync(
    server: &MockServer,
    renderer: Arc<dyn DocumentRenderer>,
) -> (SmartSync, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(server, &dir);
    let sync = sync_in(&config, renderer).await;
    (sync, dir)
}

/// Build a sync engine for an existing config (e.g. to simulate a restart)
pub async fn sync_in(config: &Config, renderer: Arc<dyn DocumentRenderer>) -> SmartSync {
    let db = Arc::new(
        Database::open(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let catalog = HttpCatalogClient::new(&config.catalog).unwrap();
    catalog.login(&config.credentials).await.unwrap();
    let token = catalog.session_token().await.unwrap();
    let images = HttpImageSource::new(
        config.concurrency.download_timeout,
        &config.catalog.user_agent,
    )
    .unwrap()
    .with_bearer_token(catalog.base_url(), token)
    .unwrap();

    SmartSync::new(
        config.clone(),
        db,
        Arc::new(catalog),
        renderer,
        Arc::new(images),
    )
    .unwrap()
}
