//! Image downloads
//!
//! [`ImageSource`] abstracts "give me the bytes behind this URL" so tests and embedders can
//! swap the transport; [`HttpImageSource`] is the reqwest implementation. [`ImageFetcher`]
//! is the worker-pool handler that downloads an image and writes it atomically to its
//! destination.

use crate::error::{Error, ItemError, Result};
use crate::organizer;
use crate::pool::WorkHandler;
use crate::types::WorkItem;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Fetches the raw bytes of a remote image
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Download `url` in full
    ///
    /// A non-success status maps to [`ItemError::HttpStatus`], transport failures to
    /// [`ItemError::Network`], and a zero-length body to [`ItemError::EmptyBody`].
    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, ItemError>;
}

/// [`ImageSource`] over HTTP(S)
///
/// With [`with_bearer_token`](Self::with_bearer_token) the catalog session token is sent
/// along, but only to URLs on the catalog's own origin.
pub struct HttpImageSource {
    http: reqwest::Client,
    auth: Option<(url::Origin, String)>,
}

impl HttpImageSource {
    /// Build a client with a per-request timeout
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(Error::Network)?;
        Ok(Self { http, auth: None })
    }

    /// Authenticate requests to `catalog_base_url`'s origin with `token`
    ///
    /// # Errors
    /// Returns error if `catalog_base_url` is not a valid URL
    pub fn with_bearer_token(
        mut self,
        catalog_base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self> {
        let origin = url::Url::parse(catalog_base_url)
            .map_err(|e| Error::Config {
                message: format!("invalid catalog base URL '{}': {}", catalog_base_url, e),
                key: Some("catalog.base_url".to_string()),
            })?
            .origin();
        self.auth = Some((origin, token.into()));
        Ok(self)
    }

    fn token_for(&self, url: &str) -> Option<&str> {
        let (origin, token) = self.auth.as_ref()?;
        let target = url::Url::parse(url).ok()?.origin();
        (target == *origin).then_some(token.as_str())
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, ItemError> {
        let mut request = self.http.get(url);
        if let Some(token) = self.token_for(url) {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ItemError::Network(format!("timeout fetching {}", url))
            } else if e.is_connect() {
                ItemError::Network(format!("connection failed for {}: {}", url, e))
            } else {
                ItemError::from(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ItemError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            ItemError::Network(format!("failed to read body from {}: {}", url, e))
        })?;
        if bytes.is_empty() {
            return Err(ItemError::EmptyBody(url.to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Worker-pool handler for image items
///
/// Fingerprints are `sha256:<hex>` of the stored bytes.
pub struct ImageFetcher {
    source: Arc<dyn ImageSource>,
}

impl ImageFetcher {
    /// Wrap an image source
    pub fn new(source: Arc<dyn ImageSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl WorkHandler for ImageFetcher {
    async fn attempt(&self, item: &WorkItem) -> std::result::Result<Option<String>, ItemError> {
        let url = item.artifact.source_url.trim();
        if url.is_empty() {
            return Err(ItemError::MissingSource);
        }

        let bytes = self.source.download(url).await?;
        organizer::write_atomic(&bytes, &item.destination).await?;

        let digest = Sha256::digest(&bytes);
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();

        tracing::debug!(
            remote_id = %item.artifact.remote_id,
            bytes = bytes.len(),
            path = %item.destination.display(),
            "Image stored"
        );
        Ok(Some(format!("sha256:{}", hex)))
    }
}
