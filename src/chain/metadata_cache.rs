//! Cache of off-chain metadata URI → image URL.

use anyhow::{anyhow, Context, Result};
use moka::future::Cache;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct OffChainMetadata {
    image: Option<String>,
}

/// Image URLs resolved from metadata JSON, fetched at most once per URI.
#[derive(Clone)]
pub struct MetadataCache {
    http: reqwest::Client,
    images: Cache<String, String>,
}

impl MetadataCache {
    pub fn new(http: reqwest::Client, max_entries: usize) -> Self {
        Self {
            http,
            images: Cache::builder()
                .max_capacity(max_entries as u64)
                .time_to_idle(Duration::from_secs(3600))
                .build(),
        }
    }

    /// Image URL for `uri`, fetching the metadata JSON on a miss.
    #[instrument(skip(self))]
    pub async fn image_for(&self, uri: &str) -> Result<String> {
        if uri.is_empty() {
            return Err(anyhow!("Asset has no metadata URI"));
        }
        self.images
            .try_get_with(uri.to_string(), self.fetch_image(uri))
            .await
            .map_err(|e| anyhow!("Failed to resolve image for {}: {}", uri, e))
    }

    async fn fetch_image(&self, uri: &str) -> Result<String> {
        debug!("Fetching off-chain metadata");
        let metadata: OffChainMetadata = self
            .http
            .get(uri)
            .send()
            .await
            .context("Metadata request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Metadata is not valid JSON")?;
        metadata
            .image
            .ok_or_else(|| anyhow!("Metadata has no image"))
    }

    /// Seed the cache with a known image.
    pub async fn insert(&self, uri: &str, image: &str) {
        self.images.insert(uri.to_string(), image.to_string()).await;
    }

    pub async fn cached(&self, uri: &str) -> Option<String> {
        self.images.get(uri).await
    }
}
