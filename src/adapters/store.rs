//! HTTP object-store client.
//!
//! Blobs are addressed by `(bucket, key)` and are completely opaque to the
//! store: everything the pipeline uploads is already AEAD-encrypted. The
//! client is stateless apart from the pooled connections inside
//! [`reqwest::Client`], so one instance is safe to share across
//! simultaneous runs.

use crate::adapters::ObjectStore;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;

/// Connection settings for [`HttpObjectStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL, e.g. `https://store.internal`.
    pub base_url: String,
    pub api_token: String,
}

/// Object store backed by a simple REST surface:
/// `PUT/GET/DELETE {base}/{bucket}/{key}`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    config: StoreConfig,
}

impl HttpObjectStore {
    pub fn new(client: reqwest::Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            bucket,
            key
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = self.url(bucket, key);
        self.client
            .put(&url)
            .bearer_auth(&self.config.api_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::StoreUpload {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        Ok(url)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.url(bucket, key))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::StoreDownload {
                key: key.to_string(),
                detail: e.to_string(),
            })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::StoreDownload {
                key: key.to_string(),
                detail: format!("body read failed: {e}"),
            })?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete(self.url(bucket, key))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::StoreDelete {
                key: key.to_string(),
                detail: e.to_string(),
            })?;
        Ok(())
    }
}
