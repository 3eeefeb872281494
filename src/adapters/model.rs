//! HTTP client for the structure-detection model.
//!
//! Two endpoints, one per detection kind. Prompt engineering lives entirely
//! on the service side; this client only ships text in and parses the
//! structured verdict out, so the model can be retrained or re-prompted
//! without touching the pipeline.

use crate::adapters::{LegendDetection, StructureModel, TocDetection};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::Serialize;

/// Connection settings for [`HttpStructureModel`].
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Base URL, e.g. `https://structure.internal`.
    pub base_url: String,
    pub api_token: String,
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    text: &'a str,
}

/// Structure-detection client backed by `reqwest`.
pub struct HttpStructureModel {
    client: reqwest::Client,
    config: ModelConfig,
}

impl HttpStructureModel {
    pub fn new(client: reqwest::Client, config: ModelConfig) -> Self {
        Self { client, config }
    }

    async fn detect<T: serde::de::DeserializeOwned>(&self, op: &str, text: &str) -> Result<T> {
        let response = self
            .client
            .post(format!(
                "{}/v1/detect/{op}",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_token)
            .json(&DetectRequest { text })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Detection {
                detail: format!("{op}: {e}"),
            })?;

        response.json().await.map_err(|e| PipelineError::Detection {
            detail: format!("{op}: malformed response: {e}"),
        })
    }
}

#[async_trait]
impl StructureModel for HttpStructureModel {
    async fn detect_toc(&self, batch_text: &str) -> Result<TocDetection> {
        self.detect("toc", batch_text).await
    }

    async fn detect_legend(&self, text: &str) -> Result<LegendDetection> {
        self.detect("legend", text).await
    }
}
