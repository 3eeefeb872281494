//! HTTP client for the rasterisation service.
//!
//! Rendering is CPU-bound on the provider side; from this process it is
//! plain network I/O, so no blocking-pool dispatch is needed here. An
//! in-process implementation of [`RenderAdapter`] would have to use
//! `tokio::task::spawn_blocking` instead — the trait contract requires the
//! async scheduler stays unblocked.

use crate::adapters::RenderAdapter;
use crate::error::{PipelineError, Result};
use crate::types::RenderedPages;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Connection settings for [`HttpRenderAdapter`].
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Base URL, e.g. `https://render.internal`.
    pub base_url: String,
    pub api_token: String,
}

#[derive(Deserialize)]
struct RawRender {
    /// 1-indexed page number → base64 PNG bytes.
    pages: BTreeMap<u32, String>,
}

/// Rasterisation client backed by `reqwest`.
pub struct HttpRenderAdapter {
    client: reqwest::Client,
    config: RenderConfig,
}

impl HttpRenderAdapter {
    pub fn new(client: reqwest::Client, config: RenderConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl RenderAdapter for HttpRenderAdapter {
    async fn render(&self, bytes: &[u8], dpi: u32) -> Result<RenderedPages> {
        let response = self
            .client
            .post(format!(
                "{}/v1/render?dpi={dpi}",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes.to_vec())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Rendering {
                detail: e.to_string(),
            })?;

        let raw: RawRender = response.json().await.map_err(|e| PipelineError::Rendering {
            detail: format!("malformed render response: {e}"),
        })?;

        let mut rendered = RenderedPages::new();
        for (number, data) in raw.pages {
            let image = STANDARD
                .decode(&data)
                .map_err(|e| PipelineError::Rendering {
                    detail: format!("page {number} is not valid base64: {e}"),
                })?;
            rendered.insert(number, image);
        }
        debug!(pages = rendered.len(), dpi, "rasterisation complete");
        Ok(rendered)
    }
}
