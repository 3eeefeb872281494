//! HTTP client for the external OCR provider.
//!
//! The provider returns per-page structured extraction with **0-indexed**
//! page numbers; this adapter is the single place where they are converted
//! to the 1-indexed numbering the rest of the pipeline requires. Nothing
//! downstream ever sees a raw provider page.

use crate::adapters::OcrAdapter;
use crate::error::{PipelineError, Result};
use crate::types::{BoundingBox, EmbeddedImage, Page, TableBlock};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::debug;

/// Connection settings for [`HttpOcrAdapter`].
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Base URL, e.g. `https://ocr.internal`.
    pub base_url: String,
    pub api_token: String,
}

// ── Provider wire types ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawExtraction {
    pages: Vec<RawPage>,
}

#[derive(Deserialize)]
struct RawPage {
    /// 0-indexed in the provider response.
    index: u32,
    markdown: String,
    #[serde(default)]
    images: Vec<RawImage>,
    #[serde(default)]
    tables: Vec<serde_json::Value>,
    header: Option<String>,
    footer: Option<String>,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
}

#[derive(Deserialize)]
struct RawImage {
    id: String,
    /// Base64-encoded image bytes.
    data: String,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl RawPage {
    /// Convert to the pipeline's [`Page`], shifting to 1-indexed numbering.
    fn into_page(self) -> Result<Page> {
        let images = self
            .images
            .into_iter()
            .map(|img| {
                let bytes = STANDARD
                    .decode(&img.data)
                    .map_err(|e| PipelineError::Extraction {
                        detail: format!("image '{}' is not valid base64: {e}", img.id),
                    })?;
                Ok(EmbeddedImage {
                    id: img.id,
                    bytes,
                    bbox: BoundingBox {
                        x: img.x,
                        y: img.y,
                        width: img.width,
                        height: img.height,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            number: self.index + 1,
            markdown: self.markdown,
            images,
            tables: self.tables.into_iter().map(TableBlock).collect(),
            header: self.header,
            footer: self.footer,
            width: self.width,
            height: self.height,
        })
    }
}

/// OCR provider client backed by `reqwest`.
pub struct HttpOcrAdapter {
    client: reqwest::Client,
    config: OcrConfig,
}

impl HttpOcrAdapter {
    pub fn new(client: reqwest::Client, config: OcrConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl OcrAdapter for HttpOcrAdapter {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<Page>> {
        let response = self
            .client
            .post(format!(
                "{}/v1/extract",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/pdf")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| PipelineError::Extraction {
                detail: e.to_string(),
            })?;

        // 4xx means the provider could not open the document at all; that is
        // an input problem, not a provider outage, so it must not be retried.
        if response.status().is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::InvalidDocument { detail });
        }
        let response = response.error_for_status().map_err(|e| {
            PipelineError::Extraction {
                detail: e.to_string(),
            }
        })?;

        let raw: RawExtraction =
            response
                .json()
                .await
                .map_err(|e| PipelineError::Extraction {
                    detail: format!("malformed extraction response: {e}"),
                })?;

        let mut pages = raw
            .pages
            .into_iter()
            .map(RawPage::into_page)
            .collect::<Result<Vec<_>>>()?;
        pages.sort_by_key(|p| p.number);
        debug!(pages = pages.len(), "OCR extraction complete");
        Ok(pages)
    }
}
