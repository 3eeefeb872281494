//! External collaborator interfaces.
//!
//! The pipeline reaches every network-bound dependency through one of these
//! object-safe traits. Production wires in the HTTP clients from the
//! submodules; tests wire in in-memory fakes. None of the implementations
//! may hold cross-run mutable state — the only thing they share between
//! simultaneous runs is a pooled [`reqwest::Client`].
//!
//! 1. [`ocr`]    — structured per-page extraction (text, images, tables)
//! 2. [`render`] — rasterisation, one image per page
//! 3. [`model`]  — TOC and legend detection over extracted text
//! 4. [`kms`]    — wrap/unwrap of symmetric keys under a tenant key
//! 5. [`store`]  — opaque blob upload/download/delete by key
//! 6. [`notify`] — push of the terminal result to the waiting client,
//!    plus the billing refund used during compensation

pub mod kms;
pub mod model;
pub mod notify;
pub mod ocr;
pub mod render;
pub mod store;

use crate::error::Result;
use crate::types::{EmbedContent, Page, RenderedPages};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured per-page extraction from raw document bytes.
///
/// Implementations must return pages 1-indexed and contiguous from 1, in
/// order, converting the provider's 0-indexed numbering at the boundary.
#[async_trait]
pub trait OcrAdapter: Send + Sync {
    async fn extract(&self, bytes: &[u8]) -> Result<Vec<Page>>;
}

/// Rasterisation of document bytes into one image per page (1-indexed).
///
/// Rasterisation is CPU-bound; implementations that run it in-process must
/// dispatch to a blocking pool (`tokio::task::spawn_blocking`) so they never
/// stall the async scheduler shared with other runs.
#[async_trait]
pub trait RenderAdapter: Send + Sync {
    async fn render(&self, bytes: &[u8], dpi: u32) -> Result<RenderedPages>;
}

/// Raw response of one TOC-detection model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TocDetection {
    pub toc_found: bool,
    /// True when the model judges the TOC complete; scanning stops here.
    pub is_complete: bool,
    #[serde(default)]
    pub source_pages: Vec<u32>,
    #[serde(default)]
    pub chapters: Vec<crate::types::Chapter>,
}

/// Raw response of the single legend-detection model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegendDetection {
    pub legend_found: bool,
    #[serde(default)]
    pub source_pages: Vec<u32>,
    #[serde(default)]
    pub content: String,
}

/// Text-understanding model used for structure detection.
#[async_trait]
pub trait StructureModel: Send + Sync {
    async fn detect_toc(&self, batch_text: &str) -> Result<TocDetection>;
    async fn detect_legend(&self, text: &str) -> Result<LegendDetection>;
}

/// Wrap/unwrap of symmetric keys under a tenant-specific key held by the
/// external key-management service. Keys cross this boundary base64-encoded;
/// the unwrapped form never leaves process memory or logs.
#[async_trait]
pub trait KeyManagementClient: Send + Sync {
    async fn wrap(&self, plaintext_key_b64: &str, key_id: &str) -> Result<String>;
    async fn unwrap(&self, wrapped: &str, key_id: &str) -> Result<String>;
}

/// Content-addressed-by-key storage of opaque byte blobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a blob; returns the blob's URL.
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Push of a terminal result (success or error) to the waiting client.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, content: &EmbedContent) -> Result<()>;
}

/// Credit refund, invoked exactly once during terminal compensation.
#[async_trait]
pub trait BillingCompensator: Send + Sync {
    async fn refund(&self, owner_id: &str, credits: u32, reason: &str) -> Result<()>;
}
