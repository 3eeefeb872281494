//! # docpress
//!
//! Encrypted document-processing pipeline: ingest an uploaded PDF, extract
//! structured content through external AI services, render page previews,
//! detect document structure, and publish an encrypted artifact set to the
//! waiting client — reliably, even when the network-bound dependencies are
//! flaky.
//!
//! ## Pipeline Overview
//!
//! ```text
//! encrypted source
//!  │
//!  ├─ 1. Download  fetch ciphertext, unwrap content key via KMS, AEAD-decrypt
//!  ├─ 2. Extract   per-page markdown/images/tables via the OCR provider   ┐ concurrent
//!  ├─ 2'. Render   one raster image per page                              ┘
//!  ├─ 3. Detect    table of contents (batched scan) ∥ legend (tail pages)
//!  ├─ 4. Seal      fresh per-run AES-256-GCM key, wrap it through the KMS
//!  ├─ 5. Upload    bounded-concurrency fan-out to the object store
//!  └─ 6. Publish   one notification with keys, wrapped key, and structure
//! ```
//!
//! A transient failure in any stage retries the whole run with exponential
//! backoff (60 s, 120 s, 240 s). Once retries are exhausted, or immediately
//! on a permanent error, the run is compensated: credits refunded, every
//! created artifact deleted, one error notification published.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docpress::{Collaborators, PipelineConfig, PipelineOrchestrator, OwnerContext, SourceRef};
//! # async fn demo(collaborators: Collaborators) -> Result<(), docpress::PipelineError> {
//! let config = PipelineConfig::builder().bucket("doc-artifacts").build()?;
//! let orchestrator = PipelineOrchestrator::new(config, collaborators);
//!
//! let source = SourceRef {
//!     object_key: "uploads/9f2c/report.pdf.enc".into(),
//!     wrapped_key: "…".into(),
//!     nonce: "…".into(),
//!     filename: "report.pdf".into(),
//! };
//! let owner = OwnerContext {
//!     owner_id: "acct_42".into(),
//!     request_id: "req_7".into(),
//!     key_id: "tenant-42".into(),
//!     credits_charged: 12,
//! };
//! let content = orchestrator.run(source, owner).await?;
//! println!("published {} pages", content.page_count);
//! # Ok(())
//! # }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapters;
pub mod backoff;
pub mod config;
pub mod crypto;
pub mod detect;
pub mod error;
pub mod run;
pub mod saga;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backoff::{Backoff, TokioBackoff};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use crypto::{ArtifactEncryptor, ArtifactKeyMaterial, SourceDecryptor};
pub use detect::StructureDetector;
pub use error::{PipelineError, Result};
pub use run::{Collaborators, PipelineOrchestrator};
pub use saga::ArtifactTracker;
pub use types::{
    token_estimate, BoundingBox, Chapter, EmbedContent, EmbeddedImage, OwnerContext, Page,
    RenderedPages, RunStatus, SourceRef, StructurePayload, StructureResult, TableBlock,
};
