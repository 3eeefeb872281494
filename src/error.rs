//! Error types for the docpress pipeline.
//!
//! One enum covers every failure a stage can raise; what differs is how the
//! orchestrator reacts, captured by [`PipelineError::is_permanent`]:
//!
//! * **Transient** (network timeouts, 5xx from adapters and stores, a KMS
//!   blip during key unwrap) — the whole run is retried under the backoff
//!   policy.
//! * **Permanent** (AEAD authentication failure, malformed source document)
//!   — no amount of retrying fixes these; the run goes straight to
//!   compensation on first occurrence.
//!
//! Non-essential failures (a single embedded-image upload) never become a
//! `PipelineError` at all: they are logged and skipped inside the upload
//! stage.

use thiserror::Error;

/// All errors raised by pipeline stages and adapters.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Key management ────────────────────────────────────────────────────
    /// The KMS failed to unwrap a key. Retryable at the orchestrator level:
    /// the usual cause is a transient network failure, not a bad key.
    #[error("key unwrap failed for key id '{key_id}': {detail}")]
    KeyUnwrap { key_id: String, detail: String },

    /// The KMS failed to wrap the run key.
    #[error("key wrap failed for key id '{key_id}': {detail}")]
    KeyWrap { key_id: String, detail: String },

    // ── Object store ──────────────────────────────────────────────────────
    /// Download of a blob from the object store failed.
    #[error("object store download failed for key '{key}': {detail}")]
    StoreDownload { key: String, detail: String },

    /// Upload of an essential artifact failed (page screenshot, OCR blob).
    #[error("object store upload failed for key '{key}': {detail}")]
    StoreUpload { key: String, detail: String },

    /// Deletion during compensation failed. Only ever logged; never aborts
    /// the compensation loop.
    #[error("object store delete failed for key '{key}': {detail}")]
    StoreDelete { key: String, detail: String },

    // ── Crypto ────────────────────────────────────────────────────────────
    /// AEAD authentication tag check failed: wrong key/nonce pairing or
    /// tampered ciphertext. Permanent.
    #[error("decryption failed: authentication tag mismatch ({detail})")]
    Decryption { detail: String },

    /// AEAD encryption of an output artifact failed. Permanent: the inputs
    /// are local, retrying cannot change them.
    #[error("artifact encryption failed: {detail}")]
    Encryption { detail: String },

    // ── External extraction services ──────────────────────────────────────
    /// The OCR provider rejected or failed on the document.
    #[error("OCR extraction failed: {detail}")]
    Extraction { detail: String },

    /// Rasterisation of the document failed.
    #[error("page rendering failed: {detail}")]
    Rendering { detail: String },

    /// One structure-detection model call failed. Inside TOC scanning this
    /// is logged and the next batch continues; it only surfaces when a
    /// caller invokes the model directly.
    #[error("structure detection failed: {detail}")]
    Detection { detail: String },

    /// The source document is malformed or unopenable. Permanent.
    ///
    /// Carries no filename: it is raised below the layer that knows one,
    /// and the orchestrator's compensation reason already names the file.
    #[error("invalid source document: {detail}")]
    InvalidDocument { detail: String },

    // ── Edge collaborators ────────────────────────────────────────────────
    /// Publishing the client notification failed.
    #[error("notification publish failed: {detail}")]
    Publish { detail: String },

    /// The refund call failed during compensation. Logged, never aborts.
    #[error("refund failed for owner '{owner_id}': {detail}")]
    Refund { owner_id: String, detail: String },

    // ── Config / internal ─────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Whether retrying the run could possibly change the outcome.
    ///
    /// Permanent errors skip the retry loop and trigger compensation on
    /// first occurrence.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::Decryption { .. }
                | PipelineError::Encryption { .. }
                | PipelineError::InvalidDocument { .. }
                | PipelineError::InvalidConfig(_)
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
