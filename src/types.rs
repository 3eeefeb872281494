//! Core data model shared by every pipeline stage.
//!
//! Everything a stage hands to the next stage is an explicit typed struct,
//! never a loose JSON object. Constructors enforce the two invariants the
//! rest of the pipeline relies on: page numbers are 1-indexed and contiguous,
//! and [`StructureResult::source_pages`] is always sorted and deduplicated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rectangle locating an embedded image on its page, in page units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// An image embedded in a page, extracted by the OCR provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedImage {
    /// Provider-assigned image id, unique within the document.
    pub id: String,
    /// Raw image bytes as returned by the provider.
    #[serde(with = "serde_bytes_b64")]
    pub bytes: Vec<u8>,
    pub bbox: BoundingBox,
}

/// An extracted table. The provider's block structure is kept opaque; the
/// pipeline only carries it through to the OCR JSON artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBlock(pub serde_json::Value);

/// One extracted page. Produced once by the OCR adapter, immutable after.
///
/// `number` is 1-indexed; the raw provider response is 0-indexed and is
/// converted at the adapter boundary so nothing downstream ever sees a
/// 0-indexed page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub markdown: String,
    pub images: Vec<EmbeddedImage>,
    pub tables: Vec<TableBlock>,
    pub header: Option<String>,
    pub footer: Option<String>,
    pub width: f32,
    pub height: f32,
}

/// Rendered page set: 1-indexed page number → raster image bytes.
pub type RenderedPages = BTreeMap<u32, Vec<u8>>;

/// One table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub page: u32,
}

/// What a structure detection produced: a chapter list for the TOC path, a
/// free-text summary for the legend path, or nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructurePayload {
    Chapters(Vec<Chapter>),
    Text(String),
    None,
}

/// Outcome of one structure detection (TOC or legend).
///
/// Built incrementally across batches by the detector, finalized once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureResult {
    pub detected: bool,
    /// 1-indexed pages the structure was found on. Always sorted, deduped.
    pub source_pages: Vec<u32>,
    pub payload: StructurePayload,
}

impl StructureResult {
    /// Build a result, normalising `source_pages` to sorted-unique.
    pub fn new(detected: bool, mut source_pages: Vec<u32>, payload: StructurePayload) -> Self {
        source_pages.sort_unstable();
        source_pages.dedup();
        Self {
            detected,
            source_pages,
            payload,
        }
    }

    /// A not-detected result with no payload.
    pub fn not_detected() -> Self {
        Self {
            detected: false,
            source_pages: Vec::new(),
            payload: StructurePayload::None,
        }
    }
}

/// Terminal run status carried in the client notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Finished,
    Error,
}

/// The message pushed to the waiting client, for both terminal outcomes.
///
/// On success every field is populated and `status` is `finished`. On
/// terminal failure the artifact references are absent (the artifacts were
/// deleted during compensation) and `message` explains that credits were
/// refunded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: String,
    pub page_count: usize,
    pub total_tokens_estimated: u64,
    pub per_page_tokens: BTreeMap<String, u64>,
    pub toc: StructureResult,
    pub legend: StructureResult,
    pub ocr_blob_key: Option<String>,
    pub screenshot_keys: BTreeMap<String, String>,
    pub extracted_image_keys: Vec<String>,
    pub wrapped_key: Option<String>,
    /// Base64 nonce matching `wrapped_key`; with the unwrapped key it
    /// decrypts every artifact of the run.
    pub nonce: Option<String>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reference to the encrypted source document as stored at upload time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// Object-store key of the ciphertext.
    pub object_key: String,
    /// Content key, wrapped by the key-management service.
    pub wrapped_key: String,
    /// Base64 AEAD nonce used when the source was sealed.
    pub nonce: String,
    pub filename: String,
}

/// Owner and billing context for one run. Credits were already charged when
/// the processing request was accepted; on terminal failure the full amount
/// is refunded.
#[derive(Debug, Clone)]
pub struct OwnerContext {
    pub owner_id: String,
    pub request_id: String,
    /// Tenant key id used for wrapping and unwrapping through the KMS.
    pub key_id: String,
    pub credits_charged: u32,
}

/// Deterministic per-page token estimate: `max(1, chars/4)`.
///
/// Downstream billing depends on this exact value, so it is a plain
/// character-count heuristic with no external call and no tokenizer.
/// Characters, not bytes: multi-byte UTF-8 text (accents, CJK, typographic
/// quotes) must not inflate the estimate.
pub fn token_estimate(markdown: &str) -> u64 {
    ((markdown.chars().count() as u64) / 4).max(1)
}

/// Sum of [`token_estimate`] across pages.
pub fn total_token_estimate(pages: &[Page]) -> u64 {
    pages.iter().map(|p| token_estimate(&p.markdown)).sum()
}

/// Base64 (de)serialisation for raw byte fields in wire types.
mod serde_bytes_b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
