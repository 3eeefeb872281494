//! The pipeline orchestrator: stage sequencing, retry, compensation.
//!
//! ## Stage order
//!
//! ```text
//! Downloading ──▶ Extracting ∥ Rendering ──▶ DetectingStructure (TOC ∥ legend)
//!      ──▶ Encrypting ──▶ Uploading ──▶ Publishing
//! ```
//!
//! Extraction and rendering are independent reads of the same document and
//! run concurrently; so do the two structure detections. Uploads fan out
//! with bounded concurrency.
//!
//! ## Retry
//!
//! A transient failure anywhere reschedules the whole run from Downloading:
//! the pipeline never resumes mid-flight. Every stage is a pure function of
//! the source document, uploads overwrite their own deterministic keys, and
//! the notification only fires at the very end, so re-running from the top
//! is idempotent. After the k-th transient failure the orchestrator waits
//! `retry_backoff_secs * 2^(k-1)` (60 s → 120 s → 240 s by default); the
//! failure after the last retry — or any permanent error, immediately —
//! goes to compensation instead.
//!
//! ## Compensation
//!
//! On terminal failure, in order: refund the credits charged for the run,
//! best-effort delete every artifact key the run registered, publish one
//! `error` notification telling the client credits were refunded, and
//! propagate the failure so the task-queue layer records it. The client
//! sees exactly one notification per run, success or error, never both.

use crate::adapters::{
    BillingCompensator, KeyManagementClient, NotificationSink, ObjectStore, OcrAdapter,
    RenderAdapter, StructureModel,
};
use crate::backoff::{Backoff, TokioBackoff};
use crate::config::PipelineConfig;
use crate::crypto::{ArtifactEncryptor, ArtifactKeyMaterial, SourceDecryptor};
use crate::detect::StructureDetector;
use crate::error::{PipelineError, Result};
use crate::saga::ArtifactTracker;
use crate::types::{
    token_estimate, total_token_estimate, EmbedContent, OwnerContext, Page, RenderedPages,
    RunStatus, SourceRef, StructureResult,
};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The external collaborators one orchestrator talks to.
///
/// All are `Arc`ed trait objects: production wires HTTP clients, tests wire
/// in-memory fakes. None carry per-run state.
pub struct Collaborators {
    pub kms: Arc<dyn KeyManagementClient>,
    pub store: Arc<dyn ObjectStore>,
    pub ocr: Arc<dyn OcrAdapter>,
    pub render: Arc<dyn RenderAdapter>,
    pub model: Arc<dyn StructureModel>,
    pub notify: Arc<dyn NotificationSink>,
    pub billing: Arc<dyn BillingCompensator>,
}

/// Sequences all stages for one document and owns retry and compensation.
///
/// One orchestrator serves many runs; [`run`](Self::run) takes `&self` and
/// holds no per-run state between calls.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    decryptor: SourceDecryptor,
    encryptor: ArtifactEncryptor,
    detector: StructureDetector,
    ocr: Arc<dyn OcrAdapter>,
    render: Arc<dyn RenderAdapter>,
    store: Arc<dyn ObjectStore>,
    notify: Arc<dyn NotificationSink>,
    billing: Arc<dyn BillingCompensator>,
    backoff: Arc<dyn Backoff>,
}

/// One artifact to seal and upload.
struct UploadJob {
    key: String,
    bytes: Vec<u8>,
    /// Whether a failed upload fails the attempt. Page screenshots and the
    /// OCR blob are essential; individual embedded images are not.
    essential: bool,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, c: Collaborators) -> Self {
        let decryptor = SourceDecryptor::new(
            Arc::clone(&c.kms),
            Arc::clone(&c.store),
            config.bucket.clone(),
        );
        let encryptor = ArtifactEncryptor::new(Arc::clone(&c.kms));
        let detector = StructureDetector::new(Arc::clone(&c.model), &config);
        Self {
            config,
            decryptor,
            encryptor,
            detector,
            ocr: c.ocr,
            render: c.render,
            store: c.store,
            notify: c.notify,
            billing: c.billing,
            backoff: Arc::new(TokioBackoff),
        }
    }

    /// Replace the backoff implementation (tests inject a recorder).
    pub fn with_backoff(mut self, backoff: Arc<dyn Backoff>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Process one document end to end.
    ///
    /// Returns the published [`EmbedContent`] on success. On terminal
    /// failure the compensation sequence has already run (refund, artifact
    /// deletion, error notification) and the original error is returned so
    /// the task-queue layer can record the run as failed.
    pub async fn run(&self, source: SourceRef, owner: OwnerContext) -> Result<EmbedContent> {
        let run_id = Uuid::new_v4();
        let tracker = ArtifactTracker::new();
        // Best known page count, for the error notification.
        let mut page_count = 0usize;
        let mut last_err: PipelineError;
        let mut attempts_made = 0u32;

        info!(%run_id, request_id = %owner.request_id, filename = %source.filename, "run started");

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = Duration::from_secs(
                    self.config.retry_backoff_secs * 2u64.pow(attempt - 1),
                );
                warn!(%run_id, attempt, delay_secs = delay.as_secs(), "retrying run");
                self.backoff.wait(delay).await;
            }

            attempts_made = attempt + 1;
            match self
                .attempt(run_id, &source, &owner, &tracker, &mut page_count)
                .await
            {
                Ok(content) => {
                    info!(%run_id, attempts = attempts_made, "run finished");
                    return Ok(content);
                }
                Err(e) if e.is_permanent() => {
                    error!(%run_id, error = %e, "permanent failure, compensating");
                    last_err = e;
                    break;
                }
                Err(e) => {
                    warn!(%run_id, attempt, error = %e, "attempt failed");
                    last_err = e;
                    if attempt >= self.config.max_retries {
                        error!(%run_id, attempts = attempts_made, "retries exhausted, compensating");
                        break;
                    }
                }
            }
            attempt += 1;
        }

        self.compensate(&source, &owner, &tracker, page_count, attempts_made, &last_err)
            .await;
        Err(last_err)
    }

    /// Execute every stage once, from Downloading through Publishing.
    async fn attempt(
        &self,
        run_id: Uuid,
        source: &SourceRef,
        owner: &OwnerContext,
        tracker: &ArtifactTracker,
        page_count: &mut usize,
    ) -> Result<EmbedContent> {
        let total_start = Instant::now();

        // ── Downloading ──────────────────────────────────────────────────
        let document = self.decryptor.fetch_and_decrypt(source, &owner.key_id).await?;
        debug!(%run_id, bytes = document.len(), "source decrypted");

        // ── Extracting ∥ Rendering ───────────────────────────────────────
        let stage_start = Instant::now();
        let (pages, rendered) = tokio::try_join!(
            self.ocr.extract(&document),
            self.render.render(&document, self.config.dpi)
        )?;
        validate_page_numbering(&pages)?;
        *page_count = pages.len();
        info!(
            %run_id,
            pages = pages.len(),
            elapsed_ms = stage_start.elapsed().as_millis() as u64,
            "extraction and rendering complete"
        );

        // ── DetectingStructure (TOC ∥ legend) ────────────────────────────
        let stage_start = Instant::now();
        let (toc, legend) = tokio::join!(
            self.detector.detect_toc(&pages),
            self.detector.detect_legend(&pages)
        );
        debug!(
            %run_id,
            toc_detected = toc.detected,
            legend_detected = legend.detected,
            elapsed_ms = stage_start.elapsed().as_millis() as u64,
            "structure detection complete"
        );

        // ── Token estimation ─────────────────────────────────────────────
        let per_page_tokens: BTreeMap<String, u64> = pages
            .iter()
            .map(|p| (p.number.to_string(), token_estimate(&p.markdown)))
            .collect();
        let total_tokens = total_token_estimate(&pages);

        // ── Encrypting ───────────────────────────────────────────────────
        let material = self.encryptor.new_run_key(&owner.key_id).await?;
        let (jobs, screenshot_keys, image_keys, ocr_blob_key) =
            self.seal_artifacts(run_id, &material, &pages, &rendered)?;

        // ── Uploading ────────────────────────────────────────────────────
        let stage_start = Instant::now();
        let uploaded = self.upload_all(jobs, tracker).await?;
        let extracted_image_keys: Vec<String> = image_keys
            .into_iter()
            .filter(|k| uploaded.contains(k))
            .collect();
        info!(
            %run_id,
            artifacts = uploaded.len(),
            elapsed_ms = stage_start.elapsed().as_millis() as u64,
            "artifacts uploaded"
        );

        // ── Publishing ───────────────────────────────────────────────────
        let content = EmbedContent {
            kind: "document".to_string(),
            filename: source.filename.clone(),
            page_count: pages.len(),
            total_tokens_estimated: total_tokens,
            per_page_tokens,
            toc,
            legend,
            ocr_blob_key: Some(ocr_blob_key),
            screenshot_keys,
            extracted_image_keys,
            wrapped_key: Some(material.wrapped_key().to_string()),
            nonce: Some(material.nonce_b64()),
            status: RunStatus::Finished,
            message: None,
        };
        self.notify.publish(&content).await?;

        info!(
            %run_id,
            elapsed_ms = total_start.elapsed().as_millis() as u64,
            "result published"
        );
        Ok(content)
    }

    /// Encrypt every output artifact with the run's key material and lay
    /// out the upload jobs and key maps.
    #[allow(clippy::type_complexity)]
    fn seal_artifacts(
        &self,
        run_id: Uuid,
        material: &ArtifactKeyMaterial,
        pages: &[Page],
        rendered: &RenderedPages,
    ) -> Result<(Vec<UploadJob>, BTreeMap<String, String>, Vec<String>, String)> {
        let mut jobs = Vec::new();

        // Page screenshots: essential.
        let mut screenshot_keys = BTreeMap::new();
        for (number, image) in rendered {
            let key = format!("runs/{run_id}/pages/{number}.png.enc");
            jobs.push(UploadJob {
                bytes: self.encryptor.encrypt(material, image)?,
                key: key.clone(),
                essential: true,
            });
            screenshot_keys.insert(number.to_string(), key);
        }

        // Embedded images extracted by OCR: non-essential.
        let mut image_keys = Vec::new();
        for page in pages {
            for image in &page.images {
                let key = format!("runs/{run_id}/images/{}.bin.enc", image.id);
                jobs.push(UploadJob {
                    bytes: self.encryptor.encrypt(material, &image.bytes)?,
                    key: key.clone(),
                    essential: false,
                });
                image_keys.push(key);
            }
        }

        // The full OCR extraction as one JSON blob: essential.
        let ocr_json = serde_json::to_vec(pages)
            .map_err(|e| PipelineError::Internal(format!("OCR blob serialisation: {e}")))?;
        let ocr_blob_key = format!("runs/{run_id}/ocr.json.enc");
        jobs.push(UploadJob {
            bytes: self.encryptor.encrypt(material, &ocr_json)?,
            key: ocr_blob_key.clone(),
            essential: true,
        });

        Ok((jobs, screenshot_keys, image_keys, ocr_blob_key))
    }

    /// Upload all artifacts with bounded concurrency.
    ///
    /// Every key is registered with the tracker before its upload is
    /// awaited. A failed essential upload fails the attempt; a failed
    /// non-essential one is logged and skipped. Returns the keys that were
    /// actually stored.
    async fn upload_all(
        &self,
        jobs: Vec<UploadJob>,
        tracker: &ArtifactTracker,
    ) -> Result<HashSet<String>> {
        let outcomes: Vec<Result<Option<String>>> = stream::iter(jobs.into_iter().map(|job| {
            let store = Arc::clone(&self.store);
            let bucket = self.config.bucket.clone();
            async move {
                tracker.register(&job.key);
                match store
                    .put(&bucket, &job.key, job.bytes, "application/octet-stream")
                    .await
                {
                    Ok(_) => Ok(Some(job.key)),
                    Err(e) if !job.essential => {
                        warn!(key = %job.key, error = %e, "skipping failed image upload");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }))
        .buffer_unordered(self.config.upload_concurrency)
        .collect()
        .await;

        let mut uploaded = HashSet::new();
        for outcome in outcomes {
            if let Some(key) = outcome? {
                uploaded.insert(key);
            }
        }
        Ok(uploaded)
    }

    /// Terminal-failure compensation: refund, artifact deletion, error
    /// notification. Every step is attempted even when an earlier one
    /// fails.
    async fn compensate(
        &self,
        source: &SourceRef,
        owner: &OwnerContext,
        tracker: &ArtifactTracker,
        page_count: usize,
        attempts: u32,
        cause: &PipelineError,
    ) {
        // 1. Refund the full amount charged for the run.
        let reason = format!(
            "processing of '{}' failed after {attempts} attempt(s): {cause}",
            source.filename
        );
        if let Err(e) = self
            .billing
            .refund(&owner.owner_id, owner.credits_charged, &reason)
            .await
        {
            error!(owner_id = %owner.owner_id, error = %e, "refund failed during compensation");
        }

        // 2. Delete every artifact the run registered, best effort.
        for key in tracker.keys() {
            if let Err(e) = self.store.delete(&self.config.bucket, &key).await {
                warn!(%key, error = %e, "artifact deletion failed during compensation");
            }
        }

        // 3. Tell the client, once, that the run failed and was refunded.
        let content = EmbedContent {
            kind: "document".to_string(),
            filename: source.filename.clone(),
            page_count,
            total_tokens_estimated: 0,
            per_page_tokens: BTreeMap::new(),
            toc: StructureResult::not_detected(),
            legend: StructureResult::not_detected(),
            ocr_blob_key: None,
            screenshot_keys: BTreeMap::new(),
            extracted_image_keys: Vec::new(),
            wrapped_key: None,
            nonce: None,
            status: RunStatus::Error,
            message: Some(format!(
                "Processing of '{}' failed and the {} credit(s) charged have been refunded.",
                source.filename, owner.credits_charged
            )),
        };
        if let Err(e) = self.notify.publish(&content).await {
            error!(error = %e, "error notification failed during compensation");
        }
    }
}

/// Pages must be 1-indexed and contiguous from 1; the OCR adapter converts
/// provider numbering, this catches adapters that don't.
fn validate_page_numbering(pages: &[Page]) -> Result<()> {
    for (i, page) in pages.iter().enumerate() {
        let expected = i as u32 + 1;
        if page.number != expected {
            return Err(PipelineError::Extraction {
                detail: format!(
                    "page numbering broken: expected {expected}, got {}",
                    page.number
                ),
            });
        }
    }
    Ok(())
}
