//! Integration tests for the pipeline orchestrator.
//!
//! Every external collaborator is an in-memory fake, so these tests cover
//! the real contract end to end — retry schedule, compensation, structure
//! detection, artifact sealing — without a network and without sleeping
//! (the backoff is a recorder).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docpress::adapters::{
    BillingCompensator, KeyManagementClient, LegendDetection, NotificationSink, ObjectStore,
    OcrAdapter, RenderAdapter, StructureModel, TocDetection,
};
use docpress::{
    ArtifactEncryptor, Backoff, BoundingBox, Chapter, Collaborators, EmbedContent, EmbeddedImage,
    OwnerContext, Page, PipelineConfig, PipelineError, PipelineOrchestrator, RenderedPages, Result,
    RunStatus, SourceRef, StructurePayload,
};

// ── Fakes ────────────────────────────────────────────────────────────────

/// KMS fake: wraps by prefixing, unwraps by stripping the prefix.
struct MemoryKms;

#[async_trait]
impl KeyManagementClient for MemoryKms {
    async fn wrap(&self, plaintext_key_b64: &str, key_id: &str) -> Result<String> {
        Ok(format!("wrapped:{key_id}:{plaintext_key_b64}"))
    }

    async fn unwrap(&self, wrapped: &str, key_id: &str) -> Result<String> {
        wrapped
            .strip_prefix(&format!("wrapped:{key_id}:"))
            .map(str::to_string)
            .ok_or_else(|| PipelineError::KeyUnwrap {
                key_id: key_id.to_string(),
                detail: "unknown wrapping".into(),
            })
    }
}

/// In-memory object store recording every put and delete.
#[derive(Default)]
struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    deleted: Mutex<Vec<String>>,
    /// Puts fail for keys containing any of these substrings.
    fail_put_containing: Vec<&'static str>,
}

impl MemoryStore {
    fn with_failing_puts(patterns: Vec<&'static str>) -> Self {
        Self {
            fail_put_containing: patterns,
            ..Self::default()
        }
    }

    fn keys(&self) -> HashSet<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        _bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String> {
        if self.fail_put_containing.iter().any(|p| key.contains(p)) {
            return Err(PipelineError::StoreUpload {
                key: key.to_string(),
                detail: "injected failure".into(),
            });
        }
        self.blobs.lock().unwrap().insert(key.to_string(), bytes);
        Ok(format!("memory://{key}"))
    }

    async fn get(&self, _bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::StoreDownload {
                key: key.to_string(),
                detail: "not found".into(),
            })
    }

    async fn delete(&self, _bucket: &str, key: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

/// OCR fake returning fixed pages, optionally failing the first N calls.
struct FakeOcr {
    pages: Vec<Page>,
    fail_first: usize,
    calls: AtomicUsize,
}

impl FakeOcr {
    fn new(pages: Vec<Page>) -> Self {
        Self {
            pages,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(pages: Vec<Page>, n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::new(pages)
        }
    }
}

#[async_trait]
impl OcrAdapter for FakeOcr {
    async fn extract(&self, _bytes: &[u8]) -> Result<Vec<Page>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(PipelineError::Extraction {
                detail: "injected 503".into(),
            });
        }
        Ok(self.pages.clone())
    }
}

/// Render fake producing one distinct PNG-ish blob per page.
struct FakeRender {
    page_count: u32,
}

#[async_trait]
impl RenderAdapter for FakeRender {
    async fn render(&self, _bytes: &[u8], _dpi: u32) -> Result<RenderedPages> {
        Ok((1..=self.page_count)
            .map(|n| (n, format!("png-{n}").into_bytes()))
            .collect())
    }
}

/// Scripted structure model with per-endpoint call counters.
struct ScriptedModel {
    toc: Mutex<Vec<Result<TocDetection>>>,
    legend: Mutex<Vec<Result<LegendDetection>>>,
    toc_calls: AtomicUsize,
    legend_calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(toc: Vec<Result<TocDetection>>, legend: Vec<Result<LegendDetection>>) -> Self {
        Self {
            toc: Mutex::new(toc),
            legend: Mutex::new(legend),
            toc_calls: AtomicUsize::new(0),
            legend_calls: AtomicUsize::new(0),
        }
    }

    fn silent() -> Self {
        Self::new(vec![], vec![])
    }
}

#[async_trait]
impl StructureModel for ScriptedModel {
    async fn detect_toc(&self, _batch_text: &str) -> Result<TocDetection> {
        self.toc_calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.toc.lock().unwrap();
        if responses.is_empty() {
            Ok(TocDetection::default())
        } else {
            responses.remove(0)
        }
    }

    async fn detect_legend(&self, _text: &str) -> Result<LegendDetection> {
        self.legend_calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.legend.lock().unwrap();
        if responses.is_empty() {
            Ok(LegendDetection::default())
        } else {
            responses.remove(0)
        }
    }
}

/// Notification fake recording every published message, optionally failing.
#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<EmbedContent>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<EmbedContent> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, content: &EmbedContent) -> Result<()> {
        if self.fail && content.status == RunStatus::Finished {
            return Err(PipelineError::Publish {
                detail: "injected failure".into(),
            });
        }
        self.published.lock().unwrap().push(content.clone());
        Ok(())
    }
}

/// Billing fake recording refunds.
#[derive(Default)]
struct RecordingBilling {
    refunds: Mutex<Vec<(String, u32, String)>>,
}

impl RecordingBilling {
    fn refunds(&self) -> Vec<(String, u32, String)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingCompensator for RecordingBilling {
    async fn refund(&self, owner_id: &str, credits: u32, reason: &str) -> Result<()> {
        self.refunds
            .lock()
            .unwrap()
            .push((owner_id.to_string(), credits, reason.to_string()));
        Ok(())
    }
}

/// Backoff recorder: no sleeping, just remembers the requested delays.
#[derive(Default)]
struct RecordingBackoff {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingBackoff {
    fn delays_secs(&self) -> Vec<u64> {
        self.delays.lock().unwrap().iter().map(Duration::as_secs).collect()
    }
}

#[async_trait]
impl Backoff for RecordingBackoff {
    async fn wait(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

// ── Scenario plumbing ────────────────────────────────────────────────────

const BUCKET: &str = "test-bucket";
const SOURCE_KEY: &str = "uploads/req-7/report.pdf.enc";
const SOURCE_BYTES: &[u8] = b"%PDF-1.7 fake document bytes";

fn page(number: u32, markdown: &str) -> Page {
    Page {
        number,
        markdown: markdown.to_string(),
        images: vec![],
        tables: vec![],
        header: None,
        footer: None,
        width: 612.0,
        height: 792.0,
    }
}

fn page_with_image(number: u32, markdown: &str, image_id: &str) -> Page {
    let mut p = page(number, markdown);
    p.images.push(EmbeddedImage {
        id: image_id.to_string(),
        bytes: vec![0x89, 0x50, 0x4E, 0x47],
        bbox: BoundingBox {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 80.0,
        },
    });
    p
}

fn owner() -> OwnerContext {
    OwnerContext {
        owner_id: "acct_42".into(),
        request_id: "req-7".into(),
        key_id: "tenant-42".into(),
        credits_charged: 12,
    }
}

/// Seal `SOURCE_BYTES` into the store the same way the upload service
/// would, returning the matching [`SourceRef`].
async fn seed_source(kms: &Arc<MemoryKms>, store: &Arc<MemoryStore>) -> SourceRef {
    let encryptor = ArtifactEncryptor::new(Arc::clone(kms) as Arc<dyn KeyManagementClient>);
    let material = encryptor.new_run_key("tenant-42").await.unwrap();
    let ciphertext = encryptor.encrypt(&material, SOURCE_BYTES).unwrap();
    store.insert(SOURCE_KEY, ciphertext);

    SourceRef {
        object_key: SOURCE_KEY.into(),
        wrapped_key: material.wrapped_key().to_string(),
        nonce: material.nonce_b64(),
        filename: "report.pdf".into(),
    }
}

struct Harness {
    orchestrator: PipelineOrchestrator,
    source: SourceRef,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    billing: Arc<RecordingBilling>,
    backoff: Arc<RecordingBackoff>,
    model: Arc<ScriptedModel>,
}

async fn harness(
    ocr: FakeOcr,
    render_pages: u32,
    model: ScriptedModel,
    store: MemoryStore,
    sink: RecordingSink,
) -> Harness {
    let kms = Arc::new(MemoryKms);
    let store = Arc::new(store);
    let sink = Arc::new(sink);
    let billing = Arc::new(RecordingBilling::default());
    let backoff = Arc::new(RecordingBackoff::default());
    let model = Arc::new(model);

    let source = seed_source(&kms, &store).await;

    let config = PipelineConfig::builder().bucket(BUCKET).build().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        config,
        Collaborators {
            kms,
            store: Arc::clone(&store) as Arc<dyn ObjectStore>,
            ocr: Arc::new(ocr),
            render: Arc::new(FakeRender {
                page_count: render_pages,
            }),
            model: Arc::clone(&model) as Arc<dyn StructureModel>,
            notify: Arc::clone(&sink) as Arc<dyn NotificationSink>,
            billing: Arc::clone(&billing) as Arc<dyn BillingCompensator>,
        },
    )
    .with_backoff(Arc::clone(&backoff) as Arc<dyn Backoff>);

    Harness {
        orchestrator,
        source,
        store,
        sink,
        billing,
        backoff,
        model,
    }
}

// ── Success path ─────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_run_publishes_finished_content() {
    let pages = vec![
        page_with_image(1, "# Report\n\nabcdefgh", "img-a"),
        page(2, "Body text follows here."),
    ];
    let h = harness(
        FakeOcr::new(pages),
        2,
        ScriptedModel::silent(),
        MemoryStore::default(),
        RecordingSink::default(),
    )
    .await;

    let content = h.orchestrator.run(h.source.clone(), owner()).await.unwrap();

    assert_eq!(content.status, RunStatus::Finished);
    assert_eq!(content.filename, "report.pdf");
    assert_eq!(content.page_count, 2);
    assert!(content.wrapped_key.is_some());
    assert!(content.nonce.is_some());
    assert_eq!(content.screenshot_keys.len(), 2);
    assert_eq!(content.extracted_image_keys.len(), 1);
    assert!(content.ocr_blob_key.as_deref().unwrap().ends_with("ocr.json.enc"));

    // Exactly one notification, and no backoff waits on the happy path.
    assert_eq!(h.sink.messages().len(), 1);
    assert!(h.backoff.delays_secs().is_empty());
    assert!(h.billing.refunds().is_empty());

    // Every referenced artifact actually exists in the store.
    let stored = h.store.keys();
    for key in content
        .screenshot_keys
        .values()
        .chain(content.ocr_blob_key.iter())
        .chain(content.extracted_image_keys.iter())
    {
        assert!(stored.contains(key), "missing artifact {key}");
    }
}

#[tokio::test]
async fn token_estimates_are_deterministic() {
    // 18 chars → 4 tokens, 0 chars → 1 token (clamped), 4 chars → 1 token,
    // 5 accented chars (10 UTF-8 bytes) → 1 token: characters, not bytes.
    let pages = vec![
        page(1, "abcdefghijklmnopqr"),
        page(2, ""),
        page(3, "abcd"),
        page(4, "ééééé"),
    ];
    let h = harness(
        FakeOcr::new(pages),
        4,
        ScriptedModel::silent(),
        MemoryStore::default(),
        RecordingSink::default(),
    )
    .await;

    let content = h.orchestrator.run(h.source.clone(), owner()).await.unwrap();

    assert_eq!(content.per_page_tokens["1"], 4);
    assert_eq!(content.per_page_tokens["2"], 1);
    assert_eq!(content.per_page_tokens["3"], 1);
    assert_eq!(content.per_page_tokens["4"], 1);
    assert_eq!(content.total_tokens_estimated, 7);
}

#[tokio::test]
async fn uploaded_artifacts_are_sealed_not_plaintext() {
    let pages = vec![page(1, "# Secret contents of the report")];
    let h = harness(
        FakeOcr::new(pages.clone()),
        1,
        ScriptedModel::silent(),
        MemoryStore::default(),
        RecordingSink::default(),
    )
    .await;

    let content = h.orchestrator.run(h.source.clone(), owner()).await.unwrap();

    let blob = h
        .store
        .get(BUCKET, content.ocr_blob_key.as_deref().unwrap())
        .await
        .unwrap();
    let plaintext = serde_json::to_vec(&pages).unwrap();
    assert_ne!(blob, plaintext);
    // AES-GCM tag adds 16 bytes.
    assert_eq!(blob.len(), plaintext.len() + 16);

    let screenshot = h
        .store
        .get(BUCKET, &content.screenshot_keys["1"])
        .await
        .unwrap();
    assert_ne!(screenshot, b"png-1");
}

// ── Structure detection through the orchestrator ─────────────────────────

#[tokio::test]
async fn three_page_document_with_complete_toc_and_no_legend() {
    let pages = vec![
        page(1, "Contents\n\n1. Introduction ... 3"),
        page(2, "2. Findings ... 7"),
        page(3, "Closing remarks."),
    ];
    let model = ScriptedModel::new(
        vec![Ok(TocDetection {
            toc_found: true,
            is_complete: true,
            source_pages: vec![1, 2],
            chapters: vec![
                Chapter {
                    title: "Introduction".into(),
                    page: 3,
                },
                Chapter {
                    title: "Findings".into(),
                    page: 7,
                },
            ],
        })],
        vec![Ok(LegendDetection::default())],
    );
    let h = harness(
        FakeOcr::new(pages),
        3,
        model,
        MemoryStore::default(),
        RecordingSink::default(),
    )
    .await;

    let content = h.orchestrator.run(h.source.clone(), owner()).await.unwrap();

    assert!(content.toc.detected);
    assert_eq!(content.toc.source_pages, vec![1, 2]);
    assert!(!content.legend.detected);
    // Complete TOC on the first batch: one TOC call. The legend always runs
    // exactly once over the trailing pages.
    assert_eq!(h.model.toc_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.legend_calls.load(Ordering::SeqCst), 1);

    let StructurePayload::Chapters(chapters) = &content.toc.payload else {
        panic!("expected chapters payload");
    };
    assert_eq!(chapters.len(), 2);
}

// ── Non-essential artifact failures ──────────────────────────────────────

#[tokio::test]
async fn failed_image_upload_is_skipped_without_failing_the_run() {
    let pages = vec![
        page_with_image(1, "first page", "img-a"),
        page_with_image(2, "second page", "img-b"),
    ];
    let h = harness(
        FakeOcr::new(pages),
        2,
        ScriptedModel::silent(),
        MemoryStore::with_failing_puts(vec!["/images/"]),
        RecordingSink::default(),
    )
    .await;

    let content = h.orchestrator.run(h.source.clone(), owner()).await.unwrap();

    assert_eq!(content.status, RunStatus::Finished);
    assert!(content.extracted_image_keys.is_empty());
    assert_eq!(content.screenshot_keys.len(), 2);
    assert!(h.billing.refunds().is_empty());
}

#[tokio::test]
async fn failed_screenshot_upload_fails_the_attempt() {
    let pages = vec![page(1, "text")];
    let h = harness(
        FakeOcr::new(pages),
        1,
        ScriptedModel::silent(),
        MemoryStore::with_failing_puts(vec!["/pages/"]),
        RecordingSink::default(),
    )
    .await;

    let result = h.orchestrator.run(h.source.clone(), owner()).await;

    assert!(matches!(result, Err(PipelineError::StoreUpload { .. })));
    // All four attempts failed, then compensation refunded once.
    assert_eq!(h.backoff.delays_secs(), vec![60, 120, 240]);
    assert_eq!(h.billing.refunds().len(), 1);
}

// ── Retry policy ─────────────────────────────────────────────────────────

#[tokio::test]
async fn transient_failures_retry_with_exponential_backoff() {
    // OCR fails twice, then succeeds: the run recovers.
    let pages = vec![page(1, "recovered")];
    let h = harness(
        FakeOcr::failing_first(pages, 2),
        1,
        ScriptedModel::silent(),
        MemoryStore::default(),
        RecordingSink::default(),
    )
    .await;

    let content = h.orchestrator.run(h.source.clone(), owner()).await.unwrap();

    assert_eq!(content.status, RunStatus::Finished);
    assert_eq!(h.backoff.delays_secs(), vec![60, 120]);
    assert!(h.billing.refunds().is_empty());
    assert_eq!(h.sink.messages().len(), 1);
}

#[tokio::test]
async fn fourth_failure_compensates_instead_of_retrying() {
    let pages = vec![page(1, "never seen")];
    let h = harness(
        FakeOcr::failing_first(pages, 99),
        1,
        ScriptedModel::silent(),
        MemoryStore::default(),
        RecordingSink::default(),
    )
    .await;

    let result = h.orchestrator.run(h.source.clone(), owner()).await;

    assert!(matches!(result, Err(PipelineError::Extraction { .. })));
    assert_eq!(h.backoff.delays_secs(), vec![60, 120, 240]);

    let refunds = h.billing.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].0, "acct_42");
    assert_eq!(refunds[0].1, 12);
    // The reason names the document even when the failing layer doesn't.
    assert!(refunds[0].2.contains("report.pdf"), "got: {}", refunds[0].2);

    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, RunStatus::Error);
    assert!(messages[0].message.as_deref().unwrap().contains("refunded"));
    assert!(messages[0].ocr_blob_key.is_none());
    assert!(messages[0].wrapped_key.is_none());
}

#[tokio::test]
async fn permanent_error_skips_retries_entirely() {
    let pages = vec![page(1, "never seen")];
    let kms = Arc::new(MemoryKms);
    let store = Arc::new(MemoryStore::default());
    let mut source = seed_source(&kms, &store).await;
    // Corrupt the nonce: decryption now fails its tag check.
    source.nonce = STANDARD.encode([0u8; 12]);

    let sink = Arc::new(RecordingSink::default());
    let billing = Arc::new(RecordingBilling::default());
    let backoff = Arc::new(RecordingBackoff::default());
    let config = PipelineConfig::builder().bucket(BUCKET).build().unwrap();
    let orchestrator = PipelineOrchestrator::new(
        config,
        Collaborators {
            kms,
            store: Arc::clone(&store) as Arc<dyn ObjectStore>,
            ocr: Arc::new(FakeOcr::new(pages)),
            render: Arc::new(FakeRender { page_count: 1 }),
            model: Arc::new(ScriptedModel::silent()),
            notify: Arc::clone(&sink) as Arc<dyn NotificationSink>,
            billing: Arc::clone(&billing) as Arc<dyn BillingCompensator>,
        },
    )
    .with_backoff(Arc::clone(&backoff) as Arc<dyn Backoff>);

    let result = orchestrator.run(source, owner()).await;

    assert!(matches!(result, Err(PipelineError::Decryption { .. })));
    assert!(backoff.delays_secs().is_empty());
    assert_eq!(billing.refunds().len(), 1);
    assert_eq!(sink.messages().len(), 1);
    assert_eq!(sink.messages()[0].status, RunStatus::Error);
}

// ── Compensation completeness ────────────────────────────────────────────

#[tokio::test]
async fn compensation_deletes_exactly_the_created_artifacts() {
    // Uploads succeed; the success publish always fails, so the run
    // exhausts its retries with artifacts already in the store.
    let pages = vec![
        page_with_image(1, "first", "img-a"),
        page(2, "second"),
    ];
    let h = harness(
        FakeOcr::new(pages),
        2,
        ScriptedModel::silent(),
        MemoryStore::default(),
        RecordingSink::failing(),
    )
    .await;

    let result = h.orchestrator.run(h.source.clone(), owner()).await;
    assert!(matches!(result, Err(PipelineError::Publish { .. })));

    // Refund exactly once, with the originally charged amount.
    let refunds = h.billing.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].1, 12);

    // Deleted exactly the run's artifacts (order-independent), and the
    // source ciphertext was left alone.
    let deleted: HashSet<String> = h.store.deleted_keys().into_iter().collect();
    assert_eq!(deleted.len(), 4, "2 screenshots + 1 image + 1 OCR blob");
    assert!(deleted.iter().all(|k| k.starts_with("runs/")));
    assert_eq!(deleted.iter().filter(|k| k.contains("/pages/")).count(), 2);
    assert_eq!(deleted.iter().filter(|k| k.contains("/images/img-a")).count(), 1);
    assert_eq!(deleted.iter().filter(|k| k.ends_with("ocr.json.enc")).count(), 1);
    assert!(!deleted.contains(SOURCE_KEY));
    assert!(h.store.keys().contains(SOURCE_KEY));

    // The error notification is the only one the client ever saw.
    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, RunStatus::Error);
    assert_eq!(messages[0].page_count, 2);
}
