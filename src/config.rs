//! Pipeline configuration.
//!
//! Every knob lives in one [`PipelineConfig`] built through its builder, so
//! a config can be cloned across runs, logged, and diffed. Defaults match
//! the production contract: three retries at 60 s/120 s/240 s, 3-page TOC
//! batches over at most 12 pages, legend read from the last 5 pages.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Configuration for one pipeline orchestrator.
///
/// # Example
/// ```rust
/// use docpress::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .bucket("doc-artifacts")
///     .upload_concurrency(16)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Object-store bucket holding source ciphertexts and run artifacts.
    pub bucket: String,

    /// Rendering DPI passed to the render adapter. Default: 150.
    pub dpi: u32,

    /// Bounded concurrency for artifact uploads. Default: 8.
    ///
    /// Uploads are network-bound; a modest fan-out cuts wall-clock time
    /// without overwhelming the store. Individual runs never share upload
    /// slots with each other — the bound is per run.
    pub upload_concurrency: usize,

    /// Maximum whole-run retries after the initial attempt. Default: 3.
    pub max_retries: u32,

    /// Base backoff in seconds; doubles per retry (60 → 120 → 240). Default: 60.
    pub retry_backoff_secs: u64,

    /// Pages per TOC-detection batch. Default: 3.
    pub toc_batch_size: usize,

    /// Upper bound on pages scanned for a TOC. Default: 12.
    ///
    /// Together with `toc_batch_size` this caps the scan at 4 model calls
    /// regardless of what the detector answers, so scanning always
    /// terminates.
    pub toc_max_scan_pages: usize,

    /// How many trailing pages are read for legend detection. Default: 5.
    pub legend_tail_pages: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: "documents".to_string(),
            dpi: 150,
            upload_concurrency: 8,
            max_retries: 3,
            retry_backoff_secs: 60,
            toc_batch_size: 3,
            toc_max_scan_pages: 12,
            legend_tail_pages: 5,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.config.bucket = bucket.into();
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_secs(mut self, secs: u64) -> Self {
        self.config.retry_backoff_secs = secs;
        self
    }

    pub fn toc_batch_size(mut self, n: usize) -> Self {
        self.config.toc_batch_size = n.max(1);
        self
    }

    pub fn toc_max_scan_pages(mut self, n: usize) -> Self {
        self.config.toc_max_scan_pages = n;
        self
    }

    pub fn legend_tail_pages(mut self, n: usize) -> Self {
        self.config.legend_tail_pages = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.bucket.is_empty() {
            return Err(PipelineError::InvalidConfig("bucket must be set".into()));
        }
        if c.toc_batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "toc_batch_size must be ≥ 1".into(),
            ));
        }
        if c.upload_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "upload_concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
