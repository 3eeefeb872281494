//! Structure detection: table of contents and legend.
//!
//! Both detections read already-extracted page text and delegate judgement
//! to the external [`StructureModel`]; this module owns only the scanning
//! state machine around it.
//!
//! ## TOC scanning
//!
//! TOCs sit at the front of a document, so scanning is bounded to the first
//! `min(total, toc_max_scan_pages)` pages, walked in `toc_batch_size`-page
//! batches. The loop bound depends only on those two numbers, never on what
//! the model answers, so scanning always terminates — at most
//! `ceil(min(N, 12) / 3)` model calls with the default config.
//!
//! A batch that reports not-found *after* an earlier batch found the TOC
//! ends the scan: the gap is read as the end of the TOC. A blank page in
//! the middle of a TOC can therefore cut it short; that trade-off is
//! accepted, matching the production behaviour downstream consumers rely
//! on.
//!
//! ## Legend
//!
//! Legends and glossaries sit at the back, and one model call over the last
//! few pages is enough — no batching. If those pages carry no text at all
//! the call is skipped entirely.

use crate::adapters::StructureModel;
use crate::config::PipelineConfig;
use crate::types::{Chapter, Page, StructurePayload, StructureResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Batch-scanning detector for document structure.
pub struct StructureDetector {
    model: Arc<dyn StructureModel>,
    batch_size: usize,
    max_scan_pages: usize,
    legend_tail_pages: usize,
}

impl StructureDetector {
    pub fn new(model: Arc<dyn StructureModel>, config: &PipelineConfig) -> Self {
        Self {
            model,
            batch_size: config.toc_batch_size,
            max_scan_pages: config.toc_max_scan_pages,
            legend_tail_pages: config.legend_tail_pages,
        }
    }

    /// Scan the front of the document for a table of contents.
    ///
    /// Model-call failures for a single batch are logged and the scan moves
    /// on to the next batch; they never abort the run.
    pub async fn detect_toc(&self, pages: &[Page]) -> StructureResult {
        let scan_limit = pages.len().min(self.max_scan_pages);
        let mut chapters: Vec<Chapter> = Vec::new();
        let mut source_pages: Vec<u32> = Vec::new();
        let mut detected = false;

        for batch in pages[..scan_limit].chunks(self.batch_size) {
            let text = concat_markdown(batch);
            if text.trim().is_empty() {
                continue;
            }

            let first = batch.first().map(|p| p.number).unwrap_or(0);
            let last = batch.last().map(|p| p.number).unwrap_or(0);
            let verdict = match self.model.detect_toc(&text).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(pages = %format!("{first}-{last}"), error = %e, "TOC batch failed, continuing");
                    continue;
                }
            };

            if verdict.toc_found {
                detected = true;
                source_pages.extend(verdict.source_pages);
                for chapter in verdict.chapters {
                    if !chapters.contains(&chapter) {
                        chapters.push(chapter);
                    }
                }
                if verdict.is_complete {
                    debug!(pages = %format!("{first}-{last}"), "TOC complete");
                    break;
                }
            } else if detected {
                // A not-found batch after a found one marks the TOC's end.
                debug!(pages = %format!("{first}-{last}"), "TOC ended before this batch");
                break;
            }
        }

        StructureResult::new(detected, source_pages, StructurePayload::Chapters(chapters))
    }

    /// Detect a legend/glossary from the tail of the document.
    ///
    /// Single-shot: the last `legend_tail_pages` pages (or fewer) are
    /// concatenated and judged in one call. Empty tail text short-circuits
    /// to not-detected without calling the model.
    pub async fn detect_legend(&self, pages: &[Page]) -> StructureResult {
        let start = pages.len().saturating_sub(self.legend_tail_pages);
        let text = concat_markdown(&pages[start..]);
        if text.trim().is_empty() {
            return StructureResult::not_detected();
        }

        match self.model.detect_legend(&text).await {
            Ok(verdict) => StructureResult::new(
                verdict.legend_found,
                verdict.source_pages,
                StructurePayload::Text(verdict.content),
            ),
            Err(e) => {
                warn!(error = %e, "legend detection failed, reporting not detected");
                StructureResult::not_detected()
            }
        }
    }
}

/// Join batch markdown into one detection input.
fn concat_markdown(pages: &[Page]) -> String {
    pages
        .iter()
        .map(|p| p.markdown.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
