//! Per-page processing: classify → multi-pass OCR → arbitrate → gate →
//! retry.
//!
//! A [`PageProcessor`] owns everything one page needs and is cloned into each
//! concurrent page task. It never fails: every outcome, including an engine
//! that produced nothing, becomes a [`PageResult`] with a status.

use crate::output::{OcrStrategy, PageResult, PageSource, PageStatus, QualityMetrics};
use crate::pipeline::arbiter;
use crate::pipeline::gate::QualityGateEngine;
use crate::pipeline::layout::{self, LayoutClass, LayoutThresholds};
use crate::pipeline::ocr::{confidence_stats, consensus, OcrPassResult, OcrPassRunner, CONFIDENCE_FLOOR};
use crate::pipeline::render::PageImage;
use crate::pipeline::retry::{is_not_worse, RetryScheduler};
use crate::progress::ProgressCallback;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct PageProcessor {
    runner: OcrPassRunner,
    gates: Arc<QualityGateEngine>,
    retries: RetryScheduler,
    layout_thresholds: LayoutThresholds,
    target: Option<u8>,
    progress: Option<ProgressCallback>,
}

impl PageProcessor {
    pub fn new(
        runner: OcrPassRunner,
        gates: Arc<QualityGateEngine>,
        retries: RetryScheduler,
        layout_thresholds: LayoutThresholds,
        target: Option<u8>,
    ) -> Self {
        Self {
            runner,
            gates,
            retries,
            layout_thresholds,
            target,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_ref()
    }

    /// A page whose native text was sufficient; OCR never ran.
    pub fn native_only(&self, page_number: usize, text: String) -> PageResult {
        let metrics = QualityMetrics::default();
        let outcome = self
            .gates
            .evaluate(&metrics, None, PageSource::Native, self.target);
        PageResult {
            page_number,
            source: PageSource::Native,
            text,
            tokens: Vec::new(),
            layout: None,
            metrics,
            failed_gates: outcome.failed_gates,
            status: outcome.status,
            retry_attempts: 0,
            strategy: None,
        }
    }

    /// A page scheduled for OCR that could not be rasterised.
    ///
    /// Native text, if any, is kept as the page text, but the page is never
    /// approved: OCR was required and did not happen.
    pub fn unrendered(&self, page_number: usize, native_text: Option<String>) -> PageResult {
        let metrics = QualityMetrics {
            ocr_attempted: true,
            ..QualityMetrics::default()
        };
        let outcome = self
            .gates
            .evaluate(&metrics, None, PageSource::Ocr, self.target);
        let (source, text) = match native_text.filter(|t| !t.trim().is_empty()) {
            Some(t) => (PageSource::Native, t),
            None => (PageSource::Ocr, String::new()),
        };
        PageResult {
            page_number,
            source,
            text,
            tokens: Vec::new(),
            layout: None,
            metrics,
            failed_gates: outcome.failed_gates,
            status: PageStatus::NeedsReview,
            retry_attempts: 0,
            strategy: None,
        }
    }

    /// Turn a set of passes into a gated page result.
    pub fn assess(
        &self,
        page_number: usize,
        layout: LayoutClass,
        passes: &[OcrPassResult],
        native_text: Option<&str>,
        dpi: u32,
        attempt: u32,
    ) -> PageResult {
        let merged = consensus(passes);
        let stats = confidence_stats(&merged.tokens, CONFIDENCE_FLOOR);
        let native_similarity = arbiter::native_similarity(native_text, &merged.text);
        let accuracy_score = arbiter::accuracy_score(native_similarity, stats.avg_confidence);
        let source = arbiter::decide(
            native_text,
            accuracy_score,
            self.gates.decision_threshold(self.target),
        );

        let metrics = QualityMetrics {
            avg_confidence: stats.avg_confidence,
            low_confidence_ratio: stats.low_confidence_ratio,
            dual_pass_similarity: merged.dual_pass_similarity,
            native_similarity,
            accuracy_score,
            ocr_attempted: true,
        };
        let outcome = self
            .gates
            .evaluate(&metrics, Some(layout), source, self.target);

        let strategy = merged.primary.map(|i| {
            let primary = &passes[i];
            OcrStrategy {
                name: primary.strategy.clone(),
                segmentation_mode: primary.segmentation_mode,
                dpi,
                attempt,
                passes: passes.len(),
                table_cells: passes.iter().find_map(|p| p.cells),
            }
        });

        let (text, tokens) = match source {
            PageSource::Ocr => (merged.text, merged.tokens),
            PageSource::Native => (native_text.unwrap_or_default().to_string(), Vec::new()),
        };

        debug!(
            page = page_number,
            %layout,
            ?source,
            avg = ?metrics.avg_confidence,
            dual = ?metrics.dual_pass_similarity,
            failed = outcome.failed_gates.len(),
            "Page assessed"
        );

        PageResult {
            page_number,
            source,
            text,
            tokens,
            layout: Some(layout),
            metrics,
            failed_gates: outcome.failed_gates,
            status: outcome.status,
            retry_attempts: 0,
            strategy,
        }
    }

    /// Full pipeline for one rendered page, including retries.
    pub async fn process(
        &self,
        document: &Path,
        page: PageImage,
        native_text: Option<String>,
    ) -> PageResult {
        let page_number = page.page_number;
        let dpi = page.dpi;

        let thresholds = self.layout_thresholds.clone();
        let image = page.image;
        let classified = tokio::task::spawn_blocking(move || {
            let layout = layout::classify(&image, &thresholds);
            (image, layout)
        })
        .await;
        let (image, layout) = match classified {
            Ok(v) => v,
            Err(e) => {
                warn!(page = page_number, "Layout classification task failed: {}", e);
                return self.unrendered(page_number, native_text);
            }
        };
        debug!(page = page_number, %layout, "Layout classified");

        let passes = self.runner.run_preset(&image, layout).await;
        drop(image);

        let mut current = self.assess(page_number, layout, &passes, native_text.as_deref(), dpi, 0);

        let mut attempts = 0u32;
        while self.retries.should_retry(&current, attempts) {
            if let Some(cb) = &self.progress {
                cb.on_page_retry(page_number, attempts + 1);
            }
            let Some(candidate) = self.retries.retry(document, page_number, attempts).await else {
                attempts += 1;
                continue;
            };
            attempts += 1;

            let retried = self.assess(
                page_number,
                candidate.layout,
                &candidate.passes,
                native_text.as_deref(),
                candidate.dpi,
                attempts,
            );
            if is_not_worse(&retried.metrics, &current.metrics) {
                current = retried;
            } else {
                debug!(page = page_number, attempt = attempts, "Retry result discarded");
            }
        }
        current.retry_attempts = attempts;

        if attempts > 0 {
            info!(
                page = page_number,
                attempts,
                approved = current.is_approved(),
                "Page retries finished"
            );
        }
        current
    }
}
