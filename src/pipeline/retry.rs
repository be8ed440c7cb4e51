//! Bounded retries for pages that failed their gates.
//!
//! Each attempt escalates: the page is re-rendered at the next DPI of the
//! escalation sequence, its layout is classified afresh, and the layout's
//! segmentation modes run under the attempt's aggressive preprocessing.
//! A candidate only replaces the current page result when it is not worse on
//! high-confidence average; see [`is_not_worse`].

use crate::output::{PageResult, PageStatus, QualityMetrics};
use crate::pipeline::layout::{self, LayoutClass, LayoutThresholds};
use crate::pipeline::ocr::{OcrPassResult, OcrPassRunner};
use crate::pipeline::preprocess::PreprocessStrategy;
use crate::pipeline::render::Rasterizer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Retry budget and escalation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Render DPI per attempt, cycling when attempts outnumber entries.
    pub dpi_sequence: Vec<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            dpi_sequence: vec![400, 600],
        }
    }
}

impl RetryPolicy {
    /// DPI for the 0-based attempt index.
    pub fn dpi_for(&self, attempt: u32, fallback: u32) -> u32 {
        if self.dpi_sequence.is_empty() {
            return fallback;
        }
        self.dpi_sequence[attempt as usize % self.dpi_sequence.len()]
    }
}

/// A page is retried only while it needs review, went through OCR, and has
/// budget left.
pub fn should_retry(page: &PageResult, attempts: u32, max_retries: u32) -> bool {
    page.status == PageStatus::NeedsReview && page.metrics.ocr_attempted && attempts < max_retries
}

/// Keep-the-better rule: the candidate's high-confidence average must be at
/// least the current one. Missing averages count as zero.
pub fn is_not_worse(candidate: &QualityMetrics, current: &QualityMetrics) -> bool {
    candidate.avg_confidence.unwrap_or(0.0) >= current.avg_confidence.unwrap_or(0.0)
}

/// Raw output of one retry attempt, before gating.
#[derive(Debug, Clone)]
pub struct RetryCandidate {
    pub layout: LayoutClass,
    pub dpi: u32,
    pub strategy: PreprocessStrategy,
    pub passes: Vec<OcrPassResult>,
}

/// Re-renders and re-OCRs a page on demand.
#[derive(Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    base_dpi: u32,
    rasterizer: Arc<dyn Rasterizer>,
    runner: OcrPassRunner,
    layout_thresholds: LayoutThresholds,
}

impl RetryScheduler {
    pub fn new(
        policy: RetryPolicy,
        base_dpi: u32,
        rasterizer: Arc<dyn Rasterizer>,
        runner: OcrPassRunner,
        layout_thresholds: LayoutThresholds,
    ) -> Self {
        Self {
            policy,
            base_dpi,
            rasterizer,
            runner,
            layout_thresholds,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn should_retry(&self, page: &PageResult, attempts: u32) -> bool {
        should_retry(page, attempts, self.policy.max_retries)
    }

    /// Run the 0-based retry `attempt` for one page.
    ///
    /// `None` when the page could not be re-rendered.
    pub async fn retry(
        &self,
        document: &Path,
        page_number: usize,
        attempt: u32,
    ) -> Option<RetryCandidate> {
        let dpi = self.policy.dpi_for(attempt, self.base_dpi);
        info!(page = page_number, attempt = attempt + 1, dpi, "Retrying page OCR");

        let rendered = match self.rasterizer.render(document, &[page_number], dpi).await {
            Ok(mut images) if !images.is_empty() => images.swap_remove(0),
            Ok(_) => {
                warn!(page = page_number, "Retry render produced no image");
                return None;
            }
            Err(e) => {
                warn!(page = page_number, "Retry render failed: {}", e);
                return None;
            }
        };

        let thresholds = self.layout_thresholds.clone();
        let image = rendered.image;
        let (image, layout) = tokio::task::spawn_blocking(move || {
            let layout = layout::classify(&image, &thresholds);
            (image, layout)
        })
        .await
        .ok()?;
        debug!(page = page_number, %layout, "Retry layout");

        let strategy = PreprocessStrategy::retry(attempt);
        let passes = self
            .runner
            .run_without_cells(&image, layout, std::slice::from_ref(&strategy))
            .await;
        drop(image);

        Some(RetryCandidate {
            layout,
            dpi,
            strategy,
            passes,
        })
    }
}
