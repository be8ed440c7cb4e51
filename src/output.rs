//! Result types produced by the extraction pipeline.
//!
//! Everything here is `Serialize + Deserialize`: a [`DocumentResult`] is
//! returned directly from synchronous extraction and stored verbatim inside a
//! completed [`crate::jobs::ExtractionJob`].

use crate::pipeline::gate::{Gate, QualityThresholds};
use crate::pipeline::layout::LayoutClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token bounding box in page-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One recognised word with its recognition confidence (0–100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub bbox: BBox,
    pub confidence: f64,
}

/// Which extractor produced a page's final text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSource {
    /// Embedded digital text layer.
    Native,
    /// OCR consensus.
    Ocr,
}

/// Terminal quality status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Approved,
    NeedsReview,
}

/// Per-page quality signals. `None` means "not measurable", which the gates
/// treat as failing (except where a gate is skipped outright).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean confidence over tokens at or above the confidence floor.
    pub avg_confidence: Option<f64>,
    /// Share of tokens below the confidence floor.
    pub low_confidence_ratio: Option<f64>,
    /// Agreement between two OCR passes with different segmentation modes.
    pub dual_pass_similarity: Option<f64>,
    /// Agreement between native text and OCR text, when both exist.
    pub native_similarity: Option<f64>,
    /// Score the source arbiter compared against its threshold.
    pub accuracy_score: Option<f64>,
    /// Whether OCR ran for this page at all.
    pub ocr_attempted: bool,
}

/// The preprocessing/segmentation combination that produced a page's OCR text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrStrategy {
    /// Preprocessing strategy name (`standard`, `aggressive`, `retry-1`, `cells`, …).
    pub name: String,
    /// Tesseract page segmentation mode of the primary pass.
    pub segmentation_mode: u8,
    /// Render DPI of the page image.
    pub dpi: u32,
    /// 0 for the initial run, N for the N-th retry.
    pub attempt: u32,
    /// Number of passes considered for consensus.
    pub passes: usize,
    /// Cells OCR'd independently, when the table cell path ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_cells: Option<usize>,
}

/// Extraction result for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_number: usize,
    pub source: PageSource,
    pub text: String,
    /// OCR tokens; always empty when `source` is [`PageSource::Native`].
    pub tokens: Vec<Token>,
    /// `None` only for pages that were never rasterised.
    pub layout: Option<LayoutClass>,
    pub metrics: QualityMetrics,
    pub failed_gates: Vec<Gate>,
    pub status: PageStatus,
    pub retry_attempts: u32,
    pub strategy: Option<OcrStrategy>,
}

impl PageResult {
    pub fn is_approved(&self) -> bool {
        self.status == PageStatus::Approved
    }
}

/// How the document as a whole was extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Native text only; OCR never ran.
    Native,
    /// OCR only; native extraction was disabled or failed.
    Ocr,
    /// Native text for some pages, OCR for others.
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub method: ExtractionMethod,
    /// Human-readable engine label, e.g. `pdfium+tesseract`.
    pub engine: String,
    pub pages_total: usize,
    /// Base render DPI, when any page was rasterised.
    pub dpi: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_tokens: usize,
    /// High-confidence average across all OCR-sourced pages.
    pub avg_confidence: Option<f64>,
    pub ocr_pages: usize,
    pub retried_pages: usize,
    pub total_duration_ms: u64,
}

/// A page that did not clear its gates, with the reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPage {
    pub page_number: usize,
    pub layout: Option<LayoutClass>,
    pub failed_gates: Vec<Gate>,
    pub retry_attempts: u32,
}

/// Document-level quality roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// `Approved` iff every page is approved.
    pub status: PageStatus,
    pub strict: bool,
    /// Base (target-level) thresholds before layout relaxation.
    pub thresholds: QualityThresholds,
    pub approved_count: usize,
    pub needs_review_count: usize,
    pub approved_pages: Vec<usize>,
    pub needs_review: Vec<ReviewPage>,
}

impl QualitySummary {
    pub fn from_pages(pages: &[PageResult], strict: bool, thresholds: QualityThresholds) -> Self {
        let approved_pages: Vec<usize> = pages
            .iter()
            .filter(|p| p.is_approved())
            .map(|p| p.page_number)
            .collect();
        let needs_review: Vec<ReviewPage> = pages
            .iter()
            .filter(|p| !p.is_approved())
            .map(|p| ReviewPage {
                page_number: p.page_number,
                layout: p.layout,
                failed_gates: p.failed_gates.clone(),
                retry_attempts: p.retry_attempts,
            })
            .collect();

        Self {
            status: if needs_review.is_empty() {
                PageStatus::Approved
            } else {
                PageStatus::NeedsReview
            },
            strict,
            thresholds,
            approved_count: approved_pages.len(),
            needs_review_count: needs_review.len(),
            approved_pages,
            needs_review,
        }
    }
}

/// Complete result for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub doc_id: String,
    pub filename: String,
    pub ingested_at: DateTime<Utc>,
    pub extraction: ExtractionMetadata,
    /// Pages in document order.
    pub pages: Vec<PageResult>,
    pub full_text: String,
    pub stats: DocumentStats,
    pub quality: QualitySummary,
}

impl DocumentResult {
    pub fn is_approved(&self) -> bool {
        self.quality.status == PageStatus::Approved
    }
}
