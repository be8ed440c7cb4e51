//! Multi-pass OCR: layout presets, the pass runner, and consensus.
//!
//! A page is recognised several times, once per (preprocessing strategy ×
//! segmentation mode) combination of its layout's preset. Passes are kept
//! immutable and only read back when [`consensus`] picks the primary text and
//! measures agreement with a second pass.
//!
//! Engine failures never escape this module. A pass whose engine call errors
//! is recorded as empty, and the quality gates downstream decide what that
//! means for the page.

use crate::error::OcrError;
use crate::output::{BBox, Token};
use crate::pipeline::layout::{detect_ruling_lines, LayoutClass};
use crate::pipeline::preprocess::{self, PreprocessStrategy};
use crate::pipeline::similarity::similarity;
use async_trait::async_trait;
use image::{imageops, GrayImage, Luma};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tokens at or above this confidence count as "high confidence".
pub const CONFIDENCE_FLOOR: f64 = 92.0;

/// Segmentation mode used for single table cells (one text line).
pub const CELL_SEGMENTATION_MODE: u8 = 7;

const MIN_CELL_SIDE: u32 = 20;

/// Parameters for one engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeRequest {
    /// Engine language code(s), e.g. `eng` or `kan+eng`.
    pub language: String,
    pub segmentation_mode: u8,
    pub tessdata_dir: Option<PathBuf>,
}

/// What an engine returns for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    pub tokens: Vec<Token>,
}

/// An OCR capability. Implementations are expected to be cheap to share
/// across concurrent page tasks.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short label recorded in extraction metadata.
    fn name(&self) -> &str;

    async fn recognize(
        &self,
        image: &GrayImage,
        request: &RecognizeRequest,
    ) -> Result<OcrOutput, OcrError>;

    /// Clockwise rotation (0, 90, 180, 270) that makes the page upright.
    async fn orientation(
        &self,
        image: &GrayImage,
        request: &RecognizeRequest,
    ) -> Result<u32, OcrError> {
        let _ = (image, request);
        Ok(0)
    }
}

/// One (strategy × segmentation mode) attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPassResult {
    pub pass_id: String,
    pub strategy: String,
    pub segmentation_mode: u8,
    pub text: String,
    pub tokens: Vec<Token>,
    /// Number of table cells recognised, for the cell pass only.
    pub cells: Option<usize>,
}

impl OcrPassResult {
    fn empty(strategy: &str, mode: u8) -> Self {
        Self {
            pass_id: format!("{strategy}-psm{mode}"),
            strategy: strategy.to_string(),
            segmentation_mode: mode,
            text: String::new(),
            tokens: Vec::new(),
            cells: None,
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Segmentation modes and preprocessing strategies for one layout.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPreset {
    pub segmentation_modes: Vec<u8>,
    pub strategies: Vec<PreprocessStrategy>,
}

impl OcrPreset {
    pub fn for_layout(layout: LayoutClass) -> Self {
        match layout {
            LayoutClass::Text => Self {
                segmentation_modes: vec![6, 3],
                strategies: vec![PreprocessStrategy::standard()],
            },
            LayoutClass::Table => Self {
                segmentation_modes: vec![4, 11, 6],
                strategies: vec![
                    PreprocessStrategy::aggressive(),
                    PreprocessStrategy::standard(),
                ],
            },
            LayoutClass::Noisy => Self {
                segmentation_modes: vec![4, 6, 11, 3],
                strategies: vec![
                    PreprocessStrategy::aggressive(),
                    PreprocessStrategy::standard(),
                ],
            },
        }
    }
}

/// Merged view of a page's passes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Consensus {
    pub text: String,
    pub tokens: Vec<Token>,
    pub dual_pass_similarity: Option<f64>,
    /// Index of the primary pass, `None` when no pass produced text.
    pub primary: Option<usize>,
}

/// Pick the primary pass and measure agreement with a second opinion.
///
/// The primary is the first pass, in preset order, with non-empty text. The
/// second opinion is the first other non-empty pass run under a different
/// segmentation mode. With no second opinion the similarity is `None`.
pub fn consensus(passes: &[OcrPassResult]) -> Consensus {
    let Some(primary_idx) = passes.iter().position(|p| p.has_text()) else {
        return Consensus::default();
    };
    let primary = &passes[primary_idx];

    let dual_pass_similarity = passes
        .iter()
        .enumerate()
        .find(|(i, p)| {
            *i != primary_idx
                && p.has_text()
                && p.segmentation_mode != primary.segmentation_mode
        })
        .and_then(|(_, secondary)| similarity(&primary.text, &secondary.text));

    Consensus {
        text: primary.text.clone(),
        tokens: primary.tokens.clone(),
        dual_pass_similarity,
        primary: Some(primary_idx),
    }
}

/// Confidence aggregates over a token list.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConfidenceStats {
    /// Mean over tokens at or above the floor; `None` if there are none.
    pub avg_confidence: Option<f64>,
    /// Share of tokens below the floor; `None` for an empty list.
    pub low_confidence_ratio: Option<f64>,
}

pub fn confidence_stats(tokens: &[Token], floor: f64) -> ConfidenceStats {
    if tokens.is_empty() {
        return ConfidenceStats::default();
    }
    let high: Vec<f64> = tokens
        .iter()
        .map(|t| t.confidence)
        .filter(|c| *c >= floor)
        .collect();
    let low = tokens.len() - high.len();
    ConfidenceStats {
        avg_confidence: (!high.is_empty()).then(|| high.iter().sum::<f64>() / high.len() as f64),
        low_confidence_ratio: Some(low as f64 / tokens.len() as f64),
    }
}

/// Runs the passes of a preset against an [`OcrEngine`].
#[derive(Clone)]
pub struct OcrPassRunner {
    engine: Arc<dyn OcrEngine>,
    language: String,
    tessdata_dir: Option<PathBuf>,
    table_cells: bool,
    ruling_min_run: u32,
}

impl OcrPassRunner {
    pub fn new(engine: Arc<dyn OcrEngine>, language: impl Into<String>) -> Self {
        Self {
            engine,
            language: language.into(),
            tessdata_dir: None,
            table_cells: true,
            ruling_min_run: 40,
        }
    }

    pub fn tessdata_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tessdata_dir = dir;
        self
    }

    pub fn table_cells(mut self, enabled: bool) -> Self {
        self.table_cells = enabled;
        self
    }

    pub fn ruling_min_run(mut self, px: u32) -> Self {
        self.ruling_min_run = px.max(1);
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    fn request(&self, segmentation_mode: u8) -> RecognizeRequest {
        RecognizeRequest {
            language: self.language.clone(),
            segmentation_mode,
            tessdata_dir: self.tessdata_dir.clone(),
        }
    }

    /// Run the layout's preset with its own strategies.
    pub async fn run_preset(&self, page: &GrayImage, layout: LayoutClass) -> Vec<OcrPassResult> {
        let preset = OcrPreset::for_layout(layout);
        self.run(page, layout, &preset.strategies).await
    }

    /// Run the layout's segmentation modes under the given strategies.
    ///
    /// Table pages additionally get a cell pass (when enabled) placed before
    /// the full-page passes. Retries go through
    /// [`OcrPassRunner::run_without_cells`] instead.
    pub async fn run(
        &self,
        page: &GrayImage,
        layout: LayoutClass,
        strategies: &[PreprocessStrategy],
    ) -> Vec<OcrPassResult> {
        self.run_inner(page, layout, strategies, self.table_cells).await
    }

    pub async fn run_without_cells(
        &self,
        page: &GrayImage,
        layout: LayoutClass,
        strategies: &[PreprocessStrategy],
    ) -> Vec<OcrPassResult> {
        self.run_inner(page, layout, strategies, false).await
    }

    async fn run_inner(
        &self,
        page: &GrayImage,
        layout: LayoutClass,
        strategies: &[PreprocessStrategy],
        use_cells: bool,
    ) -> Vec<OcrPassResult> {
        let preset = OcrPreset::for_layout(layout);
        let mut passes = Vec::new();

        if use_cells && layout == LayoutClass::Table {
            if let Some(strategy) = strategies.first() {
                if let Some(pass) = self.cell_pass(page, strategy).await {
                    passes.push(pass);
                }
            }
        }

        for strategy in strategies {
            let prepared = self.prepare(page, strategy).await;
            for &mode in &preset.segmentation_modes {
                passes.push(self.pass(&prepared, &strategy.name, mode).await);
            }
        }
        passes
    }

    /// Preprocess one page image for a strategy, correcting orientation when
    /// the strategy asks for it.
    async fn prepare(&self, page: &GrayImage, strategy: &PreprocessStrategy) -> GrayImage {
        let owned = page.clone();
        let strat = strategy.clone();
        let enhanced = match tokio::task::spawn_blocking(move || preprocess::enhance(&owned, &strat))
            .await
        {
            Ok(img) => img,
            Err(e) => {
                warn!("Preprocessing task failed ({}): {}", strategy.name, e);
                page.clone()
            }
        };

        let oriented = if strategy.detect_orientation {
            match self.engine.orientation(&enhanced, &self.request(0)).await {
                Ok(0) => enhanced,
                Ok(degrees) => {
                    debug!("Rotating page {} degrees before OCR", degrees);
                    preprocess::rotate(&enhanced, degrees)
                }
                Err(e) => {
                    debug!("Orientation detection unavailable: {}", e);
                    enhanced
                }
            }
        } else {
            enhanced
        };

        let threshold = strategy.threshold;
        let fallback = oriented.clone();
        tokio::task::spawn_blocking(move || preprocess::binarize(&oriented, threshold))
            .await
            .unwrap_or(fallback)
    }

    async fn pass(&self, image: &GrayImage, strategy: &str, mode: u8) -> OcrPassResult {
        match self.engine.recognize(image, &self.request(mode)).await {
            Ok(output) => OcrPassResult {
                text: output.text,
                tokens: output.tokens,
                ..OcrPassResult::empty(strategy, mode)
            },
            Err(e) => {
                warn!(strategy, mode, "OCR pass failed, recording empty result: {}", e);
                OcrPassResult::empty(strategy, mode)
            }
        }
    }

    /// OCR each table cell on its own and join them row-major.
    async fn cell_pass(
        &self,
        page: &GrayImage,
        strategy: &PreprocessStrategy,
    ) -> Option<OcrPassResult> {
        let owned = page.clone();
        let min_run = self.ruling_min_run;
        let strat = strategy.without_orientation();
        let grid = tokio::task::spawn_blocking(move || cell_grid(&owned, min_run, &strat))
            .await
            .ok()?;
        if grid.is_empty() {
            debug!("No cell grid found on table page");
            return None;
        }

        let request = self.request(CELL_SEGMENTATION_MODE);
        let mut rows: Vec<String> = Vec::new();
        let mut tokens = Vec::new();
        let mut cells = 0usize;

        for row in grid {
            let mut row_text: Vec<String> = Vec::new();
            for cell in row {
                cells += 1;
                match self.engine.recognize(&cell.image, &request).await {
                    Ok(out) => {
                        let text = out.text.trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        row_text.push(text);
                        tokens.extend(out.tokens.into_iter().map(|t| Token {
                            bbox: BBox {
                                x: t.bbox.x + cell.x,
                                y: t.bbox.y + cell.y,
                                ..t.bbox
                            },
                            ..t
                        }));
                    }
                    Err(e) => warn!("Cell OCR failed at ({}, {}): {}", cell.x, cell.y, e),
                }
            }
            if !row_text.is_empty() {
                rows.push(row_text.join("\t"));
            }
        }

        Some(OcrPassResult {
            text: rows.join("\n"),
            tokens,
            cells: Some(cells),
            ..OcrPassResult::empty("cells", CELL_SEGMENTATION_MODE)
        })
    }
}

/// A preprocessed table cell and its offset in the page.
struct CellImage {
    x: u32,
    y: u32,
    image: GrayImage,
}

/// Erase ruling lines and cut the page into cells between them.
///
/// Rows are returned top to bottom, cells left to right. Empty when the page
/// has fewer than two ruling lines in either direction.
fn cell_grid(page: &GrayImage, min_run: u32, strategy: &PreprocessStrategy) -> Vec<Vec<CellImage>> {
    let lines = detect_ruling_lines(page, min_run);
    if lines.horizontal.len() < 2 || lines.vertical.len() < 2 {
        return Vec::new();
    }

    let mut erased = page.clone();
    for (x, y, m) in lines.mask.enumerate_pixels() {
        if m.0[0] > 0 {
            erased.put_pixel(x, y, Luma([255]));
        }
    }

    let mut grid = Vec::new();
    for rows in lines.horizontal.windows(2) {
        let top = rows[0].end + 1;
        let bottom = rows[1].start;
        if bottom <= top || bottom - top < MIN_CELL_SIDE {
            continue;
        }
        let mut row = Vec::new();
        for cols in lines.vertical.windows(2) {
            let left = cols[0].end + 1;
            let right = cols[1].start;
            if right <= left || right - left < MIN_CELL_SIDE {
                continue;
            }
            let crop = imageops::crop_imm(&erased, left, top, right - left, bottom - top).to_image();
            row.push(CellImage {
                x: left,
                y: top,
                image: preprocess::apply(&crop, strategy),
            });
        }
        if !row.is_empty() {
            grid.push(row);
        }
    }
    grid
}
