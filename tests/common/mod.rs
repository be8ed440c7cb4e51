//! Fake capabilities for driving the full pipeline without pdfium or
//! tesseract.
//!
//! The fake rasteriser encodes the page number in the image width and the
//! render DPI in the image height, so the fake OCR engine can answer per page
//! and per resolution.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdf_ocr::output::{BBox, Token};
use edgequake_pdf_ocr::pipeline::ocr::{OcrOutput, RecognizeRequest};
use edgequake_pdf_ocr::{
    ExtractError, ExtractionProgressCallback, NativeTextExtractor, OcrEngine, OcrError,
    PageImage, PageStatus, Rasterizer,
};
use image::{GrayImage, Luma};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const BASE_WIDTH: u32 = 200;

/// Minimal bytes that pass the `%PDF` check.
pub const FAKE_PDF: &[u8] = b"%PDF-1.7\n% fake document for tests\n";

pub fn page_of(image: &GrayImage) -> usize {
    image.width().saturating_sub(BASE_WIDTH) as usize
}

pub fn dpi_of(image: &GrayImage) -> u32 {
    image.height()
}

pub struct FakeRasterizer {
    pub pages: usize,
    /// Pages that fail to render.
    pub broken: Vec<usize>,
    pub renders: Mutex<Vec<(usize, u32)>>,
}

impl FakeRasterizer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            broken: Vec::new(),
            renders: Mutex::new(Vec::new()),
        }
    }

    pub fn broken(mut self, pages: &[usize]) -> Self {
        self.broken = pages.to_vec();
        self
    }

    pub fn render_count(&self) -> usize {
        self.renders.lock().unwrap().len()
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn page_count(&self, _document: &Path) -> Result<usize, ExtractError> {
        Ok(self.pages)
    }

    async fn render(
        &self,
        _document: &Path,
        pages: &[usize],
        dpi: u32,
    ) -> Result<Vec<PageImage>, ExtractError> {
        let mut out = Vec::new();
        for &page_number in pages {
            self.renders.lock().unwrap().push((page_number, dpi));
            if self.broken.contains(&page_number) || page_number > self.pages {
                continue;
            }
            out.push(PageImage {
                page_number,
                dpi,
                image: GrayImage::from_pixel(BASE_WIDTH + page_number as u32, dpi, Luma([255u8])),
            });
        }
        Ok(out)
    }
}

/// How the fake engine reads one page.
#[derive(Debug, Clone)]
pub struct PageScript {
    pub text: String,
    pub confidence: f64,
    /// Confidence once rendered at this DPI or more.
    pub improves_at: Option<(u32, f64)>,
}

impl PageScript {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            improves_at: None,
        }
    }

    pub fn improves_at(mut self, dpi: u32, confidence: f64) -> Self {
        self.improves_at = Some((dpi, confidence));
        self
    }
}

#[derive(Default)]
pub struct FakeOcr {
    pub pages: HashMap<usize, PageScript>,
    pub fail: bool,
    pub delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, n: usize, script: PageScript) -> Self {
        self.pages.insert(n, script);
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn name(&self) -> &str {
        "fake-ocr"
    }

    async fn recognize(
        &self,
        image: &GrayImage,
        _request: &RecognizeRequest,
    ) -> Result<OcrOutput, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(OcrError::BackendNotAvailable("tesseract".into()));
        }
        let Some(script) = self.pages.get(&page_of(image)) else {
            return Ok(OcrOutput::default());
        };
        let confidence = match script.improves_at {
            Some((dpi, better)) if dpi_of(image) >= dpi => better,
            _ => script.confidence,
        };
        let tokens = script
            .text
            .split_whitespace()
            .map(|w| Token {
                text: w.to_string(),
                bbox: BBox::default(),
                confidence,
            })
            .collect();
        Ok(OcrOutput {
            text: script.text.clone(),
            tokens,
        })
    }
}

pub struct FakeNative {
    pub pages: BTreeMap<usize, String>,
    pub fail: bool,
}

impl FakeNative {
    pub fn new(pages: &[(usize, &str)]) -> Self {
        Self {
            pages: pages.iter().map(|(n, t)| (*n, t.to_string())).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            pages: BTreeMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl NativeTextExtractor for FakeNative {
    fn name(&self) -> &str {
        "fake-native"
    }

    async fn extract(&self, _document: &Path) -> Result<BTreeMap<usize, String>, ExtractError> {
        if self.fail {
            return Err(ExtractError::Internal("text layer unreadable".into()));
        }
        Ok(self.pages.clone())
    }
}

#[derive(Default)]
pub struct EventLog {
    pub started: Mutex<Option<(usize, usize)>>,
    pub retries: Mutex<Vec<(usize, u32)>>,
    pub completed: Mutex<Vec<(usize, PageStatus)>>,
    pub finished: Mutex<Option<(usize, usize)>>,
}

impl ExtractionProgressCallback for EventLog {
    fn on_extraction_start(&self, total_pages: usize, ocr_pages: usize) {
        *self.started.lock().unwrap() = Some((total_pages, ocr_pages));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32) {
        self.retries.lock().unwrap().push((page_num, attempt));
    }

    fn on_page_complete(&self, page_num: usize, _total_pages: usize, status: PageStatus) {
        self.completed.lock().unwrap().push((page_num, status));
    }

    fn on_extraction_complete(&self, total_pages: usize, approved: usize) {
        *self.finished.lock().unwrap() = Some((total_pages, approved));
    }
}

/// Fifty-plus non-blank characters: enough to skip OCR.
pub fn long_native(label: &str) -> String {
    format!("{label} the quick brown fox jumps over the lazy dog near the riverbank today")
}
