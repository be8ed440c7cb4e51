//! Configuration types for quality-gated extraction.
//!
//! Three layers:
//!
//! * [`ExtractionConfig`]: process-wide knobs (rendering, workers, limits,
//!   gate tables, injected capabilities), built via
//!   [`ExtractionConfigBuilder`] or read from the environment with
//!   [`ExtractionConfig::from_env`].
//! * [`ExtractionOptions`]: per-request knobs (quality target, retries,
//!   force OCR). Serialisable, because they are part of a persisted job.
//! * [`JobConfig`]: the async job engine: worker count, timeout, store.

use crate::error::ExtractError;
use crate::pipeline::gate::GateConfig;
use crate::pipeline::layout::LayoutThresholds;
use crate::pipeline::native::NativeTextExtractor;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::render::Rasterizer;
use crate::pipeline::retry::RetryPolicy;
use crate::pool::clamp_workers;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_DPI: u32 = 300;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MAX_PAGES: usize = 50;
pub const SAFE_MODE_MAX_PAGES: usize = 5;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Process-wide extraction configuration.
///
/// # Example
/// ```rust
/// use edgequake_pdf_ocr::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .dpi(400)
///     .workers(8)
///     .language("kannada")
///     .build()
///     .unwrap();
/// assert_eq!(config.language, "kannada");
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Base render DPI for OCR pages. Range: 72–1200. Default: 300.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 10 000.
    pub max_rendered_pixels: u32,

    /// Retry budget and DPI escalation.
    pub retry: RetryPolicy,

    /// Concurrent page tasks. Clamped to 1–32. Default: 4.
    pub workers: usize,

    /// Memory-constrained mode: render and OCR this many pages at a time,
    /// dropping images between batches. `None` renders all OCR pages up front.
    pub batch_pages: Option<usize>,

    /// Documents with more pages are rejected. Default: 50.
    pub max_pages: usize,

    /// Files larger than this are rejected. Default: 20 MiB.
    pub max_file_size: u64,

    /// Per engine call. Default: 60 s.
    pub ocr_timeout: Duration,

    /// Language name or alias (`english`, `kn`, `hin+eng`, …). Default: `eng`.
    pub language: String,

    /// Passed to Tesseract as `--tessdata-dir`.
    pub tessdata_dir: Option<PathBuf>,

    /// Read the PDF text layer before OCR. Default: true.
    pub native_text: bool,

    /// Run the per-cell OCR pass on table pages. Default: true.
    pub table_cells: bool,

    pub layout: LayoutThresholds,

    pub gates: GateConfig,

    /// Custom OCR engine. Defaults to the Tesseract CLI.
    pub ocr_engine: Option<Arc<dyn OcrEngine>>,

    /// Custom rasteriser. Defaults to pdfium.
    pub rasterizer: Option<Arc<dyn Rasterizer>>,

    /// Custom native-text extractor. Defaults to pdfium when
    /// `native_text` is on.
    pub native_extractor: Option<Arc<dyn NativeTextExtractor>>,

    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            max_rendered_pixels: 10_000,
            retry: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            batch_pages: None,
            max_pages: DEFAULT_MAX_PAGES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ocr_timeout: Duration::from_secs(60),
            language: "eng".to_string(),
            tessdata_dir: None,
            native_text: true,
            table_cells: true,
            layout: LayoutThresholds::default(),
            gates: GateConfig::default(),
            ocr_engine: None,
            rasterizer: None,
            native_extractor: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("retry", &self.retry)
            .field("workers", &self.workers)
            .field("batch_pages", &self.batch_pages)
            .field("max_pages", &self.max_pages)
            .field("max_file_size", &self.max_file_size)
            .field("ocr_timeout", &self.ocr_timeout)
            .field("language", &self.language)
            .field("native_text", &self.native_text)
            .field("table_cells", &self.table_cells)
            .field("ocr_engine", &self.ocr_engine.as_ref().map(|e| e.name().to_string()))
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn Rasterizer>"))
            .field(
                "native_extractor",
                &self.native_extractor.as_ref().map(|e| e.name().to_string()),
            )
            .finish()
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read limits and flags from the environment.
    ///
    /// | Variable | Effect |
    /// |----------|--------|
    /// | `SAFE_MODE` | low-memory profile: batch mode, 5-page sync limit |
    /// | `OCR_WORKERS` | page workers (1–32, default 4) |
    /// | `SAFE_DPI` | render DPI in safe mode (default 300) |
    /// | `SAFE_BATCH_PAGES` | batch size in safe mode (1–20, default 3) |
    /// | `SYNC_MAX_PAGES` | page limit (default 50, or 5 in safe mode) |
    /// | `MAX_FILE_SIZE_BYTES` | upload limit (default 20 MiB) |
    /// | `NATIVE_TEXT` | set to `0`/`false`/`no` to skip the text layer |
    /// | `OCR_LANG` | default OCR language |
    /// | `TESSDATA_DIR` | Tesseract data directory |
    pub fn from_env() -> Result<Self, ExtractError> {
        let safe = env_bool("SAFE_MODE");
        let page_limit = if safe { SAFE_MODE_MAX_PAGES } else { DEFAULT_MAX_PAGES };
        let mut builder = Self::builder()
            .workers(env_int("OCR_WORKERS", DEFAULT_WORKERS as u64, 1, 32) as usize)
            .max_pages(env_int("SYNC_MAX_PAGES", page_limit as u64, 1, 500) as usize)
            .max_file_size(env_int(
                "MAX_FILE_SIZE_BYTES",
                DEFAULT_MAX_FILE_SIZE,
                1,
                500 * 1024 * 1024,
            ));
        if safe {
            builder = builder
                .dpi(env_int("SAFE_DPI", DEFAULT_DPI as u64, 72, 1200) as u32)
                .batch_pages(Some(env_int("SAFE_BATCH_PAGES", 3, 1, 20) as usize));
        }
        if let Ok(v) = std::env::var("NATIVE_TEXT") {
            builder = builder.native_text(!matches!(
                v.trim().to_lowercase().as_str(),
                "0" | "false" | "no"
            ));
        }
        if let Ok(lang) = std::env::var("OCR_LANG") {
            if !lang.trim().is_empty() {
                builder = builder.language(lang.trim());
            }
        }
        if let Ok(dir) = std::env::var("TESSDATA_DIR") {
            if !dir.is_empty() {
                builder = builder.tessdata_dir(dir);
            }
        }
        builder.build()
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn retry_dpi_sequence(mut self, dpis: Vec<u32>) -> Self {
        self.config.retry.dpi_sequence = dpis;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = clamp_workers(n);
        self
    }

    pub fn batch_pages(mut self, n: Option<usize>) -> Self {
        self.config.batch_pages = n;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn ocr_timeout(mut self, timeout: Duration) -> Self {
        self.config.ocr_timeout = timeout;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(dir.into());
        self
    }

    pub fn native_text(mut self, enabled: bool) -> Self {
        self.config.native_text = enabled;
        self
    }

    pub fn table_cells(mut self, enabled: bool) -> Self {
        self.config.table_cells = enabled;
        self
    }

    pub fn layout_thresholds(mut self, t: LayoutThresholds) -> Self {
        self.config.layout = t;
        self
    }

    pub fn gates(mut self, gates: GateConfig) -> Self {
        self.config.gates = gates;
        self
    }

    pub fn ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.ocr_engine = Some(engine);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.config.rasterizer = Some(rasterizer);
        self
    }

    pub fn native_extractor(mut self, extractor: Arc<dyn NativeTextExtractor>) -> Self {
        self.config.native_extractor = Some(extractor);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        validate_dpi("DPI", c.dpi)?;
        for &dpi in &c.retry.dpi_sequence {
            validate_dpi("Retry DPI", dpi)?;
        }
        if c.max_pages == 0 {
            return Err(ExtractError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.batch_pages == Some(0) {
            return Err(ExtractError::InvalidConfig("batch_pages must be ≥ 1".into()));
        }
        if c.ocr_timeout.is_zero() {
            return Err(ExtractError::InvalidConfig("OCR timeout must be > 0".into()));
        }
        Ok(self.config)
    }
}

fn validate_dpi(what: &str, dpi: u32) -> Result<(), ExtractError> {
    if !(72..=1200).contains(&dpi) {
        return Err(ExtractError::InvalidConfig(format!(
            "{what} must be 72–1200, got {dpi}"
        )));
    }
    Ok(())
}

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Quality target selecting a gate profile, e.g. `90`.
    pub quality_target: Option<u8>,
    /// Overrides the configured retry budget.
    pub max_retries: Option<u32>,
    /// OCR every page even when its native text is sufficient.
    pub force_ocr: bool,
    /// Recorded in the quality summary for downstream consumers.
    pub strict: bool,
    pub dpi: Option<u32>,
    pub max_pages: Option<usize>,
    pub language: Option<String>,
}

impl ExtractionOptions {
    /// Fold these options into a copy of `config`.
    pub fn apply(&self, config: &ExtractionConfig) -> Result<ExtractionConfig, ExtractError> {
        let mut out = config.clone();
        if let Some(n) = self.max_retries {
            out.retry.max_retries = n;
        }
        if let Some(dpi) = self.dpi {
            validate_dpi("DPI", dpi)?;
            out.dpi = dpi;
        }
        if let Some(n) = self.max_pages {
            out.max_pages = n.max(1);
        }
        if let Some(lang) = &self.language {
            out.language = lang.clone();
        }
        Ok(out)
    }
}

/// Async job engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Concurrent jobs. Clamped to 1–32. Default: 2.
    pub workers: usize,
    /// Abort a job's pipeline after this long.
    pub timeout: Option<Duration>,
    /// Persist job records here. `None` keeps them in memory only.
    pub store_dir: Option<PathBuf>,
    /// Terminal jobs older than this are evicted from memory. Default: 1 h.
    pub retention: Duration,
    /// Page limit for async jobs. Default: 500.
    pub max_pages: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: None,
            store_dir: None,
            retention: Duration::from_secs(3600),
            max_pages: 500,
        }
    }
}

impl JobConfig {
    /// `JOB_STORE_DIR`, `JOB_WORKERS`, `JOB_TIMEOUT_SECS`, `ASYNC_MAX_PAGES`
    /// (default 500, or 100 with `SAFE_MODE`).
    pub fn from_env() -> Self {
        let safe = env_bool("SAFE_MODE");
        let timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        Self {
            workers: env_int("JOB_WORKERS", 2, 1, 32) as usize,
            timeout,
            store_dir: std::env::var("JOB_STORE_DIR")
                .ok()
                .filter(|d| !d.trim().is_empty())
                .map(PathBuf::from),
            retention: Duration::from_secs(3600),
            max_pages: env_int("ASYNC_MAX_PAGES", if safe { 100 } else { 500 }, 1, 1000) as usize,
        }
    }
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Integer from the environment, clamped to `lo..=hi`; unparsable values
/// fall back to `default`.
fn env_int(name: &str, default: u64, lo: u64, hi: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse::<u64>().map(|n| n.clamp(lo, hi)).unwrap_or(default),
        Err(_) => default,
    }
}
