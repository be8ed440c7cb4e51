//! # edgequake-pdf-ocr
//!
//! Quality-gated text extraction from PDF documents.
//!
//! Every page gets a source decision and a verdict. Pages with a usable
//! digital text layer are taken as-is; everything else is rasterised,
//! classified by layout, and read by several OCR passes whose agreement and
//! confidence are checked against quality gates. Pages that fail are retried
//! at higher resolution with harsher preprocessing, and whatever still fails
//! is returned flagged `needs_review` instead of silently passing through.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     validate path / spool uploaded bytes
//!  ├─ 2. Native    read the text layer (concurrently with rendering)
//!  ├─ 3. Render    rasterise OCR pages via pdfium (spawn_blocking)
//!  ├─ 4. Layout    table / text / noisy
//!  ├─ 5. OCR       multi-pass tesseract + consensus
//!  ├─ 6. Arbiter   native or OCR for the page
//!  ├─ 7. Gates     avg confidence · low-conf ratio · dual-pass · native sim
//!  ├─ 8. Retry     400 → 600 DPI, aggressive preprocessing, keep the better
//!  └─ 9. Output    pages + full text + quality summary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf_ocr::{extract, ExtractionConfig, ExtractionOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::builder().workers(4).build()?;
//!     let result = extract("scan.pdf", &config, &ExtractionOptions::default()).await?;
//!     println!("{}", result.full_text);
//!     eprintln!(
//!         "{} approved, {} need review",
//!         result.quality.approved_count, result.quality.needs_review_count
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Background jobs
//!
//! ```rust,no_run
//! use edgequake_pdf_ocr::{ExtractionConfig, ExtractionOptions, JobConfig, JobManager};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = JobManager::new(ExtractionConfig::from_env()?, JobConfig::from_env()).await?;
//! let handle = manager.submit("scan.pdf", ExtractionOptions::default()).await?;
//! let view = manager.poll(handle.job_id()).await?;
//! println!("{}: {}", view.job_id, view.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## External tools
//!
//! | Tool | Used for | Override |
//! |------|----------|----------|
//! | pdfium | rendering, text layer | `PDFIUM_LIB_PATH` |
//! | tesseract | OCR, orientation | `ExtractionConfigBuilder::ocr_engine` |
//!
//! Both sit behind traits ([`Rasterizer`], [`OcrEngine`],
//! [`NativeTextExtractor`]) so tests and embedders can substitute them.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfocr` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod jobs;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ExtractionOptions, JobConfig};
pub use error::{ExtractError, JobError, OcrError};
pub use extract::{extract, extract_from_bytes, extract_sync, inspect, DocumentInfo};
pub use jobs::{
    ExtractionJob, FileJobStore, JobHandle, JobManager, JobStatus, JobStore, JobSummary, JobView,
    MemoryJobStore,
};
pub use output::{
    DocumentResult, ExtractionMethod, PageResult, PageSource, PageStatus, QualityMetrics,
    QualitySummary, Token,
};
pub use pipeline::gate::{Gate, GateConfig, QualityThresholds};
pub use pipeline::layout::LayoutClass;
pub use pipeline::native::NativeTextExtractor;
pub use pipeline::ocr::OcrEngine;
pub use pipeline::render::{PageImage, Rasterizer};
pub use pipeline::tesseract::TesseractEngine;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
