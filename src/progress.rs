//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through a document.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf_ocr::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     retried: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_retry(&self, page_num: usize, attempt: u32) {
//!         self.retried.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {page_num}: retry {attempt}");
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { retried: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageStatus;
use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// Pages are processed concurrently, so every method may be called from
/// several tasks at once. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the page plan is known.
    ///
    /// * `total_pages`: pages in the document
    /// * `ocr_pages`: pages that will go through OCR
    fn on_extraction_start(&self, total_pages: usize, ocr_pages: usize) {
        let _ = (total_pages, ocr_pages);
    }

    /// Called before OCR starts on a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called before each retry attempt (1-based `attempt`).
    fn on_page_retry(&self, page_num: usize, attempt: u32) {
        let _ = (page_num, attempt);
    }

    /// Called when a page reaches its terminal status.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, status: PageStatus) {
        let _ = (page_num, total_pages, status);
    }

    /// Called once after every page has a result.
    fn on_extraction_complete(&self, total_pages: usize, approved: usize) {
        let _ = (total_pages, approved);
    }
}

/// Does nothing. The default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
