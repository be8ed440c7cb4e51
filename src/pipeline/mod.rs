//! Pipeline stages for quality-gated extraction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ native ──▶ render ──▶ layout ──▶ ocr ──▶ arbiter ──▶ gate ──▶ retry
//! (checks)  (text layer) (pdfium)  (classes)  (passes) (source)  (status) (escalate)
//! ```
//!
//! 1. [`input`]: validate the path or spool uploaded bytes
//! 2. [`native`]: read the embedded text layer; sufficient pages skip OCR
//! 3. [`render`]: rasterise OCR pages to greyscale in `spawn_blocking`
//! 4. [`layout`]: classify each page as table, text, or noisy
//! 5. [`preprocess`] / [`ocr`] / [`tesseract`]: run the layout's passes
//!    and merge them by consensus
//! 6. [`arbiter`]: choose native text or OCR for the page
//! 7. [`gate`]: approve the page or mark it for review
//! 8. [`retry`]: re-render at higher DPI with harsher preprocessing
//!
//! [`page`] strings steps 4–8 together for one page and [`batch`] schedules
//! pages across the worker pool.

pub mod arbiter;
pub mod batch;
pub mod gate;
pub mod input;
pub mod language;
pub mod layout;
pub mod native;
pub mod ocr;
pub mod page;
pub mod preprocess;
pub mod render;
pub mod retry;
pub mod similarity;
pub mod tesseract;
