//! Error types for the edgequake-pdf-ocr library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`ExtractError`]: **Fatal**: the document cannot be processed at all
//!   (missing file, not a PDF, page limit exceeded, nothing renderable).
//!   Returned as `Err(ExtractError)` from [`crate::extract`] and friends.
//!
//! * [`OcrError`]: **Absorbed**: the OCR capability failed for one pass
//!   (binary missing, timeout, bad exit status). The pass runner records an
//!   empty pass instead of propagating, so the quality gates classify the
//!   page as `needs_review` rather than aborting the document.
//!
//! * [`JobError`]: errors from the asynchronous job engine (unknown id,
//!   illegal state transition, storage I/O).
//!
//! Gate failures are not errors at all: they surface as
//! [`crate::output::PageStatus::NeedsReview`].

use crate::jobs::JobStatus;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the extraction pipeline.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The file is larger than the configured upload limit.
    #[error("File '{path}' is {size} bytes, exceeds limit of {limit} bytes")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    /// The document has more pages than allowed.
    #[error("PDF has {pages} pages, exceeds limit of {limit}")]
    TooManyPages { pages: usize, limit: usize },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Neither native extraction nor OCR produced any page.
    #[error("No pages could be extracted: {0}")]
    NothingExtracted(String),

    /// Pages were processed but every one came back blank.
    #[error("Extracted content is empty")]
    EmptyContent,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// `true` for errors caused by the submitted document itself.
    ///
    /// Input errors are rejected before the pipeline starts and are never
    /// worth retrying.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ExtractError::FileNotFound { .. }
                | ExtractError::PermissionDenied { .. }
                | ExtractError::NotAPdf { .. }
                | ExtractError::FileTooLarge { .. }
                | ExtractError::TooManyPages { .. }
                | ExtractError::CorruptPdf { .. }
        )
    }
}

/// A failure of the OCR capability for a single pass.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The OCR binary is not installed or not on `PATH`.
    #[error("OCR backend not available: {0}")]
    BackendNotAvailable(String),

    /// The OCR process ran longer than the configured timeout.
    #[error("OCR timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The OCR process exited unsuccessfully or produced unusable output.
    #[error("OCR failed: {0}")]
    Failed(String),

    /// Encoding the page image for the OCR process failed.
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the asynchronous job engine.
#[derive(Debug, Error)]
pub enum JobError {
    /// No job with this id exists (or it was lost before being persisted).
    #[error("Job '{0}' not found")]
    NotFound(String),

    /// A status change that would break the monotonic lifecycle.
    #[error("Job '{job_id}': illegal transition {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// Reading or writing a persisted job record failed.
    #[error("Job store I/O error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted record could not be (de)serialised.
    #[error("Job record serialisation failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// The input document could not be staged for the job.
    #[error("Failed to stage job input: {0}")]
    Input(String),

    /// The job's task was cancelled or panicked before returning a record.
    #[error("Job task aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_pages_display() {
        let e = ExtractError::TooManyPages { pages: 60, limit: 50 };
        let msg = e.to_string();
        assert!(msg.contains("60 pages"), "got: {msg}");
        assert!(msg.contains("50"), "got: {msg}");
    }

    #[test]
    fn input_errors_are_classified() {
        assert!(ExtractError::FileNotFound { path: "x.pdf".into() }.is_input_error());
        assert!(ExtractError::TooManyPages { pages: 2, limit: 1 }.is_input_error());
        assert!(!ExtractError::EmptyContent.is_input_error());
        assert!(!ExtractError::Internal("boom".into()).is_input_error());
    }

    #[test]
    fn ocr_timeout_display() {
        let e = OcrError::Timeout { secs: 30 };
        assert!(e.to_string().contains("30s"));
    }

    #[test]
    fn invalid_transition_display() {
        let e = JobError::InvalidTransition {
            job_id: "abc".into(),
            from: JobStatus::Completed,
            to: JobStatus::Processing,
        };
        let msg = e.to_string();
        assert!(msg.contains("completed -> processing"), "got: {msg}");
    }
}
