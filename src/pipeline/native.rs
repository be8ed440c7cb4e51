//! Native text: the PDF's embedded digital text layer.

use crate::error::ExtractError;
use crate::pipeline::render::{bind_pdfium, open_document};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Pages whose trimmed native text is at least this many characters long
/// are accepted without OCR (unless OCR is forced).
pub const MIN_NATIVE_CHARS: usize = 50;

/// Extracts per-page native text, keyed by 1-indexed page number.
#[async_trait]
pub trait NativeTextExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// `false` for extractors that never return text.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn extract(&self, document: &Path) -> Result<BTreeMap<usize, String>, ExtractError>;
}

/// Whether a page's native text is substantial enough to skip OCR: at least
/// `MIN_NATIVE_CHARS` characters once leading and trailing whitespace is
/// trimmed. Inner whitespace counts.
pub fn is_sufficient(text: &str) -> bool {
    text.trim().chars().count() >= MIN_NATIVE_CHARS
}

/// Reads the text layer through pdfium.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumTextExtractor;

#[async_trait]
impl NativeTextExtractor for PdfiumTextExtractor {
    fn name(&self) -> &str {
        "pdfium"
    }

    async fn extract(&self, document: &Path) -> Result<BTreeMap<usize, String>, ExtractError> {
        let path = document.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let doc = open_document(&pdfium, &path)?;
            let mut pages = BTreeMap::new();
            for (idx, page) in doc.pages().iter().enumerate() {
                let text = page
                    .text()
                    .map(|t| t.all())
                    .map_err(|e| ExtractError::Internal(format!("page {} text: {e:?}", idx + 1)))?;
                pages.insert(idx + 1, text);
            }
            debug!("Native text read for {} pages", pages.len());
            Ok(pages)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Native text task panicked: {e}")))?
    }
}

/// Routes every page through OCR.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNativeText;

#[async_trait]
impl NativeTextExtractor for DisabledNativeText {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn extract(&self, _document: &Path) -> Result<BTreeMap<usize, String>, ExtractError> {
        Ok(BTreeMap::new())
    }
}
