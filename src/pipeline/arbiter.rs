//! Source arbitration: native text or OCR consensus for a page.
//!
//! OCR wins whenever it is judged reliable enough, because it carries token
//! confidences. Otherwise existing digital text wins, and a page with no
//! native text falls back to OCR whatever its score.

use crate::output::PageSource;
use crate::pipeline::similarity::similarity;

/// Native↔OCR agreement, when both sides have text.
pub fn native_similarity(native: Option<&str>, ocr: &str) -> Option<f64> {
    let native = native.filter(|n| !n.trim().is_empty())?;
    if ocr.trim().is_empty() {
        return None;
    }
    similarity(native, ocr)
}

/// Native similarity if measured, else average confidence scaled to `[0, 1]`.
pub fn accuracy_score(native_similarity: Option<f64>, avg_confidence: Option<f64>) -> Option<f64> {
    native_similarity.or_else(|| avg_confidence.map(|c| c / 100.0))
}

pub fn decide(native_text: Option<&str>, accuracy_score: Option<f64>, threshold: f64) -> PageSource {
    match accuracy_score {
        Some(score) if score >= threshold => PageSource::Ocr,
        _ if native_text.is_some_and(|t| !t.trim().is_empty()) => PageSource::Native,
        _ => PageSource::Ocr,
    }
}
