//! Synchronous (request/response) extraction entry points.
//!
//! [`extract`] runs the whole pipeline for one document and returns the
//! best-effort [`DocumentResult`], with `needs_review` pages flagged in the
//! quality summary. It fails only for input errors and for documents where
//! nothing at all could be extracted.

use crate::config::{ExtractionConfig, ExtractionOptions};
use crate::error::ExtractError;
use crate::output::{
    DocumentResult, DocumentStats, ExtractionMetadata, ExtractionMethod, PageResult, PageSource,
    QualitySummary,
};
use crate::pipeline::batch::{PageBatchCoordinator, PagePlan};
use crate::pipeline::gate::QualityGateEngine;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::language;
use crate::pipeline::native::{self, DisabledNativeText, NativeTextExtractor, PdfiumTextExtractor};
use crate::pipeline::ocr::{confidence_stats, OcrEngine, OcrPassRunner, CONFIDENCE_FLOOR};
use crate::pipeline::page::PageProcessor;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::retry::RetryScheduler;
use crate::pipeline::tesseract::TesseractEngine;
use crate::pool::WorkerPool;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract a PDF file.
///
/// # Errors
/// Returns `Err(ExtractError)` only for fatal errors:
/// - file not found, unreadable, oversized, or not a PDF
/// - more pages than `max_pages`
/// - no page could be rendered and there is no native text
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf_ocr::{extract, ExtractionConfig, ExtractionOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::from_env()?;
/// let options = ExtractionOptions { quality_target: Some(90), ..Default::default() };
/// let result = extract("scan.pdf", &config, &options).await?;
/// for page in &result.quality.needs_review {
///     eprintln!("page {} failed {:?}", page.page_number, page.failed_gates);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
    options: &ExtractionOptions,
) -> Result<DocumentResult, ExtractError> {
    let resolved = input::resolve_local(path.as_ref(), config.max_file_size)?;
    let filename = input::display_name(resolved.path());
    extract_resolved(&resolved, &filename, config, options).await
}

/// Extract a PDF held in memory.
///
/// The bytes are spooled to a temp file that is removed when this returns.
pub async fn extract_from_bytes(
    bytes: &[u8],
    filename: &str,
    config: &ExtractionConfig,
    options: &ExtractionOptions,
) -> Result<DocumentResult, ExtractError> {
    let resolved = input::spool_bytes(bytes, filename, config.max_file_size)?;
    extract_resolved(&resolved, filename, config, options).await
}

/// Blocking wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
    options: &ExtractionOptions,
) -> Result<DocumentResult, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(extract(path, config, options))
}

/// Cheap pre-flight look at a document: page count and which pages already
/// carry enough native text to skip OCR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub filename: String,
    pub pages_total: usize,
    pub native_pages: Vec<usize>,
    pub ocr_pages: Vec<usize>,
}

/// Inspect a PDF without rendering or running OCR.
pub async fn inspect(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, ExtractError> {
    let resolved = input::resolve_local(path.as_ref(), config.max_file_size)?;
    let rasterizer = resolve_rasterizer(config);
    let pages_total = rasterizer.page_count(resolved.path()).await?;
    let text_layer = read_native(resolve_native_extractor(config).as_ref(), resolved.path())
        .await
        .unwrap_or_default();
    let (native_pages, ocr_pages): (Vec<usize>, Vec<usize>) = (1..=pages_total)
        .partition(|n| text_layer.get(n).is_some_and(|t| native::is_sufficient(t)));
    Ok(DocumentInfo {
        filename: input::display_name(resolved.path()),
        pages_total,
        native_pages,
        ocr_pages,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn resolve_engine(config: &ExtractionConfig) -> Arc<dyn OcrEngine> {
    match &config.ocr_engine {
        Some(engine) => Arc::clone(engine),
        None => Arc::new(TesseractEngine::new().with_timeout(config.ocr_timeout)),
    }
}

fn resolve_rasterizer(config: &ExtractionConfig) -> Arc<dyn Rasterizer> {
    match &config.rasterizer {
        Some(r) => Arc::clone(r),
        None => Arc::new(PdfiumRasterizer::new(config.max_rendered_pixels)),
    }
}

fn resolve_native_extractor(config: &ExtractionConfig) -> Arc<dyn NativeTextExtractor> {
    if !config.native_text {
        return Arc::new(DisabledNativeText);
    }
    match &config.native_extractor {
        Some(n) => Arc::clone(n),
        None => Arc::new(PdfiumTextExtractor),
    }
}

/// Native text per page, or `None` when extraction failed.
async fn read_native(
    extractor: &dyn NativeTextExtractor,
    document: &Path,
) -> Option<BTreeMap<usize, String>> {
    match extractor.extract(document).await {
        Ok(map) => Some(map),
        Err(e) => {
            warn!("Native text extraction failed, routing every page to OCR: {}", e);
            None
        }
    }
}

pub(crate) async fn extract_resolved(
    resolved: &ResolvedInput,
    filename: &str,
    config: &ExtractionConfig,
    options: &ExtractionOptions,
) -> Result<DocumentResult, ExtractError> {
    let total_start = Instant::now();
    let config = options.apply(config)?;
    let document = resolved.path();
    info!(filename, "Starting extraction");

    let rasterizer = resolve_rasterizer(&config);
    let native_extractor = resolve_native_extractor(&config);
    let engine = resolve_engine(&config);

    // ── Page count and limits ────────────────────────────────────────────
    let pages_total = rasterizer.page_count(document).await?;
    if pages_total == 0 {
        return Err(ExtractError::NothingExtracted("document has no pages".into()));
    }
    if pages_total > config.max_pages {
        return Err(ExtractError::TooManyPages {
            pages: pages_total,
            limit: config.max_pages,
        });
    }
    debug!(pages_total, "Page count checked");

    // ── Pipeline assembly ────────────────────────────────────────────────
    let gates = Arc::new(QualityGateEngine::new(config.gates.clone()));
    let runner = OcrPassRunner::new(engine.clone(), language::tesseract_codes(&config.language))
        .tessdata_dir(config.tessdata_dir.clone())
        .table_cells(config.table_cells)
        .ruling_min_run(config.layout.min_run_length);
    let retries = RetryScheduler::new(
        config.retry.clone(),
        config.dpi,
        rasterizer.clone(),
        runner.clone(),
        config.layout.clone(),
    );
    let processor = PageProcessor::new(
        runner,
        gates.clone(),
        retries,
        config.layout.clone(),
        options.quality_target,
    )
    .with_progress(config.progress_callback.clone());
    let coordinator = PageBatchCoordinator::new(
        processor,
        rasterizer,
        WorkerPool::new(config.workers),
        config.batch_pages,
        config.dpi,
    );

    // ── Native text + rendering ──────────────────────────────────────────
    let native_enabled = native_extractor.is_enabled();
    let all_ocr = options.force_ocr || !native_enabled;
    let all_pages: Vec<usize> = (1..=pages_total).collect();

    let (native, results) = if all_ocr && !coordinator.is_batched() {
        // OCR set is known up front: read the text layer while rendering
        let (native, images) = tokio::join!(
            read_native(native_extractor.as_ref(), document),
            coordinator.render(document, &all_pages)
        );
        let images = images?;
        let plans = plan_pages(pages_total, native.as_ref(), true);
        notify_start(&config, &plans);
        let results = coordinator
            .process_rendered(document, plans, images, pages_total)
            .await;
        (native, results)
    } else {
        let native = read_native(native_extractor.as_ref(), document).await;
        let plans = plan_pages(pages_total, native.as_ref(), all_ocr || native.is_none());
        notify_start(&config, &plans);
        let results = coordinator.run(document, plans).await?;
        (native, results)
    };

    // ── Document-level assembly ──────────────────────────────────────────
    let rendered_any = results
        .iter()
        .any(|p| p.metrics.ocr_attempted && p.layout.is_some());
    let native_any = results
        .iter()
        .any(|p| p.source == PageSource::Native && !p.text.trim().is_empty());
    if !rendered_any && !native_any {
        return Err(ExtractError::NothingExtracted(
            "no page could be rendered and the document has no text layer".into(),
        ));
    }

    let full_text = results
        .iter()
        .filter(|p| !p.text.is_empty())
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    if full_text.is_empty() {
        return Err(ExtractError::EmptyContent);
    }

    let ocr_ran = results.iter().any(|p| p.metrics.ocr_attempted);
    let native_ok = native_enabled && native.is_some();
    let method = match (ocr_ran, native_ok) {
        (false, _) => ExtractionMethod::Native,
        (true, false) => ExtractionMethod::Ocr,
        (true, true) => ExtractionMethod::Hybrid,
    };
    let engine_label = match method {
        ExtractionMethod::Native => native_extractor.name().to_string(),
        ExtractionMethod::Ocr => engine.name().to_string(),
        ExtractionMethod::Hybrid => format!("{}+{}", native_extractor.name(), engine.name()),
    };

    let stats = document_stats(&results, total_start);
    let quality = QualitySummary::from_pages(
        &results,
        options.strict,
        gates.base_thresholds(options.quality_target),
    );

    if let Some(cb) = &config.progress_callback {
        cb.on_extraction_complete(pages_total, quality.approved_count);
    }
    info!(
        filename,
        ?method,
        approved = quality.approved_count,
        needs_review = quality.needs_review_count,
        duration_ms = stats.total_duration_ms,
        "Extraction complete"
    );

    Ok(DocumentResult {
        doc_id: uuid::Uuid::new_v4().to_string(),
        filename: filename.to_string(),
        ingested_at: Utc::now(),
        extraction: ExtractionMetadata {
            method,
            engine: engine_label,
            pages_total,
            dpi: ocr_ran.then_some(config.dpi),
        },
        pages: results,
        full_text,
        stats,
        quality,
    })
}

/// Decide per page whether OCR is needed.
///
/// With `all_ocr` set every page is OCR'd; native text is still carried
/// along so the arbiter can fall back to it.
fn plan_pages(
    pages_total: usize,
    native: Option<&BTreeMap<usize, String>>,
    all_ocr: bool,
) -> Vec<PagePlan> {
    (1..=pages_total)
        .map(|page_number| {
            let native_text = native
                .and_then(|m| m.get(&page_number))
                .filter(|t| !t.trim().is_empty())
                .cloned();
            let needs_ocr = all_ocr
                || !native_text
                    .as_deref()
                    .is_some_and(native::is_sufficient);
            PagePlan {
                page_number,
                native_text,
                needs_ocr,
            }
        })
        .collect()
}

fn notify_start(config: &ExtractionConfig, plans: &[PagePlan]) {
    let ocr_pages = plans.iter().filter(|p| p.needs_ocr).count();
    info!(pages = plans.len(), ocr_pages, "Page plan ready");
    if let Some(cb) = &config.progress_callback {
        cb.on_extraction_start(plans.len(), ocr_pages);
    }
}

fn document_stats(pages: &[PageResult], started: Instant) -> DocumentStats {
    let ocr_tokens: Vec<_> = pages
        .iter()
        .filter(|p| p.source == PageSource::Ocr)
        .flat_map(|p| p.tokens.iter().cloned())
        .collect();
    DocumentStats {
        total_tokens: pages.iter().map(|p| p.tokens.len()).sum(),
        avg_confidence: confidence_stats(&ocr_tokens, CONFIDENCE_FLOOR).avg_confidence,
        ocr_pages: pages.iter().filter(|p| p.metrics.ocr_attempted).count(),
        retried_pages: pages.iter().filter(|p| p.retry_attempts > 0).count(),
        total_duration_ms: started.elapsed().as_millis() as u64,
    }
}
