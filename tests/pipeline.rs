//! End-to-end extraction through the public API with fake capabilities.

mod common;

use common::{long_native, EventLog, FakeNative, FakeOcr, FakeRasterizer, PageScript, FAKE_PDF};
use edgequake_pdf_ocr::{
    extract, extract_from_bytes, ExtractError, ExtractionConfig, ExtractionMethod,
    ExtractionOptions, PageSource, PageStatus,
};
use std::io::Write;
use std::sync::Arc;

fn config(
    rasterizer: &Arc<FakeRasterizer>,
    ocr: &Arc<FakeOcr>,
    native: FakeNative,
) -> edgequake_pdf_ocr::ExtractionConfigBuilder {
    ExtractionConfig::builder()
        .rasterizer(rasterizer.clone())
        .ocr_engine(ocr.clone())
        .native_extractor(Arc::new(native))
        .workers(2)
}

#[tokio::test]
async fn mixed_document_is_hybrid() {
    let rasterizer = Arc::new(FakeRasterizer::new(3));
    let ocr = Arc::new(
        FakeOcr::new()
            .page(2, PageScript::new("page two body", 97.0))
            .page(3, PageScript::new("page three body", 97.0)),
    );
    let first = long_native("one");
    let native = FakeNative::new(&[(1, first.as_str()), (2, "page two body")]);
    let config = config(&rasterizer, &ocr, native).build().unwrap();

    let result = extract_from_bytes(FAKE_PDF, "mixed.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(result.filename, "mixed.pdf");
    assert_eq!(result.extraction.method, ExtractionMethod::Hybrid);
    assert_eq!(result.extraction.engine, "fake-native+fake-ocr");
    assert_eq!(result.extraction.pages_total, 3);
    assert_eq!(result.extraction.dpi, Some(300));

    let sources: Vec<PageSource> = result.pages.iter().map(|p| p.source).collect();
    assert_eq!(sources, vec![PageSource::Native, PageSource::Ocr, PageSource::Ocr]);
    assert!(result.pages[0].tokens.is_empty());
    assert!(result.pages[0].layout.is_none());
    assert_eq!(result.pages[1].metrics.native_similarity, Some(1.0));

    assert!(result.is_approved(), "{:?}", result.quality.needs_review);
    assert_eq!(result.quality.approved_pages, vec![1, 2, 3]);
    assert_eq!(result.stats.ocr_pages, 2);
    assert!(result.full_text.starts_with("one the quick"));
    assert!(result.full_text.contains("page two body"));
    assert!(result.full_text.ends_with("page three body"));

    // the native page was never rendered
    let rendered: Vec<usize> = rasterizer.renders.lock().unwrap().iter().map(|r| r.0).collect();
    assert!(!rendered.contains(&1));
}

#[tokio::test]
async fn fully_digital_document_skips_ocr() {
    let rasterizer = Arc::new(FakeRasterizer::new(2));
    let ocr = Arc::new(FakeOcr::new());
    let (a, b) = (long_native("alpha"), long_native("beta"));
    let native = FakeNative::new(&[(1, a.as_str()), (2, b.as_str())]);
    let config = config(&rasterizer, &ocr, native).build().unwrap();

    let result = extract_from_bytes(FAKE_PDF, "digital.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(result.extraction.method, ExtractionMethod::Native);
    assert_eq!(result.extraction.engine, "fake-native");
    assert_eq!(result.extraction.dpi, None);
    assert_eq!(ocr.call_count(), 0);
    assert_eq!(rasterizer.render_count(), 0);
    assert_eq!(result.full_text, format!("{a}\n{b}"));
    assert!(result.is_approved());
}

#[tokio::test]
async fn force_ocr_reads_every_page() {
    let rasterizer = Arc::new(FakeRasterizer::new(2));
    let ocr = Arc::new(
        FakeOcr::new()
            .page(1, PageScript::new("scanned first page", 97.0))
            .page(2, PageScript::new("scanned second page", 97.0)),
    );
    let a = long_native("alpha");
    let native = FakeNative::new(&[(1, a.as_str())]);
    let config = config(&rasterizer, &ocr, native)
        .native_text(false)
        .build()
        .unwrap();
    let options = ExtractionOptions {
        force_ocr: true,
        ..Default::default()
    };

    let result = extract_from_bytes(FAKE_PDF, "scan.pdf", &config, &options)
        .await
        .unwrap();

    assert_eq!(result.extraction.method, ExtractionMethod::Ocr);
    assert_eq!(result.extraction.engine, "fake-ocr");
    assert!(result.pages.iter().all(|p| p.source == PageSource::Ocr));
    assert_eq!(result.full_text, "scanned first page\nscanned second page");
    assert!(!result.full_text.contains("alpha"));
}

#[tokio::test]
async fn failing_pages_are_retried_then_flagged() {
    let rasterizer = Arc::new(FakeRasterizer::new(2));
    let ocr = Arc::new(
        FakeOcr::new()
            .page(1, PageScript::new("faint but fixable", 40.0).improves_at(400, 97.0))
            .page(2, PageScript::new("hopeless smudge", 40.0)),
    );
    let events = Arc::new(EventLog::default());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[]))
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let result = extract_from_bytes(FAKE_PDF, "faint.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap();

    let first = &result.pages[0];
    assert!(first.is_approved(), "{:?}", first.failed_gates);
    assert_eq!(first.retry_attempts, 1);
    assert_eq!(first.strategy.as_ref().map(|s| s.dpi), Some(400));

    let second = &result.pages[1];
    assert_eq!(second.status, PageStatus::NeedsReview);
    assert_eq!(second.retry_attempts, 2);
    assert!(!second.failed_gates.is_empty());
    assert_eq!(second.text, "hopeless smudge");

    assert_eq!(result.quality.status, PageStatus::NeedsReview);
    assert_eq!(result.quality.approved_pages, vec![1]);
    assert_eq!(result.quality.needs_review.len(), 1);
    assert_eq!(result.quality.needs_review[0].page_number, 2);
    assert_eq!(result.quality.needs_review[0].retry_attempts, 2);
    assert_eq!(result.stats.retried_pages, 2);

    let mut retries = events.retries.lock().unwrap().clone();
    retries.sort_unstable();
    assert_eq!(retries, vec![(1, 1), (2, 1), (2, 2)]);
    assert_eq!(*events.started.lock().unwrap(), Some((2, 2)));
    assert_eq!(*events.finished.lock().unwrap(), Some((2, 1)));
    assert_eq!(events.completed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn engine_outage_falls_back_to_native_text() {
    let rasterizer = Arc::new(FakeRasterizer::new(1));
    let ocr = Arc::new(FakeOcr::failing());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[(1, "brief note")]))
        .build()
        .unwrap();

    let result = extract_from_bytes(FAKE_PDF, "note.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap();

    let page = &result.pages[0];
    assert_eq!(page.source, PageSource::Native);
    assert_eq!(page.text, "brief note");
    assert_eq!(page.status, PageStatus::NeedsReview);
    assert_eq!(result.full_text, "brief note");
}

#[tokio::test]
async fn unreadable_text_layer_routes_everything_to_ocr() {
    let rasterizer = Arc::new(FakeRasterizer::new(1));
    let ocr = Arc::new(FakeOcr::new().page(1, PageScript::new("recovered by ocr", 97.0)));
    let config = config(&rasterizer, &ocr, FakeNative::failing())
        .build()
        .unwrap();

    let result = extract_from_bytes(FAKE_PDF, "broken.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(result.extraction.method, ExtractionMethod::Ocr);
    assert_eq!(result.full_text, "recovered by ocr");
}

#[tokio::test]
async fn page_order_does_not_depend_on_workers_or_batching() {
    let pages = 6;
    let mut ocr = FakeOcr::new();
    for n in 1..=pages {
        ocr = ocr.page(n, PageScript::new(&format!("content of page {n}"), 97.0));
    }
    let ocr = Arc::new(ocr);

    let mut runs = Vec::new();
    for (workers, batch) in [(1, None), (8, None), (3, Some(2))] {
        let rasterizer = Arc::new(FakeRasterizer::new(pages));
        let config = config(&rasterizer, &ocr, FakeNative::new(&[]))
            .workers(workers)
            .batch_pages(batch)
            .build()
            .unwrap();
        let result = extract_from_bytes(FAKE_PDF, "d.pdf", &config, &ExtractionOptions::default())
            .await
            .unwrap();
        let numbers: Vec<usize> = result.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, (1..=pages).collect::<Vec<_>>());
        runs.push((result.full_text, result.quality.approved_pages));
    }
    assert!(runs.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn page_limit_is_enforced_before_any_work() {
    let rasterizer = Arc::new(FakeRasterizer::new(3));
    let ocr = Arc::new(FakeOcr::new());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[]))
        .max_pages(2)
        .build()
        .unwrap();

    let err = extract_from_bytes(FAKE_PDF, "long.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::TooManyPages { pages: 3, limit: 2 }));
    assert!(err.is_input_error());
    assert_eq!(rasterizer.render_count(), 0);
    assert_eq!(ocr.call_count(), 0);
}

#[tokio::test]
async fn per_request_page_limit_overrides_config() {
    let rasterizer = Arc::new(FakeRasterizer::new(3));
    let ocr = Arc::new(FakeOcr::new());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[])).build().unwrap();
    let options = ExtractionOptions {
        max_pages: Some(1),
        ..Default::default()
    };

    let err = extract_from_bytes(FAKE_PDF, "long.pdf", &config, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::TooManyPages { limit: 1, .. }));
}

#[tokio::test]
async fn nothing_rendered_and_no_text_layer_is_an_error() {
    let rasterizer = Arc::new(FakeRasterizer::new(2).broken(&[1, 2]));
    let ocr = Arc::new(FakeOcr::new());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[]))
        .native_text(false)
        .build()
        .unwrap();

    let err = extract_from_bytes(FAKE_PDF, "blank.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::NothingExtracted(_)));
}

#[tokio::test]
async fn silent_pages_give_empty_content() {
    let rasterizer = Arc::new(FakeRasterizer::new(1));
    let ocr = Arc::new(FakeOcr::new());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[])).build().unwrap();

    let err = extract_from_bytes(FAKE_PDF, "empty.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::EmptyContent));
}

#[tokio::test]
async fn unrendered_page_is_kept_as_needs_review() {
    let rasterizer = Arc::new(FakeRasterizer::new(2).broken(&[2]));
    let ocr = Arc::new(FakeOcr::new().page(1, PageScript::new("only readable page", 97.0)));
    let config = config(&rasterizer, &ocr, FakeNative::new(&[])).build().unwrap();

    let result = extract_from_bytes(FAKE_PDF, "half.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap();

    assert_eq!(result.pages.len(), 2);
    assert!(result.pages[0].is_approved());
    assert_eq!(result.pages[1].status, PageStatus::NeedsReview);
    assert!(result.pages[1].layout.is_none());
    assert_eq!(result.full_text, "only readable page");
}

#[tokio::test]
async fn non_pdf_bytes_are_rejected() {
    let rasterizer = Arc::new(FakeRasterizer::new(1));
    let ocr = Arc::new(FakeOcr::new());
    let config = config(&rasterizer, &ocr, FakeNative::new(&[])).build().unwrap();

    let err = extract_from_bytes(b"GIF89a....", "cat.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::NotAPdf { .. }));
    assert_eq!(ocr.call_count(), 0);
}

#[tokio::test]
async fn extract_reads_a_local_file() {
    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    file.write_all(FAKE_PDF).unwrap();
    let rasterizer = Arc::new(FakeRasterizer::new(1));
    let ocr = Arc::new(FakeOcr::new().page(1, PageScript::new("from disk", 97.0)));
    let config = config(&rasterizer, &ocr, FakeNative::new(&[])).build().unwrap();

    let result = extract(file.path(), &config, &ExtractionOptions::default())
        .await
        .unwrap();

    assert!(result.filename.ends_with(".pdf"));
    assert_eq!(result.full_text, "from disk");
}

#[tokio::test]
async fn missing_file_is_an_input_error() {
    let config = ExtractionConfig::default();
    let err = extract("/nonexistent/nowhere.pdf", &config, &ExtractionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::FileNotFound { .. }));
}
