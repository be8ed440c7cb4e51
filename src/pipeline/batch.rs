//! Document-level page scheduling.
//!
//! Pages needing OCR are rendered and then fanned out to a bounded
//! [`WorkerPool`]. In batch mode only `batch_pages` images are alive at a
//! time: each chunk is rendered, processed, and dropped before the next one
//! is rendered. Results always come back in page order.

use crate::error::ExtractError;
use crate::output::PageResult;
use crate::pipeline::page::PageProcessor;
use crate::pipeline::render::{PageImage, Rasterizer};
use crate::pool::WorkerPool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// What to do with one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    /// 1-indexed.
    pub page_number: usize,
    pub native_text: Option<String>,
    pub needs_ocr: bool,
}

pub struct PageBatchCoordinator {
    processor: PageProcessor,
    rasterizer: Arc<dyn Rasterizer>,
    pool: WorkerPool,
    batch_pages: Option<usize>,
    dpi: u32,
}

impl PageBatchCoordinator {
    pub fn new(
        processor: PageProcessor,
        rasterizer: Arc<dyn Rasterizer>,
        pool: WorkerPool,
        batch_pages: Option<usize>,
        dpi: u32,
    ) -> Self {
        Self {
            processor,
            rasterizer,
            pool,
            batch_pages: batch_pages.filter(|n| *n > 0),
            dpi,
        }
    }

    pub fn is_batched(&self) -> bool {
        self.batch_pages.is_some()
    }

    /// Render pages at the base DPI, keyed by page number.
    pub async fn render(
        &self,
        document: &Path,
        pages: &[usize],
    ) -> Result<BTreeMap<usize, PageImage>, ExtractError> {
        if pages.is_empty() {
            return Ok(BTreeMap::new());
        }
        let images = self.rasterizer.render(document, pages, self.dpi).await?;
        Ok(images.into_iter().map(|img| (img.page_number, img)).collect())
    }

    /// Process every plan, using already-rendered images where present.
    ///
    /// Pages not needing OCR become native-only results; OCR pages without an
    /// image become unrendered results.
    pub async fn process_rendered(
        &self,
        document: &Path,
        plans: Vec<PagePlan>,
        mut images: BTreeMap<usize, PageImage>,
        total_pages: usize,
    ) -> Vec<PageResult> {
        let work: Vec<(PagePlan, Option<PageImage>)> = plans
            .into_iter()
            .map(|plan| {
                let image = if plan.needs_ocr {
                    images.remove(&plan.page_number)
                } else {
                    None
                };
                (plan, image)
            })
            .collect();

        self.pool
            .map_ordered(work, |(plan, image)| async move {
                let result = match (plan.needs_ocr, image) {
                    (false, _) => self
                        .processor
                        .native_only(plan.page_number, plan.native_text.unwrap_or_default()),
                    (true, None) => self.processor.unrendered(plan.page_number, plan.native_text),
                    (true, Some(image)) => {
                        if let Some(cb) = self.processor.progress() {
                            cb.on_page_start(plan.page_number, total_pages);
                        }
                        self.processor.process(document, image, plan.native_text).await
                    }
                };
                if plan.needs_ocr {
                    if let Some(cb) = self.processor.progress() {
                        cb.on_page_complete(result.page_number, total_pages, result.status);
                    }
                }
                result
            })
            .await
    }

    /// Render and process every plan.
    pub async fn run(&self, document: &Path, plans: Vec<PagePlan>) -> Result<Vec<PageResult>, ExtractError> {
        let total_pages = plans.len();
        let ocr_pages: Vec<usize> = plans
            .iter()
            .filter(|p| p.needs_ocr)
            .map(|p| p.page_number)
            .collect();

        let Some(batch) = self.batch_pages else {
            let images = self.render(document, &ocr_pages).await?;
            debug!(rendered = images.len(), requested = ocr_pages.len(), "Rendered OCR pages");
            return Ok(self.process_rendered(document, plans, images, total_pages).await);
        };

        info!(batch, ocr_pages = ocr_pages.len(), "Processing pages in batches");
        let mut results = Vec::with_capacity(total_pages);
        let (ocr_plans, native_plans): (Vec<PagePlan>, Vec<PagePlan>) =
            plans.into_iter().partition(|p| p.needs_ocr);
        results.extend(
            self.process_rendered(document, native_plans, BTreeMap::new(), total_pages)
                .await,
        );

        for chunk in ocr_plans.chunks(batch) {
            let numbers: Vec<usize> = chunk.iter().map(|p| p.page_number).collect();
            let images = self.render(document, &numbers).await?;
            debug!(pages = ?numbers, "Batch rendered");
            results.extend(
                self.process_rendered(document, chunk.to_vec(), images, total_pages)
                    .await,
            );
        }

        results.sort_by_key(|r| r.page_number);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageSource;
    use crate::pipeline::gate::{GateConfig, QualityGateEngine};
    use crate::pipeline::layout::LayoutThresholds;
    use crate::pipeline::ocr::OcrPassRunner;
    use crate::pipeline::page::tests::{BlankRasterizer, FixedEngine};
    use crate::pipeline::retry::{RetryPolicy, RetryScheduler};
    use std::sync::atomic::Ordering;

    fn coordinator(
        workers: usize,
        batch: Option<usize>,
        rasterizer: Arc<BlankRasterizer>,
    ) -> PageBatchCoordinator {
        let engine = Arc::new(FixedEngine::new("one two three four five", 97.0));
        let runner = OcrPassRunner::new(engine, "eng");
        let retries = RetryScheduler::new(
            RetryPolicy::default(),
            300,
            rasterizer.clone(),
            runner.clone(),
            LayoutThresholds::default(),
        );
        let processor = PageProcessor::new(
            runner,
            Arc::new(QualityGateEngine::new(GateConfig::default())),
            retries,
            LayoutThresholds::default(),
            None,
        );
        PageBatchCoordinator::new(processor, rasterizer, WorkerPool::new(workers), batch, 300)
    }

    fn plans(n: usize) -> Vec<PagePlan> {
        (1..=n)
            .map(|page_number| PagePlan {
                page_number,
                native_text: (page_number % 2 == 0).then(|| "x".repeat(80)),
                needs_ocr: page_number % 2 == 1,
            })
            .collect()
    }

    #[tokio::test]
    async fn results_are_in_page_order() {
        let c = coordinator(3, None, Arc::new(BlankRasterizer::new(5)));
        let results = c.run(Path::new("doc.pdf"), plans(5)).await.unwrap();
        let numbers: Vec<usize> = results.iter().map(|r| r.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(results[1].source, PageSource::Native);
        assert_eq!(results[0].source, PageSource::Ocr);
    }

    #[tokio::test]
    async fn worker_count_does_not_change_results() {
        let one = coordinator(1, None, Arc::new(BlankRasterizer::new(5)))
            .run(Path::new("doc.pdf"), plans(5))
            .await
            .unwrap();
        let many = coordinator(4, None, Arc::new(BlankRasterizer::new(5)))
            .run(Path::new("doc.pdf"), plans(5))
            .await
            .unwrap();
        assert_eq!(one, many);
    }

    #[tokio::test]
    async fn batch_mode_matches_unbatched() {
        let batched_raster = Arc::new(BlankRasterizer::new(5));
        let batched = coordinator(2, Some(1), batched_raster.clone())
            .run(Path::new("doc.pdf"), plans(5))
            .await
            .unwrap();
        let plain = coordinator(2, None, Arc::new(BlankRasterizer::new(5)))
            .run(Path::new("doc.pdf"), plans(5))
            .await
            .unwrap();
        assert_eq!(batched, plain);
        // pages 1, 3, 5 rendered one chunk at a time
        assert_eq!(batched_raster.renders.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_render_marks_page_for_review() {
        // rasteriser only knows two pages; page 3 never renders
        let c = coordinator(2, None, Arc::new(BlankRasterizer::new(2)));
        let results = c.run(Path::new("doc.pdf"), plans(3)).await.unwrap();
        assert!(results[0].is_approved());
        assert!(!results[2].is_approved());
        assert!(results[2].layout.is_none());
    }
}
