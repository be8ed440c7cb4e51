//! PDF rasterisation: render selected pages to greyscale images via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and must not be driven from async worker threads. Each call binds,
//! opens the document and renders inside `tokio::task::spawn_blocking`.
//!
//! ## Pixel cap
//!
//! DPI alone does not bound memory: an A0 poster at 600 DPI is enormous.
//! `max_pixels` caps the longest edge regardless of physical page size.

use crate::error::ExtractError;
use async_trait::async_trait;
use image::GrayImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// A rendered page. Owned by exactly one page task and dropped after OCR.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed.
    pub page_number: usize,
    pub dpi: u32,
    pub image: GrayImage,
}

/// Source of page images for a document.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn page_count(&self, document: &Path) -> Result<usize, ExtractError>;

    /// Render the given 1-indexed pages at `dpi`.
    ///
    /// A document that cannot be opened is an error. A single page that fails
    /// to render is left out of the returned list.
    async fn render(
        &self,
        document: &Path,
        pages: &[usize],
        dpi: u32,
    ) -> Result<Vec<PageImage>, ExtractError>;
}

/// Bind pdfium from `PDFIUM_LIB_PATH` when set, else from the system.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

pub(crate) fn open_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
) -> Result<PdfDocument<'a>, ExtractError> {
    pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ExtractError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}

/// pdfium-backed [`Rasterizer`].
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_pixels: u32,
}

impl Default for PdfiumRasterizer {
    fn default() -> Self {
        Self { max_pixels: 10_000 }
    }
}

impl PdfiumRasterizer {
    pub fn new(max_pixels: u32) -> Self {
        Self {
            max_pixels: max_pixels.max(100),
        }
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn page_count(&self, document: &Path) -> Result<usize, ExtractError> {
        let path = document.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let doc = open_document(&pdfium, &path)?;
            Ok(doc.pages().len() as usize)
        })
        .await
        .map_err(|e| ExtractError::Internal(format!("Page count task panicked: {e}")))?
    }

    async fn render(
        &self,
        document: &Path,
        pages: &[usize],
        dpi: u32,
    ) -> Result<Vec<PageImage>, ExtractError> {
        let path = document.to_path_buf();
        let pages = pages.to_vec();
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || render_blocking(&path, &pages, dpi, max_pixels))
            .await
            .map_err(|e| ExtractError::Internal(format!("Render task panicked: {e}")))?
    }
}

fn render_blocking(
    path: &Path,
    page_numbers: &[usize],
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<PageImage>, ExtractError> {
    let pdfium = bind_pdfium()?;
    let document = open_document(&pdfium, path)?;
    let pages = document.pages();
    let total = pages.len() as usize;
    info!("Rendering {} of {} pages at {} DPI", page_numbers.len(), total, dpi);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut out = Vec::with_capacity(page_numbers.len());
    for &page_number in page_numbers {
        if page_number == 0 || page_number > total {
            warn!("Skipping page {} (out of range, total={})", page_number, total);
            continue;
        }
        let rendered = pages.get((page_number - 1) as u16).and_then(|page| {
            page.render_with_config(&render_config)
                .map(|bitmap| bitmap.as_image().to_luma8())
        });
        match rendered {
            Ok(image) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    page_number,
                    image.width(),
                    image.height()
                );
                out.push(PageImage {
                    page_number,
                    dpi,
                    image,
                });
            }
            Err(e) => {
                let err = ExtractError::RasterisationFailed {
                    page: page_number,
                    detail: format!("{e:?}"),
                };
                warn!("{}", err);
            }
        }
    }
    Ok(out)
}
