//! PDF page rasterization via Google PDFium.
//!
//! `PdfiumRenderer` holds no PDFium handle: the binding is `!Send`, so each
//! call binds its own and the render threads stay independent.

use std::io::Cursor;
use std::path::PathBuf;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

use super::types::PdfPageRenderer;
use super::ExtractionError;

/// Hard cap for either rendered dimension.
const MAX_DIMENSION_PX: u32 = 4096;

pub const DEFAULT_RENDER_DPI: u32 = 150;

const POINTS_PER_INCH: f32 = 72.0;

/// Renders PDF pages to PNG using PDFium.
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    /// Fails when no PDFium library can be bound, so callers can degrade
    /// before the first scanned document arrives.
    pub fn new() -> Result<Self, ExtractionError> {
        bind_pdfium()?;
        Ok(Self)
    }
}

/// Library files tried in order: `PDFIUM_DYNAMIC_LIB_PATH`, then the
/// executable's directory and its `lib/` subdirectory.
fn library_candidates() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::env::var_os("PDFIUM_DYNAMIC_LIB_PATH")
        .map(PathBuf::from)
        .into_iter()
        .collect();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()));
    if let Some(dir) = exe_dir {
        for dir in [dir.clone(), dir.join("lib")] {
            candidates.push(Pdfium::pdfium_platform_library_name_at_path(&dir));
        }
    }
    candidates
}

fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    for candidate in library_candidates() {
        match Pdfium::bind_to_library(&candidate) {
            Ok(bindings) => {
                debug!(library = %candidate.display(), "PDFium bound");
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => debug!(library = %candidate.display(), error = %e, "PDFium candidate rejected"),
        }
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!("no PDFium library found (set PDFIUM_DYNAMIC_LIB_PATH): {e}"),
        })
}

fn open_document<'a>(pdfium: &'a Pdfium, pdf_bytes: &'a [u8]) -> Result<PdfDocument<'a>, ExtractionError> {
    pdfium.load_pdf_from_byte_slice(pdf_bytes, None).map_err(|e| {
        let reason = e.to_string();
        let lower = reason.to_lowercase();
        if lower.contains("password") || lower.contains("encrypt") {
            ExtractionError::PdfEncrypted
        } else {
            ExtractionError::PdfRendering {
                page: 0,
                reason: format!("unreadable PDF: {reason}"),
            }
        }
    })
}

/// Pixel size of a page at `dpi`, scaled down as a whole so neither side
/// exceeds `MAX_DIMENSION_PX`. Both sides are at least 1.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let (w, h) = ((width_points * scale).max(1.0), (height_points * scale).max(1.0));
    let shrink = (MAX_DIMENSION_PX as f32 / w.max(h)).min(1.0);
    let fit = |side: f32| ((side * shrink) as u32).clamp(1, MAX_DIMENSION_PX);
    (fit(w), fit(h))
}

impl PdfPageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, pdf_bytes)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(&self, pdf_bytes: &[u8], page_index: usize, dpi: u32) -> Result<Vec<u8>, ExtractionError> {
        let page_number = page_index + 1;
        let render_error = |reason: String| ExtractionError::PdfRendering {
            page: page_number,
            reason,
        };

        let pdfium = bind_pdfium()?;
        let document = open_document(&pdfium, pdf_bytes)?;
        let pages = document.pages();
        let page = u16::try_from(page_index)
            .ok()
            .and_then(|index| pages.get(index).ok())
            .ok_or_else(|| render_error(format!("no such page, document has {}", pages.len())))?;

        let (width, height) = compute_render_dimensions(page.width().value, page.height().value, dpi);
        if width.max(height) == MAX_DIMENSION_PX {
            warn!(page = page_number, width, height, "Rendered page capped at {MAX_DIMENSION_PX}px");
        }

        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);
        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| render_error(format!("PDFium render: {e}")))?;

        let mut png = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut png, ImageOutputFormat::Png)
            .map_err(|e| ExtractionError::ImageProcessing(format!("page {page_number} PNG encoding: {e}")))?;
        let png = png.into_inner();

        debug!(page = page_number, width, height, bytes = png.len(), "Page rendered");
        Ok(png)
    }
}

// ── Mock for testing ──────────────────────────────────────

/// Mock renderer returning a small solid PNG for every valid page.
///
/// Pages listed in `failing_pages` (0-based) return a render error.
pub struct MockPageRenderer {
    page_count: usize,
    failing_pages: Vec<usize>,
}

impl MockPageRenderer {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            failing_pages: vec![],
        }
    }

    pub fn with_failing_pages(mut self, pages: Vec<usize>) -> Self {
        self.failing_pages = pages;
        self
    }
}

impl PdfPageRenderer for MockPageRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Ok(self.page_count)
    }

    fn render_page(
        &self,
        _pdf_bytes: &[u8],
        page_index: usize,
        _dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError> {
        if page_index >= self.page_count || self.failing_pages.contains(&page_index) {
            return Err(ExtractionError::PdfRendering {
                page: page_index + 1,
                reason: format!("mock render failure (mock has {} pages)", self.page_count),
            });
        }
        Ok(solid_png(16, 20))
    }
}

/// Solid white PNG of the given size.
pub fn solid_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
    let mut cursor = Cursor::new(Vec::new());
    // Encoding an in-memory RGB buffer cannot fail short of OOM.
    if image::DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .is_err()
    {
        return Vec::new();
    }
    cursor.into_inner()
}
