//! Decides whether a PDF's embedded text layer can be trusted.
//!
//! Large files with sparse text are usually scans; a very low per-page
//! character count catches short scans that stay under the size floor.
//! False negatives are caught later by strategy fallback on low-value output.

use serde::Serialize;

use crate::config::PipelineConfig;

/// Inputs and verdict of the OCR-need heuristic.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PdfProfile {
    pub text_length: usize,
    pub file_size_kb: f64,
    pub page_count: usize,
    /// Characters per KB of file size
    pub text_density: f64,
    pub chars_per_page: f64,
    pub needs_ocr: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct OcrThresholds {
    pub density: f64,
    pub min_file_kb: f64,
    pub min_chars_per_page: f64,
}

impl Default for OcrThresholds {
    fn default() -> Self {
        Self {
            density: 20.0,
            min_file_kb: 50.0,
            min_chars_per_page: 100.0,
        }
    }
}

impl From<&PipelineConfig> for OcrThresholds {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            density: config.ocr_density_threshold,
            min_file_kb: config.ocr_min_file_kb,
            min_chars_per_page: config.ocr_min_chars_per_page,
        }
    }
}

/// OCR is required when `(density < 20 && size > 50KB) || chars/page < 100`.
pub fn detect_ocr_need(
    text_length: usize,
    file_size_bytes: u64,
    page_count: usize,
    thresholds: &OcrThresholds,
) -> PdfProfile {
    let file_size_kb = file_size_bytes as f64 / 1024.0;
    let text_density = if file_size_kb > 0.0 {
        text_length as f64 / file_size_kb
    } else {
        0.0
    };
    let chars_per_page = text_length as f64 / page_count.max(1) as f64;

    let sparse_large_file =
        text_density < thresholds.density && file_size_kb > thresholds.min_file_kb;
    let thin_pages = chars_per_page < thresholds.min_chars_per_page;

    PdfProfile {
        text_length,
        file_size_kb,
        page_count,
        text_density,
        chars_per_page,
        needs_ocr: sparse_large_file || thin_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> OcrThresholds {
        OcrThresholds::default()
    }

    #[test]
    fn native_two_page_pdf_has_trustworthy_text() {
        // 500 KB, density 40 → 20 000 chars over 2 pages
        let p = detect_ocr_need(20_000, 500 * 1024, 2, &t());
        assert!((p.text_density - 40.0).abs() < 1e-9);
        assert!(!p.needs_ocr);
    }

    #[test]
    fn scanned_forty_page_pdf_needs_ocr() {
        let p = detect_ocr_need(200, 8 * 1024 * 1024, 40, &t());
        assert!((p.chars_per_page - 5.0).abs() < 1e-9);
        assert!(p.needs_ocr);
    }

    #[test]
    fn low_chars_per_page_always_needs_ocr() {
        // Density is huge, but only 99 chars per page
        let p = detect_ocr_need(99, 1024, 1, &t());
        assert!(p.text_density > 20.0);
        assert!(p.needs_ocr);
    }

    #[test]
    fn small_file_never_trips_density_clause() {
        // Density below 20, but file is exactly 50 KB
        let p = detect_ocr_need(500, 50 * 1024, 1, &t());
        assert!(p.text_density < 20.0);
        assert!(p.chars_per_page >= 100.0);
        assert!(!p.needs_ocr);
    }

    #[test]
    fn sparse_large_file_needs_ocr() {
        // 60 KB, 1 page, 1000 chars → density ~16.7
        let p = detect_ocr_need(1000, 60 * 1024, 1, &t());
        assert!(p.needs_ocr);
    }

    #[test]
    fn zero_pages_treated_as_one() {
        let p = detect_ocr_need(0, 0, 0, &t());
        assert_eq!(p.chars_per_page, 0.0);
        assert!(p.needs_ocr);
    }

    #[test]
    fn thresholds_follow_config() {
        let config = PipelineConfig {
            ocr_min_chars_per_page: 10.0,
            ..PipelineConfig::default()
        };
        let p = detect_ocr_need(50, 1024, 1, &OcrThresholds::from(&config));
        assert!(!p.needs_ocr);
    }
}
