use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Text of one PDF page from the embedded text layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// 1-based page number
    pub page_number: usize,
    pub text: String,
}

/// Whole-document text layer with per-page breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextLayer {
    pub pages: Vec<PageText>,
}

impl TextLayer {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Pages joined with a blank line, trimmed.
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|p| p.text.trim().chars().count()).sum()
    }
}

/// PDF text-layer extraction abstraction
pub trait PdfExtractor: Send + Sync {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<TextLayer, ExtractionError>;
}

/// PDF page rasterization abstraction (allows mocking for tests).
///
/// `page_index` is 0-based. Returns encoded image bytes (PNG).
pub trait PdfPageRenderer: Send + Sync {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractionError>;

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_index: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, ExtractionError>;
}

/// Mock text-layer extractor returning fixed page texts.
pub struct MockPdfExtractor {
    pages: Vec<String>,
    fail: bool,
}

impl MockPdfExtractor {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages, fail: false }
    }

    /// Extractor that always fails, as for a corrupt PDF.
    pub fn failing() -> Self {
        Self {
            pages: vec![],
            fail: true,
        }
    }
}

impl PdfExtractor for MockPdfExtractor {
    fn extract_text(&self, _pdf_bytes: &[u8]) -> Result<TextLayer, ExtractionError> {
        if self.fail {
            return Err(ExtractionError::PdfParsing("mock failure".into()));
        }
        Ok(TextLayer {
            pages: self
                .pages
                .iter()
                .enumerate()
                .map(|(i, text)| PageText {
                    page_number: i + 1,
                    text: text.clone(),
                })
                .collect(),
        })
    }
}
