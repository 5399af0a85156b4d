use super::types::{PageText, PdfExtractor, TextLayer};
use super::ExtractionError;

/// PDF text extractor using the pdf-extract crate.
/// Only reads the embedded text layer; scans come back (nearly) empty.
pub struct PdfTextExtractor;

impl PdfExtractor for PdfTextExtractor {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<TextLayer, ExtractionError> {
        let page_texts = pdf_extract::extract_text_from_mem_by_pages(pdf_bytes).map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("encrypt") {
                ExtractionError::PdfEncrypted
            } else {
                ExtractionError::PdfParsing(msg)
            }
        })?;

        let pages = page_texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: i + 1,
                text,
            })
            .collect();

        Ok(TextLayer { pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::make_test_pdf;

    #[test]
    fn extract_text_from_digital_pdf() {
        let pdf_bytes = make_test_pdf(&["Yemek Hizmeti Alimi"]);
        let layer = PdfTextExtractor.extract_text(&pdf_bytes).unwrap();

        assert_eq!(layer.page_count(), 1);
        let full_text = layer.full_text();
        assert!(
            full_text.contains("Yemek") || full_text.contains("Hizmeti"),
            "Expected extracted text, got: {full_text}"
        );
    }

    #[test]
    fn page_count_matches_document() {
        let pdf_bytes = make_test_pdf(&["one", "two", "three"]);
        let layer = PdfTextExtractor.extract_text(&pdf_bytes).unwrap();
        assert_eq!(layer.page_count(), 3);
        assert_eq!(layer.pages[2].page_number, 3);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        assert!(PdfTextExtractor.extract_text(b"not a pdf").is_err());
    }
}
