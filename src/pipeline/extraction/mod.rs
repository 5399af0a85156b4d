pub mod types;
pub mod pdf;
pub mod pdfium;
pub mod ocr_need;
pub mod page_image;
pub mod office;

pub use types::*;
pub use pdf::*;
pub use pdfium::*;
pub use ocr_need::*;
pub use page_image::*;
pub use office::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("PDF rendering failed (page {page}): {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Office document could not be read: {0}")]
    Office(String),

    #[error("Document conversion failed: {0}")]
    Conversion(String),

    #[error("Extraction interrupted: {0}")]
    Interrupted(#[from] crate::pipeline::cancel::Interrupted),

    #[error("Unsupported format for extraction: {0}")]
    UnsupportedFormat(String),
}
