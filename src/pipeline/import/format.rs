use std::io::Cursor;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Document kinds the pipeline distinguishes.
///
/// `Archive` and `Unknown` are classification outcomes, not errors: the
/// caller decides whether to expand or reject.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Doc,
    Xlsx,
    Txt,
    Archive,
    Unknown,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Xlsx => "xlsx",
            Self::Txt => "txt",
            Self::Archive => "archive",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds that enter the analysis pipeline directly.
    pub fn is_analyzable(&self) -> bool {
        !matches!(self, Self::Archive | Self::Unknown)
    }

    pub fn canonical_mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Docx => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Self::Doc => "application/msword",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Txt => "text/plain",
            Self::Archive => "application/zip",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of format classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDetection {
    pub kind: DocumentKind,
    pub mime_type: String,
    pub file_size_bytes: u64,
}

/// Classify a document from its bytes, declared filename and MIME hint.
///
/// Magic bytes win over everything else. The MIME hint and extension are
/// only consulted when the signature is not recognised.
pub fn classify(bytes: &[u8], filename: &str, mime_hint: Option<&str>) -> FormatDetection {
    let kind = match bytes {
        [0x25, 0x50, 0x44, 0x46, ..] => DocumentKind::Pdf,
        // OLE2 compound file (legacy Word)
        [0xD0, 0xCF, 0x11, 0xE0, ..] => DocumentKind::Doc,
        [0x50, 0x4B, 0x03, 0x04, ..] => classify_zip(bytes),
        _ => classify_by_hint(filename, mime_hint)
            .unwrap_or_else(|| {
                if is_likely_text(bytes) {
                    DocumentKind::Txt
                } else {
                    DocumentKind::Unknown
                }
            }),
    };

    let mime_type = match (kind, mime_hint) {
        (DocumentKind::Unknown, Some(hint)) => hint.to_string(),
        _ => kind.canonical_mime().to_string(),
    };

    tracing::debug!(
        filename = filename,
        kind = kind.as_str(),
        bytes = bytes.len(),
        "Classified document"
    );

    FormatDetection {
        kind,
        mime_type,
        file_size_bytes: bytes.len() as u64,
    }
}

/// Look inside a ZIP container for the OOXML part that identifies it.
fn classify_zip(bytes: &[u8]) -> DocumentKind {
    let archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(a) => a,
        Err(_) => return DocumentKind::Unknown,
    };
    let mut kind = DocumentKind::Archive;
    for name in archive.file_names() {
        if name == "word/document.xml" {
            kind = DocumentKind::Docx;
            break;
        }
        if name == "xl/workbook.xml" {
            kind = DocumentKind::Xlsx;
            break;
        }
    }
    kind
}

fn classify_by_hint(filename: &str, mime_hint: Option<&str>) -> Option<DocumentKind> {
    if let Some(kind) = mime_hint.and_then(kind_from_mime) {
        return Some(kind);
    }
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    match ext.as_str() {
        "txt" | "csv" => Some(DocumentKind::Txt),
        _ => mime_guess::from_ext(&ext)
            .first_raw()
            .and_then(kind_from_mime),
    }
}

fn kind_from_mime(mime: &str) -> Option<DocumentKind> {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    match mime {
        "text/plain" | "text/csv" => Some(DocumentKind::Txt),
        "application/zip" | "application/x-zip-compressed" => Some(DocumentKind::Archive),
        // Binary formats are never trusted from a hint alone
        _ => None,
    }
}

/// At least 80% printable characters (or whitespace) in the first 4 KiB.
fn is_likely_text(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(4096)];
    if head.is_empty() {
        return false;
    }
    let text = String::from_utf8_lossy(head);
    let total = text.chars().count();
    let printable = text
        .chars()
        .filter(|c| *c != '\u{FFFD}' && (!c.is_control() || c.is_whitespace()))
        .count();
    printable as f64 / total.max(1) as f64 >= 0.80
}

/// Sanitize a filename: strip path components, limit length.
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");

    let clean: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .take(255)
        .collect();

    if clean.is_empty() {
        "document".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::make_zip;

    #[test]
    fn pdf_magic_wins_over_extension() {
        let f = classify(b"%PDF-1.7 rest", "ihale.docx", Some("text/plain"));
        assert_eq!(f.kind, DocumentKind::Pdf);
        assert_eq!(f.mime_type, "application/pdf");
    }

    #[test]
    fn ole2_is_legacy_word() {
        let f = classify(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1], "sartname.doc", None);
        assert_eq!(f.kind, DocumentKind::Doc);
    }

    #[test]
    fn zip_with_word_part_is_docx() {
        let bytes = make_zip(&[("word/document.xml", b"<w:document/>".as_slice())]);
        assert_eq!(classify(&bytes, "x.zip", None).kind, DocumentKind::Docx);
    }

    #[test]
    fn zip_with_workbook_is_xlsx() {
        let bytes = make_zip(&[("xl/workbook.xml", b"<workbook/>".as_slice())]);
        assert_eq!(classify(&bytes, "birim.xlsx", None).kind, DocumentKind::Xlsx);
    }

    #[test]
    fn plain_zip_is_archive() {
        let bytes = make_zip(&[("ek1.pdf", b"%PDF-1.4".as_slice())]);
        let f = classify(&bytes, "ekler.zip", None);
        assert_eq!(f.kind, DocumentKind::Archive);
        assert!(!f.kind.is_analyzable());
    }

    #[test]
    fn csv_extension_is_text() {
        let f = classify(&[0x01, 0x02, 0x03], "fiyat.csv", None);
        assert_eq!(f.kind, DocumentKind::Txt);
    }

    #[test]
    fn printable_bytes_without_hint_are_text() {
        let f = classify("İhale konusu: yemek hizmeti".as_bytes(), "noext", None);
        assert_eq!(f.kind, DocumentKind::Txt);
    }

    #[test]
    fn binary_without_hint_is_unknown() {
        let f = classify(&[0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00], "tool.exe", None);
        assert_eq!(f.kind, DocumentKind::Unknown);
    }

    #[test]
    fn binary_mime_hint_is_not_trusted() {
        let f = classify(&[0x00, 0x01, 0x02], "file", Some("application/pdf"));
        assert_eq!(f.kind, DocumentKind::Unknown);
        assert_eq!(f.mime_type, "application/pdf");
    }

    #[test]
    fn empty_input_is_unknown() {
        assert_eq!(classify(&[], "empty", None).kind, DocumentKind::Unknown);
    }

    #[test]
    fn sanitize_path_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("teknik_sartname.pdf"), "teknik_sartname.pdf");
        assert_eq!(sanitize_filename(""), "document");
        assert_eq!(sanitize_filename("file\0name.pdf"), "filename.pdf");
    }
}
