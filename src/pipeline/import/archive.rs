use std::io::{Cursor, Read};

use super::format::{classify, sanitize_filename, DocumentKind};
use super::ImportError;

/// Upper bound on decompressed bytes read from one archive entry.
pub const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Entries beyond this count are ignored.
pub const MAX_ENTRIES: usize = 50;

/// One analyzable document pulled out of an archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

/// Expand a ZIP archive into its analyzable documents.
///
/// Directories, nested archives and unclassifiable entries are skipped.
/// An entry larger than `MAX_ENTRY_BYTES` is an error rather than a
/// silently truncated document.
pub fn expand_archive(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ImportError::Archive(e.to_string()))?;

    let mut entries = Vec::new();
    for i in 0..archive.len().min(MAX_ENTRIES) {
        let entry = archive
            .by_index(i)
            .map_err(|e| ImportError::Archive(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let name = sanitize_filename(entry.name());

        let mut data = Vec::new();
        entry.take(MAX_ENTRY_BYTES).read_to_end(&mut data)?;
        if data.len() as u64 >= MAX_ENTRY_BYTES {
            return Err(ImportError::EntryTooLarge {
                name,
                max_mb: MAX_ENTRY_BYTES / (1024 * 1024),
            });
        }

        let kind = classify(&data, &name, None).kind;
        if !kind.is_analyzable() {
            tracing::info!(entry = %name, kind = kind.as_str(), "Skipping archive entry");
            continue;
        }
        entries.push(ArchiveEntry {
            name,
            kind,
            bytes: data,
        });
    }

    if archive.len() > MAX_ENTRIES {
        tracing::warn!(
            total = archive.len(),
            limit = MAX_ENTRIES,
            "Archive entry limit reached, remaining entries ignored"
        );
    }

    if entries.is_empty() {
        return Err(ImportError::EmptyArchive);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::make_zip;

    #[test]
    fn expands_supported_entries() {
        let bytes = make_zip(&[
            ("idari_sartname.txt", "İhale kayıt no: 2024/123456".as_bytes()),
            ("teknik.pdf", b"%PDF-1.4 body".as_slice()),
        ]);
        let entries = expand_archive(&bytes).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, DocumentKind::Txt);
        assert_eq!(entries[1].kind, DocumentKind::Pdf);
    }

    #[test]
    fn nested_archive_is_skipped() {
        let inner = make_zip(&[("a.txt", b"hello there".as_slice())]);
        let bytes = make_zip(&[
            ("inner.zip", inner.as_slice()),
            ("not.txt", b"plain tender text".as_slice()),
        ]);
        let entries = expand_archive(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "not.txt");
    }

    #[test]
    fn archive_with_only_unknown_entries_is_empty() {
        let bytes = make_zip(&[("blob.bin", [0u8, 1, 2, 3].as_slice())]);
        assert!(matches!(expand_archive(&bytes), Err(ImportError::EmptyArchive)));
    }

    #[test]
    fn garbage_is_archive_error() {
        assert!(matches!(
            expand_archive(b"PK\x03\x04 not really"),
            Err(ImportError::Archive(_))
        ));
    }

    #[test]
    fn entry_names_are_sanitized() {
        let bytes = make_zip(&[("dir/sub/ek.txt", b"ek belge metni".as_slice())]);
        let entries = expand_archive(&bytes).unwrap();
        assert_eq!(entries[0].name, "ek.txt");
    }
}
