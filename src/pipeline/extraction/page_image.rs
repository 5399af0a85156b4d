//! Rendered page images on disk.
//!
//! A `PageImage` owns its file: dropping it deletes the file. Images live in
//! a temp directory scoped to one strategy attempt, so at most
//! O(render parallelism) images exist at any instant.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GenericImageView, ImageOutputFormat};

use super::ExtractionError;

/// Target envelope and encoding for page images sent to the analyzer.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleSpec {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl Default for DownsampleSpec {
    fn default() -> Self {
        Self {
            max_width: 1000,
            max_height: 1400,
            jpeg_quality: 80,
        }
    }
}

/// Fit an encoded image within the size limits and re-encode as JPEG.
/// Never upscales.
pub fn downsample_to_jpeg(bytes: &[u8], spec: &DownsampleSpec) -> Result<Vec<u8>, ExtractionError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ExtractionError::ImageProcessing(format!("Decode failed: {e}")))?;

    let (w, h) = img.dimensions();
    let img = if w > spec.max_width || h > spec.max_height {
        img.resize(spec.max_width, spec.max_height, FilterType::Triangle)
    } else {
        img
    };

    let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(spec.jpeg_quality))
        .map_err(|e| ExtractionError::ImageProcessing(format!("JPEG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

/// A page image file that is removed when dropped.
#[derive(Debug)]
pub struct PageImage {
    /// 1-based page number
    pub page_number: usize,
    path: PathBuf,
}

impl PageImage {
    /// Write `jpeg` to `<dir>/page-<n>.jpg`.
    pub fn write(dir: &Path, page_number: usize, jpeg: &[u8]) -> Result<Self, ExtractionError> {
        let path = dir.join(format!("page-{page_number:04}.jpg"));
        std::fs::write(&path, jpeg)?;
        Ok(Self { page_number, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &'static str {
        "image/jpeg"
    }

    pub fn read(&self) -> Result<Vec<u8>, ExtractionError> {
        Ok(std::fs::read(&self.path)?)
    }
}

impl Drop for PageImage {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    page = self.page_number,
                    error = %e,
                    "Failed to delete page image"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        super::super::pdfium::solid_png(width, height)
    }

    #[test]
    fn large_page_fits_envelope() {
        let jpeg = downsample_to_jpeg(&png(2000, 2800), &DownsampleSpec::default()).unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert!(img.width() <= 1000 && img.height() <= 1400);
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn small_page_is_not_upscaled() {
        let jpeg = downsample_to_jpeg(&png(300, 400), &DownsampleSpec::default()).unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(img.dimensions(), (300, 400));
    }

    #[test]
    fn garbage_bytes_fail() {
        assert!(downsample_to_jpeg(b"nope", &DownsampleSpec::default()).is_err());
    }

    #[test]
    fn drop_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let image = PageImage::write(dir.path(), 3, b"jpeg").unwrap();
            assert!(image.path().exists());
            assert_eq!(image.read().unwrap(), b"jpeg");
            image.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn drop_tolerates_already_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = PageImage::write(dir.path(), 1, b"x").unwrap();
        std::fs::remove_file(image.path()).unwrap();
        drop(image);
    }
}
