//! Page sampling and bounded rendering for the visual path.
//!
//! Pages are rendered in batches of `parallelism` on scoped threads, then
//! analyzed one at a time. Each image file is deleted as soon as its
//! analysis returns, and the batch directory goes away with the run.

use crate::config::PipelineConfig;
use crate::pipeline::cancel::{CancelToken, Interrupted};
use crate::pipeline::extraction::{downsample_to_jpeg, DownsampleSpec, ExtractionError, PageImage, PdfPageRenderer};

/// Which pages of a long document get analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePolicy {
    /// Page count above which head + tail sampling applies.
    pub threshold: usize,
    pub head: usize,
    pub tail: usize,
}

impl Default for SamplePolicy {
    fn default() -> Self {
        Self {
            threshold: 20,
            head: 15,
            tail: 5,
        }
    }
}

impl From<&PipelineConfig> for SamplePolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            threshold: config.page_sample_threshold,
            head: config.page_sample_head,
            tail: config.page_sample_tail,
        }
    }
}

/// 1-based page numbers to analyze.
///
/// Above the threshold: the first `head` and last `tail` pages. Otherwise
/// every page up to `head`.
pub fn select_pages(page_count: usize, policy: &SamplePolicy) -> Vec<usize> {
    if page_count > policy.threshold {
        let tail_start = page_count.saturating_sub(policy.tail) + 1;
        let mut pages: Vec<usize> = (1..=policy.head.min(page_count)).collect();
        pages.extend((tail_start.max(policy.head + 1))..=page_count);
        pages
    } else {
        (1..=page_count.min(policy.head)).collect()
    }
}

/// Pages rendered for table enrichment of a text-layer result.
pub fn select_table_pages(page_count: usize) -> Vec<usize> {
    let mut pages: Vec<usize> = (1..=page_count.min(10)).collect();
    if page_count > 15 {
        pages.extend((page_count - 4).max(11)..=page_count);
    }
    pages
}

/// Rendering parameters for one visual run.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub dpi: u32,
    pub downsample: DownsampleSpec,
    pub parallelism: usize,
}

impl From<&PipelineConfig> for RenderOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            dpi: config.render_dpi,
            downsample: DownsampleSpec {
                max_width: config.page_max_width,
                max_height: config.page_max_height,
                jpeg_quality: config.jpeg_quality,
            },
            parallelism: config.render_parallelism.max(1),
        }
    }
}

/// Outcome of a render-and-analyze run, in page order.
#[derive(Debug)]
pub struct PagedRun<T> {
    pub analyzed: Vec<(usize, T)>,
    pub render_failures: Vec<(usize, String)>,
}

impl<T> Default for PagedRun<T> {
    fn default() -> Self {
        Self {
            analyzed: Vec::new(),
            render_failures: Vec::new(),
        }
    }
}

/// Render `pages` and hand each image to `analyze` sequentially.
///
/// A page that fails to render is recorded and skipped. Cancellation stops
/// the run between pages; images already on disk are removed on the way out.
pub fn render_and_analyze<T, F>(
    renderer: &dyn PdfPageRenderer,
    pdf_bytes: &[u8],
    pages: &[usize],
    options: &RenderOptions,
    cancel: &CancelToken,
    mut analyze: F,
) -> Result<PagedRun<T>, ExtractionError>
where
    F: FnMut(&PageImage) -> T,
{
    let dir = tempfile::Builder::new().prefix("tenderlens-pages-").tempdir()?;
    let mut run = PagedRun::default();

    for batch in pages.chunks(options.parallelism.max(1)) {
        check_cancel(cancel)?;

        let rendered: Vec<(usize, Result<PageImage, ExtractionError>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|&page| {
                    let dir = dir.path();
                    let handle = scope.spawn(move || {
                        let png = renderer.render_page(pdf_bytes, page - 1, options.dpi)?;
                        let jpeg = downsample_to_jpeg(&png, &options.downsample)?;
                        PageImage::write(dir, page, &jpeg)
                    });
                    (page, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(page, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        Err(ExtractionError::PdfRendering {
                            page,
                            reason: "render thread panicked".into(),
                        })
                    });
                    (page, result)
                })
                .collect()
        });

        tracing::debug!(batch = batch.len(), "Rendered page batch");

        for (page, result) in rendered {
            match result {
                Ok(image) => {
                    check_cancel(cancel)?;
                    let _span = tracing::info_span!("page_analysis", page).entered();
                    let value = analyze(&image);
                    drop(image);
                    run.analyzed.push((page, value));
                }
                Err(e) => {
                    tracing::warn!(page, error = %e, "Page render failed, skipping");
                    run.render_failures.push((page, e.to_string()));
                }
            }
        }
    }

    Ok(run)
}

fn check_cancel(cancel: &CancelToken) -> Result<(), ExtractionError> {
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled {
            label: "page_analysis".into(),
        }
        .into());
    }
    Ok(())
}
