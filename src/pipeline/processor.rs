//! Document analysis orchestrator.
//!
//! Single entry point that drives one document through the pipeline:
//! classify → ordered extraction strategies → dual-source merge →
//! completeness, validation and quality reporting.
//!
//! Every collaborator is injected behind a trait so the orchestrator stays
//! testable with mock implementations. `analyze` never returns an error:
//! failures are folded into a `success: false` envelope.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::pipeline::analysis::{
    build_document_prompt, build_page_prompt, parse_document_record, parse_page_result, AnalyzerError,
    AnalyzerResponse, GenerativeAnalyzer, OllamaAnalyzer, ParseStatus, StructuredExtractor, StructuredResult,
};
use crate::pipeline::cancel::{call_with_deadline, CancelToken, Interrupted, SerialCalls};
use crate::pipeline::completeness::score_completeness;
use crate::pipeline::extraction::{
    detect_ocr_need, extract_office_text, ExtractionError, OcrThresholds, PageImage, PdfExtractor,
    PdfPageRenderer, PdfTextExtractor, PdfiumRenderer, TextLayer,
};
use crate::pipeline::import::{classify, expand_archive, DocumentKind, FormatDetection, ImportError};
use crate::pipeline::merge::{
    conflict_report, detect_conflicts, enrich_with_pages, merge_document_records, merge_dual_source,
    merge_page_results, TenderAnalysis,
};
use crate::pipeline::output::{page_conflict_candidates, Chunk, FileInfo, FinalOutput, Meta, Validation};
use crate::pipeline::progress::{ProgressCallback, ProgressReporter, Stage};
use crate::pipeline::quality::{analyze_confidence, PipelineMonitor, StageOutcome};
use crate::pipeline::record::{DocumentRecord, PageResult};
use crate::pipeline::references::find_unresolved_references;
use crate::pipeline::sampler::{render_and_analyze, select_pages, select_table_pages, RenderOptions, SamplePolicy};
use crate::pipeline::strategy::{
    plan_pdf_strategies, truncate_for_model, AttemptOutcome, ExtractionStrategy, StrategyAttempt,
};
use crate::pipeline::validation::{run_checks, ValidationInput};

/// Source text kept as the transcript of a degraded document-level parse.
const FALLBACK_TEXT_CHARS: usize = 5_000;

/// Length of the "\n\n" joining page transcripts in a page-merged record.
const PAGE_SEPARATOR_CHARS: usize = 2;

const ANALYSIS_SECTIONS: &[&str] = &[
    "summary",
    "dates",
    "financial",
    "catering",
    "personnel",
    "technical",
    "contact",
    "notes",
];

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while processing one document.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Analyzer failed: {0}")]
    Analyzer(#[from] AnalyzerError),

    #[error("Processing interrupted: {0}")]
    Interrupted(#[from] Interrupted),

    #[error("archive must be expanded before analysis")]
    ArchiveInput,

    #[error("Unsupported document format: {0}")]
    Unsupported(String),

    #[error("All extraction strategies failed: {0}")]
    StrategiesExhausted(String),

    #[error("No usable output: {0}")]
    EmptyResult(String),
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

/// Bookkeeping shared by every strategy attempt of one `analyze` call.
struct Run<'a> {
    document_id: String,
    progress: ProgressReporter<'a>,
    cancel: &'a CancelToken,
    /// Analyzer calls of one run never overlap, even after a timeout.
    analyzer_calls: SerialCalls,
    monitor: PipelineMonitor,
    attempts: Vec<StrategyAttempt>,
    sampled_pages: Vec<usize>,
    page_count: Option<usize>,
}

impl<'a> Run<'a> {
    fn new(progress: Option<&'a ProgressCallback<'a>>, cancel: &'a CancelToken) -> Self {
        let document_id = Uuid::new_v4().to_string();
        Self {
            monitor: PipelineMonitor::new(document_id.clone()),
            document_id,
            progress: ProgressReporter::new(progress),
            cancel,
            analyzer_calls: SerialCalls::new(),
            attempts: Vec::new(),
            sampled_pages: Vec::new(),
            page_count: None,
        }
    }

    fn skip(&mut self, strategy: ExtractionStrategy, reason: String) {
        tracing::debug!(document_id = %self.document_id, strategy = %strategy, reason = %reason, "Strategy skipped");
        self.attempts.push(StrategyAttempt {
            strategy,
            outcome: AttemptOutcome::Skipped,
            reason: Some(reason),
            duration_ms: 0,
        });
    }

    fn add_pages(&mut self, pages: usize) {
        self.page_count = Some(self.page_count.unwrap_or(0) + pages);
    }
}

/// Output of the strategy that succeeded.
struct Extracted {
    strategy: ExtractionStrategy,
    record: DocumentRecord,
    /// Characters of the transcript the primary chunks were built from.
    original_chars: usize,
    raw_text_excerpt: Option<String>,
    chunks: Vec<Chunk>,
    /// (chunk id, text) pairs scanned for cross references.
    units: Vec<(String, String)>,
}

impl Extracted {
    fn with_id_prefix(mut self, prefix: &str) -> Self {
        self.chunks = self.chunks.into_iter().map(|c| c.with_id_prefix(prefix)).collect();
        for (id, _) in &mut self.units {
            *id = format!("{prefix}{id}");
        }
        self
    }
}

/// Analyzed pages of one render run.
#[derive(Default)]
struct PageBatch {
    results: Vec<PageResult>,
    chunks: Vec<Chunk>,
    units: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Orchestrates document analysis: classify → extract → merge → report.
///
/// Holds all collaborators as trait objects (dependency injection). The
/// analyzer and structured extractor are reference-counted because their
/// calls run on deadline-bounded worker threads.
pub struct DocumentProcessor {
    analyzer: Arc<dyn GenerativeAnalyzer>,
    structured: Option<Arc<dyn StructuredExtractor>>,
    pdf: Box<dyn PdfExtractor>,
    renderer: Box<dyn PdfPageRenderer>,
    config: PipelineConfig,
}

impl DocumentProcessor {
    pub fn new(
        analyzer: Arc<dyn GenerativeAnalyzer>,
        pdf: Box<dyn PdfExtractor>,
        renderer: Box<dyn PdfPageRenderer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            analyzer,
            structured: None,
            pdf,
            renderer,
            config,
        }
    }

    pub fn with_structured_extractor(mut self, extractor: Arc<dyn StructuredExtractor>) -> Self {
        self.structured = Some(extractor);
        self
    }

    /// Analyze one document end to end.
    ///
    /// `progress` receives advisory stage events; `cancel` abandons in-flight
    /// calls and stops further strategy attempts.
    pub fn analyze(
        &self,
        bytes: &[u8],
        filename: &str,
        mime_hint: Option<&str>,
        progress: Option<&ProgressCallback<'_>>,
        cancel: &CancelToken,
    ) -> FinalOutput {
        let detection = classify(bytes, filename, mime_hint);
        let mut run = Run::new(progress, cancel);
        let _span = tracing::info_span!("analyze", document_id = %run.document_id).entered();
        tracing::info!(
            file = filename,
            kind = detection.kind.as_str(),
            size_bytes = detection.file_size_bytes,
            "Analyzing document"
        );
        let file_info = FileInfo::new(filename, &detection);

        match self.process(bytes, &detection, &mut run) {
            Ok(extracted) => {
                let structured = self.run_structured(bytes, &detection.mime_type, &mut run);
                self.finish(run, file_info, extracted, structured)
            }
            Err(e) => fail(run, Some(file_info), e),
        }
    }

    /// Analyze every supported entry of a ZIP archive as one document.
    ///
    /// Entry records are merged with the multi-document rule and chunk ids
    /// are namespaced `e<N>/`. Failed entries are logged and skipped; the
    /// archive fails only when no entry succeeds.
    pub fn analyze_archive(
        &self,
        bytes: &[u8],
        filename: &str,
        progress: Option<&ProgressCallback<'_>>,
        cancel: &CancelToken,
    ) -> FinalOutput {
        let detection = classify(bytes, filename, None);
        let mut run = Run::new(progress, cancel);
        let _span = tracing::info_span!("analyze_archive", document_id = %run.document_id).entered();
        let file_info = FileInfo::new(filename, &detection);

        let entries = match expand_archive(bytes) {
            Ok(entries) => entries,
            Err(e) => return fail(run, Some(file_info), e.into()),
        };
        tracing::info!(file = filename, entries = entries.len(), "Analyzing archive");

        let mut extracted_entries = Vec::new();
        let mut structured_parts = Vec::new();
        let mut failures = Vec::new();

        for (i, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                failures.push(format!("{}: cancelled", entry.name));
                break;
            }
            let _entry_span = tracing::info_span!("archive_entry", entry = %entry.name).entered();
            run.progress.report(
                Stage::Extracting,
                format!("Entry {} of {}: {}", i + 1, entries.len(), entry.name),
                5,
            );
            let entry_detection = classify(&entry.bytes, &entry.name, None);

            match self.process(&entry.bytes, &entry_detection, &mut run) {
                Ok(extracted) => {
                    if let Some(s) = self.run_structured(&entry.bytes, &entry_detection.mime_type, &mut run) {
                        structured_parts.push(s);
                    }
                    extracted_entries.push(extracted.with_id_prefix(&format!("e{}/", i + 1)));
                }
                Err(e) => {
                    tracing::warn!(entry = %entry.name, error = %e, "Archive entry failed, skipping");
                    failures.push(format!("{}: {e}", entry.name));
                }
            }
        }

        let Some(strategy) = extracted_entries.first().map(|e| e.strategy) else {
            let error = ProcessingError::EmptyResult(format!(
                "no archive entry could be analyzed ({})",
                failures.join("; ")
            ));
            return fail(run, Some(file_info), error);
        };

        let records: Vec<DocumentRecord> = extracted_entries.iter().map(|e| e.record.clone()).collect();
        let mut combined = Extracted {
            strategy,
            record: merge_document_records(&records),
            original_chars: 0,
            raw_text_excerpt: None,
            chunks: Vec::new(),
            units: Vec::new(),
        };
        for entry in extracted_entries {
            combined.original_chars += entry.original_chars;
            if combined.raw_text_excerpt.is_none() {
                combined.raw_text_excerpt = entry.raw_text_excerpt;
            }
            combined.chunks.extend(entry.chunks);
            combined.units.extend(entry.units);
        }

        self.finish(run, file_info, combined, combine_structured(structured_parts))
    }

    // -----------------------------------------------------------------------
    // Strategy dispatch
    // -----------------------------------------------------------------------

    fn process(
        &self,
        bytes: &[u8],
        detection: &FormatDetection,
        run: &mut Run<'_>,
    ) -> Result<Extracted, ProcessingError> {
        match detection.kind {
            DocumentKind::Archive => Err(ProcessingError::ArchiveInput),
            DocumentKind::Unknown => Err(ProcessingError::Unsupported(format!(
                "{} ({})",
                detection.kind, detection.mime_type
            ))),
            DocumentKind::Pdf => self.run_pdf(bytes, detection, run),
            kind => self.run_office(kind, bytes, run),
        }
    }

    /// Attempt `plan` in order until one strategy yields a usable record.
    fn run_plan<'a, F>(
        &self,
        plan: &[ExtractionStrategy],
        run: &mut Run<'a>,
        mut attempt: F,
    ) -> Result<Extracted, ProcessingError>
    where
        F: FnMut(ExtractionStrategy, &mut Run<'a>, bool) -> Result<Extracted, ProcessingError>,
    {
        let mut failures = Vec::with_capacity(plan.len());

        for (i, &strategy) in plan.iter().enumerate() {
            if run.cancel.is_cancelled() {
                return Err(Interrupted::Cancelled {
                    label: strategy.to_string(),
                }
                .into());
            }
            let last = i + 1 == plan.len();
            let started = Instant::now();
            run.monitor.start_stage(strategy.as_str());

            let outcome = {
                let _span = tracing::info_span!("strategy", strategy = strategy.as_str()).entered();
                attempt(strategy, run, last)
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(extracted) => {
                    run.monitor.end_stage(StageOutcome::Ok);
                    run.attempts.push(StrategyAttempt {
                        strategy,
                        outcome: AttemptOutcome::Succeeded,
                        reason: None,
                        duration_ms,
                    });
                    tracing::info!(
                        document_id = %run.document_id,
                        strategy = %strategy,
                        duration_ms,
                        chunks = extracted.chunks.len(),
                        "Strategy succeeded"
                    );
                    return Ok(extracted);
                }
                Err(e) => {
                    run.monitor.end_stage(StageOutcome::Failed);
                    run.monitor.record_error(strategy.as_str(), &e);
                    run.attempts.push(StrategyAttempt {
                        strategy,
                        outcome: AttemptOutcome::Failed,
                        reason: Some(e.to_string()),
                        duration_ms,
                    });
                    if run.cancel.is_cancelled() {
                        return Err(e);
                    }
                    tracing::warn!(
                        document_id = %run.document_id,
                        strategy = %strategy,
                        error = %e,
                        remaining = plan.len() - i - 1,
                        "Strategy failed"
                    );
                    failures.push(format!("{strategy}: {e}"));
                }
            }
        }

        Err(ProcessingError::StrategiesExhausted(failures.join("; ")))
    }

    fn run_pdf(
        &self,
        bytes: &[u8],
        detection: &FormatDetection,
        run: &mut Run<'_>,
    ) -> Result<Extracted, ProcessingError> {
        run.progress.report(Stage::Extracting, "Reading PDF text layer", 10);
        run.monitor.start_stage("text_layer_extraction");
        let layer = match self.pdf.extract_text(bytes) {
            Ok(layer) => {
                run.monitor.end_stage(StageOutcome::Ok);
                layer
            }
            Err(e) => {
                tracing::warn!(document_id = %run.document_id, error = %e, "Text layer extraction failed");
                run.monitor.record_error("text_layer_extraction", &e);
                run.monitor.end_stage(StageOutcome::Failed);
                TextLayer::default()
            }
        };

        let page_count = match layer.page_count() {
            0 => self.renderer.page_count(bytes).ok().filter(|n| *n > 0),
            n => Some(n),
        };
        if let Some(n) = page_count {
            run.add_pages(n);
        }

        let profile = detect_ocr_need(
            layer.char_count(),
            detection.file_size_bytes,
            page_count.unwrap_or(0),
            &OcrThresholds::from(&self.config),
        );
        tracing::info!(
            document_id = %run.document_id,
            text_length = profile.text_length,
            page_count = profile.page_count,
            text_density = profile.text_density,
            chars_per_page = profile.chars_per_page,
            needs_ocr = profile.needs_ocr,
            "PDF profile"
        );

        let plan = plan_pdf_strategies(detection.file_size_bytes, &profile, &self.config);
        if !plan.contains(&ExtractionStrategy::DirectWholeDocument) {
            run.skip(
                ExtractionStrategy::DirectWholeDocument,
                format!(
                    "file is {} bytes, limit {}",
                    detection.file_size_bytes, self.config.direct_max_bytes
                ),
            );
        }
        if !plan.contains(&ExtractionStrategy::TextLayer) {
            run.skip(
                ExtractionStrategy::TextLayer,
                format!(
                    "text layer has {} characters, at least {} required",
                    profile.text_length, self.config.min_text_chars
                ),
            );
        }

        let text = layer.full_text();
        let source_chars = joined_layer_chars(&layer);
        self.run_plan(&plan, run, |strategy, run, last| match strategy {
            ExtractionStrategy::DirectWholeDocument => {
                self.attempt_direct(bytes, &detection.mime_type, &text, source_chars, run, last)
            }
            ExtractionStrategy::TextLayer => {
                self.attempt_text_layer(bytes, &text, source_chars, page_count, run, last)
            }
            ExtractionStrategy::VisualPaged => self.attempt_visual(bytes, page_count, run),
            ExtractionStrategy::OfficeText => Err(ProcessingError::Unsupported(
                "office extraction requested for a PDF".into(),
            )),
        })
    }

    fn run_office(
        &self,
        kind: DocumentKind,
        bytes: &[u8],
        run: &mut Run<'_>,
    ) -> Result<Extracted, ProcessingError> {
        let timeout = self.config.call_timeout();
        self.run_plan(&[ExtractionStrategy::OfficeText], run, |strategy, run, last| {
            let stage = if kind == DocumentKind::Doc {
                Stage::Converting
            } else {
                Stage::Extracting
            };
            run.progress.report(stage, format!("Reading {kind} document"), 15);
            let text = extract_office_text(kind, bytes, timeout, run.cancel)?;
            let source_chars = text.trim().chars().count();
            self.analyze_text_source(strategy, &text, source_chars, run, last)
        })
    }

    // -----------------------------------------------------------------------
    // Strategies
    // -----------------------------------------------------------------------

    fn attempt_direct(
        &self,
        bytes: &[u8],
        mime_type: &str,
        text: &str,
        source_chars: usize,
        run: &mut Run<'_>,
        last: bool,
    ) -> Result<Extracted, ProcessingError> {
        run.progress.report(Stage::Analyzing, "Analyzing whole document", 30);

        let analyzer = Arc::clone(&self.analyzer);
        let document = bytes.to_vec();
        let mime = mime_type.to_string();
        let prompt = build_document_prompt("");
        let response = run
            .analyzer_calls
            .call("analyze_document", self.config.call_timeout(), run.cancel, move || {
                analyzer.analyze_document(&document, &mime, &prompt)
            })??;
        run.monitor
            .record_call(self.analyzer.name(), response.input_tokens, response.output_tokens);

        // The text layer read up front backfills the excerpt and finding positions.
        let (record, status) = parse_document_record(&response.text, text, FALLBACK_TEXT_CHARS);
        accept_record(&record, status, last)?;
        run.monitor.record_chunk(true);

        let chunk = Chunk::from_record(ExtractionStrategy::DirectWholeDocument, None, text, &record, status)
            .counting(&record.full_text);
        // Without a text layer there is no independent source to measure.
        let original_chars = match source_chars {
            0 => chunk.char_count,
            n => n,
        };
        Ok(Extracted {
            strategy: ExtractionStrategy::DirectWholeDocument,
            record,
            original_chars,
            raw_text_excerpt: excerpt(text, self.config.raw_excerpt_chars),
            units: vec![(chunk.chunk_id.clone(), text.to_string())],
            chunks: vec![chunk],
        })
    }

    fn attempt_text_layer(
        &self,
        bytes: &[u8],
        text: &str,
        source_chars: usize,
        page_count: Option<usize>,
        run: &mut Run<'_>,
        last: bool,
    ) -> Result<Extracted, ProcessingError> {
        let mut extracted = self.analyze_text_source(ExtractionStrategy::TextLayer, text, source_chars, run, last)?;
        if self.config.hybrid_table_pages {
            if let Some(page_count) = page_count.filter(|n| *n > 0) {
                self.enrich_from_table_pages(bytes, page_count, &mut extracted, run);
            }
        }
        Ok(extracted)
    }

    /// Text-prompt analysis shared by the text layer and office documents.
    ///
    /// `source_chars` is the source length measured before joining or
    /// analysis; the chunk counts what the parsed record carries.
    fn analyze_text_source(
        &self,
        strategy: ExtractionStrategy,
        text: &str,
        source_chars: usize,
        run: &mut Run<'_>,
        last: bool,
    ) -> Result<Extracted, ProcessingError> {
        let chars = text.trim().chars().count();
        if chars < self.config.min_text_chars {
            return Err(ProcessingError::EmptyResult(format!(
                "{chars} characters of text, at least {} required",
                self.config.min_text_chars
            )));
        }
        run.progress.report(Stage::Analyzing, format!("Analyzing {chars} characters of text"), 40);

        let truncated = truncate_for_model(
            text,
            self.config.truncate_threshold_chars,
            self.config.truncate_head_chars,
            self.config.truncate_tail_chars,
        );
        let prompt = build_document_prompt(&truncated);
        let analyzer = Arc::clone(&self.analyzer);
        let response = run
            .analyzer_calls
            .call("analyze_text", self.config.call_timeout(), run.cancel, move || {
                analyzer.analyze_text(&prompt)
            })??;
        run.monitor
            .record_call(self.analyzer.name(), response.input_tokens, response.output_tokens);

        let (mut record, status) = parse_document_record(&response.text, text, FALLBACK_TEXT_CHARS);
        accept_record(&record, status, last)?;
        if status == ParseStatus::Parsed {
            record.full_text = text.trim().to_string();
        }
        run.monitor.record_chunk(true);

        let chunk = Chunk::from_record(strategy, None, text, &record, status).counting(&record.full_text);
        Ok(Extracted {
            strategy,
            record,
            original_chars: source_chars,
            raw_text_excerpt: excerpt(text, self.config.raw_excerpt_chars),
            units: vec![(chunk.chunk_id.clone(), text.to_string())],
            chunks: vec![chunk],
        })
    }

    fn attempt_visual(
        &self,
        bytes: &[u8],
        page_count: Option<usize>,
        run: &mut Run<'_>,
    ) -> Result<Extracted, ProcessingError> {
        let page_count = page_count
            .filter(|n| *n > 0)
            .ok_or_else(|| ProcessingError::EmptyResult("page count unknown, nothing to render".into()))?;
        let pages = select_pages(page_count, &SamplePolicy::from(&self.config));
        tracing::info!(
            document_id = %run.document_id,
            page_count,
            sampled = pages.len(),
            "Sampling pages for visual analysis"
        );
        run.sampled_pages.extend_from_slice(&pages);
        run.progress.report(
            Stage::Converting,
            format!("Rendering {} of {page_count} pages", pages.len()),
            40,
        );

        let batch = self.analyze_pages(bytes, &pages, run)?;
        if batch.results.is_empty() {
            return Err(ProcessingError::EmptyResult(format!(
                "none of {} sampled pages produced usable output",
                pages.len()
            )));
        }

        let record = merge_page_results(&batch.results);
        let transcripts = batch
            .results
            .iter()
            .filter(|p| !p.page_text.trim().is_empty())
            .count();
        let original_chars = record
            .full_text
            .chars()
            .count()
            .saturating_sub(PAGE_SEPARATOR_CHARS * transcripts.saturating_sub(1));

        Ok(Extracted {
            strategy: ExtractionStrategy::VisualPaged,
            raw_text_excerpt: excerpt(&record.full_text, self.config.raw_excerpt_chars),
            record,
            original_chars,
            chunks: batch.chunks,
            units: batch.units,
        })
    }

    /// Render `pages` and analyze each image. Analysis calls run one at a
    /// time and a call abandoned at its deadline holds back the next page.
    fn analyze_pages(
        &self,
        bytes: &[u8],
        pages: &[usize],
        run: &mut Run<'_>,
    ) -> Result<PageBatch, ProcessingError> {
        let options = RenderOptions::from(&self.config);
        let timeout = self.config.call_timeout();
        let cancel = run.cancel;
        let progress = run.progress;
        let calls = &mut run.analyzer_calls;
        let analyzer = Arc::clone(&self.analyzer);
        let prompt = build_page_prompt();
        let total = pages.len().max(1);
        let mut done = 0usize;

        let paged = render_and_analyze(
            self.renderer.as_ref(),
            bytes,
            pages,
            &options,
            cancel,
            |image: &PageImage| -> Result<AnalyzerResponse, ProcessingError> {
                done += 1;
                progress.report(
                    Stage::AnalyzingImages,
                    format!("Analyzing page {} ({done}/{total})", image.page_number),
                    (45 + 40 * done / total) as u8,
                );
                let data = image.read()?;
                let mime_type = image.mime_type();
                let analyzer = Arc::clone(&analyzer);
                let prompt = prompt.clone();
                let response = calls.call("analyze_image", timeout, cancel, move || {
                    analyzer.analyze_image(&data, mime_type, &prompt)
                })??;
                Ok(response)
            },
        )?;

        let mut batch = PageBatch::default();
        for (page, reason) in &paged.render_failures {
            run.monitor.record_error("render", format!("page {page}: {reason}"));
            run.monitor.record_chunk(false);
        }
        for (page, outcome) in paged.analyzed {
            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(document_id = %run.document_id, page, error = %e, "Page analysis failed");
                    run.monitor.record_error("page_analysis", format!("page {page}: {e}"));
                    run.monitor.record_chunk(false);
                    continue;
                }
            };
            run.monitor
                .record_call(self.analyzer.name(), response.input_tokens, response.output_tokens);

            let (result, status) = parse_page_result(page, &response.text);
            let usable = !result.page_text.trim().is_empty() || !result.fields.is_blank();
            run.monitor.record_chunk(usable);
            if !usable {
                tracing::debug!(page, "Page reply carried no text or fields");
                continue;
            }

            let chunk = Chunk::from_record(
                ExtractionStrategy::VisualPaged,
                Some(page),
                &result.page_text,
                &result.fields,
                status,
            );
            batch.units.push((chunk.chunk_id.clone(), result.page_text.clone()));
            batch.chunks.push(chunk);
            batch.results.push(result);
        }
        Ok(batch)
    }

    /// Fill gaps of a text-layer result from rendered table pages.
    ///
    /// Failures leave the text-layer result untouched.
    fn enrich_from_table_pages(
        &self,
        bytes: &[u8],
        page_count: usize,
        extracted: &mut Extracted,
        run: &mut Run<'_>,
    ) {
        let pages = select_table_pages(page_count);
        run.progress.report(
            Stage::Converting,
            format!("Rendering {} table pages", pages.len()),
            60,
        );
        match self.analyze_pages(bytes, &pages, run) {
            Ok(batch) if !batch.results.is_empty() => {
                let merged = merge_page_results(&batch.results);
                extracted.record = enrich_with_pages(std::mem::take(&mut extracted.record), &merged);
                extracted
                    .chunks
                    .extend(batch.chunks.into_iter().map(Chunk::as_enrichment));
                extracted.units.extend(batch.units);
                tracing::info!(
                    document_id = %run.document_id,
                    pages = batch.results.len(),
                    "Enriched text-layer result with table pages"
                );
            }
            Ok(_) => {
                tracing::warn!(document_id = %run.document_id, "No table page produced output, keeping text-layer result");
            }
            Err(e) => {
                tracing::warn!(document_id = %run.document_id, error = %e, "Table page enrichment failed, keeping text-layer result");
                run.monitor.record_error("table_pages", &e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Merge and report
    // -----------------------------------------------------------------------

    /// Structured Extractor pass; a failure only costs the second source.
    fn run_structured(&self, bytes: &[u8], mime_type: &str, run: &mut Run<'_>) -> Option<StructuredResult> {
        let extractor = Arc::clone(self.structured.as_ref()?);
        if run.cancel.is_cancelled() {
            return None;
        }
        run.monitor.start_stage("structured_extraction");
        let name = extractor.name().to_string();
        let document = bytes.to_vec();
        let mime = mime_type.to_string();

        let outcome = call_with_deadline("structured_extraction", self.config.call_timeout(), run.cancel, move || {
            extractor.extract(&document, &mime)
        })
        .map_err(AnalyzerError::from)
        .and_then(|result| result);

        match outcome {
            Ok(result) => {
                run.monitor.record_call(&name, 0, 0);
                run.monitor.end_stage(StageOutcome::Ok);
                tracing::info!(
                    document_id = %run.document_id,
                    extractor = %name,
                    fields = result.fields.len(),
                    tables = result.tables.len(),
                    "Structured extraction completed"
                );
                Some(result)
            }
            Err(e) => {
                tracing::warn!(
                    document_id = %run.document_id,
                    extractor = %name,
                    error = %e,
                    "Structured extraction failed, continuing with generative record only"
                );
                run.monitor.record_error("structured_extraction", &e);
                run.monitor.end_stage(StageOutcome::Failed);
                None
            }
        }
    }

    fn finish(
        &self,
        mut run: Run<'_>,
        file_info: FileInfo,
        extracted: Extracted,
        structured: Option<StructuredResult>,
    ) -> FinalOutput {
        run.monitor.start_stage("merge");
        let merged = merge_dual_source(structured.as_ref(), &extracted.record, self.config.min_merge_confidence);
        let mut detected = merged.conflicts;
        detected.extend(detect_conflicts(&page_conflict_candidates(&extracted.chunks)));
        let conflicts = detected.clone();

        run.monitor.start_stage("validation");
        let completeness = score_completeness(&merged.analysis);
        let units: Vec<(&str, &str)> = extracted
            .units
            .iter()
            .map(|(id, text)| (id.as_str(), text.as_str()))
            .collect();
        let unresolved_references = find_unresolved_references(&units);
        let checks = run_checks(&ValidationInput {
            original_chars: extracted.original_chars,
            chunks: &extracted.chunks,
            structured: structured.as_ref(),
            analysis: &merged.analysis,
            detected_conflicts: &detected,
            output_conflicts: &conflicts,
            char_loss_tolerance: self.config.char_loss_tolerance,
        });
        let validation = Validation {
            schema_valid: schema_valid(&merged.analysis),
            completeness,
            checks,
        };
        let quality = analyze_confidence(structured.as_ref(), &extracted.chunks);

        run.progress.report(Stage::Complete, "Analysis complete", 100);
        let (input_tokens, output_tokens) = run.monitor.tokens();
        let performance = run.monitor.report();

        tracing::info!(
            document_id = %run.document_id,
            strategy = %extracted.strategy,
            completeness = validation.completeness.score,
            conflicts = conflicts.len(),
            unresolved_references = unresolved_references.len(),
            duration_ms = performance.total_duration_ms,
            "Document analysis completed"
        );

        let meta = Meta {
            strategy_used: Some(extracted.strategy),
            strategies_attempted: run.attempts,
            page_count: run.page_count,
            chunk_count: extracted.chunks.len(),
            sampled_pages: run.sampled_pages,
            input_tokens,
            output_tokens,
            duration_ms: performance.total_duration_ms,
            file_info: Some(file_info),
            performance: Some(performance),
            confidence: Some(quality),
            conflict_report: conflict_report(&conflicts),
            ..Meta::default()
        };

        FinalOutput {
            success: true,
            document_id: run.document_id,
            error: None,
            analysis: Some(merged.analysis),
            record: Some(extracted.record),
            raw_text_excerpt: extracted.raw_text_excerpt,
            chunks: extracted.chunks,
            conflicts,
            unresolved_references,
            validation: Some(validation),
            meta,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unusable output fails the attempt unless no other strategy remains, in
/// which case the degraded record is kept.
fn accept_record(record: &DocumentRecord, status: ParseStatus, last: bool) -> Result<(), ProcessingError> {
    if last {
        if status == ParseStatus::Unparsed {
            tracing::warn!("Keeping degraded record from the last remaining strategy");
        }
        return Ok(());
    }
    match status {
        ParseStatus::Unparsed => Err(ProcessingError::EmptyResult("reply contained no JSON object".into())),
        ParseStatus::Parsed if record.is_blank() => {
            Err(ProcessingError::EmptyResult("reply carried no fields".into()))
        }
        ParseStatus::Parsed => Ok(()),
    }
}

fn excerpt(text: &str, max_chars: usize) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.chars().take(max_chars).collect())
}

fn schema_valid(analysis: &TenderAnalysis) -> bool {
    let value = analysis.to_value();
    ANALYSIS_SECTIONS.iter().all(|section| value.get(section).is_some())
}

/// First entry wins per field; tables are concatenated.
fn combine_structured(parts: Vec<StructuredResult>) -> Option<StructuredResult> {
    let mut parts = parts.into_iter();
    let mut combined = parts.next()?;
    for part in parts {
        for (key, field) in part.fields {
            combined.fields.entry(key).or_insert(field);
        }
        combined.tables.extend(part.tables);
    }
    Some(combined)
}

fn fail(mut run: Run<'_>, file_info: Option<FileInfo>, error: ProcessingError) -> FinalOutput {
    tracing::error!(document_id = %run.document_id, error = %error, "Document analysis failed");
    let (input_tokens, output_tokens) = run.monitor.tokens();
    let duration_ms = run.monitor.elapsed_ms();
    let performance = run.monitor.report();
    let meta = Meta {
        strategies_attempted: run.attempts,
        page_count: run.page_count,
        sampled_pages: run.sampled_pages,
        input_tokens,
        output_tokens,
        duration_ms,
        file_info,
        performance: Some(performance),
        ..Meta::default()
    };
    FinalOutput::failure(run.document_id, error.to_string(), meta)
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Stand-in renderer when the PDFium library cannot be loaded.
struct NoRenderer;

impl PdfPageRenderer for NoRenderer {
    fn page_count(&self, _pdf_bytes: &[u8]) -> Result<usize, ExtractionError> {
        Err(unavailable())
    }

    fn render_page(&self, _pdf_bytes: &[u8], page_index: usize, _dpi: u32) -> Result<Vec<u8>, ExtractionError> {
        Err(ExtractionError::PdfRendering {
            page: page_index + 1,
            reason: "PDFium library not available".into(),
        })
    }
}

fn unavailable() -> ExtractionError {
    ExtractionError::PdfRendering {
        page: 0,
        reason: "PDFium library not available".into(),
    }
}

/// Length of `TextLayer::full_text`, summed page by page.
fn joined_layer_chars(layer: &TextLayer) -> usize {
    let non_empty = layer.pages.iter().filter(|p| !p.text.trim().is_empty()).count();
    layer.char_count() + PAGE_SEPARATOR_CHARS * non_empty.saturating_sub(1)
}

/// Build a `DocumentProcessor` with production implementations.
///
/// Uses the Ollama-backed analyzer and PDFium rendering. If PDFium cannot
/// be loaded, visual analysis is disabled and PDFs fall back to the text
/// strategies only. No structured extractor is attached; callers add one
/// with `with_structured_extractor`.
pub fn build_processor(config: &PipelineConfig) -> Result<DocumentProcessor, ProcessingError> {
    let mut analyzer_config = config.analyzer.clone();
    analyzer_config.timeout_secs = analyzer_config.timeout_secs.min(config.call_timeout_secs);
    let analyzer = OllamaAnalyzer::new(&analyzer_config)?;
    let renderer: Box<dyn PdfPageRenderer> = match PdfiumRenderer::new() {
        Ok(renderer) => Box::new(renderer),
        Err(e) => {
            tracing::warn!(error = %e, "PDFium not available, visual page analysis disabled");
            Box::new(NoRenderer)
        }
    };
    Ok(DocumentProcessor::new(
        Arc::new(analyzer),
        Box::new(PdfTextExtractor),
        renderer,
        config.clone(),
    ))
}
