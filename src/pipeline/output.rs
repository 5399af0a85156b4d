//! Output envelopes: chunk-level findings and the caller-facing result.
//!
//! Every analysis unit (the whole document, one text-layer pass, one page)
//! becomes a `Chunk`. Its non-empty scalar fields become `Finding`s that
//! point back at the chunk and, when the value occurs in the chunk text,
//! at the exact byte range.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::PIPELINE_VERSION;
use crate::pipeline::analysis::ParseStatus;
use crate::pipeline::completeness::CompletenessScore;
use crate::pipeline::import::{DocumentKind, FormatDetection};
use crate::pipeline::merge::{Conflict, ConflictReport, ConflictValue, TenderAnalysis};
use crate::pipeline::quality::{MonitorReport, QualityReport};
use crate::pipeline::record::{is_empty_value, value_to_string, DocumentRecord};
use crate::pipeline::references::UnresolvedReference;
use crate::pipeline::strategy::{ExtractionStrategy, StrategyAttempt};
use crate::pipeline::validation::ValidationReport;

/// Maximum characters of surrounding text kept with a finding.
pub const CONTEXT_CHARS: usize = 300;

const CONFIDENCE_LOCATED: f64 = 1.0;
const CONFIDENCE_UNLOCATED: f64 = 0.5;

// ═══════════════════════════════════════════════════════════
// Chunk level
// ═══════════════════════════════════════════════════════════

/// One atomic extracted fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub value: Value,
    /// Field key the value was reported under, e.g. `tarih`.
    #[serde(rename = "type")]
    pub finding_type: String,
    pub context: String,
    pub confidence: f64,
    /// Byte offsets of the first occurrence in the chunk text.
    pub source_position: Option<(usize, usize)>,
    pub raw_text: String,
    pub related_article: Option<String>,
    pub source_chunk_id: String,
}

/// Whether a chunk carries the document transcript or only enriches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkRole {
    Primary,
    Enrichment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkSource {
    pub strategy: ExtractionStrategy,
    pub page: Option<usize>,
    pub role: ChunkRole,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source: ChunkSource,
    pub char_count: usize,
    pub parse_status: ParseStatus,
    pub findings: Vec<Finding>,
}

impl Chunk {
    /// Build a chunk from one analysis unit and the record parsed from it.
    pub fn from_record(
        strategy: ExtractionStrategy,
        page: Option<usize>,
        text: &str,
        record: &DocumentRecord,
        parse_status: ParseStatus,
    ) -> Self {
        let chunk_id = match page {
            Some(n) => format!("{strategy}-p{n:03}"),
            None => strategy.to_string(),
        };
        let findings = scalar_fields(record)
            .into_iter()
            .map(|(key, value)| build_finding(&chunk_id, key, value, text))
            .collect();

        Self {
            chunk_id,
            source: ChunkSource {
                strategy,
                page,
                role: ChunkRole::Primary,
            },
            char_count: text.trim().chars().count(),
            parse_status,
            findings,
        }
    }

    /// Measure the chunk by the text its record carries instead of the
    /// analyzed input.
    pub fn counting(mut self, carried_text: &str) -> Self {
        self.char_count = carried_text.trim().chars().count();
        self
    }

    pub fn as_enrichment(mut self) -> Self {
        self.source.role = ChunkRole::Enrichment;
        self
    }

    /// Namespace the chunk id, e.g. per archive entry.
    pub fn with_id_prefix(mut self, prefix: &str) -> Self {
        self.chunk_id = format!("{prefix}{}", self.chunk_id);
        for finding in &mut self.findings {
            finding.source_chunk_id = self.chunk_id.clone();
        }
        self
    }
}

/// Fixed scalar fields plus primitive keys the analyzer added on its own.
fn scalar_fields(record: &DocumentRecord) -> Vec<(String, Value)> {
    let mut fields: Vec<(String, Value)> = record
        .scalars()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    fields.extend(
        record
            .extra
            .iter()
            .filter(|(_, v)| matches!(v, Value::String(_) | Value::Number(_)) && !is_empty_value(v))
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    fields
}

fn article_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)madde\s+(\d+(?:\.\d+)*)").unwrap_or_else(|e| panic!("invalid article regex: {e}"))
    })
}

fn build_finding(chunk_id: &str, key: String, value: Value, text: &str) -> Finding {
    let needle = value_to_string(&value);
    let needle = needle.trim();
    let position = locate(text, needle);

    let (context, raw_text, related_article, confidence) = match position {
        Some((start, end)) => (
            context_window(text, start, end),
            text[start..end].to_string(),
            article_re()
                .captures_iter(&text[..start])
                .last()
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            CONFIDENCE_LOCATED,
        ),
        None => (String::new(), needle.to_string(), None, CONFIDENCE_UNLOCATED),
    };

    Finding {
        value,
        finding_type: key,
        context,
        confidence,
        source_position: position,
        raw_text,
        related_article,
        source_chunk_id: chunk_id.to_string(),
    }
}

/// First occurrence of `needle`, exact first, then ASCII case-insensitive.
fn locate(text: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    if let Some(start) = text.find(needle) {
        return Some((start, start + needle.len()));
    }
    // ASCII lowering keeps byte offsets aligned with the original.
    let lowered = text.to_ascii_lowercase();
    lowered
        .find(&needle.to_ascii_lowercase())
        .map(|start| (start, start + needle.len()))
}

/// Up to `CONTEXT_CHARS` characters centred on `[start, end)`.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let match_chars = text[start..end].chars().count();
    let side = CONTEXT_CHARS.saturating_sub(match_chars) / 2;

    let before: String = {
        let rev: Vec<char> = text[..start].chars().rev().take(side).collect();
        rev.into_iter().rev().collect()
    };
    let after: String = text[end..].chars().take(side).collect();

    let window = format!("{before}{}{after}", &text[start..end]);
    window.chars().take(CONTEXT_CHARS).collect::<String>().trim().to_string()
}

/// Conflict candidates from page chunks, keyed `pages.<field>`.
pub fn page_conflict_candidates(chunks: &[Chunk]) -> Vec<(String, ConflictValue)> {
    chunks
        .iter()
        .filter(|c| c.source.page.is_some())
        .flat_map(|c| c.findings.iter())
        .map(|f| {
            let value = ConflictValue::new(f.value.clone(), f.source_chunk_id.clone(), f.confidence)
                .with_context(f.context.clone());
            (format!("pages.{}", f.finding_type), value)
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Final envelope
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size_kb: f64,
    pub kind: DocumentKind,
    pub mime: String,
}

impl FileInfo {
    pub fn new(name: &str, detection: &FormatDetection) -> Self {
        Self {
            name: name.to_string(),
            size_kb: (detection.file_size_bytes as f64 / 1024.0 * 100.0).round() / 100.0,
            kind: detection.kind,
            mime: detection.mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
    pub pipeline_version: &'static str,
    pub analyzed_at: DateTime<Utc>,
    pub strategy_used: Option<ExtractionStrategy>,
    pub strategies_attempted: Vec<StrategyAttempt>,
    pub page_count: Option<usize>,
    pub chunk_count: usize,
    pub sampled_pages: Vec<usize>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub file_info: Option<FileInfo>,
    pub performance: Option<MonitorReport>,
    pub confidence: Option<QualityReport>,
    pub conflict_report: ConflictReport,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            pipeline_version: PIPELINE_VERSION,
            analyzed_at: Utc::now(),
            strategy_used: None,
            strategies_attempted: Vec::new(),
            page_count: None,
            chunk_count: 0,
            sampled_pages: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
            file_info: None,
            performance: None,
            confidence: None,
            conflict_report: ConflictReport::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validation {
    pub schema_valid: bool,
    pub completeness: CompletenessScore,
    pub checks: ValidationReport,
}

/// Caller-facing result of one `analyze` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalOutput {
    pub success: bool,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub analysis: Option<TenderAnalysis>,
    /// Generative record the analysis was built from.
    pub record: Option<DocumentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text_excerpt: Option<String>,
    pub chunks: Vec<Chunk>,
    pub conflicts: Vec<Conflict>,
    pub unresolved_references: Vec<UnresolvedReference>,
    pub validation: Option<Validation>,
    pub meta: Meta,
}

impl FinalOutput {
    /// Total failure: no analysis payload, partial or otherwise.
    pub fn failure(document_id: impl Into<String>, error: impl Into<String>, meta: Meta) -> Self {
        Self {
            success: false,
            document_id: document_id.into(),
            error: Some(error.into()),
            analysis: None,
            record: None,
            raw_text_excerpt: None,
            chunks: Vec::new(),
            conflicts: Vec::new(),
            unresolved_references: Vec::new(),
            validation: None,
            meta,
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String, serde_json::Error> {
        if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn located_value_gets_full_confidence_and_position() {
        let text = "MADDE 4 - İhale tarihi 15.03.2025 saat 10:00'dır.";
        let record = DocumentRecord::from_value(&json!({"tarih": "15.03.2025"}));
        let chunk = Chunk::from_record(ExtractionStrategy::TextLayer, None, text, &record, ParseStatus::Parsed);

        assert_eq!(chunk.chunk_id, "text_layer");
        assert_eq!(chunk.findings.len(), 1);
        let f = &chunk.findings[0];
        assert_eq!(f.finding_type, "tarih");
        assert_eq!(f.confidence, 1.0);
        let (start, end) = f.source_position.unwrap();
        assert_eq!(&text[start..end], "15.03.2025");
        assert_eq!(f.related_article.as_deref(), Some("4"));
        assert!(f.context.contains("İhale tarihi"));
        assert_eq!(f.source_chunk_id, "text_layer");
    }

    #[test]
    fn unlocated_value_gets_half_confidence() {
        let record = DocumentRecord::from_value(&json!({"bedel": "1.000.000 TL"}));
        let chunk = Chunk::from_record(
            ExtractionStrategy::VisualPaged,
            Some(3),
            "Sayfa metni",
            &record,
            ParseStatus::Parsed,
        );
        assert_eq!(chunk.chunk_id, "visual_paged-p003");
        let f = &chunk.findings[0];
        assert_eq!(f.confidence, 0.5);
        assert!(f.source_position.is_none());
        assert!(f.context.is_empty());
    }

    #[test]
    fn context_is_bounded() {
        let text = format!("{}2025/123456{}", "a".repeat(1000), "b".repeat(1000));
        let record = DocumentRecord::from_value(&json!({"ikn": "2025/123456"}));
        let chunk = Chunk::from_record(ExtractionStrategy::TextLayer, None, &text, &record, ParseStatus::Parsed);
        let f = &chunk.findings[0];
        assert!(f.context.chars().count() <= CONTEXT_CHARS);
        assert!(f.context.contains("2025/123456"));
    }

    #[test]
    fn extra_primitive_keys_become_findings() {
        let record = DocumentRecord::from_value(&json!({
            "is_bitis_tarihi": "31.12.2025",
            "ornek_menuler": [{"gun": 1}]
        }));
        let chunk = Chunk::from_record(ExtractionStrategy::TextLayer, None, "", &record, ParseStatus::Parsed);
        let types: Vec<&str> = chunk.findings.iter().map(|f| f.finding_type.as_str()).collect();
        assert_eq!(types, vec!["is_bitis_tarihi"]);
    }

    #[test]
    fn page_candidates_only_from_page_chunks() {
        let rec = |d: &str| DocumentRecord::from_value(&json!({"tarih": d}));
        let chunks = vec![
            Chunk::from_record(ExtractionStrategy::TextLayer, None, "", &rec("01.01.2025"), ParseStatus::Parsed),
            Chunk::from_record(ExtractionStrategy::VisualPaged, Some(1), "", &rec("02.01.2025"), ParseStatus::Parsed),
            Chunk::from_record(ExtractionStrategy::VisualPaged, Some(2), "", &rec("03.01.2025"), ParseStatus::Parsed),
        ];
        let candidates = page_conflict_candidates(&chunks);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|(f, _)| f == "pages.tarih"));
    }

    #[test]
    fn prefix_rewrites_finding_sources() {
        let record = DocumentRecord::from_value(&json!({"ikn": "2025/1"}));
        let chunk = Chunk::from_record(ExtractionStrategy::OfficeText, None, "", &record, ParseStatus::Parsed)
            .with_id_prefix("e1/")
            .as_enrichment();
        assert_eq!(chunk.chunk_id, "e1/office_text");
        assert_eq!(chunk.findings[0].source_chunk_id, "e1/office_text");
        assert_eq!(chunk.source.role, ChunkRole::Enrichment);
    }

    #[test]
    fn failure_carries_no_analysis() {
        let out = FinalOutput::failure("doc-1", "all strategies failed", Meta::default());
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["success"], json!(false));
        assert!(json["analysis"].is_null());
        assert_eq!(json["error"], json!("all strategies failed"));
        assert_eq!(json["meta"]["pipeline_version"], json!("tenderlens-1"));
    }
}
