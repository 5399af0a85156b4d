//! Post-merge invariant checks.
//!
//! Checks never alter the output. A failed check is reported under
//! `validation.checks` and logged; the document still succeeds.

use serde::Serialize;
use serde_json::{json, Value};

use crate::pipeline::analysis::StructuredResult;
use crate::pipeline::merge::{normalize_value, Conflict, TenderAnalysis};
use crate::pipeline::output::{Chunk, ChunkRole};
use crate::pipeline::record::is_empty_value;

/// Merged scalars whose values must come from a source.
const TRACED_SCALARS: &[&str] = &[
    "dates.start_date",
    "dates.end_date",
    "dates.tender_date",
    "summary.estimated_value",
    "financial.estimated_value",
    "summary.ikn",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCode {
    CharacterPreservation,
    NoFabrication,
    ConflictPreservation,
    SourceTraceability,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub code: CheckCode,
    pub passed: bool,
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn new(code: CheckCode, details: Value, error: Option<String>) -> Self {
        Self {
            code,
            passed: error.is_none(),
            details,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCheck {
    pub code: CheckCode,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub all_passed: bool,
    pub total_checks: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    pub checks: Vec<CheckResult>,
    pub failed_checks: Vec<FailedCheck>,
}

/// Everything the checks look at, borrowed from the processor.
pub struct ValidationInput<'a> {
    /// Characters of the source transcript the primary chunks cover.
    pub original_chars: usize,
    pub chunks: &'a [Chunk],
    pub structured: Option<&'a StructuredResult>,
    pub analysis: &'a TenderAnalysis,
    pub detected_conflicts: &'a [Conflict],
    pub output_conflicts: &'a [Conflict],
    pub char_loss_tolerance: usize,
}

pub fn run_checks(input: &ValidationInput<'_>) -> ValidationReport {
    let checks = vec![
        check_character_preservation(input.original_chars, input.chunks, input.char_loss_tolerance),
        check_no_fabrication(input.analysis, input.chunks, input.structured),
        check_conflict_preservation(input.detected_conflicts, input.output_conflicts),
        check_source_traceability(input.chunks),
    ];

    let failed_checks: Vec<FailedCheck> = checks
        .iter()
        .filter_map(|c| {
            c.error.as_ref().map(|e| FailedCheck {
                code: c.code,
                error: e.clone(),
            })
        })
        .collect();

    if !failed_checks.is_empty() {
        tracing::warn!(failed = failed_checks.len(), checks = ?failed_checks, "Validation checks failed");
    }

    ValidationReport {
        all_passed: failed_checks.is_empty(),
        total_checks: checks.len(),
        passed_count: checks.len() - failed_checks.len(),
        failed_count: failed_checks.len(),
        checks,
        failed_checks,
    }
}

/// Sum of primary-chunk characters stays within `tolerance` of the source.
pub fn check_character_preservation(original_chars: usize, chunks: &[Chunk], tolerance: usize) -> CheckResult {
    let chunked: usize = chunks
        .iter()
        .filter(|c| c.source.role == ChunkRole::Primary)
        .map(|c| c.char_count)
        .sum();
    let difference = original_chars.abs_diff(chunked);
    let details = json!({
        "original_length": original_chars,
        "chunked_length": chunked,
        "difference": difference,
        "tolerance": tolerance,
    });
    let error = (difference > tolerance).then(|| format!("{difference} characters lost (tolerance {tolerance})"));
    CheckResult::new(CheckCode::CharacterPreservation, details, error)
}

/// Every traced scalar appears among findings or structured values.
pub fn check_no_fabrication(
    analysis: &TenderAnalysis,
    chunks: &[Chunk],
    structured: Option<&StructuredResult>,
) -> CheckResult {
    let mut known: Vec<String> = chunks
        .iter()
        .flat_map(|c| c.findings.iter())
        .map(|f| normalize_value(&f.value))
        .collect();
    if let Some(s) = structured {
        known.extend(s.values().map(|(_, field)| normalize_value(&field.value)));
    }
    known.retain(|v| !v.is_empty());

    let mut fabricated = Vec::new();
    for path in TRACED_SCALARS {
        let Some(value) = analysis.lookup(path).filter(|v| !is_empty_value(v)) else {
            continue;
        };
        let norm = normalize_value(&value);
        let sourced = known
            .iter()
            .any(|k| *k == norm || k.contains(norm.as_str()) || norm.contains(k.as_str()));
        if !sourced {
            fabricated.push(json!({ "field": path, "value": value }));
        }
    }

    let error = (!fabricated.is_empty()).then(|| format!("{} values have no source", fabricated.len()));
    let details = json!({ "checked_fields": TRACED_SCALARS, "unsourced": fabricated });
    CheckResult::new(CheckCode::NoFabrication, details, error)
}

/// Every detected conflict is in the output with all of its values.
pub fn check_conflict_preservation(detected: &[Conflict], output: &[Conflict]) -> CheckResult {
    let mut missing = Vec::new();
    for conflict in detected {
        match output.iter().find(|c| c.field == conflict.field) {
            None => missing.push(json!({ "field": conflict.field })),
            Some(kept) => {
                for v in &conflict.values {
                    if !kept.values.iter().any(|k| k.value == v.value) {
                        missing.push(json!({ "field": conflict.field, "missing_value": v.value }));
                    }
                }
            }
        }
    }
    let details = json!({
        "detected_conflicts": detected.len(),
        "preserved_conflicts": output.len(),
        "missing": missing,
    });
    let error = (!missing.is_empty()).then(|| format!("{} conflicts not preserved", missing.len()));
    CheckResult::new(CheckCode::ConflictPreservation, details, error)
}

/// Findings name their chunk and every chunk has a chunk id.
pub fn check_source_traceability(chunks: &[Chunk]) -> CheckResult {
    let mut checked = 0usize;
    let mut untraced = Vec::new();
    for chunk in chunks {
        if chunk.chunk_id.is_empty() {
            untraced.push(json!({ "chunk": Value::Null }));
        }
        for finding in &chunk.findings {
            checked += 1;
            if finding.source_chunk_id.is_empty() || finding.source_chunk_id != chunk.chunk_id {
                untraced.push(json!({ "chunk": chunk.chunk_id, "type": finding.finding_type }));
            }
        }
    }
    let details = json!({ "checked_values": checked, "missing_source": untraced });
    let error = (!untraced.is_empty()).then(|| format!("{} values without a source", untraced.len()));
    CheckResult::new(CheckCode::SourceTraceability, details, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analysis::ParseStatus;
    use crate::pipeline::merge::{conflict_between, ConflictValue};
    use crate::pipeline::record::DocumentRecord;
    use crate::pipeline::strategy::ExtractionStrategy;

    fn chunk(text: &str, fields: Value) -> Chunk {
        Chunk::from_record(
            ExtractionStrategy::TextLayer,
            None,
            text,
            &DocumentRecord::from_value(&fields),
            ParseStatus::Parsed,
        )
    }

    #[test]
    fn character_loss_within_tolerance_passes() {
        let chunks = vec![chunk("abcdefghij", json!({}))];
        let ok = check_character_preservation(15, &chunks, 10);
        assert!(ok.passed);
        let bad = check_character_preservation(100, &chunks, 10);
        assert!(!bad.passed);
        assert_eq!(bad.details["difference"], json!(90));
    }

    #[test]
    fn enrichment_chunks_do_not_count() {
        let page = chunk("x".repeat(50).as_str(), json!({})).as_enrichment();
        let chunks = vec![chunk("abcdefghij", json!({})), page];
        assert!(check_character_preservation(10, &chunks, 10).passed);
    }

    #[test]
    fn fabricated_date_is_flagged() {
        let chunks = vec![chunk("İhale 15.03.2025", json!({"tarih": "15.03.2025"}))];
        let mut analysis = TenderAnalysis::default();
        analysis.dates.tender_date = json!("15/03/2025");
        assert!(check_no_fabrication(&analysis, &chunks, None).passed);

        analysis.dates.end_date = json!("31.12.2026");
        let r = check_no_fabrication(&analysis, &chunks, None);
        assert!(!r.passed);
        assert_eq!(r.details["unsourced"][0]["field"], json!("dates.end_date"));
    }

    #[test]
    fn structured_values_count_as_sources() {
        let structured = StructuredResult::from_raw(
            json!({"is_bitis_tarihi": {"value": "31.12.2026", "confidence": 0.9}})
                .as_object()
                .unwrap(),
            vec![],
        );
        let mut analysis = TenderAnalysis::default();
        analysis.dates.end_date = json!("31.12.2026");
        assert!(check_no_fabrication(&analysis, &[], Some(&structured)).passed);
    }

    #[test]
    fn dropped_conflict_value_fails_preservation() {
        let c = conflict_between(
            "dates.end_date",
            ConflictValue::new(json!("31.12.2025"), "structured:bitis_tarihi", 0.9),
            ConflictValue::new(json!("31.12.2026"), "generative", 1.0),
        )
        .unwrap();
        assert!(check_conflict_preservation(&[c.clone()], &[c.clone()]).passed);

        let mut trimmed = c.clone();
        trimmed.values.pop();
        assert!(!check_conflict_preservation(&[c.clone()], &[trimmed]).passed);
        assert!(!check_conflict_preservation(&[c], &[]).passed);
    }

    #[test]
    fn report_aggregates_failures() {
        let chunks = vec![chunk("metin", json!({}))];
        let analysis = TenderAnalysis::default();
        let report = run_checks(&ValidationInput {
            original_chars: 500,
            chunks: &chunks,
            structured: None,
            analysis: &analysis,
            detected_conflicts: &[],
            output_conflicts: &[],
            char_loss_tolerance: 10,
        });
        assert_eq!(report.total_checks, 4);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.failed_checks[0].code, CheckCode::CharacterPreservation);
        assert!(!report.all_passed);
    }
}
