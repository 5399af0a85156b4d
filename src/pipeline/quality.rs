//! Confidence banding and per-run performance monitoring.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::pipeline::analysis::StructuredResult;
use crate::pipeline::output::Chunk;

// ═══════════════════════════════════════════════════════════
// Confidence bands
// ═══════════════════════════════════════════════════════════

pub const HIGH_CONFIDENCE: f64 = 0.85;
pub const MEDIUM_CONFIDENCE: f64 = 0.65;
pub const LOW_CONFIDENCE: f64 = 0.45;
/// Below this a value should not be used at all.
pub const UNUSABLE_CONFIDENCE: f64 = 0.3;

/// Fields that need verification whenever they fall below MEDIUM.
pub const CRITICAL_FIELDS: &[&str] = &["tahmini_bedel", "ihale_tarihi", "son_teklif_tarihi", "teminat_oranlari"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceBand {
    Reject,
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub fn of(confidence: f64) -> Self {
        if confidence >= HIGH_CONFIDENCE {
            Self::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else if confidence >= LOW_CONFIDENCE {
            Self::Low
        } else {
            Self::Reject
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowConfidenceField {
    pub field: String,
    pub confidence: f64,
    pub band: ConfidenceBand,
    pub action: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationNeeded {
    pub field: String,
    pub confidence: f64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BandCounts {
    pub total_fields: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityReport {
    pub overall_confidence: f64,
    pub field_confidences: BTreeMap<String, f64>,
    pub low_confidence_fields: Vec<LowConfidenceField>,
    pub needs_verification: Vec<VerificationNeeded>,
    pub summary: BandCounts,
}

fn action_for(confidence: f64) -> &'static str {
    match ConfidenceBand::of(confidence) {
        ConfidenceBand::High | ConfidenceBand::Medium => "none",
        ConfidenceBand::Low => "verify",
        ConfidenceBand::Reject if confidence >= UNUSABLE_CONFIDENCE => "manual entry required",
        ConfidenceBand::Reject => "do not use",
    }
}

/// Band every structured field and flag weak findings.
pub fn analyze_confidence(structured: Option<&StructuredResult>, chunks: &[Chunk]) -> QualityReport {
    let mut report = QualityReport::default();

    for (name, field) in structured.into_iter().flat_map(|s| s.values()) {
        let confidence = field.confidence;
        report.field_confidences.insert(name.to_string(), confidence);
        report.summary.total_fields += 1;

        let band = ConfidenceBand::of(confidence);
        match band {
            ConfidenceBand::High => report.summary.high += 1,
            ConfidenceBand::Medium => report.summary.medium += 1,
            ConfidenceBand::Low => report.summary.low += 1,
            ConfidenceBand::Reject => report.summary.rejected += 1,
        }
        if band <= ConfidenceBand::Low {
            report.low_confidence_fields.push(LowConfidenceField {
                field: name.to_string(),
                confidence,
                band,
                action: action_for(confidence),
            });
        }
        if CRITICAL_FIELDS.contains(&name) && confidence < MEDIUM_CONFIDENCE {
            report.needs_verification.push(VerificationNeeded {
                field: name.to_string(),
                confidence,
                message: format!("critical field {name} has low confidence"),
            });
        }
    }

    for chunk in chunks {
        for finding in chunk.findings.iter().filter(|f| f.confidence < MEDIUM_CONFIDENCE) {
            report.low_confidence_fields.push(LowConfidenceField {
                field: format!("{}.{}", chunk.chunk_id, finding.finding_type),
                confidence: finding.confidence,
                band: ConfidenceBand::of(finding.confidence),
                action: action_for(finding.confidence),
            });
        }
    }

    if !report.field_confidences.is_empty() {
        let sum: f64 = report.field_confidences.values().sum();
        report.overall_confidence = (sum / report.field_confidences.len() as f64 * 100.0).round() / 100.0;
    }
    report
}

// ═══════════════════════════════════════════════════════════
// Pipeline monitor
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageTiming {
    pub name: String,
    pub duration_ms: u64,
    pub percentage: u64,
    pub outcome: StageOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedError {
    pub stage: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkCounts {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub document_id: String,
    pub total_duration_ms: u64,
    pub stages: Vec<StageTiming>,
    pub slowest_stage: Option<String>,
    /// External calls per collaborator name.
    pub calls: BTreeMap<String, u64>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub chunks: ChunkCounts,
    pub success_rate: u64,
    pub errors: Vec<RecordedError>,
}

/// Stage timer and counters for one document run.
pub struct PipelineMonitor {
    document_id: String,
    started: Instant,
    current: Option<(String, Instant)>,
    stages: Vec<(String, u64, StageOutcome)>,
    calls: BTreeMap<String, u64>,
    input_tokens: u64,
    output_tokens: u64,
    chunks: ChunkCounts,
    errors: Vec<RecordedError>,
}

impl PipelineMonitor {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            started: Instant::now(),
            current: None,
            stages: Vec::new(),
            calls: BTreeMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            chunks: ChunkCounts::default(),
            errors: Vec::new(),
        }
    }

    /// Start a stage, closing any open one as `Ok`.
    pub fn start_stage(&mut self, name: &str) {
        if self.current.is_some() {
            self.end_stage(StageOutcome::Ok);
        }
        tracing::debug!(document_id = %self.document_id, stage = name, "Stage started");
        self.current = Some((name.to_string(), Instant::now()));
    }

    pub fn end_stage(&mut self, outcome: StageOutcome) {
        if let Some((name, started)) = self.current.take() {
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::debug!(
                document_id = %self.document_id,
                stage = %name,
                duration_ms,
                outcome = ?outcome,
                "Stage finished"
            );
            self.stages.push((name, duration_ms, outcome));
        }
    }

    pub fn record_call(&mut self, collaborator: &str, input_tokens: u64, output_tokens: u64) {
        *self.calls.entry(collaborator.to_string()).or_default() += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
    }

    pub fn record_chunk(&mut self, success: bool) {
        self.chunks.total += 1;
        if success {
            self.chunks.processed += 1;
        } else {
            self.chunks.failed += 1;
        }
    }

    pub fn record_error(&mut self, stage: &str, error: impl fmt::Display) {
        self.errors.push(RecordedError {
            stage: stage.to_string(),
            error: error.to_string(),
        });
    }

    pub fn tokens(&self) -> (u64, u64) {
        (self.input_tokens, self.output_tokens)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Close any open stage and summarise the run.
    pub fn report(&mut self) -> MonitorReport {
        if self.current.is_some() {
            self.end_stage(StageOutcome::Ok);
        }

        let total_stage_ms: u64 = self.stages.iter().map(|(_, d, _)| d).sum();
        let stages: Vec<StageTiming> = self
            .stages
            .iter()
            .map(|(name, duration_ms, outcome)| StageTiming {
                name: name.clone(),
                duration_ms: *duration_ms,
                percentage: if total_stage_ms > 0 {
                    duration_ms * 100 / total_stage_ms
                } else {
                    0
                },
                outcome: *outcome,
            })
            .collect();
        let slowest_stage = stages.iter().max_by_key(|s| s.duration_ms).map(|s| s.name.clone());
        let success_rate = if self.chunks.total > 0 {
            (self.chunks.processed * 100 / self.chunks.total) as u64
        } else {
            100
        };

        let report = MonitorReport {
            document_id: self.document_id.clone(),
            total_duration_ms: self.elapsed_ms(),
            stages,
            slowest_stage,
            calls: self.calls.clone(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            chunks: self.chunks.clone(),
            success_rate,
            errors: self.errors.clone(),
        };

        tracing::info!(
            document_id = %report.document_id,
            duration_ms = report.total_duration_ms,
            chunks = report.chunks.total,
            failed_chunks = report.chunks.failed,
            calls = ?report.calls,
            slowest = ?report.slowest_stage,
            "Pipeline run summary"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(fields: serde_json::Value) -> StructuredResult {
        StructuredResult::from_raw(fields.as_object().unwrap(), vec![])
    }

    #[test]
    fn bands_follow_thresholds() {
        assert_eq!(ConfidenceBand::of(0.85), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::of(0.84), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.65), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::of(0.45), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::of(0.44), ConfidenceBand::Reject);
        assert_eq!(action_for(0.35), "manual entry required");
        assert_eq!(action_for(0.2), "do not use");
    }

    #[test]
    fn critical_fields_below_medium_need_verification() {
        let s = structured(json!({
            "tahmini_bedel": {"value": "1.000.000 TL", "confidence": 0.6},
            "ihale_tarihi": {"value": "15.03.2025", "confidence": 0.9},
            "kurum_adi": {"value": "Belediye", "confidence": 0.7}
        }));
        let report = analyze_confidence(Some(&s), &[]);
        assert_eq!(report.summary.total_fields, 3);
        assert_eq!(report.summary.high, 1);
        assert_eq!(report.summary.medium, 1);
        assert_eq!(report.summary.low, 1);
        assert_eq!(report.needs_verification.len(), 1);
        assert_eq!(report.needs_verification[0].field, "tahmini_bedel");
        assert_eq!(report.low_confidence_fields.len(), 1);
        assert_eq!(report.low_confidence_fields[0].field, "tahmini_bedel");
        assert_eq!(report.overall_confidence, 0.73);
    }

    #[test]
    fn non_critical_low_fields_are_listed_but_not_escalated() {
        let s = structured(json!({
            "tahmini_bedel": {"value": "1.000.000 TL", "confidence": 0.6},
            "kurum_adi": {"value": "Belediye", "confidence": 0.5}
        }));
        let report = analyze_confidence(Some(&s), &[]);
        assert_eq!(report.summary.low, 2);
        assert_eq!(report.low_confidence_fields.len(), 2);
        assert_eq!(report.needs_verification.len(), 1);
        assert_eq!(report.needs_verification[0].field, "tahmini_bedel");
    }

    #[test]
    fn empty_inputs_give_empty_report() {
        let report = analyze_confidence(None, &[]);
        assert_eq!(report, QualityReport::default());
    }

    #[test]
    fn monitor_tracks_stages_calls_and_errors() {
        let mut m = PipelineMonitor::new("doc-1");
        m.start_stage("extracting");
        m.start_stage("analyzing");
        m.record_call("mock", 100, 20);
        m.record_call("mock", 50, 10);
        m.record_chunk(true);
        m.record_chunk(false);
        m.record_error("analyzing", "timed out");
        m.end_stage(StageOutcome::Failed);

        let report = m.report();
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].outcome, StageOutcome::Ok);
        assert_eq!(report.stages[1].outcome, StageOutcome::Failed);
        assert_eq!(report.calls.get("mock"), Some(&2));
        assert_eq!((report.input_tokens, report.output_tokens), (150, 30));
        assert_eq!(report.success_rate, 50);
        assert_eq!(report.errors[0].error, "timed out");
    }
}
