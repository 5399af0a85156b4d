//! Extraction strategy selection for PDFs and the shared text truncation rule.
//!
//! Strategies run in a fixed order and a later one is attempted only when
//! the earlier one fails or yields nothing usable. Ordered fallback is the
//! only retry mechanism.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::pipeline::extraction::PdfProfile;

/// Literal marker placed where the middle of an oversized text was cut.
pub const TRUNCATION_MARKER: &str = "[MIDDLE TRUNCATED]";

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Whole document sent as one attachment.
    DirectWholeDocument,
    /// Embedded text layer sent as a text prompt.
    TextLayer,
    /// Sampled pages rendered and analyzed one image at a time.
    VisualPaged,
    /// Office or plain-text content sent as a text prompt.
    OfficeText,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectWholeDocument => "direct_whole_document",
            Self::TextLayer => "text_layer",
            Self::VisualPaged => "visual_paged",
            Self::OfficeText => "office_text",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// One entry of `meta.strategies_attempted`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAttempt {
    pub strategy: ExtractionStrategy,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

// ═══════════════════════════════════════════════════════════
// Selection
// ═══════════════════════════════════════════════════════════

/// Detector-driven choice once the whole-document attempt is out of the way.
pub fn select_strategy(profile: &PdfProfile) -> ExtractionStrategy {
    if profile.needs_ocr {
        ExtractionStrategy::VisualPaged
    } else {
        ExtractionStrategy::TextLayer
    }
}

/// Ordered attempt plan for one PDF.
///
/// Direct analysis leads when the file is small enough. A trustworthy text
/// layer comes next with page analysis as the last resort. When the
/// detector flags the document, page analysis comes next and the text
/// layer is kept as a last resort only if it carries enough characters.
pub fn plan_pdf_strategies(
    file_size_bytes: u64,
    profile: &PdfProfile,
    config: &PipelineConfig,
) -> Vec<ExtractionStrategy> {
    let mut plan = Vec::with_capacity(3);
    if file_size_bytes <= config.direct_max_bytes {
        plan.push(ExtractionStrategy::DirectWholeDocument);
    }
    match select_strategy(profile) {
        ExtractionStrategy::TextLayer => {
            plan.push(ExtractionStrategy::TextLayer);
            plan.push(ExtractionStrategy::VisualPaged);
        }
        _ => {
            plan.push(ExtractionStrategy::VisualPaged);
            if profile.text_length >= config.min_text_chars {
                plan.push(ExtractionStrategy::TextLayer);
            }
        }
    }
    plan
}

// ═══════════════════════════════════════════════════════════
// Truncation
// ═══════════════════════════════════════════════════════════

/// Keep head and tail of an oversized text around an explicit marker.
///
/// Counts characters, not bytes. Text at or under `threshold` is
/// returned unchanged.
pub fn truncate_for_model(text: &str, threshold: usize, head: usize, tail: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= threshold {
        return Cow::Borrowed(text);
    }

    let head_end = byte_offset(text, head);
    let tail_start = byte_offset(text, total.saturating_sub(tail));

    tracing::debug!(total_chars = total, head, tail, "Truncating middle of oversized text");

    Cow::Owned(format!(
        "{}\n\n{TRUNCATION_MARKER}\n\n{}",
        &text[..head_end],
        &text[tail_start..]
    ))
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::{detect_ocr_need, OcrThresholds};

    const MB: u64 = 1024 * 1024;

    fn profile(text_len: usize, size_bytes: u64, pages: usize) -> PdfProfile {
        detect_ocr_need(text_len, size_bytes, pages, &OcrThresholds::default())
    }

    #[test]
    fn native_text_pdf_selects_text_layer() {
        // 500 KB, density 40
        let p = profile(20_000, 500 * 1024, 2);
        assert!(!p.needs_ocr);
        assert_eq!(select_strategy(&p), ExtractionStrategy::TextLayer);
    }

    #[test]
    fn scanned_pdf_selects_visual_paged() {
        let p = profile(200, 8 * MB, 40);
        assert!(p.needs_ocr);
        assert_eq!(select_strategy(&p), ExtractionStrategy::VisualPaged);
    }

    #[test]
    fn plan_starts_with_direct_under_limit() {
        let config = PipelineConfig::default();
        let p = profile(20_000, 500 * 1024, 2);
        assert_eq!(
            plan_pdf_strategies(500 * 1024, &p, &config),
            vec![
                ExtractionStrategy::DirectWholeDocument,
                ExtractionStrategy::TextLayer,
                ExtractionStrategy::VisualPaged
            ]
        );
    }

    #[test]
    fn plan_skips_direct_over_limit() {
        let config = PipelineConfig::default();
        let p = profile(2_000_000, 30 * MB, 100);
        let plan = plan_pdf_strategies(30 * MB, &p, &config);
        assert_eq!(plan[0], ExtractionStrategy::TextLayer);
        assert!(!plan.contains(&ExtractionStrategy::DirectWholeDocument));
    }

    #[test]
    fn scanned_plan_drops_empty_text_layer() {
        let config = PipelineConfig::default();
        let p = profile(0, 8 * MB, 40);
        assert_eq!(
            plan_pdf_strategies(8 * MB, &p, &config),
            vec![ExtractionStrategy::DirectWholeDocument, ExtractionStrategy::VisualPaged]
        );
    }

    #[test]
    fn short_text_is_untouched() {
        let t = "kısa metin";
        assert!(matches!(truncate_for_model(t, 120_000, 100_000, 20_000), Cow::Borrowed(_)));
    }

    #[test]
    fn truncation_keeps_head_tail_and_marker() {
        let original: String = (0..130_000).map(|i| if i % 7 == 0 { 'ş' } else { 'a' }).collect();
        let out = truncate_for_model(&original, 120_000, 100_000, 20_000);
        let head: String = original.chars().take(100_000).collect();
        let tail: String = original.chars().skip(110_000).collect();
        assert!(out.starts_with(&head));
        assert!(out.ends_with(&tail));
        assert!(out.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn strategy_serializes_snake_case() {
        let json = serde_json::to_string(&ExtractionStrategy::DirectWholeDocument).unwrap();
        assert_eq!(json, "\"direct_whole_document\"");
        assert_eq!(ExtractionStrategy::VisualPaged.to_string(), "visual_paged");
    }
}
