//! Conflict detection between values reported for the same logical field.
//!
//! Conflicts are recorded, never resolved: every contributing value stays
//! in the list with its source and confidence.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::pipeline::record::value_to_string;

/// Roots whose conflicts count as critical in the report.
const CRITICAL_ROOTS: &[&str] = &["dates", "financial"];

/// Confidence gap above which the stronger value is recommended.
const CONFIDENCE_MARGIN: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DifferentValues,
    PartialMatch,
    Contradictory,
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictValue {
    pub value: Value,
    pub source_id: String,
    pub context: String,
    pub confidence: f64,
}

impl ConflictValue {
    pub fn new(value: Value, source_id: impl Into<String>, confidence: f64) -> Self {
        Self {
            value,
            source_id: source_id.into(),
            context: String::new(),
            confidence,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    /// Dotted path in the analysis layout, e.g. `dates.end_date`.
    pub field: String,
    pub values: Vec<ConflictValue>,
    pub needs_review: bool,
    pub conflict_type: ConflictType,
    pub suggested_resolution: String,
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{2})[-/](\d{2})[-/](\d{4})").unwrap_or_else(|e| panic!("invalid date regex: {e}"))
    })
}

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\d.,]+\s*(tl|₺|usd|\$|eur|€)").unwrap_or_else(|e| panic!("invalid money regex: {e}"))
    })
}

/// Comparison form of a value.
///
/// Lowercased and trimmed; `dd/mm/yyyy` and `dd-mm-yyyy` become
/// `dd.mm.yyyy`; currency amounts lose thousands separators; a leading
/// percent sign is dropped.
pub fn normalize_value(value: &Value) -> String {
    let mut s = value_to_string(value).to_lowercase().trim().to_string();

    s = date_re().replacen(&s, 1, "$1.$2.$3").into_owned();

    if money_re().is_match(&s) {
        s = s.chars().filter(|c| *c != '.' && !c.is_whitespace()).collect();
        s = s.replacen(',', ".", 1);
    }

    if let Some(rest) = s.strip_prefix('%') {
        s = rest.replacen(',', ".", 1).trim().to_string();
    }

    s
}

/// `None` when the values agree or either side is empty.
pub fn check_conflict(a: &Value, b: &Value) -> Option<ConflictType> {
    let na = normalize_value(a);
    let nb = normalize_value(b);
    if na.is_empty() || nb.is_empty() || na == nb {
        return None;
    }
    if na.contains(&nb) || nb.contains(&na) {
        Some(ConflictType::PartialMatch)
    } else {
        Some(ConflictType::DifferentValues)
    }
}

pub fn suggest_resolution(kind: ConflictType, a: &ConflictValue, b: &ConflictValue) -> String {
    if a.confidence > b.confidence + CONFIDENCE_MARGIN {
        return format!(
            "Daha yüksek güvenli değer tercih edilebilir: \"{}\" ({})",
            value_to_string(&a.value),
            a.confidence
        );
    }
    if b.confidence > a.confidence + CONFIDENCE_MARGIN {
        return format!(
            "Daha yüksek güvenli değer tercih edilebilir: \"{}\" ({})",
            value_to_string(&b.value),
            b.confidence
        );
    }
    match kind {
        ConflictType::PartialMatch => {
            "Değerler kısmen örtüşüyor - daha detaylı olanı tercih edilebilir".to_string()
        }
        _ => "Manuel inceleme gerekli - orijinal dökümandan doğrulayın".to_string(),
    }
}

/// Conflict between exactly two sources, if they disagree.
pub fn conflict_between(field: &str, a: ConflictValue, b: ConflictValue) -> Option<Conflict> {
    let kind = check_conflict(&a.value, &b.value)?;
    let suggested_resolution = suggest_resolution(kind, &a, &b);
    Some(Conflict {
        field: field.to_string(),
        values: vec![a, b],
        needs_review: true,
        conflict_type: kind,
        suggested_resolution,
    })
}

/// Pairwise detection over `(field, value)` candidates.
///
/// Values disagreeing with an already recorded value of the same field
/// join that conflict instead of opening a new one.
pub fn detect_conflicts(candidates: &[(String, ConflictValue)]) -> Vec<Conflict> {
    let mut groups: Vec<(&str, Vec<&ConflictValue>)> = Vec::new();
    for (field, value) in candidates {
        match groups.iter_mut().find(|(f, _)| *f == field.as_str()) {
            Some((_, values)) => values.push(value),
            None => groups.push((field.as_str(), vec![value])),
        }
    }

    let mut conflicts: Vec<Conflict> = Vec::new();
    for (field, items) in groups.iter().filter(|(_, items)| items.len() >= 2) {
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                let Some(kind) = check_conflict(&items[i].value, &items[j].value) else {
                    continue;
                };
                let norm_i = normalize_value(&items[i].value);
                let norm_j = normalize_value(&items[j].value);

                let existing = conflicts.iter_mut().find(|c| {
                    c.field == *field && c.values.iter().any(|v| normalize_value(&v.value) == norm_i)
                });
                match existing {
                    Some(conflict) => {
                        if !conflict.values.iter().any(|v| normalize_value(&v.value) == norm_j) {
                            conflict.values.push(items[j].clone());
                        }
                    }
                    None => conflicts.push(Conflict {
                        field: field.to_string(),
                        values: vec![items[i].clone(), items[j].clone()],
                        needs_review: true,
                        conflict_type: kind,
                        suggested_resolution: suggest_resolution(kind, items[i], items[j]),
                    }),
                }
            }
        }
    }

    if !conflicts.is_empty() {
        tracing::info!(
            candidates = candidates.len(),
            conflicts = conflicts.len(),
            "Conflict detection completed"
        );
    }
    conflicts
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictTypeCounts {
    pub different_values: usize,
    pub partial_match: usize,
    pub contradictory: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictReport {
    pub total_conflicts: usize,
    pub critical_conflicts: usize,
    pub by_field: BTreeMap<String, usize>,
    pub by_type: ConflictTypeCounts,
    pub needs_review_count: usize,
}

pub fn conflict_report(conflicts: &[Conflict]) -> ConflictReport {
    let mut report = ConflictReport {
        total_conflicts: conflicts.len(),
        ..ConflictReport::default()
    };
    for conflict in conflicts {
        let root = conflict.field.split('.').next().unwrap_or_default();
        *report.by_field.entry(root.to_string()).or_default() += 1;
        match conflict.conflict_type {
            ConflictType::DifferentValues => report.by_type.different_values += 1,
            ConflictType::PartialMatch => report.by_type.partial_match += 1,
            ConflictType::Contradictory => report.by_type.contradictory += 1,
        }
        if conflict.needs_review {
            report.needs_review_count += 1;
        }
        if CRITICAL_ROOTS.contains(&root) {
            report.critical_conflicts += 1;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cv(v: &str, src: &str, conf: f64) -> ConflictValue {
        ConflictValue::new(json!(v), src, conf)
    }

    #[test]
    fn normalizes_dates_money_and_percent() {
        assert_eq!(normalize_value(&json!("15/03/2025")), "15.03.2025");
        assert_eq!(normalize_value(&json!("15-03-2025")), "15.03.2025");
        assert_eq!(normalize_value(&json!("1.250.000,00 TL")), "1250000.00tl");
        assert_eq!(normalize_value(&json!("%2,5")), "2.5");
        assert_eq!(normalize_value(&json!(null)), "");
        assert_eq!(normalize_value(&json!(42)), "42");
    }

    #[test]
    fn equivalent_formats_do_not_conflict() {
        assert_eq!(check_conflict(&json!("15.03.2025"), &json!("15/03/2025")), None);
        assert_eq!(check_conflict(&json!("1.000 TL"), &json!("1000 tl")), None);
    }

    #[test]
    fn empty_side_never_conflicts() {
        assert_eq!(check_conflict(&json!(""), &json!("x")), None);
        assert_eq!(check_conflict(&json!(null), &json!("x")), None);
    }

    #[test]
    fn containment_is_partial_match() {
        assert_eq!(
            check_conflict(&json!("Ankara Belediyesi"), &json!("ankara")),
            Some(ConflictType::PartialMatch)
        );
        assert_eq!(
            check_conflict(&json!("31.12.2025"), &json!("30.06.2025")),
            Some(ConflictType::DifferentValues)
        );
    }

    #[test]
    fn resolution_prefers_clearly_stronger_value() {
        let s = suggest_resolution(ConflictType::DifferentValues, &cv("a", "x", 0.9), &cv("b", "y", 0.5));
        assert!(s.contains("\"a\""));
        let s = suggest_resolution(ConflictType::PartialMatch, &cv("a", "x", 0.6), &cv("ab", "y", 0.5));
        assert!(s.contains("kısmen"));
        let s = suggest_resolution(ConflictType::DifferentValues, &cv("a", "x", 0.6), &cv("b", "y", 0.5));
        assert!(s.contains("Manuel"));
    }

    #[test]
    fn third_disagreeing_value_joins_existing_conflict() {
        let candidates = vec![
            ("pages.tarih".to_string(), cv("01.01.2025", "p1", 1.0)),
            ("pages.tarih".to_string(), cv("02.01.2025", "p2", 1.0)),
            ("pages.tarih".to_string(), cv("03.01.2025", "p3", 1.0)),
            ("pages.kurum".to_string(), cv("A", "p1", 1.0)),
        ];
        let conflicts = detect_conflicts(&candidates);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].values.len(), 3);
        assert!(conflicts[0].needs_review);
    }

    #[test]
    fn agreeing_values_produce_nothing() {
        let candidates = vec![
            ("pages.ikn".to_string(), cv("2024/1", "p1", 1.0)),
            ("pages.ikn".to_string(), cv(" 2024/1 ", "p2", 1.0)),
        ];
        assert!(detect_conflicts(&candidates).is_empty());
    }

    #[test]
    fn report_counts_roots_and_critical() {
        let conflicts = vec![
            conflict_between("dates.end_date", cv("1", "a", 1.0), cv("2", "b", 1.0)).unwrap(),
            conflict_between("summary.institution", cv("x", "a", 1.0), cv("xy", "b", 1.0)).unwrap(),
        ];
        let report = conflict_report(&conflicts);
        assert_eq!(report.total_conflicts, 2);
        assert_eq!(report.critical_conflicts, 1);
        assert_eq!(report.by_field["dates"], 1);
        assert_eq!(report.by_type.partial_match, 1);
        assert_eq!(report.needs_review_count, 2);
    }
}
