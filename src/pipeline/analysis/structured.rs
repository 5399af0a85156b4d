use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use super::AnalyzerError;
use crate::pipeline::merge::table::Table;
use crate::pipeline::record::{is_empty_value, is_unset_value};

/// One confidence-scored field from the Structured Extractor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredField {
    pub value: Value,
    pub confidence: f64,
}

impl StructuredField {
    /// Unwrap a raw extractor field.
    ///
    /// Objects yield `value`, else `content`, else their `items` array,
    /// with `confidence` defaulting to 0. Primitives are taken as-is with
    /// confidence 1.
    pub fn from_raw(raw: &Value) -> Self {
        match raw {
            Value::Object(obj) => {
                let value = ["value", "content"]
                    .iter()
                    .filter_map(|k| obj.get(*k))
                    .find(|v| !is_empty_value(v))
                    .or_else(|| obj.get("items").filter(|v| v.is_array()))
                    .cloned()
                    .unwrap_or(Value::Null);
                let confidence = obj
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
                    .clamp(0.0, 1.0);
                Self { value, confidence }
            }
            other => Self {
                value: other.clone(),
                confidence: 1.0,
            },
        }
    }

    /// Present for merge purposes: set (not empty, not the "not stated"
    /// sentinel) and at or above `min_confidence`.
    pub fn is_present(&self, min_confidence: f64) -> bool {
        !is_unset_value(&self.value) && self.confidence >= min_confidence
    }
}

/// Field map plus tables returned by the Structured Extractor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StructuredResult {
    pub fields: BTreeMap<String, StructuredField>,
    pub tables: Vec<Table>,
}

impl StructuredResult {
    pub fn from_raw(raw_fields: &Map<String, Value>, tables: Vec<Table>) -> Self {
        let fields = raw_fields
            .iter()
            .map(|(k, v)| (k.clone(), StructuredField::from_raw(v)))
            .collect();
        Self { fields, tables }
    }

    /// First alias whose field passes the confidence gate.
    pub fn first_gated<'a>(
        &'a self,
        aliases: &[&'a str],
        min_confidence: f64,
    ) -> Option<(&'a str, &'a StructuredField)> {
        aliases.iter().find_map(|alias| {
            self.fields
                .get(*alias)
                .filter(|f| f.is_present(min_confidence))
                .map(|f| (*alias, f))
        })
    }

    pub fn gated(&self, key: &str, min_confidence: f64) -> Option<&Value> {
        self.fields
            .get(key)
            .filter(|f| f.is_present(min_confidence))
            .map(|f| &f.value)
    }

    /// Non-empty fields that the confidence gate removes.
    pub fn dropped(&self, min_confidence: f64) -> Vec<(&str, f64)> {
        self.fields
            .iter()
            .filter(|(_, f)| !is_empty_value(&f.value) && f.confidence < min_confidence)
            .map(|(k, f)| (k.as_str(), f.confidence))
            .collect()
    }

    /// Every non-empty field value, gated or not.
    pub fn values(&self) -> impl Iterator<Item = (&str, &StructuredField)> {
        self.fields
            .iter()
            .filter(|(_, f)| !is_empty_value(&f.value))
            .map(|(k, f)| (k.as_str(), f))
    }
}

/// Structured Extractor abstraction (schema-trained, confidence-scored).
pub trait StructuredExtractor: Send + Sync {
    fn extract(&self, document: &[u8], mime_type: &str) -> Result<StructuredResult, AnalyzerError>;

    fn name(&self) -> &str;
}

/// Mock extractor returning a fixed result, optionally after a delay.
pub struct MockStructuredExtractor {
    result: Result<StructuredResult, String>,
    delay: Option<Duration>,
}

impl MockStructuredExtractor {
    pub fn new(result: StructuredResult) -> Self {
        Self {
            result: Ok(result),
            delay: None,
        }
    }

    /// Build from raw `{key: {value, confidence}}` JSON.
    pub fn from_json(fields: Value) -> Self {
        let map = fields.as_object().cloned().unwrap_or_default();
        Self::new(StructuredResult::from_raw(&map, vec![]))
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl StructuredExtractor for MockStructuredExtractor {
    fn extract(&self, _document: &[u8], _mime_type: &str) -> Result<StructuredResult, AnalyzerError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.result.clone().map_err(AnalyzerError::Other)
    }

    fn name(&self) -> &str {
        "mock-structured"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_value_then_content() {
        let f = StructuredField::from_raw(&json!({"value": "", "content": "Ankara", "confidence": 0.8}));
        assert_eq!(f.value, json!("Ankara"));
        assert!((f.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn items_are_kept_as_array() {
        let f = StructuredField::from_raw(&json!({"items": [{"kalem": "Ekmek"}], "confidence": 0.9}));
        assert!(f.value.is_array());
    }

    #[test]
    fn missing_confidence_is_zero_for_objects_and_one_for_primitives() {
        assert_eq!(StructuredField::from_raw(&json!({"value": "x"})).confidence, 0.0);
        assert_eq!(StructuredField::from_raw(&json!("x")).confidence, 1.0);
    }

    #[test]
    fn gate_is_inclusive_at_threshold() {
        let r = StructuredResult::from_raw(
            json!({
                "at": {"value": "a", "confidence": 0.4},
                "below": {"value": "b", "confidence": 0.399}
            })
            .as_object()
            .unwrap(),
            vec![],
        );
        assert_eq!(r.gated("at", 0.4), Some(&json!("a")));
        assert_eq!(r.gated("below", 0.4), None);
        assert_eq!(r.dropped(0.4), vec![("below", 0.399)]);
    }

    #[test]
    fn first_gated_walks_aliases_in_order() {
        let r = StructuredResult::from_raw(
            json!({
                "idare": {"value": "Low", "confidence": 0.1},
                "idare_adi": {"value": "High", "confidence": 0.9}
            })
            .as_object()
            .unwrap(),
            vec![],
        );
        let (key, field) = r.first_gated(&["kurum_adi", "idare", "idare_adi"], 0.4).unwrap();
        assert_eq!(key, "idare_adi");
        assert_eq!(field.value, json!("High"));
    }

    #[test]
    fn unset_sentinel_is_never_present() {
        let r = StructuredResult::from_raw(
            json!({
                "kurum_adi": {"value": "Belirtilmemiş", "confidence": 0.95},
                "idare": {"value": "Belediye", "confidence": 0.8}
            })
            .as_object()
            .unwrap(),
            vec![],
        );
        assert_eq!(r.gated("kurum_adi", 0.4), None);
        let (key, _) = r.first_gated(&["kurum_adi", "idare"], 0.4).unwrap();
        assert_eq!(key, "idare");
    }

    #[test]
    fn failing_mock_errors() {
        let err = MockStructuredExtractor::failing("quota").extract(&[], "application/pdf").unwrap_err();
        assert!(matches!(err, AnalyzerError::Other(ref m) if m == "quota"));
    }
}
