//! Document-level and page-level analysis records.
//!
//! Field names on the wire are the Turkish keys the analyzer prompts ask
//! for. Unknown keys the analyzer adds are kept in `extra` so alias lookups
//! in the dual-source merge can still see them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel the analyzer uses for "not stated in the document".
pub const UNSET_SENTINEL: &str = "Belirtilmemiş";

pub const SCALAR_KEYS: &[&str] = &[
    "ihale_basligi",
    "kurum",
    "tarih",
    "bedel",
    "sure",
    "ikn",
    "gunluk_ogun_sayisi",
    "kisi_sayisi",
    "sinir_deger_katsayisi",
    "benzer_is_tanimi",
];

/// Lists of plain strings, merged as a set union.
pub const STRING_LIST_KEYS: &[&str] = &["teknik_sartlar", "notlar", "is_yerleri"];

/// Lists of structured rows, concatenated with content-identical rows dropped.
pub const ROW_LIST_KEYS: &[&str] = &[
    "birim_fiyatlar",
    "personel_detaylari",
    "ogun_bilgileri",
    "ceza_kosullari",
    "gerekli_belgeler",
];

pub const OBJECT_KEYS: &[&str] = &[
    "iletisim",
    "mali_kriterler",
    "fiyat_farki",
    "teminat_oranlari",
    "servis_saatleri",
];

/// How a named field participates in merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Scalar,
    StringList,
    RowList,
    Object,
}

pub fn field_shape(key: &str) -> Option<FieldShape> {
    if SCALAR_KEYS.contains(&key) {
        Some(FieldShape::Scalar)
    } else if STRING_LIST_KEYS.contains(&key) {
        Some(FieldShape::StringList)
    } else if ROW_LIST_KEYS.contains(&key) {
        Some(FieldShape::RowList)
    } else if OBJECT_KEYS.contains(&key) {
        Some(FieldShape::Object)
    } else {
        None
    }
}

/// Empty means null, blank string, empty array or empty object.
pub fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Empty, or the analyzer's "not stated" sentinel.
pub fn is_unset_value(v: &Value) -> bool {
    is_empty_value(v) || v.as_str().map(|s| s.trim() == UNSET_SENTINEL).unwrap_or(false)
}

/// Render a scalar for display and comparison.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Merged, document-level analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentRecord {
    #[serde(rename = "tam_metin")]
    pub full_text: String,

    #[serde(rename = "ihale_basligi")]
    pub title: Value,
    #[serde(rename = "kurum")]
    pub institution: Value,
    #[serde(rename = "tarih")]
    pub date: Value,
    #[serde(rename = "bedel")]
    pub amount: Value,
    #[serde(rename = "sure")]
    pub duration: Value,
    #[serde(rename = "ikn")]
    pub registry_number: Value,
    #[serde(rename = "gunluk_ogun_sayisi")]
    pub daily_meals: Value,
    #[serde(rename = "kisi_sayisi")]
    pub total_persons: Value,
    #[serde(rename = "sinir_deger_katsayisi")]
    pub margin_coefficient: Value,
    #[serde(rename = "benzer_is_tanimi")]
    pub similar_work: Value,

    #[serde(rename = "teknik_sartlar")]
    pub technical_clauses: Vec<String>,
    #[serde(rename = "notlar")]
    pub notes: Vec<String>,
    #[serde(rename = "is_yerleri")]
    pub worksites: Vec<String>,

    #[serde(rename = "birim_fiyatlar")]
    pub unit_prices: Vec<Value>,
    #[serde(rename = "personel_detaylari")]
    pub staffing: Vec<Value>,
    #[serde(rename = "ogun_bilgileri")]
    pub meal_info: Vec<Value>,
    #[serde(rename = "ceza_kosullari")]
    pub penalties: Vec<Value>,
    #[serde(rename = "gerekli_belgeler")]
    pub required_documents: Vec<Value>,

    #[serde(rename = "iletisim")]
    pub contact: Map<String, Value>,
    #[serde(rename = "mali_kriterler")]
    pub financial_criteria: Map<String, Value>,
    #[serde(rename = "fiyat_farki")]
    pub price_adjustment: Map<String, Value>,
    #[serde(rename = "teminat_oranlari")]
    pub guarantee_rates: Map<String, Value>,
    #[serde(rename = "servis_saatleri")]
    pub service_hours: Map<String, Value>,

    /// Keys outside the fixed field set.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DocumentRecord {
    /// Build a record from an arbitrary JSON value without failing.
    ///
    /// Wrong-shaped fields are coerced where the intent is clear (a single
    /// string where a list was expected) and dropped otherwise.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let mut normalized = Map::new();
        let mut extra = Map::new();
        for (key, v) in obj {
            match (key.as_str(), field_shape(key)) {
                ("tam_metin", _) => {
                    normalized.insert(key.clone(), Value::String(value_to_string(v)));
                }
                (_, Some(FieldShape::Scalar)) => {
                    normalized.insert(key.clone(), coerce_scalar(v));
                }
                (_, Some(FieldShape::StringList)) => {
                    normalized.insert(key.clone(), Value::Array(coerce_string_list(v)));
                }
                (_, Some(FieldShape::RowList)) => {
                    normalized.insert(key.clone(), Value::Array(coerce_row_list(v)));
                }
                (_, Some(FieldShape::Object)) => {
                    let o = v.as_object().cloned().unwrap_or_default();
                    normalized.insert(key.clone(), Value::Object(o));
                }
                (_, None) => {
                    extra.insert(key.clone(), v.clone());
                }
            }
        }

        let mut record: Self = serde_json::from_value(Value::Object(normalized)).unwrap_or_default();
        record.extra = extra;
        record
    }

    /// Record with only the full text set, used for parse degradation.
    pub fn with_text(full_text: impl Into<String>) -> Self {
        Self {
            full_text: full_text.into(),
            ..Self::default()
        }
    }

    /// Flat wire-key map of every field, including extras.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Look up any field by wire key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.to_map().remove(key).filter(|v| !is_empty_value(v))
    }

    /// True when no analysis field carries a value.
    pub fn is_blank(&self) -> bool {
        self.to_map()
            .iter()
            .filter(|(k, _)| k.as_str() != "tam_metin")
            .all(|(_, v)| is_empty_value(v))
    }

    /// Non-empty scalar fields as (wire key, value).
    pub fn scalars(&self) -> Vec<(&'static str, Value)> {
        let map = self.to_map();
        SCALAR_KEYS
            .iter()
            .filter_map(|k| {
                map.get(*k)
                    .filter(|v| !is_empty_value(v))
                    .map(|v| (*k, v.clone()))
            })
            .collect()
    }
}

fn coerce_scalar(v: &Value) -> Value {
    match v {
        Value::Array(items) => items
            .iter()
            .find(|i| !is_empty_value(i))
            .cloned()
            .unwrap_or(Value::Null),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

fn coerce_string_list(v: &Value) -> Vec<Value> {
    let items: Vec<&Value> = match v {
        Value::Array(items) => items.iter().collect(),
        Value::Null => vec![],
        single => vec![single],
    };
    items
        .into_iter()
        .filter(|i| !is_empty_value(i))
        .map(|i| match i {
            Value::String(s) => Value::String(s.trim().to_string()),
            Value::Object(o) => Value::String(
                o.values()
                    .filter(|x| !is_empty_value(x))
                    .map(value_to_string)
                    .collect::<Vec<_>>()
                    .join(" - "),
            ),
            other => Value::String(value_to_string(other)),
        })
        .collect()
}

fn coerce_row_list(v: &Value) -> Vec<Value> {
    match v {
        Value::Array(items) => items.iter().filter(|i| !is_empty_value(i)).cloned().collect(),
        Value::Null => vec![],
        single if !is_empty_value(single) => vec![single.clone()],
        _ => vec![],
    }
}

/// Output of one page-image analysis call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageResult {
    /// 1-based page number in the source document
    #[serde(skip)]
    pub page_number: usize,
    #[serde(rename = "sayfa_metni")]
    pub page_text: String,
    #[serde(rename = "tespit_edilen_bilgiler")]
    pub fields: DocumentRecord,
}

impl PageResult {
    /// Lenient construction; a flat object is treated as the field set.
    pub fn from_value(page_number: usize, value: &Value) -> Self {
        let page_text = value
            .get("sayfa_metni")
            .map(value_to_string)
            .unwrap_or_default();
        let fields = match value.get("tespit_edilen_bilgiler") {
            Some(inner) => DocumentRecord::from_value(inner),
            None => {
                let mut flat = value.as_object().cloned().unwrap_or_default();
                flat.remove("sayfa_metni");
                DocumentRecord::from_value(&Value::Object(flat))
            }
        };
        Self {
            page_number,
            page_text,
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_maps_turkish_keys() {
        let r = DocumentRecord::from_value(&json!({
            "tam_metin": "metin",
            "ihale_basligi": "  Yemek Hizmeti  ",
            "kisi_sayisi": 850,
            "teknik_sartlar": ["Sıcak servis", "Sıcak servis"],
            "iletisim": {"telefon": "0312 000 00 00"},
            "bitis_tarihi": "31.12.2025"
        }));
        assert_eq!(r.full_text, "metin");
        assert_eq!(r.title, json!("Yemek Hizmeti"));
        assert_eq!(r.total_persons, json!(850));
        assert_eq!(r.technical_clauses.len(), 2);
        assert_eq!(r.contact["telefon"], json!("0312 000 00 00"));
        assert_eq!(r.extra["bitis_tarihi"], json!("31.12.2025"));
    }

    #[test]
    fn wrong_shapes_are_coerced() {
        let r = DocumentRecord::from_value(&json!({
            "notlar": "tek not",
            "birim_fiyatlar": {"kalem": "Ekmek"},
            "iletisim": "not an object",
            "ikn": ["", "2024/111"]
        }));
        assert_eq!(r.notes, vec!["tek not".to_string()]);
        assert_eq!(r.unit_prices.len(), 1);
        assert!(r.contact.is_empty());
        assert_eq!(r.registry_number, json!("2024/111"));
    }

    #[test]
    fn non_object_yields_default() {
        assert_eq!(DocumentRecord::from_value(&json!([1, 2])), DocumentRecord::default());
    }

    #[test]
    fn to_map_round_trips_through_from_value() {
        let r = DocumentRecord::from_value(&json!({"kurum": "Belediye", "gramaj": [1]}));
        let back = DocumentRecord::from_value(&Value::Object(r.to_map()));
        assert_eq!(back, r);
        assert!(r.get("gramaj").is_some());
    }

    #[test]
    fn blank_record_ignores_full_text() {
        assert!(DocumentRecord::with_text("only text").is_blank());
        let r = DocumentRecord::from_value(&json!({"sure": "365 gün"}));
        assert!(!r.is_blank());
    }

    #[test]
    fn sentinel_counts_as_unset() {
        assert!(is_unset_value(&json!("Belirtilmemiş")));
        assert!(is_unset_value(&json!("  ")));
        assert!(!is_unset_value(&json!(0)));
    }

    #[test]
    fn page_result_accepts_nested_and_flat() {
        let nested = PageResult::from_value(
            2,
            &json!({"sayfa_metni": "s2", "tespit_edilen_bilgiler": {"kurum": "A"}}),
        );
        assert_eq!(nested.page_text, "s2");
        assert_eq!(nested.fields.institution, json!("A"));

        let flat = PageResult::from_value(3, &json!({"sayfa_metni": "s3", "kurum": "B"}));
        assert_eq!(flat.fields.institution, json!("B"));
        assert!(flat.fields.extra.is_empty());
    }

    #[test]
    fn scalars_lists_only_present_fields() {
        let r = DocumentRecord::from_value(&json!({"ikn": "2024/1", "kurum": ""}));
        let keys: Vec<_> = r.scalars().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ikn"]);
    }
}
