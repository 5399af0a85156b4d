use serde::Serialize;
use serde_json::{Map, Value};

use crate::pipeline::record::is_empty_value;

/// Caller-facing analysis layout.
///
/// Absent scalars serialize as `null`, absent lists as `[]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TenderAnalysis {
    pub summary: Summary,
    pub dates: Dates,
    pub financial: Financial,
    pub catering: Catering,
    pub personnel: Personnel,
    pub technical: Technical,
    pub contact: Map<String, Value>,
    pub notes: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub title: Value,
    pub institution: Value,
    pub ikn: Value,
    pub estimated_value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dates {
    pub start_date: Value,
    pub end_date: Value,
    pub tender_date: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Financial {
    pub estimated_value: Value,
    pub guarantee_rate: Value,
    pub guarantee_rates: Map<String, Value>,
    pub criteria: Map<String, Value>,
    pub price_adjustment: Map<String, Value>,
    pub unit_prices: Vec<Value>,
    pub penalties: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catering {
    pub total_persons: Value,
    pub daily_meals: Value,
    pub contract_duration: Value,
    pub meal_types: Value,
    pub sample_menus: Vec<Value>,
    pub gramaj: Value,
    pub breakfast_persons: Value,
    pub lunch_persons: Value,
    pub dinner_persons: Value,
    pub diet_persons: Value,
    pub service_days: Value,
    pub kitchen_type: Value,
    pub service_type: Value,
    pub labor_rate: Value,
    pub delivery_hours: Value,
    pub equipment_list: Value,
    pub material_list: Value,
    pub service_hours: Map<String, Value>,
    pub meal_info: Vec<Value>,
    pub worksites: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Personnel {
    pub total_count: Value,
    pub staff: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Technical {
    pub requirements: Value,
    pub required_documents: Vec<Value>,
    pub margin_coefficient: Value,
    pub similar_work: Value,
}

impl TenderAnalysis {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Look up a dotted path such as `dates.end_date`.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let pointer = format!("/{}", path.replace('.', "/"));
        self.to_value().pointer(&pointer).cloned()
    }

    /// Present means the path exists and is non-empty.
    pub fn has(&self, path: &str) -> bool {
        self.lookup(path).map(|v| !is_empty_value(&v)).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_dotted_paths() {
        let mut a = TenderAnalysis::default();
        a.dates.end_date = json!("31.12.2025");
        a.financial.criteria.insert("cari_oran".into(), json!("0.75"));
        assert_eq!(a.lookup("dates.end_date"), Some(json!("31.12.2025")));
        assert_eq!(a.lookup("financial.criteria.cari_oran"), Some(json!("0.75")));
        assert!(a.has("dates.end_date"));
        assert!(!a.has("dates.start_date"));
        assert!(!a.has("no.such.path"));
    }

    #[test]
    fn default_serializes_nulls_and_empty_lists() {
        let v = TenderAnalysis::default().to_value();
        assert_eq!(v["summary"]["title"], Value::Null);
        assert_eq!(v["catering"]["sample_menus"], json!([]));
    }
}
