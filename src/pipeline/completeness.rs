use serde::Serialize;

use crate::pipeline::merge::TenderAnalysis;

pub const COMPLETENESS_VERSION: &str = "completeness-v2";

/// (field path, weight). Core fields total 70.
const CORE_FIELDS: &[(&str, u32)] = &[
    ("summary.title", 5),
    ("summary.institution", 5),
    ("summary.ikn", 5),
    ("catering.total_persons", 8),
    ("catering.daily_meals", 7),
    ("catering.sample_menus", 10),
    ("catering.gramaj", 10),
    ("personnel.staff", 10),
    ("dates.start_date", 5),
    ("dates.end_date", 5),
];

/// Catering-specific bonus fields, totalling 30.
const BONUS_FIELDS: &[(&str, u32)] = &[
    ("catering.breakfast_persons", 4),
    ("catering.lunch_persons", 4),
    ("catering.dinner_persons", 4),
    ("catering.kitchen_type", 4),
    ("catering.delivery_hours", 4),
    ("catering.labor_rate", 4),
    ("catering.equipment_list", 3),
    ("catering.material_list", 3),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessScore {
    pub score: u32,
    pub core_score: u32,
    pub bonus_score: u32,
    pub missing_fields: Vec<String>,
    pub found_fields: Vec<String>,
    pub version: &'static str,
}

/// Weighted checklist coverage; no partial credit inside composites.
pub fn score_completeness(analysis: &TenderAnalysis) -> CompletenessScore {
    let mut missing_fields = Vec::new();
    let mut found_fields = Vec::new();

    let mut tally = |fields: &[(&str, u32)]| -> u32 {
        let mut sum = 0;
        for (path, weight) in fields {
            if analysis.has(path) {
                sum += weight;
                found_fields.push(path.to_string());
            } else {
                missing_fields.push(path.to_string());
            }
        }
        sum
    };

    let core_score = tally(CORE_FIELDS);
    let bonus_score = tally(BONUS_FIELDS);

    CompletenessScore {
        score: (core_score + bonus_score).min(100),
        core_score,
        bonus_score,
        missing_fields,
        found_fields,
        version: COMPLETENESS_VERSION,
    }
}
