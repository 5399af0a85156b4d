//! Dual-source merge of the Structured Extractor's confidence-scored
//! fields with the Generative Analyzer's record.
//!
//! Composites (contact, guarantee rates, service hours, financial
//! criteria) prefer the generative value. Top-level scalars prefer the
//! structured value when it passes the confidence gate. Disagreements are
//! kept as conflicts.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use super::analysis::{Catering, Dates, Financial, Personnel, Summary, Technical, TenderAnalysis};
use super::conflict::{conflict_between, Conflict, ConflictValue};
use super::table::{detect_table_type, extract_gramaj, extract_personnel, Table, TableType};
use crate::pipeline::analysis::StructuredResult;
use crate::pipeline::record::{is_empty_value, is_unset_value, value_to_string, DocumentRecord};

/// Default structured-field confidence gate (inclusive).
pub const MIN_MERGE_CONFIDENCE: f64 = 0.4;

/// Confidence attached to generative values in conflict entries.
const GENERATIVE_CONFIDENCE: f64 = 1.0;
const GENERATIVE_SOURCE: &str = "generative";

// ──────────────────────────────────────────────
// Structured field aliases
// ──────────────────────────────────────────────

const TITLE: &[&str] = &["ihale_baslik", "ihale_konusu", "title"];
const INSTITUTION: &[&str] = &["kurum_adi", "idare", "idare_adi", "institution"];
const INSTITUTION_PREBUILT: &[&str] = &["VendorName", "CustomerName"];
const IKN: &[&str] = &["ihale_kayit_no", "ikn", "ihale_kayit_numarasi"];
const ESTIMATED_VALUE: &[&str] = &["tahmini_bedel", "yaklasik_maliyet", "estimated_value"];
const ESTIMATED_VALUE_PREBUILT: &[&str] = &["InvoiceTotal", "toplam_tutar"];
const ADDRESS_PREBUILT: &[&str] = &["VendorAddressRecipient", "VendorAddress"];
const START_DATE: &[&str] = &["ise_baslama_tarihi", "baslangic_tarihi", "is_baslangic", "start_date"];
const END_DATE: &[&str] = &["is_bitis_tarihi", "bitis_tarihi", "is_bitis", "end_date"];
const TENDER_DATE: &[&str] = &["ihale_tarihi", "tender_date"];
const GUARANTEE_RATE: &[&str] = &["teminat_orani", "gecici_teminat"];
const TOTAL_PERSONS: &[&str] = &["kisi_sayisi", "toplam_kisi", "total_persons"];
const DAILY_MEALS: &[&str] = &["gunluk_toplam_ogun", "gunluk_ogun", "ogun_sayisi", "daily_meals"];
const CONTRACT_DURATION: &[&str] = &["sozlesme_suresi", "sure"];
const MEAL_TYPES: &[&str] = &["ogun_turleri", "meal_types"];
const GRAMAJ: &[&str] = &["gramaj_listesi", "gramaj", "gramaj_tablosu"];
const STAFF_TOTAL: &[&str] = &["toplam_personel_sayisi", "personel_sayisi", "toplam_personel"];
const STAFF_LIST: &[&str] = &["personel_listesi", "personel", "personel_tablosu"];
const REQUIREMENTS: &[&str] = &["teknik_sartlar"];
const PENALTIES: &[&str] = &["ceza_kosullari", "cezalar"];
const NOTES: &[&str] = &["onemli_notlar", "notlar"];
const MARGIN: &[&str] = &["sinir_deger_katsayisi"];

/// (output slot, structured aliases) for composites built from loose fields.
const CONTACT_SLOTS: &[(&str, &[&str])] = &[
    ("adres", &["adres", "idare_adres"]),
    ("telefon", &["telefon", "idare_telefon"]),
    ("email", &["email", "idare_email"]),
    ("yetkili", &["yetkili", "yetkili_kisi"]),
];
const GUARANTEE_SLOTS: &[(&str, &[&str])] = &[
    ("gecici", &["gecici_teminat", "gecici_teminat_orani"]),
    ("kesin", &["kesin_teminat", "kesin_teminat_orani"]),
];
const SERVICE_HOUR_SLOTS: &[(&str, &[&str])] = &[
    ("kahvalti", &["kahvalti_saati"]),
    ("ogle", &["ogle_saati"]),
    ("aksam", &["aksam_saati"]),
];
const CRITERIA_SLOTS: &[(&str, &[&str])] = &[
    ("is_deneyimi", &["is_deneyimi", "is_deneyim_orani"]),
    ("ozkaynak_orani", &["ozkaynak_orani"]),
    ("cari_oran", &["cari_oran"]),
];

/// (catering slot, structured key, generative extra key)
const CATERING_EXTRAS: &[(&str, &str, &str)] = &[
    ("service_days", "hizmet_gun_sayisi", "hizmet_gun_sayisi"),
    ("kitchen_type", "mutfak_tipi", "mutfak_tipi"),
    ("service_type", "servis_tipi", "servis_tipi"),
    ("labor_rate", "iscilik_orani", "iscilik_orani"),
    ("equipment_list", "ekipman_listesi", "ekipman_listesi"),
    ("material_list", "malzeme_listesi", "malzeme_listesi"),
];

/// Result of the dual-source merge.
#[derive(Debug, Clone, Default)]
pub struct DualSourceMerge {
    pub analysis: TenderAnalysis,
    pub conflicts: Vec<Conflict>,
}

/// A structured value with its provenance.
#[derive(Debug, Clone)]
struct Sourced {
    value: Value,
    confidence: f64,
    source: String,
}

struct Merger<'a> {
    structured: Option<&'a StructuredResult>,
    min_confidence: f64,
    conflicts: Vec<Conflict>,
}

impl<'a> Merger<'a> {
    /// First alias passing the gate.
    fn pick(&self, aliases: &[&str]) -> Option<Sourced> {
        let s = self.structured?;
        s.first_gated(aliases, self.min_confidence)
            .map(|(key, field)| Sourced {
                value: field.value.clone(),
                confidence: field.confidence,
                source: format!("structured:{key}"),
            })
    }

    /// Structured value when gated-present, else generative, else null.
    fn resolve(&mut self, path: &str, picked: Option<Sourced>, generative: Value) -> Value {
        let generative = if is_unset_value(&generative) {
            Value::Null
        } else {
            generative
        };
        match picked {
            Some(s) => {
                if !generative.is_null() {
                    self.record_conflict(path, &s, &generative);
                }
                s.value
            }
            None => generative,
        }
    }

    fn scalar(&mut self, path: &str, aliases: &[&str], generative: Value) -> Value {
        let picked = self.pick(aliases);
        self.resolve(path, picked, generative)
    }

    /// List-like field: structured when gated-present, else generative, else `[]`.
    fn list(&self, aliases: &[&str], generative: Value) -> Value {
        match self.pick(aliases) {
            Some(s) => s.value,
            None if !is_empty_value(&generative) => generative,
            None => json!([]),
        }
    }

    /// Structured side of a composite: its own object field when present,
    /// else assembled slot by slot from loose aliases.
    fn structured_composite(&self, object_key: &str, slots: &[(&str, &[&str])]) -> Vec<(String, Option<Sourced>)> {
        if let Some(obj) = self.pick(&[object_key]).filter(|s| s.value.is_object()) {
            return obj
                .value
                .as_object()
                .into_iter()
                .flatten()
                .map(|(k, v)| {
                    let entry = (!is_unset_value(v)).then(|| Sourced {
                        value: v.clone(),
                        confidence: obj.confidence,
                        source: obj.source.clone(),
                    });
                    (k.clone(), entry)
                })
                .collect();
        }
        slots
            .iter()
            .map(|(slot, aliases)| (slot.to_string(), self.pick(aliases)))
            .collect()
    }

    /// Generative value wins unless empty or the unset sentinel.
    fn composite(
        &mut self,
        path: &str,
        structured: Vec<(String, Option<Sourced>)>,
        generative: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut keys: Vec<String> = structured.iter().map(|(k, _)| k.clone()).collect();
        for k in generative.keys() {
            if !keys.contains(k) {
                keys.push(k.clone());
            }
        }

        let mut out = Map::new();
        for key in keys {
            let gen = generative.get(&key).cloned().unwrap_or(Value::Null);
            let st = structured
                .iter()
                .find(|(k, _)| *k == key)
                .and_then(|(_, s)| s.clone());

            let value = if !is_unset_value(&gen) {
                if let Some(s) = st.as_ref().filter(|s| !is_unset_value(&s.value)) {
                    self.record_conflict(&format!("{path}.{key}"), s, &gen);
                }
                gen
            } else if let Some(s) = st.filter(|s| !is_unset_value(&s.value)) {
                s.value
            } else {
                Value::String(String::new())
            };
            out.insert(key, value);
        }
        out
    }

    fn record_conflict(&mut self, path: &str, structured: &Sourced, generative: &Value) {
        let a = ConflictValue::new(structured.value.clone(), structured.source.clone(), structured.confidence);
        let b = ConflictValue::new(generative.clone(), GENERATIVE_SOURCE, GENERATIVE_CONFIDENCE);
        if let Some(conflict) = conflict_between(path, a, b) {
            tracing::debug!(field = path, kind = ?conflict.conflict_type, "Dual-source disagreement");
            self.conflicts.push(conflict);
        }
    }
}

fn service_hours_re() -> &'static [(&'static str, Regex); 3] {
    static RES: OnceLock<[(&'static str, Regex); 3]> = OnceLock::new();
    RES.get_or_init(|| {
        let build = |p: &str| Regex::new(p).unwrap_or_else(|e| panic!("invalid service hours regex: {e}"));
        [
            ("kahvalti", build(r"kahvalt[ıi][:\s]*(\d{1,2}[:.]\d{2}[\s\-–]*\d{1,2}[:.]\d{2})")),
            ("ogle", build(r"[öo]ğle[:\s]*(\d{1,2}[:.]\d{2}[\s\-–]*\d{1,2}[:.]\d{2})")),
            ("aksam", build(r"akşam[:\s]*(\d{1,2}[:.]\d{2}[\s\-–]*\d{1,2}[:.]\d{2})")),
        ]
    })
}

/// Split a free-text distribution-hours field into meal slots.
///
/// `"Kahvaltı 07:00-08:30, öğle 12:00-13:00"` yields `kahvalti` and `ogle`.
pub fn parse_service_hours(text: &str) -> Map<String, Value> {
    let lower = text.to_lowercase();
    service_hours_re()
        .iter()
        .filter_map(|(slot, re)| {
            re.captures(&lower)
                .and_then(|c| c.get(1))
                .map(|m| (slot.to_string(), Value::String(m.as_str().to_string())))
        })
        .collect()
}

/// Persons per meal from generative meal-info rows.
fn persons_for_meal(rows: &[Value], needles: &[&str]) -> Value {
    rows.iter()
        .find(|row| {
            let meal = row.get("ogun").map(value_to_string).unwrap_or_default().to_lowercase();
            needles.iter().any(|n| meal.contains(n))
        })
        .and_then(|row| row.get("kisi_sayisi"))
        .filter(|v| !is_empty_value(v))
        .cloned()
        .unwrap_or(Value::Null)
}

fn extra(record: &DocumentRecord, keys: &[&str]) -> Value {
    keys.iter()
        .filter_map(|k| record.extra.get(*k))
        .find(|v| !is_unset_value(v))
        .cloned()
        .unwrap_or(Value::Null)
}

fn non_empty_or(v: Value, fallback: impl FnOnce() -> Value) -> Value {
    if is_empty_value(&v) {
        fallback()
    } else {
        v
    }
}

/// Merge a generative record with an optional structured result.
///
/// Without a structured result this is a plain reshaping of the record.
pub fn merge_dual_source(
    structured: Option<&StructuredResult>,
    record: &DocumentRecord,
    min_confidence: f64,
) -> DualSourceMerge {
    if let Some(s) = structured {
        let dropped = s.dropped(min_confidence);
        if !dropped.is_empty() {
            let fields = dropped
                .iter()
                .map(|(k, c)| format!("{k}({:.0}%)", c * 100.0))
                .collect::<Vec<_>>()
                .join(", ");
            tracing::info!(
                count = dropped.len(),
                threshold = min_confidence,
                dropped_fields = %fields,
                "Structured fields below merge confidence dropped"
            );
        }
    }

    let mut m = Merger {
        structured,
        min_confidence,
        conflicts: Vec::new(),
    };

    // Tables
    let tables: &[Table] = structured.map(|s| s.tables.as_slice()).unwrap_or_default();
    let mut menus: Vec<&Table> = Vec::new();
    let mut gramaj_tables: Vec<&Table> = Vec::new();
    let mut personnel_tables: Vec<&Table> = Vec::new();
    for table in tables {
        match detect_table_type(table) {
            TableType::Menu => menus.push(table),
            TableType::Gramaj => gramaj_tables.push(table),
            TableType::Personnel => personnel_tables.push(table),
            TableType::Unknown => {}
        }
    }

    // Composites
    let mut contact_src = m.structured_composite("iletisim", CONTACT_SLOTS);
    if let Some((_, slot @ None)) = contact_src.iter_mut().find(|(k, _)| k == "adres") {
        *slot = m.pick(ADDRESS_PREBUILT);
    }
    let contact = m.composite("contact", contact_src, &record.contact);

    let guarantee_src = m.structured_composite("teminat_oranlari", GUARANTEE_SLOTS);
    let guarantee_rates = m.composite("financial.guarantee_rates", guarantee_src, &record.guarantee_rates);

    let mut hours_src = m.structured_composite("servis_saatleri", SERVICE_HOUR_SLOTS);
    if let Some(dist) = m.pick(&["dagitim_saatleri"]) {
        let parsed = parse_service_hours(&value_to_string(&dist.value));
        for (slot, entry) in hours_src.iter_mut() {
            if entry.is_none() {
                *entry = parsed.get(slot).map(|v| Sourced {
                    value: v.clone(),
                    confidence: dist.confidence,
                    source: dist.source.clone(),
                });
            }
        }
    }
    let service_hours = m.composite("catering.service_hours", hours_src, &record.service_hours);

    let criteria_src = m.structured_composite("mali_kriterler", CRITERIA_SLOTS);
    let criteria = m.composite("financial.criteria", criteria_src, &record.financial_criteria);

    // Summary and dates
    let title = m.scalar("summary.title", TITLE, record.title.clone());
    let institution_pick = m.pick(INSTITUTION).or_else(|| m.pick(INSTITUTION_PREBUILT));
    let institution = m.resolve("summary.institution", institution_pick, record.institution.clone());
    let ikn = m.scalar("summary.ikn", IKN, record.registry_number.clone());

    let estimated_pick = m.pick(ESTIMATED_VALUE).or_else(|| m.pick(ESTIMATED_VALUE_PREBUILT));
    let generative_value = non_empty_or(record.amount.clone(), || extra(record, &["tahmini_bedel"]));
    let estimated_value = m.resolve("financial.estimated_value", estimated_pick, generative_value);

    let dates = Dates {
        start_date: m.scalar("dates.start_date", START_DATE, extra(record, &["ise_baslama_tarihi"])),
        end_date: m.scalar("dates.end_date", END_DATE, extra(record, &["is_bitis_tarihi", "bitis_tarihi"])),
        tender_date: m.scalar("dates.tender_date", TENDER_DATE, record.date.clone()),
    };

    let generative_guarantee = non_empty_or(extra(record, &["teminat_orani"]), || {
        record.guarantee_rates.get("gecici").cloned().unwrap_or(Value::Null)
    });
    let financial = Financial {
        estimated_value: estimated_value.clone(),
        guarantee_rate: m.scalar("financial.guarantee_rate", GUARANTEE_RATE, generative_guarantee),
        guarantee_rates,
        criteria,
        price_adjustment: record.price_adjustment.clone(),
        unit_prices: record.unit_prices.clone(),
        penalties: m.list(PENALTIES, Value::Array(record.penalties.clone())),
    };

    // Catering
    let meal_rows = &record.meal_info;
    let generative_meal_types = non_empty_or(extra(record, &["ogun_turleri"]), || {
        let types: Vec<Value> = meal_rows
            .iter()
            .filter_map(|r| r.get("ogun"))
            .filter(|v| !is_empty_value(v))
            .cloned()
            .collect();
        Value::Array(types)
    });

    let sample_menus: Vec<Value> = if menus.is_empty() {
        extra(record, &["ornek_menuler"])
            .as_array()
            .cloned()
            .unwrap_or_default()
    } else {
        menus
            .iter()
            .filter_map(|t| serde_json::to_value(t).ok())
            .collect()
    };

    let gramaj = match m.pick(GRAMAJ) {
        Some(s) => s.value,
        None => {
            let from_tables = extract_gramaj(&gramaj_tables);
            if from_tables.is_empty() {
                m.list(&[], extra(record, &["gramaj"]))
            } else {
                Value::Array(from_tables)
            }
        }
    };

    let breakfast = non_empty_or(extra(record, &["kahvalti_kisi_sayisi"]), || {
        persons_for_meal(meal_rows, &["kahvalt"])
    });
    let lunch = non_empty_or(extra(record, &["ogle_kisi_sayisi"]), || {
        persons_for_meal(meal_rows, &["öğle", "ogle"])
    });
    let dinner = non_empty_or(extra(record, &["aksam_kisi_sayisi"]), || {
        persons_for_meal(meal_rows, &["akşam", "aksam"])
    });
    let diet = non_empty_or(extra(record, &["diyet_kisi_sayisi"]), || {
        persons_for_meal(meal_rows, &["diyet"])
    });

    let mut catering = Catering {
        total_persons: m.scalar("catering.total_persons", TOTAL_PERSONS, record.total_persons.clone()),
        daily_meals: m.scalar("catering.daily_meals", DAILY_MEALS, record.daily_meals.clone()),
        contract_duration: m.scalar("catering.contract_duration", CONTRACT_DURATION, record.duration.clone()),
        meal_types: m.list(MEAL_TYPES, generative_meal_types),
        sample_menus,
        gramaj,
        breakfast_persons: m.scalar("catering.breakfast_persons", &["kahvalti_kisi_sayisi"], breakfast),
        lunch_persons: m.scalar("catering.lunch_persons", &["ogle_kisi_sayisi"], lunch),
        dinner_persons: m.scalar("catering.dinner_persons", &["aksam_kisi_sayisi"], dinner),
        diet_persons: m.scalar("catering.diet_persons", &["diyet_kisi_sayisi"], diet),
        service_hours,
        meal_info: record.meal_info.clone(),
        worksites: record.worksites.clone(),
        ..Catering::default()
    };

    for (slot, structured_key, extra_key) in CATERING_EXTRAS {
        let value = m.scalar(&format!("catering.{slot}"), &[*structured_key], extra(record, &[*extra_key]));
        match *slot {
            "service_days" => catering.service_days = value,
            "kitchen_type" => catering.kitchen_type = value,
            "service_type" => catering.service_type = value,
            "labor_rate" => catering.labor_rate = value,
            "equipment_list" => catering.equipment_list = value,
            "material_list" => catering.material_list = value,
            _ => {}
        }
    }

    let generative_delivery = non_empty_or(extra(record, &["dagitim_saatleri"]), || {
        let filled: Map<String, Value> = catering
            .service_hours
            .iter()
            .filter(|(_, v)| !is_unset_value(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(filled)
    });
    catering.delivery_hours = m.scalar("catering.delivery_hours", &["dagitim_saatleri"], generative_delivery);

    // Personnel
    let generative_staff = if record.staffing.is_empty() {
        Value::Array(extract_personnel(&personnel_tables))
    } else {
        Value::Array(record.staffing.clone())
    };
    let generative_total = non_empty_or(extra(record, &["toplam_personel_sayisi"]), || {
        staff_total(&record.staffing)
    });
    let personnel = Personnel {
        total_count: m.scalar("personnel.total_count", STAFF_TOTAL, generative_total),
        staff: m.list(STAFF_LIST, generative_staff),
    };

    let technical = Technical {
        requirements: m.list(REQUIREMENTS, json!(record.technical_clauses)),
        required_documents: record.required_documents.clone(),
        margin_coefficient: m.scalar("technical.margin_coefficient", MARGIN, record.margin_coefficient.clone()),
        similar_work: m.scalar("technical.similar_work", &["benzer_is_tanimi"], record.similar_work.clone()),
    };

    let notes = m.list(NOTES, json!(record.notes));

    let analysis = TenderAnalysis {
        summary: Summary {
            title,
            institution,
            ikn,
            estimated_value,
        },
        dates,
        financial,
        catering,
        personnel,
        technical,
        contact,
        notes,
    };

    DualSourceMerge {
        analysis,
        conflicts: m.conflicts,
    }
}

/// Sum of numeric `adet` values across staff rows; null when none parse.
fn staff_total(rows: &[Value]) -> Value {
    let counts: Vec<u64> = rows
        .iter()
        .filter_map(|r| r.get("adet"))
        .filter_map(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect();
    if counts.is_empty() {
        Value::Null
    } else {
        json!(counts.iter().sum::<u64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analysis::StructuredResult;

    fn structured(fields: Value) -> StructuredResult {
        StructuredResult::from_raw(fields.as_object().unwrap(), vec![])
    }

    fn record(v: Value) -> DocumentRecord {
        DocumentRecord::from_value(&v)
    }

    #[test]
    fn generative_only_reshapes_record() {
        let r = record(json!({
            "ihale_basligi": "Yemek Hizmeti",
            "kurum": "Belediye",
            "ikn": "2025/123",
            "bedel": "1.000.000 TL",
            "tarih": "10.01.2025",
            "ise_baslama_tarihi": "01.02.2025",
            "kisi_sayisi": 500,
            "teknik_sartlar": ["Sıcak servis"],
            "personel_detaylari": [{"pozisyon": "Aşçı", "adet": 2}, {"pozisyon": "Garson", "adet": "3"}]
        }));
        let out = merge_dual_source(None, &r, MIN_MERGE_CONFIDENCE);
        let a = out.analysis;
        assert_eq!(a.summary.title, json!("Yemek Hizmeti"));
        assert_eq!(a.summary.estimated_value, json!("1.000.000 TL"));
        assert_eq!(a.financial.estimated_value, a.summary.estimated_value);
        assert_eq!(a.dates.start_date, json!("01.02.2025"));
        assert_eq!(a.dates.tender_date, json!("10.01.2025"));
        assert_eq!(a.catering.total_persons, json!(500));
        assert_eq!(a.personnel.total_count, json!(5));
        assert_eq!(a.technical.requirements, json!(["Sıcak servis"]));
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn confident_structured_scalar_wins_and_disagreement_is_conflict() {
        let s = structured(json!({"is_bitis_tarihi": {"value": "31.12.2025", "confidence": 0.9}}));
        let r = record(json!({"is_bitis_tarihi": "30.06.2025"}));
        let out = merge_dual_source(Some(&s), &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.dates.end_date, json!("31.12.2025"));
        assert_eq!(r.extra["is_bitis_tarihi"], json!("30.06.2025"));
        let c = out.conflicts.iter().find(|c| c.field == "dates.end_date").unwrap();
        assert_eq!(c.values.len(), 2);
        assert!(c.needs_review);
    }

    #[test]
    fn gate_threshold_is_inclusive() {
        let at = structured(json!({"ikn": {"value": "2025/1", "confidence": 0.4}}));
        let below = structured(json!({"ikn": {"value": "2025/1", "confidence": 0.39}}));
        let r = DocumentRecord::default();
        assert_eq!(merge_dual_source(Some(&at), &r, 0.4).analysis.summary.ikn, json!("2025/1"));
        assert_eq!(merge_dual_source(Some(&below), &r, 0.4).analysis.summary.ikn, Value::Null);
    }

    #[test]
    fn gated_out_composite_key_on_both_sides_is_empty_without_conflict() {
        let s = structured(json!({"cari_oran": {"value": "0.75", "confidence": 0.3}}));
        let r = record(json!({"mali_kriterler": {"cari_oran": ""}}));
        let out = merge_dual_source(Some(&s), &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.financial.criteria["cari_oran"], json!(""));
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn composite_prefers_generative_and_falls_back_on_sentinel() {
        let s = structured(json!({
            "telefon": {"value": "0312 111", "confidence": 0.9},
            "email": {"value": "idare@gov.tr", "confidence": 0.9}
        }));
        let r = record(json!({"iletisim": {"telefon": "0312 222", "email": "Belirtilmemiş"}}));
        let out = merge_dual_source(Some(&s), &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.contact["telefon"], json!("0312 222"));
        assert_eq!(out.analysis.contact["email"], json!("idare@gov.tr"));
        assert!(out.conflicts.iter().any(|c| c.field == "contact.telefon"));
    }

    #[test]
    fn prebuilt_fields_fill_institution_and_address() {
        let s = structured(json!({
            "VendorName": {"value": "Hastane", "confidence": 0.8},
            "VendorAddress": {"value": "Ankara", "confidence": 0.8}
        }));
        let out = merge_dual_source(Some(&s), &DocumentRecord::default(), MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.summary.institution, json!("Hastane"));
        assert_eq!(out.analysis.contact["adres"], json!("Ankara"));
    }

    #[test]
    fn service_hours_synthesized_from_distribution_text() {
        let s = structured(json!({
            "dagitim_saatleri": {"value": "Kahvaltı 07:00-08:30, Öğle: 12.00 - 13.00, akşam 18:00-19:00", "confidence": 0.7}
        }));
        let out = merge_dual_source(Some(&s), &DocumentRecord::default(), MIN_MERGE_CONFIDENCE);
        let hours = &out.analysis.catering.service_hours;
        assert_eq!(hours["kahvalti"], json!("07:00-08:30"));
        assert_eq!(hours["ogle"], json!("12.00 - 13.00"));
        assert_eq!(hours["aksam"], json!("18:00-19:00"));
    }

    #[test]
    fn parse_service_hours_ignores_missing_slots() {
        let parsed = parse_service_hours("öğle 12:00-13:00");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["ogle"], json!("12:00-13:00"));
    }

    #[test]
    fn tables_feed_menus_gramaj_and_staff() {
        let tables = vec![
            Table::RowArray {
                headers: vec!["Gün".into(), "Menü".into()],
                rows: vec![vec!["Pazartesi".into(), "Mercimek".into()]],
            },
            Table::RowArray {
                headers: vec!["Malzeme".into(), "Gram".into()],
                rows: vec![vec!["Pirinç".into(), "80".into()]],
            },
            Table::RowArray {
                headers: vec!["Personel".into(), "Sayı".into()],
                rows: vec![vec!["Aşçı".into(), "3".into()]],
            },
        ];
        let s = StructuredResult::from_raw(&Map::new(), tables);
        let out = merge_dual_source(Some(&s), &DocumentRecord::default(), MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.catering.sample_menus.len(), 1);
        assert_eq!(out.analysis.catering.gramaj, json!([{"item": "Pirinç", "weight": "80", "unit": "g"}]));
        assert_eq!(out.analysis.personnel.staff, json!([{"pozisyon": "Aşçı", "adet": 3}]));
    }

    #[test]
    fn meal_rows_give_per_meal_persons() {
        let r = record(json!({"ogun_bilgileri": [
            {"ogun": "Kahvaltı", "kisi_sayisi": "300"},
            {"ogun": "Öğle Yemeği", "kisi_sayisi": "450"}
        ]}));
        let out = merge_dual_source(None, &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.catering.breakfast_persons, json!("300"));
        assert_eq!(out.analysis.catering.lunch_persons, json!("450"));
        assert_eq!(out.analysis.catering.dinner_persons, Value::Null);
        assert_eq!(out.analysis.catering.meal_types, json!(["Kahvaltı", "Öğle Yemeği"]));
    }

    #[test]
    fn unset_sentinel_on_both_sides_of_a_composite_is_empty() {
        let r = record(json!({
            "servis_saatleri": {"kahvalti": "Belirtilmemiş"},
            "mali_kriterler": {"cari_oran": "Belirtilmemiş"}
        }));
        let out = merge_dual_source(None, &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.financial.criteria["cari_oran"], json!(""));
        assert_eq!(out.analysis.catering.service_hours["kahvalti"], json!(""));
        assert!(is_empty_value(&out.analysis.catering.delivery_hours));

        let score = crate::pipeline::completeness::score_completeness(&out.analysis);
        assert_eq!(score.score, 0);
        assert!(!score.found_fields.iter().any(|f| f == "catering.delivery_hours"));
    }

    #[test]
    fn unset_structured_scalar_does_not_override_generative() {
        let s = structured(json!({"is_bitis_tarihi": {"value": "Belirtilmemiş", "confidence": 0.95}}));
        let r = record(json!({"is_bitis_tarihi": "30.06.2025"}));
        let out = merge_dual_source(Some(&s), &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.dates.end_date, json!("30.06.2025"));
        assert!(out.conflicts.is_empty());
    }

    #[test]
    fn unset_sentinel_scalar_becomes_null() {
        let r = record(json!({"sure": "Belirtilmemiş"}));
        let out = merge_dual_source(None, &r, MIN_MERGE_CONFIDENCE);
        assert_eq!(out.analysis.catering.contract_duration, Value::Null);
    }
}
