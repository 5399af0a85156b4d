//! Merging partial records: pages into a document, documents of an
//! archive into one record, and page enrichment of a text-layer result.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::pipeline::record::{is_empty_value, value_to_string, DocumentRecord, PageResult};

const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";
const VISUAL_APPENDIX: &str = "\n\n--- Görsel Analiz Ekleri ---\n\n";

/// Merge page results in page order.
///
/// Scalars: first non-empty wins. String lists: set union in first-seen
/// order. Row lists: concatenated, content-identical rows dropped.
/// Objects: first non-empty per key. Page transcripts become the full text.
pub fn merge_page_results(pages: &[PageResult]) -> DocumentRecord {
    let mut merged = merge_fields(pages.iter().map(|p| &p.fields));
    merged.full_text = pages
        .iter()
        .map(|p| p.page_text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    merged
}

/// Merge per-document records of an archive with the same field rules.
pub fn merge_document_records(records: &[DocumentRecord]) -> DocumentRecord {
    let mut merged = merge_fields(records.iter());
    merged.full_text = records
        .iter()
        .map(|r| r.full_text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR);
    merged
}

fn merge_fields<'a>(records: impl Iterator<Item = &'a DocumentRecord>) -> DocumentRecord {
    let mut out = DocumentRecord::default();
    for r in records {
        fill_scalar(&mut out.title, &r.title);
        fill_scalar(&mut out.institution, &r.institution);
        fill_scalar(&mut out.date, &r.date);
        fill_scalar(&mut out.amount, &r.amount);
        fill_scalar(&mut out.duration, &r.duration);
        fill_scalar(&mut out.registry_number, &r.registry_number);
        fill_scalar(&mut out.daily_meals, &r.daily_meals);
        fill_scalar(&mut out.total_persons, &r.total_persons);
        fill_scalar(&mut out.margin_coefficient, &r.margin_coefficient);
        fill_scalar(&mut out.similar_work, &r.similar_work);

        union_strings(&mut out.technical_clauses, &r.technical_clauses);
        union_strings(&mut out.notes, &r.notes);
        union_strings(&mut out.worksites, &r.worksites);

        append_rows(&mut out.unit_prices, &r.unit_prices);
        append_rows(&mut out.staffing, &r.staffing);
        append_rows(&mut out.meal_info, &r.meal_info);
        append_rows(&mut out.penalties, &r.penalties);
        append_rows(&mut out.required_documents, &r.required_documents);

        fill_keys(&mut out.contact, &r.contact);
        fill_keys(&mut out.financial_criteria, &r.financial_criteria);
        fill_keys(&mut out.price_adjustment, &r.price_adjustment);
        fill_keys(&mut out.guarantee_rates, &r.guarantee_rates);
        fill_keys(&mut out.service_hours, &r.service_hours);
        fill_keys(&mut out.extra, &r.extra);
    }
    out
}

fn fill_scalar(target: &mut Value, candidate: &Value) {
    if is_empty_value(target) && !is_empty_value(candidate) {
        *target = candidate.clone();
    }
}

fn union_strings(target: &mut Vec<String>, incoming: &[String]) {
    for s in incoming {
        if !s.trim().is_empty() && !target.contains(s) {
            target.push(s.clone());
        }
    }
}

fn append_rows(target: &mut Vec<Value>, incoming: &[Value]) {
    for row in incoming {
        if !is_empty_value(row) && !target.contains(row) {
            target.push(row.clone());
        }
    }
}

fn fill_keys(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match target.get_mut(key) {
            Some(existing) => fill_scalar(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn unit_price_key(row: &Value) -> String {
    let part = |k: &str| row.get(k).map(value_to_string).unwrap_or_default();
    format!("{}-{}-{}", part("kalem"), part("miktar"), part("birim"))
}

/// Enrich a text-layer record with the merged result of rendered table pages.
///
/// The text result keeps precedence; pages only add list entries and fill
/// gaps. Unit-price rows are deduplicated on item, quantity and unit.
pub fn enrich_with_pages(text: DocumentRecord, pages: &DocumentRecord) -> DocumentRecord {
    let mut merged = text;

    union_strings(&mut merged.technical_clauses, &pages.technical_clauses);
    union_strings(&mut merged.notes, &pages.notes);

    if !pages.unit_prices.is_empty() {
        let mut seen = HashSet::new();
        let combined: Vec<Value> = merged
            .unit_prices
            .drain(..)
            .chain(pages.unit_prices.iter().cloned())
            .filter(|row| seen.insert(unit_price_key(row)))
            .collect();
        merged.unit_prices = combined;
    }

    fill_scalar(&mut merged.title, &pages.title);
    fill_scalar(&mut merged.institution, &pages.institution);
    fill_scalar(&mut merged.date, &pages.date);
    fill_scalar(&mut merged.amount, &pages.amount);
    fill_scalar(&mut merged.duration, &pages.duration);
    fill_scalar(&mut merged.registry_number, &pages.registry_number);

    fill_keys(&mut merged.contact, &pages.contact);

    let appendix = pages.full_text.trim();
    if !appendix.is_empty() {
        if merged.full_text.trim().is_empty() {
            merged.full_text = appendix.to_string();
        } else {
            merged.full_text.push_str(VISUAL_APPENDIX);
            merged.full_text.push_str(appendix);
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(n: usize, text: &str, fields: Value) -> PageResult {
        PageResult {
            page_number: n,
            page_text: text.to_string(),
            fields: DocumentRecord::from_value(&fields),
        }
    }

    #[test]
    fn scalar_first_non_empty_is_order_independent_for_single_value() {
        let a = page(1, "", json!({"tarih": "01.02.2025"}));
        let empty = page(2, "", json!({"tarih": ""}));
        let forward = merge_page_results(&[a.clone(), empty.clone()]);
        let backward = merge_page_results(&[empty, a]);
        assert_eq!(forward.date, json!("01.02.2025"));
        assert_eq!(backward.date, json!("01.02.2025"));
    }

    #[test]
    fn first_scalar_wins_over_later() {
        let merged = merge_page_results(&[
            page(1, "", json!({"kurum": "İlk"})),
            page(2, "", json!({"kurum": "İkinci"})),
        ]);
        assert_eq!(merged.institution, json!("İlk"));
    }

    #[test]
    fn string_lists_are_set_union() {
        let merged = merge_page_results(&[
            page(1, "", json!({"teknik_sartlar": ["a", "b"]})),
            page(2, "", json!({"teknik_sartlar": ["b", "c"]})),
        ]);
        assert_eq!(merged.technical_clauses, vec!["a", "b", "c"]);
    }

    #[test]
    fn string_dedupe_is_case_sensitive() {
        let merged = merge_page_results(&[
            page(1, "", json!({"notlar": ["Not"]})),
            page(2, "", json!({"notlar": ["not"]})),
        ]);
        assert_eq!(merged.notes.len(), 2);
    }

    #[test]
    fn rows_keep_distinct_entries_and_drop_identical() {
        let merged = merge_page_results(&[
            page(1, "", json!({"personel_detaylari": [{"pozisyon": "Aşçı", "adet": 2}]})),
            page(2, "", json!({"personel_detaylari": [
                {"pozisyon": "Aşçı", "adet": 2},
                {"pozisyon": "Aşçı", "adet": 3}
            ]})),
        ]);
        assert_eq!(merged.staffing.len(), 2);
    }

    #[test]
    fn objects_merge_first_non_empty_per_key() {
        let merged = merge_page_results(&[
            page(1, "", json!({"iletisim": {"telefon": "111", "email": ""}})),
            page(2, "", json!({"iletisim": {"telefon": "222", "email": "a@b.c"}})),
        ]);
        assert_eq!(merged.contact["telefon"], json!("111"));
        assert_eq!(merged.contact["email"], json!("a@b.c"));
    }

    #[test]
    fn page_texts_join_in_order() {
        let merged = merge_page_results(&[page(1, "bir", json!({})), page(2, " ", json!({})), page(3, "üç", json!({}))]);
        assert_eq!(merged.full_text, "bir\n\nüç");
    }

    #[test]
    fn documents_join_with_separator() {
        let merged = merge_document_records(&[
            DocumentRecord::with_text("A"),
            DocumentRecord::with_text("B"),
        ]);
        assert_eq!(merged.full_text, "A\n\n---\n\nB");
    }

    #[test]
    fn enrichment_dedupes_unit_prices_and_fills_gaps() {
        let text = DocumentRecord::from_value(&json!({
            "tam_metin": "metin",
            "kurum": "Belediye",
            "birim_fiyatlar": [{"kalem": "Ekmek", "miktar": "100", "birim": "adet"}],
            "iletisim": {"telefon": "111"}
        }));
        let pages = DocumentRecord::from_value(&json!({
            "tam_metin": "tablo",
            "kurum": "Başka",
            "sure": "365 gün",
            "birim_fiyatlar": [
                {"kalem": "Ekmek", "miktar": "100", "birim": "adet", "fiyat": "5"},
                {"kalem": "Su", "miktar": "50", "birim": "lt"}
            ],
            "iletisim": {"telefon": "999", "email": "x@y.z"}
        }));
        let merged = enrich_with_pages(text, &pages);
        assert_eq!(merged.institution, json!("Belediye"));
        assert_eq!(merged.duration, json!("365 gün"));
        assert_eq!(merged.unit_prices.len(), 2);
        assert_eq!(merged.contact["telefon"], json!("111"));
        assert_eq!(merged.contact["email"], json!("x@y.z"));
        assert_eq!(merged.full_text, "metin\n\n--- Görsel Analiz Ekleri ---\n\ntablo");
    }
}
