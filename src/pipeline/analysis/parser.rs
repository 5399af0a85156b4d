//! Permissive JSON extraction from free-form analyzer replies.
//!
//! Generative output is not contractually JSON. Parsing never fails: the
//! caller gets either a JSON object or the raw reply back.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::pipeline::record::{DocumentRecord, PageResult};

/// Outcome of permissive parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Value),
    Unparsed(String),
}

impl ParseOutcome {
    pub fn status(&self) -> ParseStatus {
        match self {
            Self::Parsed(_) => ParseStatus::Parsed,
            Self::Unparsed(_) => ParseStatus::Unparsed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Parsed,
    Unparsed,
}

fn numeric_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#":\s*(\d+(?:[.,]\d+)?\s*[-–]\s*\d+(?:[.,]\d+)?)\s*([,}\]\n])"#)
            .unwrap_or_else(|e| panic!("invalid numeric range regex: {e}"))
    })
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r",\s*([}\]])").unwrap_or_else(|e| panic!("invalid trailing comma regex: {e}"))
    })
}

/// Parse one JSON object out of `raw`.
///
/// 1. direct parse
/// 2. first `{` .. last `}` block
/// 3. repairs: code fences, bare numeric ranges, trailing commas, truncation
pub fn parse_json_response(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    if let Some(v) = parse_object(trimmed) {
        return ParseOutcome::Parsed(v);
    }

    if let Some(block) = outer_block(trimmed) {
        if let Some(v) = parse_object(block) {
            return ParseOutcome::Parsed(v);
        }
    }

    let unfenced = strip_fences(trimmed);
    let Some(start) = unfenced.find('{') else {
        return ParseOutcome::Unparsed(raw.to_string());
    };
    let candidate = &unfenced[start..];
    let candidate = match candidate.rfind('}') {
        Some(end) if parse_object(&candidate[..=end]).is_some() => &candidate[..=end],
        _ => candidate,
    };

    let repaired = numeric_range_re().replace_all(candidate, r#": "$1"$2"#);
    let repaired = trailing_comma_re().replace_all(&repaired, "$1");
    if let Some(v) = parse_object(&repaired) {
        tracing::debug!("Analyzer JSON parsed after repair");
        return ParseOutcome::Parsed(v);
    }

    let closed = close_truncated(&repaired);
    let closed = trailing_comma_re().replace_all(&closed, "$1");
    match parse_object(&closed) {
        Some(v) => {
            tracing::debug!("Analyzer JSON parsed after closing truncated reply");
            ParseOutcome::Parsed(v)
        }
        None => ParseOutcome::Unparsed(raw.to_string()),
    }
}

fn parse_object(s: &str) -> Option<Value> {
    serde_json::from_str::<Value>(s).ok().filter(Value::is_object)
}

fn outer_block(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

fn strip_fences(s: &str) -> String {
    s.lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Close an object cut off mid-stream: open string, dangling key or
/// value, unbalanced brackets.
fn close_truncated(s: &str) -> String {
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut last_sig: Option<char> = None;
    let mut before_last_string: Option<char> = None;

    for c in s.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                last_sig = Some('"');
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                before_last_string = last_sig;
            }
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
            }
            _ => {}
        }
        if !c.is_whitespace() && c != '"' {
            last_sig = Some(c);
        }
    }

    let mut out = s.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
        last_sig = Some('"');
    }

    let trimmed_len = out.trim_end().trim_end_matches(',').trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') || out.ends_with('{') || out.ends_with('[') {
        // nothing dangling
    } else if out.ends_with(':') {
        out.push_str(" null");
    } else if last_sig == Some('"')
        && closers.last() == Some(&'}')
        && matches!(before_last_string, Some('{') | Some(','))
    {
        // Last string is an object key without a value
        out.push_str(": null");
    }

    while let Some(c) = closers.pop() {
        out.push(c);
    }
    out
}

/// Document-level parse with degradation to an empty record whose full
/// text is the head of the source text.
pub fn parse_document_record(
    raw: &str,
    source_text: &str,
    fallback_chars: usize,
) -> (DocumentRecord, ParseStatus) {
    match parse_json_response(raw) {
        ParseOutcome::Parsed(v) => {
            let mut record = DocumentRecord::from_value(&v);
            if record.full_text.trim().is_empty() {
                record.full_text = source_text.to_string();
            }
            (record, ParseStatus::Parsed)
        }
        ParseOutcome::Unparsed(_) => {
            tracing::warn!(
                reply_chars = raw.chars().count(),
                "Analyzer reply had no JSON object, using empty record"
            );
            let head: String = source_text.chars().take(fallback_chars).collect();
            (DocumentRecord::with_text(head), ParseStatus::Unparsed)
        }
    }
}

/// Page-level parse; an unparseable reply keeps the raw text as transcript.
pub fn parse_page_result(page_number: usize, raw: &str) -> (PageResult, ParseStatus) {
    match parse_json_response(raw) {
        ParseOutcome::Parsed(v) => (PageResult::from_value(page_number, &v), ParseStatus::Parsed),
        ParseOutcome::Unparsed(text) => (
            PageResult {
                page_number,
                page_text: text,
                ..PageResult::default()
            },
            ParseStatus::Unparsed,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parsed(raw: &str) -> Value {
        match parse_json_response(raw) {
            ParseOutcome::Parsed(v) => v,
            ParseOutcome::Unparsed(r) => panic!("expected parse, got raw: {r}"),
        }
    }

    #[test]
    fn direct_json() {
        assert_eq!(parsed(r#"{"ikn": "2024/1"}"#), json!({"ikn": "2024/1"}));
    }

    #[test]
    fn block_inside_prose() {
        let v = parsed("İşte analiz:\n{\"kurum\": \"Belediye\"}\nUmarım yardımcı olur.");
        assert_eq!(v["kurum"], "Belediye");
    }

    #[test]
    fn fenced_json() {
        let v = parsed("```json\n{\"sure\": \"365 gün\"}\n```");
        assert_eq!(v["sure"], "365 gün");
    }

    #[test]
    fn bare_numeric_range_is_quoted() {
        let v = parsed("{\"gramaj\": 55-60, \"adet\": 3}");
        assert_eq!(v["gramaj"], "55-60");
        assert_eq!(v["adet"], 3);
    }

    #[test]
    fn trailing_commas_dropped() {
        let v = parsed("{\"a\": [1, 2,], \"b\": {\"c\": 1,},}");
        assert_eq!(v, json!({"a": [1, 2], "b": {"c": 1}}));
    }

    #[test]
    fn truncated_inside_string() {
        let v = parsed("{\"tam_metin\": \"Yemek hizmeti alımı işi kapsamın");
        assert!(v["tam_metin"].as_str().unwrap().starts_with("Yemek"));
    }

    #[test]
    fn truncated_after_key() {
        let v = parsed("{\"kurum\": \"A\", \"ikn\"");
        assert_eq!(v, json!({"kurum": "A", "ikn": null}));
    }

    #[test]
    fn truncated_after_colon() {
        let v = parsed("{\"kurum\": \"A\", \"notlar\": [\"x\"], \"ikn\":");
        assert_eq!(v["ikn"], Value::Null);
        assert_eq!(v["notlar"], json!(["x"]));
    }

    #[test]
    fn truncated_in_nested_array() {
        let v = parsed("{\"birim_fiyatlar\": [{\"kalem\": \"Ekmek\"}, {\"kalem\": \"Su\"");
        assert_eq!(v["birim_fiyatlar"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn plain_prose_is_unparsed() {
        let raw = "Bu belgede ihale bilgisi bulunamadı.";
        assert_eq!(parse_json_response(raw), ParseOutcome::Unparsed(raw.to_string()));
    }

    #[test]
    fn top_level_array_is_not_an_object() {
        assert!(matches!(parse_json_response("[1, 2]"), ParseOutcome::Unparsed(_)));
    }

    #[test]
    fn document_degradation_keeps_source_head() {
        let source = "x".repeat(6000);
        let (record, status) = parse_document_record("no json", &source, 5000);
        assert_eq!(status, ParseStatus::Unparsed);
        assert_eq!(record.full_text.len(), 5000);
        assert!(record.is_blank());
    }

    #[test]
    fn document_parse_backfills_missing_full_text() {
        let (record, status) = parse_document_record(r#"{"kurum": "X"}"#, "kaynak metin", 5000);
        assert_eq!(status, ParseStatus::Parsed);
        assert_eq!(record.full_text, "kaynak metin");
    }

    #[test]
    fn unparsed_page_keeps_reply_as_transcript() {
        let (page, status) = parse_page_result(4, "sadece metin");
        assert_eq!(status, ParseStatus::Unparsed);
        assert_eq!(page.page_number, 4);
        assert_eq!(page.page_text, "sadece metin");
    }
}
