//! Cross-reference detection against article and section headings.
//!
//! A reference such as `Madde 8'e bakınız` resolves when any text unit of
//! the document carries a heading for the same number, for a child of it
//! (`8.1`) or, for dotted targets, for its parent (`8`).

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedReference {
    pub reference_text: String,
    pub target: String,
    pub source_chunk_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Namespace {
    Article,
    Section,
}

impl Namespace {
    fn label(self) -> &'static str {
        match self {
            Self::Article => "Madde",
            Self::Section => "Bölüm",
        }
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid reference regex {pattern}: {e}"))
}

/// (pattern, number group, namespace)
fn reference_patterns() -> &'static [(Regex, usize, Namespace)] {
    static RES: OnceLock<Vec<(Regex, usize, Namespace)>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            (
                compile(r"(?i)madde\s+(\d+(?:\.\d+)*)'?\p{L}{0,3}\s+(bakınız|belirtilen|göre|uyarınca)"),
                1,
                Namespace::Article,
            ),
            (
                compile(r"(?i)(\d+(?:\.\d+)*)\.\s*maddede\s+(belirtildiği|açıklandığı)"),
                1,
                Namespace::Article,
            ),
            (
                compile(r"(?i)(yukarıdaki|aşağıdaki)\s+(\d+(?:\.\d+)*)\.\s*madde"),
                2,
                Namespace::Article,
            ),
            (
                compile(r"(?i)bölüm\s+([IVX]+|\d+)'?\p{L}{0,3}\s+(bakınız|göre)"),
                1,
                Namespace::Section,
            ),
        ]
    })
}

fn heading_patterns() -> &'static [(Regex, Namespace)] {
    static RES: OnceLock<Vec<(Regex, Namespace)>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            (compile(r"(?im)^\s*madde\s+(\d+(?:\.\d+)*)\s*[-–:.]"), Namespace::Article),
            (compile(r"(?m)^\s*(\d+(?:\.\d+)*)\.\s+\p{Lu}"), Namespace::Article),
            (compile(r"(?im)^\s*bölüm\s+([IVX]+|\d+)\s*(?:[-–:.]|$)"), Namespace::Section),
        ]
    })
}

fn collect_headings<'a>(units: impl Iterator<Item = &'a str>) -> HashSet<(Namespace, String)> {
    let mut headings = HashSet::new();
    for text in units {
        for (re, ns) in heading_patterns() {
            for caps in re.captures_iter(text) {
                if let Some(number) = caps.get(1) {
                    headings.insert((*ns, number.as_str().to_uppercase()));
                }
            }
        }
    }
    headings
}

fn resolves(target: &str, ns: Namespace, headings: &HashSet<(Namespace, String)>) -> bool {
    let child_prefix = format!("{target}.");
    headings.iter().filter(|(h_ns, _)| *h_ns == ns).any(|(_, number)| {
        number == target
            || number.starts_with(&child_prefix)
            || (target.contains('.') && target.split('.').next() == Some(number.as_str()))
    })
}

/// References in `units` (chunk id, text) with no matching heading anywhere.
pub fn find_unresolved_references(units: &[(&str, &str)]) -> Vec<UnresolvedReference> {
    let headings = collect_headings(units.iter().map(|(_, text)| *text));
    let mut seen = HashSet::new();
    let mut unresolved = Vec::new();
    let mut total = 0usize;

    for (chunk_id, text) in units {
        for (re, group, ns) in reference_patterns() {
            for caps in re.captures_iter(text) {
                let (Some(whole), Some(number)) = (caps.get(0), caps.get(*group)) else {
                    continue;
                };
                total += 1;
                let target_number = number.as_str().to_uppercase();
                if resolves(&target_number, *ns, &headings) {
                    continue;
                }
                let target = format!("{} {target_number}", ns.label());
                if !seen.insert((chunk_id.to_string(), whole.as_str().to_string())) {
                    continue;
                }
                unresolved.push(UnresolvedReference {
                    reference_text: whole.as_str().to_string(),
                    reason: format!("no heading found for {target}"),
                    target,
                    source_chunk_id: chunk_id.to_string(),
                });
            }
        }
    }

    if total > 0 {
        tracing::debug!(
            references = total,
            unresolved = unresolved.len(),
            headings = headings.len(),
            "Cross-reference resolution completed"
        );
    }
    unresolved
}
