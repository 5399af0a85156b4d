use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One cell of a cell-list table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCell {
    #[serde(alias = "row")]
    pub row_index: usize,
    #[serde(alias = "col", alias = "column")]
    pub column_index: usize,
    #[serde(default)]
    pub content: String,
}

/// Table block as returned by the Structured Extractor.
///
/// Arrives either as a flat cell list with indices or as pre-shaped rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Table {
    CellGrid {
        cells: Vec<TableCell>,
    },
    RowArray {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Menu,
    Gramaj,
    Personnel,
    Unknown,
}

/// Canonical row-major grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    pub rows: Vec<Vec<String>>,
    /// First row is a header and carries no data.
    pub has_header: bool,
}

impl Grid {
    pub fn data_rows(&self) -> &[Vec<String>] {
        if self.has_header && !self.rows.is_empty() {
            &self.rows[1..]
        } else {
            &self.rows
        }
    }

    fn text(&self) -> String {
        self.rows
            .iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

impl Table {
    /// Normalize both shapes into one grid.
    ///
    /// Cell grids treat their lowest row as a header. Row arrays carry
    /// headers separately, which become the first row when present.
    pub fn normalize(&self) -> Grid {
        match self {
            Table::CellGrid { cells } => {
                let mut by_row: BTreeMap<usize, Vec<String>> = BTreeMap::new();
                for cell in cells {
                    let row = by_row.entry(cell.row_index).or_default();
                    if row.len() <= cell.column_index {
                        row.resize(cell.column_index + 1, String::new());
                    }
                    row[cell.column_index] = cell.content.clone();
                }
                Grid {
                    rows: by_row.into_values().collect(),
                    has_header: true,
                }
            }
            Table::RowArray { headers, rows } => {
                let mut grid_rows = Vec::with_capacity(rows.len() + 1);
                if !headers.is_empty() {
                    grid_rows.push(headers.clone());
                }
                grid_rows.extend(rows.iter().cloned());
                Grid {
                    rows: grid_rows,
                    has_header: !headers.is_empty(),
                }
            }
        }
    }

    /// Lenient construction from extractor JSON; unrecognized shapes are skipped.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

const MENU_KEYWORDS: &[&str] = &["menü", "kahvaltı", "öğle", "yemek"];
const GRAMAJ_KEYWORDS: &[&str] = &["gram", "porsiyon", "miktar", "ağırlık"];
const PERSONNEL_KEYWORDS: &[&str] = &["personel", "aşçı", "görevli", "çalışan"];

/// Classify by content keywords; menu wins over gramaj over personnel.
pub fn detect_table_type(table: &Table) -> TableType {
    let text = table.normalize().text();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
    if has(MENU_KEYWORDS) {
        TableType::Menu
    } else if has(GRAMAJ_KEYWORDS) {
        TableType::Gramaj
    } else if has(PERSONNEL_KEYWORDS) {
        TableType::Personnel
    } else {
        TableType::Unknown
    }
}

fn first_number(s: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").unwrap_or_else(|e| panic!("invalid number regex: {e}")))
        .find(s)
        .map(|m| m.as_str())
}

/// `(label, number)` pairs from the first two columns of each data row.
fn labelled_numbers(tables: &[&Table]) -> Vec<(String, String)> {
    tables
        .iter()
        .flat_map(|t| t.normalize().data_rows().to_vec())
        .filter(|row| row.len() >= 2)
        .filter_map(|row| {
            let label = row[0].trim();
            let number = first_number(&row[1])?;
            (!label.is_empty()).then(|| (label.to_string(), number.to_string()))
        })
        .collect()
}

/// Gramaj rows `{item, weight, unit: "g"}`.
pub fn extract_gramaj(tables: &[&Table]) -> Vec<Value> {
    labelled_numbers(tables)
        .into_iter()
        .map(|(item, weight)| json!({"item": item, "weight": weight, "unit": "g"}))
        .collect()
}

/// Staff rows `{pozisyon, adet}`; zero counts are skipped.
pub fn extract_personnel(tables: &[&Table]) -> Vec<Value> {
    labelled_numbers(tables)
        .into_iter()
        .filter_map(|(position, count)| {
            let adet: u64 = count.parse().ok().filter(|n| *n > 0)?;
            Some(json!({"pozisyon": position, "adet": adet}))
        })
        .collect()
}
