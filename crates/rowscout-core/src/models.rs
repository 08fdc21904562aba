//! Core data models: raw sheets, normalized tables, and search results.
//!
//! A [`RawSheet`] is the untyped grid read from a spreadsheet. Once the
//! header row is known it becomes a [`Table`], whose column set and row
//! count are frozen for the rest of the session. Every search stage emits
//! [`SearchResult`]s in rank order.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A table row: normalized column name → string value.
///
/// Missing or blank cells are absent from the map.
pub type RowData = BTreeMap<String, String>;

/// The untyped cell grid of a source file, before header detection.
#[derive(Debug, Clone)]
pub struct RawSheet {
    /// File name including extension (e.g. `price_list.xlsx`).
    pub name: String,
    /// File name without extension; used for header records.
    pub stem: String,
    /// SHA-256 of the full file bytes (see [`crate::fingerprint`]).
    pub fingerprint: String,
    /// Cells in row-major order; `None` for empty cells.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawSheet {
    /// Widest row in the grid.
    pub fn width(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }
}

/// Normalize a header cell: trim, lowercase, whitespace runs → `_`.
pub fn normalize_column_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// An ordered sequence of rows keyed by unique, normalized column names.
///
/// Deserialization goes through [`Table::new`], so a persisted table is
/// held to the same invariants as a freshly built one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableParts")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<RowData>,
}

#[derive(Deserialize)]
struct TableParts {
    columns: Vec<String>,
    rows: Vec<RowData>,
}

impl TryFrom<TableParts> for Table {
    type Error = Error;

    fn try_from(parts: TableParts) -> Result<Self> {
        Table::new(parts.columns, parts.rows)
    }
}

impl Table {
    /// Create a table, enforcing unique column names and that every row
    /// only uses known columns.
    pub fn new(columns: Vec<String>, rows: Vec<RowData>) -> Result<Self> {
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate column '{}'", c)));
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if let Some(unknown) = row.keys().find(|k| !seen.contains(k.as_str())) {
                return Err(Error::InvalidInput(format!(
                    "row {} has unknown column '{}'",
                    i, unknown
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from a raw sheet using `header_row` as the column names.
    ///
    /// Rows above the header are discarded, rows below it become data.
    /// Blank header cells become `unnamed_<i>` and repeated names get the
    /// lowest free numeric suffix so column names stay unique, even when a
    /// suffixed name also appears literally in the header. Rows with no values at
    /// all are dropped.
    pub fn from_sheet(sheet: &RawSheet, header_row: usize) -> Result<Self> {
        let header = sheet.rows.get(header_row).ok_or_else(|| {
            Error::InvalidInput(format!(
                "header row {} is beyond the last row ({}) of '{}'",
                header_row,
                sheet.rows.len(),
                sheet.name
            ))
        })?;

        let width = sheet.width();
        let mut columns: Vec<String> = Vec::with_capacity(width);
        let mut taken: HashSet<String> = HashSet::new();
        let mut next_suffix: HashMap<String, usize> = HashMap::new();
        for i in 0..width {
            let raw = header.get(i).cloned().flatten().unwrap_or_default();
            let mut name = normalize_column_name(&raw);
            if name.is_empty() {
                name = format!("unnamed_{}", i);
            }
            if taken.contains(&name) {
                let n = next_suffix.entry(name.clone()).or_insert(1);
                let mut candidate = format!("{}_{}", name, n);
                while taken.contains(&candidate) {
                    *n += 1;
                    candidate = format!("{}_{}", name, n);
                }
                *n += 1;
                name = candidate;
            }
            taken.insert(name.clone());
            columns.push(name);
        }

        let rows = sheet.rows[header_row + 1..]
            .iter()
            .map(|cells| {
                cells
                    .iter()
                    .enumerate()
                    .filter_map(|(i, cell)| {
                        let value = cell.as_deref()?.trim();
                        if value.is_empty() {
                            None
                        } else {
                            Some((columns[i].clone(), value.to_string()))
                        }
                    })
                    .collect::<RowData>()
            })
            .filter(|row| !row.is_empty())
            .collect();

        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[RowData] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&RowData> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// `(row index, value)` for every row that has a value in `column`.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = (usize, &'a str)> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(move |(i, row)| row.get(column).map(|v| (i, v.as_str())))
    }
}

/// Which retrieval stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Fuzzy,
    Vector,
    Graph,
}

/// A ranked row returned by any search stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// 1-based, dense rank within one result list.
    pub rank: usize,
    /// Similarity score on a 0–100 scale.
    pub score: f64,
    /// Stable identifier of the row (`row_<index>`).
    pub source_id: String,
    /// Position of the row in its [`Table`].
    pub row_index: usize,
    pub source: MatchSource,
    /// Column the fuzzy matcher matched on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_column: Option<String>,
    /// Distinct column value the fuzzy matcher matched on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_value: Option<String>,
    pub data: RowData,
}

impl SearchResult {
    /// Score mapped to `[0, 1]` for confidence banding.
    pub fn normalized_score(&self) -> f64 {
        (self.score / 100.0).clamp(0.0, 1.0)
    }
}

/// Identifier used for a row across indexes and result payloads.
pub fn row_id(index: usize) -> String {
    format!("row_{}", index)
}

/// Re-number `results` 1..=n in their current order.
pub fn assign_ranks(results: &mut [SearchResult]) {
    for (i, r) in results.iter_mut().enumerate() {
        r.rank = i + 1;
    }
}

/// Confidence band reported to and by the reasoning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[serde(alias = "High", alias = "HIGH")]
    High,
    #[serde(alias = "Medium", alias = "MEDIUM")]
    Medium,
    #[serde(alias = "Low", alias = "LOW")]
    Low,
}

impl Confidence {
    /// Band a similarity in `[0, 1]`: `> 0.8` high, `> 0.6` medium, else low.
    pub fn from_similarity(score: f64) -> Self {
        if score > 0.8 {
            Confidence::High
        } else if score > 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}
