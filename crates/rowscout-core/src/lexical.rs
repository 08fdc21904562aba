//! Fuzzy (lexical) matching over column values.
//!
//! Nothing is precomputed: each query scores the distinct values of the
//! candidate columns with a token-sorted ratio and expands every matched
//! value back to all rows holding it.
//!
//! # Scoring
//!
//! Both strings are lowercased, split on whitespace, sorted token-wise and
//! re-joined. The ratio is the normalized indel similarity
//! `200 × LCS(a, b) / (|a| + |b|)`, so identical token multisets score
//! exactly `100`.
//!
//! # Perfect-match short circuit
//!
//! If any value scores `100`, only perfect matches are returned (capped at
//! `limit`) and every lower-scored candidate is discarded.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{assign_ranks, row_id, MatchSource, SearchResult, Table};

/// Score reported for a perfect (normalized-equal) match.
pub const PERFECT_SCORE: f64 = 100.0;

/// Parameters of one fuzzy search.
#[derive(Debug, Clone)]
pub struct LexicalRequest<'a> {
    pub query: &'a str,
    /// Columns to search; all columns when `None`.
    pub columns: Option<&'a [String]>,
    /// Maximum matches kept per column and maximum results returned.
    pub limit: usize,
    /// Minimum score (0–100) for a value to match.
    pub score_cutoff: f64,
}

fn sort_tokens(s: &str) -> Vec<char> {
    let mut tokens: Vec<String> = s.split_whitespace().map(|t| t.to_lowercase()).collect();
    tokens.sort();
    tokens.join(" ").chars().collect()
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Token-order-insensitive similarity in `[0, 100]`.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let a = sort_tokens(a);
    let b = sort_tokens(b);
    if a == b {
        return if a.is_empty() { 0.0 } else { PERFECT_SCORE };
    }
    let total = a.len() + b.len();
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

/// Run a fuzzy search over `table`.
///
/// Unknown column names are skipped with a warning. Results are ranked by
/// score, ties keeping encounter order (column order, then value order,
/// then row order).
pub fn search(table: &Table, req: &LexicalRequest<'_>) -> Vec<SearchResult> {
    if req.query.trim().is_empty() || req.limit == 0 {
        return Vec::new();
    }

    let all_columns = table.columns().to_vec();
    let columns = req.columns.unwrap_or(&all_columns);

    let mut perfect: Vec<SearchResult> = Vec::new();
    let mut partial: Vec<SearchResult> = Vec::new();

    for column in columns {
        if !table.has_column(column) {
            warn!(column = %column, "column not found in table; skipping");
            continue;
        }

        // Distinct values in first-appearance order, each with its rows.
        let mut order: Vec<&str> = Vec::new();
        let mut rows_by_value: HashMap<&str, Vec<usize>> = HashMap::new();
        for (row, value) in table.column_values(column) {
            rows_by_value
                .entry(value)
                .or_insert_with(|| {
                    order.push(value);
                    Vec::new()
                })
                .push(row);
        }

        let mut matches: Vec<(&str, f64)> = order
            .iter()
            .map(|v| (*v, token_sort_ratio(req.query, v)))
            .filter(|(_, score)| *score >= req.score_cutoff)
            .collect();
        matches.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(req.limit);

        for (value, score) in matches {
            for &row in &rows_by_value[value] {
                let Some(data) = table.row(row) else { continue };
                let result = SearchResult {
                    rank: 0,
                    score,
                    source_id: row_id(row),
                    row_index: row,
                    source: MatchSource::Fuzzy,
                    matched_column: Some(column.clone()),
                    matched_value: Some(value.to_string()),
                    data: data.clone(),
                };
                if score >= PERFECT_SCORE {
                    perfect.push(result);
                } else {
                    partial.push(result);
                }
            }
        }
    }

    let mut results = if !perfect.is_empty() {
        debug!(count = perfect.len(), "perfect fuzzy matches");
        perfect
    } else {
        partial.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        partial
    };
    results.truncate(req.limit);
    assign_ranks(&mut results);
    results
}
