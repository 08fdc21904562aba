//! Fuzzy-first smart search.
//!
//! ```text
//! query ──▶ lexical search
//!              │
//!              ├── exactly one row at score 100 ──▶ return it (confidence high,
//!              │                                     no vector search, no ranking)
//!              │
//!              └── zero or several perfect rows ──▶ vector search
//!                                                     └──▶ ResultRanker::analyze
//! ```
//!
//! Several perfect rows means the exact text is ambiguous (the same value in
//! more than one row), so it goes through full analysis like a miss does.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::context::{Services, Settings};
use crate::error::{Error, Result};
use crate::lexical::{self, LexicalRequest, PERFECT_SCORE};
use crate::models::{Confidence, RowData, SearchResult};
use crate::ranker::{MatchType, ResultRanker};
use crate::vector::VectorIndex;

/// Explanation attached to fast-path answers.
pub const EXACT_MATCH_EXPLANATION: &str = "Found exact text match with 100% confidence";

/// Parameters of one smart search.
#[derive(Debug, Clone)]
pub struct SmartSearchRequest<'a> {
    pub query: &'a str,
    pub columns: Option<&'a [String]>,
    pub fuzzy_limit: usize,
    pub vector_limit: usize,
    pub score_cutoff: f64,
}

impl<'a> SmartSearchRequest<'a> {
    /// A request over all columns using the limits in `settings`.
    pub fn new(query: &'a str, settings: &Settings) -> Self {
        Self {
            query,
            columns: None,
            fuzzy_limit: settings.fuzzy_limit,
            vector_limit: settings.vector_limit,
            score_cutoff: settings.score_cutoff,
        }
    }

    pub fn with_columns(mut self, columns: &'a [String]) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// The selected row and, when it came from a candidate list, how it matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestRow {
    pub data: RowData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_value: Option<String>,
}

impl BestRow {
    fn from_result(r: &SearchResult) -> Self {
        Self {
            data: r.data.clone(),
            row_index: Some(r.row_index),
            score: Some(r.score),
            matched_column: r.matched_column.clone(),
            matched_value: r.matched_value.clone(),
        }
    }
}

/// Result of [`Retriever::smart_search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmartSearchOutcome {
    pub query: String,
    pub best_match: BestRow,
    pub match_type: MatchType,
    pub confidence: Confidence,
    pub explanation: String,
    pub fuzzy_candidates: Vec<SearchResult>,
    pub vector_candidates: Vec<SearchResult>,
}

impl SmartSearchOutcome {
    /// True when the answer came from the exact-match fast path.
    pub fn is_exact(&self) -> bool {
        self.match_type == MatchType::Fuzzy
            && self.best_match.score == Some(PERFECT_SCORE)
            && self.vector_candidates.is_empty()
            && self.explanation == EXACT_MATCH_EXPLANATION
    }
}

/// Orchestrates lexical and vector search over one index.
pub struct Retriever<'a> {
    vectors: &'a VectorIndex,
    services: &'a Services,
}

impl<'a> Retriever<'a> {
    pub fn new(vectors: &'a VectorIndex, services: &'a Services) -> Self {
        Self { vectors, services }
    }

    pub async fn smart_search(
        &self,
        req: &SmartSearchRequest<'_>,
        max_distance: f32,
    ) -> Result<SmartSearchOutcome> {
        let table = self.vectors.table();
        let fuzzy = lexical::search(
            table,
            &LexicalRequest {
                query: req.query,
                columns: req.columns,
                limit: req.fuzzy_limit,
                score_cutoff: req.score_cutoff,
            },
        );

        let perfect_rows: BTreeSet<usize> = fuzzy
            .iter()
            .filter(|r| r.score >= PERFECT_SCORE)
            .map(|r| r.row_index)
            .collect();
        debug!(
            query = req.query,
            fuzzy = fuzzy.len(),
            perfect_rows = perfect_rows.len(),
            "fuzzy stage"
        );

        if perfect_rows.len() == 1 {
            if let Some(hit) = fuzzy.first() {
                info!(query = req.query, row = hit.row_index, "exact match");
                return Ok(SmartSearchOutcome {
                    query: req.query.to_string(),
                    best_match: BestRow::from_result(hit),
                    match_type: MatchType::Fuzzy,
                    confidence: Confidence::High,
                    explanation: EXACT_MATCH_EXPLANATION.to_string(),
                    fuzzy_candidates: fuzzy,
                    vector_candidates: Vec::new(),
                });
            }
        }

        let vector = self
            .vectors
            .search(
                self.services.embedder.as_ref(),
                req.query,
                req.vector_limit,
                max_distance,
            )
            .await?;
        if fuzzy.is_empty() && vector.is_empty() {
            return Err(Error::NoCandidates(req.query.to_string()));
        }

        let analysis = ResultRanker::new(self.services.completer.clone())
            .analyze(req.query, &fuzzy, &vector)
            .await?;

        let (primary, secondary) = match analysis.match_type {
            MatchType::Fuzzy => (&fuzzy, &vector),
            MatchType::Vector => (&vector, &fuzzy),
        };
        let best_match = analysis
            .row_index
            .and_then(|row| {
                primary
                    .iter()
                    .chain(secondary.iter())
                    .find(|r| r.row_index == row)
            })
            .map(BestRow::from_result)
            .unwrap_or(BestRow {
                data: analysis.best_match,
                row_index: None,
                score: None,
                matched_column: None,
                matched_value: None,
            });

        Ok(SmartSearchOutcome {
            query: req.query.to_string(),
            best_match,
            match_type: analysis.match_type,
            confidence: analysis.confidence,
            explanation: analysis.explanation,
            fuzzy_candidates: fuzzy,
            vector_candidates: vector,
        })
    }
}
