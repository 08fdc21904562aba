//! Typed contracts with the reasoning service for picking the best row.
//!
//! Two entry points:
//!
//! - [`ResultRanker::analyze`] takes fuzzy and vector candidates and asks for
//!   a single best match with match type, explanation and confidence.
//! - [`ResultRanker::select_best`] is the two-pass selection used by RAG
//!   queries: pass one asks for every relevant match with reasoning (any JSON
//!   object is accepted), pass two condenses that into the strict best-match
//!   contract.
//!
//! No local tie-break exists: the service sees every candidate with its raw
//! score and confidence band and makes the final call. Replies that do not
//! parse into the expected shape are [`Error::RankingResponse`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::completion::{complete_json, CompletionProvider};
use crate::error::{Error, Result};
use crate::models::{Confidence, RowData, SearchResult};

const ANALYZE_SYSTEM_PROMPT: &str =
    "You are a search results analyzer. Return only valid JSON.";
const SURVEY_SYSTEM_PROMPT: &str = "You are a data analyst. Return only valid JSON.";
const SELECT_SYSTEM_PROMPT: &str =
    "You are a data analyst. Return only the JSON object, no other text.";

/// Which candidate list the chosen row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[serde(alias = "Fuzzy")]
    Fuzzy,
    #[serde(alias = "Vector")]
    Vector,
}

/// Outcome of [`ResultRanker::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// Chosen row; the canonical table row when it matched a candidate.
    pub best_match: RowData,
    /// Table position of the chosen row, when it matched a candidate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,
    pub match_type: MatchType,
    pub explanation: String,
    pub confidence: Confidence,
}

/// One entry of the best-match contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchEntry {
    pub data: RowData,
    pub confidence: Confidence,
    pub reason: String,
}

/// The best-match contract: `{best_match, alternative_matches}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestMatch {
    pub best_match: MatchEntry,
    pub alternative_matches: Vec<MatchEntry>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    best_match: RawRow,
    match_type: MatchType,
    explanation: String,
    confidence: Confidence,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    data: Map<String, Value>,
    confidence: Confidence,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct RawBestMatch {
    best_match: RawEntry,
    #[serde(default)]
    alternative_matches: Vec<RawEntry>,
}

/// Convert a JSON object to a row, dropping null and blank values.
fn to_row(data: Map<String, Value>) -> RowData {
    data.into_iter()
        .filter_map(|(k, v)| {
            let text = match v {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            let text = text.trim().to_string();
            (!text.is_empty()).then_some((k, text))
        })
        .collect()
}

/// Replace `data` with the canonical candidate row it equals, if any.
fn canonicalize(data: Map<String, Value>, candidates: &[&SearchResult]) -> (RowData, Option<usize>) {
    let row = to_row(data);
    match candidates.iter().find(|c| c.data == row) {
        Some(c) => (c.data.clone(), Some(c.row_index)),
        None => {
            warn!(keys = row.len(), "returned row does not match any candidate; keeping it as returned");
            (row, None)
        }
    }
}

/// Render candidates with rank, raw score, normalized score and band.
pub fn format_candidates(results: &[SearchResult]) -> Value {
    Value::Array(
        results
            .iter()
            .map(|r| {
                let normalized = r.normalized_score();
                let mut entry = json!({
                    "rank": r.rank,
                    "score": r.score,
                    "normalized_score": (normalized * 1000.0).round() / 1000.0,
                    "confidence": Confidence::from_similarity(normalized).as_str(),
                    "data": r.data,
                });
                if let (Some(obj), Some(column)) = (entry.as_object_mut(), &r.matched_column) {
                    obj.insert("matched_column".into(), json!(column));
                    if let Some(value) = &r.matched_value {
                        obj.insert("matched_value".into(), json!(value));
                    }
                }
                entry
            })
            .collect(),
    )
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Sends candidate sets to the reasoning service.
pub struct ResultRanker {
    completer: Arc<dyn CompletionProvider>,
}

impl ResultRanker {
    pub fn new(completer: Arc<dyn CompletionProvider>) -> Self {
        Self { completer }
    }

    /// Pick the single best row among fuzzy and vector candidates.
    pub async fn analyze(
        &self,
        query: &str,
        fuzzy_matches: &[SearchResult],
        vector_matches: &[SearchResult],
    ) -> Result<Analysis> {
        let prompt = format!(
            "Given this search query: \"{query}\"\n\n\
             Fuzzy matches:\n{fuzzy}\n\n\
             Vector matches:\n{vector}\n\n\
             Analyze the results and:\n\
             1. Identify the single best matching result\n\
             2. Explain why it's the best match\n\
             3. Return your response in this JSON format:\n\
             {{\n  \"best_match\": {{\"data\": {{the row data of the chosen result}}}},\n  \
             \"match_type\": \"fuzzy\" or \"vector\",\n  \
             \"explanation\": \"your explanation\",\n  \
             \"confidence\": \"high\", \"medium\" or \"low\"\n}}\n\n\
             Consider both semantic relevance and match scores. If no good match exists, \
             indicate low confidence.",
            query = query,
            fuzzy = pretty(&format_candidates(fuzzy_matches)),
            vector = pretty(&format_candidates(vector_matches)),
        );
        debug!(fuzzy = fuzzy_matches.len(), vector = vector_matches.len(), "ranking candidates");

        let raw: RawAnalysis = complete_json(
            self.completer.as_ref(),
            ANALYZE_SYSTEM_PROMPT,
            &prompt,
            Error::RankingResponse,
        )
        .await?;

        let candidates: Vec<&SearchResult> = match raw.match_type {
            MatchType::Fuzzy => fuzzy_matches.iter().chain(vector_matches).collect(),
            MatchType::Vector => vector_matches.iter().chain(fuzzy_matches).collect(),
        };
        let (best_match, row_index) = canonicalize(raw.best_match.data, &candidates);
        info!(match_type = ?raw.match_type, confidence = raw.confidence.as_str(), "best match selected");

        Ok(Analysis {
            best_match,
            row_index,
            match_type: raw.match_type,
            explanation: raw.explanation,
            confidence: raw.confidence,
        })
    }

    /// Two-pass selection over an already ranked result list.
    pub async fn select_best(&self, query: &str, results: &[SearchResult]) -> Result<BestMatch> {
        let survey_prompt = format!(
            "Given this query: \"{query}\"\n\
             Top {n} matches (sorted by relevance):\n{matches}\n\n\
             Return a JSON object with:\n\
             1. Top matches (include all relevant matches)\n\
             2. Confidence for each match\n\
             3. Reasoning for matches\n\
             4. Any relevant context or patterns noticed",
            query = query,
            n = results.len(),
            matches = pretty(&format_candidates(results)),
        );
        let survey: Value = complete_json(
            self.completer.as_ref(),
            SURVEY_SYSTEM_PROMPT,
            &survey_prompt,
            Error::RankingResponse,
        )
        .await?;
        if !survey.is_object() {
            return Err(Error::RankingResponse(
                "first pass reply is not a JSON object".to_string(),
            ));
        }

        let select_prompt = format!(
            "These are some of the possible outcomes:\n{survey}\n\n\
             And this is the original requirement/query: \"{query}\"\n\n\
             Find the best match and return it in this exact JSON format:\n\
             {{\n  \"best_match\": {{\"data\": {{}}, \"confidence\": \"high|medium|low\", \"reason\": \"\"}},\n  \
             \"alternative_matches\": [{{\"data\": {{}}, \"confidence\": \"high|medium|low\", \"reason\": \"\"}}]\n}}\n\
             `data` is the matching row exactly as given. Include up to 2 alternative matches if relevant.",
            survey = pretty(&survey),
            query = query,
        );
        let raw: RawBestMatch = complete_json(
            self.completer.as_ref(),
            SELECT_SYSTEM_PROMPT,
            &select_prompt,
            Error::RankingResponse,
        )
        .await?;

        let candidates: Vec<&SearchResult> = results.iter().collect();
        let entry = |e: RawEntry| MatchEntry {
            data: canonicalize(e.data, &candidates).0,
            confidence: e.confidence,
            reason: e.reason,
        };
        let best = BestMatch {
            best_match: entry(raw.best_match),
            alternative_matches: raw.alternative_matches.into_iter().map(entry).collect(),
        };
        info!(
            confidence = best.best_match.confidence.as_str(),
            alternatives = best.alternative_matches.len(),
            "best match selected"
        );
        Ok(best)
    }
}
