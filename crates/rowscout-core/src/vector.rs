//! Dense vector index over one document per row.
//!
//! Each row is rendered as a document by joining the values of its
//! text-like columns with single spaces. Documents are embedded once at
//! build time; queries embed the query text and scan every row (exact,
//! brute-force nearest neighbours under squared L2 distance).
//!
//! # Similarity calibration
//!
//! Distances are mapped onto `0..=100` with
//! `clamp((1 - d / max_distance) * 100)`. `max_distance` is a calibration
//! constant chosen for the embedding model, not a bound derived from the
//! data: distances beyond it simply score `0`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::{embed_documents, squared_l2, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{assign_ranks, row_id, MatchSource, RowData, SearchResult, Table};

/// Values sampled per column by the text-column heuristic.
const TEXT_SAMPLE: usize = 100;
/// Mean character length a column must exceed to count as text.
const MIN_MEAN_TEXT_LEN: f64 = 3.0;

/// One embedded row, borrowed from a [`VectorIndex`].
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingRecord<'a> {
    pub row_index: usize,
    pub vector: &'a [f32],
    pub document: &'a str,
    pub data: &'a RowData,
}

impl EmbeddingRecord<'_> {
    pub fn id(&self) -> String {
        row_id(self.row_index)
    }
}

/// Exact nearest-neighbour index over per-row embeddings.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    table: Arc<Table>,
    model: String,
    dims: usize,
    text_columns: Vec<String>,
    documents: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

/// Columns whose values read like text rather than numbers or short codes.
///
/// A column qualifies when at least one of its first 100 values is not a
/// number and those values average more than three characters. When no
/// column qualifies every column is used.
pub fn text_like_columns(table: &Table) -> Vec<String> {
    let selected: Vec<String> = table
        .columns()
        .iter()
        .filter(|column| {
            let sample: Vec<&str> = table
                .column_values(column)
                .take(TEXT_SAMPLE)
                .map(|(_, v)| v)
                .collect();
            if sample.is_empty() {
                return false;
            }
            let numeric = sample.iter().all(|v| v.parse::<f64>().is_ok());
            let mean_len =
                sample.iter().map(|v| v.chars().count()).sum::<usize>() as f64 / sample.len() as f64;
            !numeric && mean_len > MIN_MEAN_TEXT_LEN
        })
        .cloned()
        .collect();

    if selected.is_empty() {
        table.columns().to_vec()
    } else {
        selected
    }
}

/// Render one row as its embedding document.
pub fn row_document(row: &RowData, columns: &[String]) -> String {
    columns
        .iter()
        .filter_map(|c| row.get(c).map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Map a squared L2 distance to a `0..=100` similarity, rounded to 2 dp.
pub fn distance_to_similarity(distance: f32, max_distance: f32) -> f64 {
    if max_distance <= 0.0 || !distance.is_finite() {
        return 0.0;
    }
    let raw = (1.0 - distance as f64 / max_distance as f64) * 100.0;
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

impl VectorIndex {
    /// Select text columns, render documents and embed them in batches.
    pub async fn build(
        table: Arc<Table>,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let text_columns = text_like_columns(&table);
        let documents: Vec<String> = table
            .rows()
            .iter()
            .map(|row| row_document(row, &text_columns))
            .collect();
        debug!(columns = ?text_columns, rows = documents.len(), "building vector index");

        let embeddings = embed_documents(embedder, &documents, batch_size).await?;
        info!(
            rows = embeddings.len(),
            dims = embedder.dims(),
            model = embedder.model_name(),
            "vector index built"
        );

        Ok(Self {
            table,
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            text_columns,
            documents,
            embeddings,
        })
    }

    /// Reassemble an index from persisted parts, checking shape consistency.
    pub fn from_parts(
        table: Arc<Table>,
        model: String,
        dims: usize,
        text_columns: Vec<String>,
        documents: Vec<String>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<Self> {
        let key = model.clone();
        if documents.len() != table.len() || embeddings.len() != table.len() {
            return Err(Error::incompatible(
                key,
                format!(
                    "{} rows but {} documents and {} vectors",
                    table.len(),
                    documents.len(),
                    embeddings.len()
                ),
            ));
        }
        if let Some((i, v)) = embeddings.iter().enumerate().find(|(_, v)| v.len() != dims) {
            return Err(Error::incompatible(
                key,
                format!("vector {} has {} dimensions, expected {}", i, v.len(), dims),
            ));
        }
        if let Some(c) = text_columns.iter().find(|c| !table.has_column(c)) {
            return Err(Error::incompatible(key, format!("unknown text column '{}'", c)));
        }
        Ok(Self {
            table,
            model,
            dims,
            text_columns,
            documents,
            embeddings,
        })
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn text_columns(&self) -> &[String] {
        &self.text_columns
    }

    pub fn documents(&self) -> &[String] {
        &self.documents
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = EmbeddingRecord<'_>> {
        self.embeddings
            .iter()
            .zip(self.documents.iter())
            .zip(self.table.rows().iter())
            .enumerate()
            .map(|(row_index, ((vector, document), data))| EmbeddingRecord {
                row_index,
                vector,
                document,
                data,
            })
    }

    /// Fail unless `embedder` produces vectors comparable with this index.
    pub fn ensure_compatible(&self, embedder: &dyn EmbeddingProvider) -> Result<()> {
        if embedder.model_name() != self.model || embedder.dims() != self.dims {
            return Err(Error::incompatible(
                self.model.clone(),
                format!(
                    "index built with {} ({} dims), embedder is {} ({} dims)",
                    self.model,
                    self.dims,
                    embedder.model_name(),
                    embedder.dims()
                ),
            ));
        }
        Ok(())
    }

    /// Embed `query` and return the `top_k` nearest rows.
    pub async fn search(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        top_k: usize,
        max_distance: f32,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_compatible(embedder)?;
        if self.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embedder.embed(query).await?;
        Ok(self.search_vector(&query_vec, top_k, max_distance))
    }

    /// Nearest rows to an already-embedded query, ascending distance.
    ///
    /// Equal distances keep row order.
    pub fn search_vector(&self, query: &[f32], top_k: usize, max_distance: f32) -> Vec<SearchResult> {
        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, v)| (i, squared_l2(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let mut results: Vec<SearchResult> = scored
            .into_iter()
            .filter_map(|(i, distance)| {
                let data = self.table.row(i)?;
                Some(SearchResult {
                    rank: 0,
                    score: distance_to_similarity(distance, max_distance),
                    source_id: row_id(i),
                    row_index: i,
                    source: MatchSource::Vector,
                    matched_column: None,
                    matched_value: None,
                    data: data.clone(),
                })
            })
            .collect();
        assign_ranks(&mut results);
        results
    }
}
