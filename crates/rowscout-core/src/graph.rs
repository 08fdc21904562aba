//! Row graph for neighbourhood-expanded retrieval.
//!
//! Every row is a node; its embedding is the same per-row document vector the
//! [`VectorIndex`] holds. Two nodes are joined by an undirected edge when
//! they share an equal value in the `from` column of a schema relationship,
//! and the edge is labelled with the relationship type.
//!
//! # Scaling limit
//!
//! Grouping by shared value is quadratic in group size: a low-cardinality
//! column (say, a `make` shared by every row) would produce a near-complete
//! graph. Pair generation for a single value is therefore capped at
//! `max_edges_per_group`; reaching the cap logs a warning and the rest of
//! that group's pairs are dropped.
//!
//! # Query order
//!
//! Results follow traversal order (seed, then its unvisited neighbours, then
//! the next seed) rather than score order, so each seed stays next to its
//! local neighbourhood.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{assign_ranks, row_id, MatchSource, SearchResult};
use crate::schema::SchemaUnderstanding;
use crate::vector::VectorIndex;

/// Type tag carried by every node.
pub const NODE_TYPE: &str = "product";

/// An undirected, labelled edge between two rows (`a < b`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub a: usize,
    pub b: usize,
    pub relationship: String,
}

/// A row in the graph together with its neighbours.
#[derive(Debug, Clone, Copy)]
pub struct GraphNode<'g> {
    pub row_index: usize,
    pub kind: &'static str,
    pub embedding: &'g [f32],
    pub neighbors: &'g [usize],
}

impl GraphNode<'_> {
    pub fn id(&self) -> String {
        row_id(self.row_index)
    }
}

/// Graph over the rows of a [`VectorIndex`].
#[derive(Debug, Clone)]
pub struct GraphIndex {
    vectors: VectorIndex,
    edges: Vec<GraphEdge>,
    adjacency: Vec<Vec<usize>>,
}

impl GraphIndex {
    /// Link rows that share a value in each relationship's `from` column.
    pub fn build(
        vectors: VectorIndex,
        schema: &SchemaUnderstanding,
        max_edges_per_group: usize,
    ) -> Self {
        let table = vectors.table().clone();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut seen: HashSet<(usize, usize)> = HashSet::new();

        for rel in &schema.relationships {
            let Some(column) = SchemaUnderstanding::resolve_column(&table, &rel.from) else {
                warn!(column = %rel.from, relationship = %rel.kind, "relationship column not in table; skipping");
                continue;
            };

            let mut order: Vec<&str> = Vec::new();
            let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
            for (row, value) in table.column_values(column) {
                groups
                    .entry(value)
                    .or_insert_with(|| {
                        order.push(value);
                        Vec::new()
                    })
                    .push(row);
            }

            for value in order {
                let members = &groups[value];
                let mut generated = 0usize;
                'pairs: for (i, &a) in members.iter().enumerate() {
                    for &b in &members[i + 1..] {
                        if generated >= max_edges_per_group {
                            warn!(
                                column,
                                value,
                                rows = members.len(),
                                cap = max_edges_per_group,
                                "edge cap reached for shared value; remaining pairs dropped"
                            );
                            break 'pairs;
                        }
                        generated += 1;
                        if seen.insert((a, b)) {
                            edges.push(GraphEdge {
                                a,
                                b,
                                relationship: rel.kind.clone(),
                            });
                        }
                    }
                }
            }
        }

        info!(nodes = vectors.len(), edges = edges.len(), "graph built");
        Self::assemble(vectors, edges)
    }

    /// Rebuild a graph from persisted edges.
    pub fn from_edges(vectors: VectorIndex, edges: Vec<GraphEdge>) -> Result<Self> {
        let n = vectors.len();
        if let Some(e) = edges.iter().find(|e| e.a >= n || e.b >= n || e.a == e.b) {
            return Err(Error::incompatible(
                vectors.model(),
                format!("invalid graph edge {}-{} for {} nodes", e.a, e.b, n),
            ));
        }
        Ok(Self::assemble(vectors, edges))
    }

    fn assemble(vectors: VectorIndex, edges: Vec<GraphEdge>) -> Self {
        let mut adjacency = vec![Vec::new(); vectors.len()];
        for e in &edges {
            adjacency[e.a].push(e.b);
            adjacency[e.b].push(e.a);
        }
        Self {
            vectors,
            edges,
            adjacency,
        }
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, row_index: usize) -> Option<GraphNode<'_>> {
        Some(GraphNode {
            row_index,
            kind: NODE_TYPE,
            embedding: self.vectors.embeddings().get(row_index)?,
            neighbors: self.adjacency.get(row_index)?,
        })
    }

    pub fn neighbors(&self, row_index: usize) -> &[usize] {
        self.adjacency.get(row_index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Embed `query`, then expand its `top_k` best seeds by one hop.
    pub async fn query(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.vectors.ensure_compatible(embedder)?;
        if self.vectors.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embedder.embed(query).await?;
        Ok(self.query_vector(&query_vec, top_k))
    }

    /// Seeds are the `top_k` nodes by cosine similarity. Each unvisited seed
    /// is emitted followed by its unvisited neighbours, each scored with its
    /// own similarity. Output may be longer than `top_k`.
    pub fn query_vector(&self, query: &[f32], top_k: usize) -> Vec<SearchResult> {
        let scores: Vec<f64> = self
            .vectors
            .embeddings()
            .iter()
            .map(|v| cosine_score(query, v))
            .collect();

        let mut ranked: Vec<usize> = (0..scores.len()).collect();
        ranked.sort_by(|a, b| {
            scores[*b]
                .partial_cmp(&scores[*a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let table = self.vectors.table();
        let mut visited = vec![false; scores.len()];
        let mut results = Vec::new();
        let emit = |row: usize, results: &mut Vec<SearchResult>| {
            if let Some(data) = table.row(row) {
                results.push(SearchResult {
                    rank: 0,
                    score: scores[row],
                    source_id: row_id(row),
                    row_index: row,
                    source: MatchSource::Graph,
                    matched_column: None,
                    matched_value: None,
                    data: data.clone(),
                });
            }
        };

        for &seed in ranked.iter().take(top_k) {
            if visited[seed] {
                continue;
            }
            visited[seed] = true;
            emit(seed, &mut results);
            for &n in &self.adjacency[seed] {
                if !visited[n] {
                    visited[n] = true;
                    emit(n, &mut results);
                }
            }
        }

        debug!(seeds = top_k.min(scores.len()), results = results.len(), "graph query");
        assign_ranks(&mut results);
        results
    }
}

fn cosine_score(a: &[f32], b: &[f32]) -> f64 {
    (cosine_similarity(a, b) as f64 * 100.0).clamp(0.0, 100.0)
}
