//! Flat and graph retrieval strategies behind one interface.
//!
//! [`RagIndex`] is a tagged union chosen by [`RagMode`] at build time. Both
//! variants share the per-row embeddings; the graph variant adds
//! schema-derived edges and one-hop neighbourhood expansion.
//! [`RagEngine::answer`] runs a strategy query and hands the leading results
//! to the ranker's two-pass selection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::{Services, Settings};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::graph::GraphIndex;
use crate::models::{SearchResult, Table};
use crate::ranker::{BestMatch, ResultRanker};
use crate::schema::SchemaUnderstanding;
use crate::vector::VectorIndex;

/// Retrieval strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RagMode {
    #[default]
    Flat,
    Graph,
}

impl FromStr for RagMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" | "normal" => Ok(RagMode::Flat),
            "graph" => Ok(RagMode::Graph),
            other => Err(Error::InvalidInput(format!(
                "unknown retrieval mode '{}' (expected 'flat' or 'graph')",
                other
            ))),
        }
    }
}

impl fmt::Display for RagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RagMode::Flat => "flat",
            RagMode::Graph => "graph",
        })
    }
}

/// A built retrieval strategy.
#[derive(Debug, Clone)]
pub enum RagIndex {
    Flat(VectorIndex),
    Graph(GraphIndex),
}

impl RagIndex {
    /// Embed `table` and, for [`RagMode::Graph`], link rows using `schema`.
    pub async fn build(
        mode: RagMode,
        table: Arc<Table>,
        schema: Option<&SchemaUnderstanding>,
        services: &Services,
        settings: &Settings,
    ) -> Result<Self> {
        let vectors =
            VectorIndex::build(table, services.embedder.as_ref(), settings.batch_size).await?;
        Self::from_vectors(mode, vectors, schema, settings)
    }

    /// Wrap an existing vector index in the requested strategy.
    pub fn from_vectors(
        mode: RagMode,
        vectors: VectorIndex,
        schema: Option<&SchemaUnderstanding>,
        settings: &Settings,
    ) -> Result<Self> {
        match mode {
            RagMode::Flat => Ok(RagIndex::Flat(vectors)),
            RagMode::Graph => {
                let schema = schema.ok_or_else(|| {
                    Error::InvalidInput("graph mode needs a schema understanding".to_string())
                })?;
                Ok(RagIndex::Graph(GraphIndex::build(
                    vectors,
                    schema,
                    settings.max_edges_per_group,
                )))
            }
        }
    }

    pub fn mode(&self) -> RagMode {
        match self {
            RagIndex::Flat(_) => RagMode::Flat,
            RagIndex::Graph(_) => RagMode::Graph,
        }
    }

    pub fn vectors(&self) -> &VectorIndex {
        match self {
            RagIndex::Flat(v) => v,
            RagIndex::Graph(g) => g.vectors(),
        }
    }

    pub fn graph(&self) -> Option<&GraphIndex> {
        match self {
            RagIndex::Flat(_) => None,
            RagIndex::Graph(g) => Some(g),
        }
    }

    /// Ranked results for `query`. The graph variant may return more than
    /// `top_k` rows.
    pub async fn query(
        &self,
        embedder: &dyn EmbeddingProvider,
        query: &str,
        top_k: usize,
        max_distance: f32,
    ) -> Result<Vec<SearchResult>> {
        match self {
            RagIndex::Flat(v) => v.search(embedder, query, top_k, max_distance).await,
            RagIndex::Graph(g) => g.query(embedder, query, top_k).await,
        }
    }
}

/// Answers queries against one [`RagIndex`].
pub struct RagEngine<'a> {
    index: &'a RagIndex,
    services: &'a Services,
    settings: &'a Settings,
}

impl<'a> RagEngine<'a> {
    pub fn new(index: &'a RagIndex, services: &'a Services, settings: &'a Settings) -> Self {
        Self {
            index,
            services,
            settings,
        }
    }

    /// Query the strategy, keep the first `top_k` results and let the
    /// reasoning service pick the best one.
    pub async fn answer(&self, query: &str, top_k: usize) -> Result<BestMatch> {
        let mut results = self
            .index
            .query(
                self.services.embedder.as_ref(),
                query,
                top_k,
                self.settings.max_distance,
            )
            .await?;
        info!(mode = %self.index.mode(), found = results.len(), "rag query");
        if results.is_empty() {
            return Err(Error::NoCandidates(query.to_string()));
        }
        results.truncate(top_k);

        ResultRanker::new(self.services.completer.clone())
            .select_best(query, &results)
            .await
    }
}
