//! Explicit process context handed to every component.
//!
//! [`Services`] bundles the external capabilities; [`Settings`] carries the
//! retrieval tuning knobs, decoupled from the application's config format.
//! Both are built once at startup and passed down, never stored globally.

use std::sync::Arc;

use crate::completion::CompletionProvider;
use crate::embedding::EmbeddingProvider;

/// Capability handles shared by all components of a session.
#[derive(Clone)]
pub struct Services {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub completer: Arc<dyn CompletionProvider>,
}

impl Services {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            embedder,
            completer,
        }
    }
}

/// Retrieval and build tuning parameters.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum fuzzy results (also the per-column match limit).
    pub fuzzy_limit: usize,
    /// Number of nearest rows fetched from the vector index.
    pub vector_limit: usize,
    /// Minimum fuzzy score (0–100) for a value to count as a match.
    pub score_cutoff: f64,
    /// Reference distance for L2 → similarity conversion. A calibration
    /// constant for the embedding model, not a bound on real distances.
    pub max_distance: f32,
    /// Seeds taken from the ranked list by RAG queries.
    pub top_k: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Ceiling on edges created for one shared value during graph build.
    pub max_edges_per_group: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fuzzy_limit: 10,
            vector_limit: 10,
            score_cutoff: 60.0,
            max_distance: 10.0,
            top_k: 6,
            batch_size: 32,
            max_edges_per_group: 5000,
        }
    }
}
