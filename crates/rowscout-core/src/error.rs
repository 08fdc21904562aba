//! Error types for rowscout core.
//!
//! Fail-open paths (header detection, unknown fuzzy columns) never produce
//! an [`Error`]; they log a warning and continue. Everything here aborts the
//! current query or build and is surfaced to the caller.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal error classes for building, loading and querying an index.
#[derive(Error, Debug)]
pub enum Error {
    /// The embedding capability failed or returned a malformed batch.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The completion capability failed (network, API, or empty reply).
    #[error("completion error: {0}")]
    Completion(String),

    /// Schema analysis did not return the documented JSON shape.
    #[error("schema analysis returned an invalid response: {0}")]
    SchemaResponse(String),

    /// Result ranking did not return the documented JSON shape.
    #[error("result ranking returned an invalid response: {0}")]
    RankingResponse(String),

    /// Line-item extraction did not return the documented JSON shape.
    #[error("line item extraction returned an invalid response: {0}")]
    ExtractionResponse(String),

    /// A persisted index cannot be reused with the current data or model.
    #[error("incompatible index '{key}': {reason}")]
    IncompatibleIndex { key: String, reason: String },

    /// The index store failed to read or write.
    #[error("index store error: {0}")]
    Store(String),

    /// Neither fuzzy nor vector search produced a candidate.
    #[error("no candidates found for query '{0}'")]
    NoCandidates(String),

    /// Caller supplied data that violates a table or index invariant.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JSON (de)serialization of persisted artifacts failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn incompatible(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleIndex {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
