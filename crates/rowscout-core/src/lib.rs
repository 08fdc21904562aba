//! # rowscout core
//!
//! Retrieval logic for finding the single best-matching row of a tabular
//! dataset (price lists, product catalogs) for a free-text query.
//!
//! This crate contains no network clients, no filesystem I/O and no async
//! runtime. Embedding and completion backends are reached through the
//! [`embedding::EmbeddingProvider`] and [`completion::CompletionProvider`]
//! traits; persistence goes through the [`store::IndexStore`] trait. The
//! `rowscout` application crate supplies the concrete implementations.
//!
//! ## Pipeline
//!
//! ```text
//! RawSheet ──▶ schema (header row, column semantics) ──▶ Table
//!                                                         │
//!            ┌──────────────────────┬─────────────────────┤
//!            ▼                      ▼                     ▼
//!      lexical (query time)   vector (build time)   graph (build time)
//!            └──────────┬───────────┘                     │
//!                       ▼                                 ▼
//!                  retriever ──▶ ranker ◀──────────────── rag
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Table`, `RawSheet`, `SearchResult`, confidence bands |
//! | [`context`] | `Services` (capabilities) and `Settings` (tuning) |
//! | [`embedding`] | Embedding trait, batching, vector math and BLOB encoding |
//! | [`completion`] | Completion trait |
//! | [`schema`] | Header-row detection and schema understanding |
//! | [`lexical`] | Token-sorted fuzzy matching with the perfect-match short circuit |
//! | [`vector`] | Brute-force L2 index over per-row documents |
//! | [`graph`] | Row graph linked by schema relationships, neighborhood expansion |
//! | [`rag`] | Flat/graph strategy selection and the two-pass answer |
//! | [`ranker`] | Typed contracts with the reasoning service |
//! | [`retriever`] | Fuzzy-first smart search |
//! | [`catalog`] | Open-or-build orchestration over an [`store::IndexStore`] |
//! | [`quote`] | Line-item extraction from enquiry emails and per-line matching |
//! | [`store`] | Index store trait, persisted bundle, in-memory store |
//! | `testing` | Deterministic fake capabilities for tests (`testing` feature) |

pub mod catalog;
pub mod completion;
pub mod context;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod lexical;
pub mod models;
pub mod quote;
pub mod rag;
pub mod ranker;
pub mod retriever;
pub mod schema;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vector;

pub use catalog::{Catalog, OpenOptions};
pub use context::{Services, Settings};
pub use error::{Error, Result};
pub use models::{Confidence, MatchSource, RawSheet, RowData, SearchResult, Table};

use sha2::{Digest, Sha256};

/// SHA-256 of `bytes` as lowercase hex.
///
/// Used as the content fingerprint of source files: header records and
/// index keys are invalidated whenever a single byte changes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_changes_with_single_byte() {
        let a = fingerprint(b"code,desc\nPG-100,Gauge\n");
        let b = fingerprint(b"code,desc\nPG-101,Gauge\n");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(b"code,desc\nPG-100,Gauge\n"));
    }
}
