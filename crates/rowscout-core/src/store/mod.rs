//! Persistence abstraction for header records and built indexes.
//!
//! The [`IndexStore`] trait is everything the retrieval pipeline needs from
//! storage, so backends are pluggable: the `rowscout` app provides a
//! filesystem store with atomic publish, and [`memory::InMemoryIndexStore`]
//! backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::graph::GraphEdge;
use crate::models::{RawSheet, Table};
use crate::rag::RagMode;
use crate::schema::{HeaderRecord, SchemaUnderstanding};

/// Version of the persisted bundle layout. Bumped on incompatible changes.
pub const FORMAT_VERSION: u32 = 1;

/// Stable identifier of a persisted index: `<stem>-<16 hex of fingerprint>`.
///
/// Keying by content rather than by name alone means two different files
/// that share a stem never reuse each other's index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexKey(String);

impl IndexKey {
    pub fn new(stem: &str, fingerprint: &str) -> Self {
        let safe_stem: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let short: String = fingerprint.chars().take(16).collect();
        Self(format!("{}-{}", safe_stem, short))
    }

    pub fn for_sheet(sheet: &RawSheet) -> Self {
        Self::new(&sheet.stem, &sheet.fingerprint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata describing a persisted bundle, checked before reuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub key: IndexKey,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub dims: usize,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub text_columns: Vec<String>,
    /// SHA-256 over the row documents, in order, newline separated.
    pub documents_sha256: String,
    pub mode: RagMode,
    pub has_schema: bool,
    pub has_graph: bool,
}

/// Everything needed to reopen an index without re-embedding.
#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub manifest: IndexManifest,
    pub table: Table,
    pub documents: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
    pub schema: Option<SchemaUnderstanding>,
    pub graph: Option<Vec<GraphEdge>>,
}

/// Hash of the per-row documents as recorded in the manifest.
pub fn documents_digest(documents: &[String]) -> String {
    let mut hasher = Sha256::new();
    for d in documents {
        hasher.update(d.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

impl PersistedIndex {
    /// Check the bundle is internally consistent and readable by this build.
    pub fn validate(&self) -> Result<()> {
        let m = &self.manifest;
        let fail = |reason: String| Err(Error::incompatible(m.key.as_str(), reason));

        if m.format_version != FORMAT_VERSION {
            return fail(format!(
                "format version {} is not supported (expected {})",
                m.format_version, FORMAT_VERSION
            ));
        }
        if m.row_count != self.table.len()
            || self.documents.len() != m.row_count
            || self.embeddings.len() != m.row_count
        {
            return fail(format!(
                "manifest says {} rows; found {} rows, {} documents, {} vectors",
                m.row_count,
                self.table.len(),
                self.documents.len(),
                self.embeddings.len()
            ));
        }
        if m.columns != self.table.columns() {
            return fail("column list does not match stored table".to_string());
        }
        if let Some(v) = self.embeddings.iter().find(|v| v.len() != m.dims) {
            return fail(format!("vector of {} dimensions, expected {}", v.len(), m.dims));
        }
        if documents_digest(&self.documents) != m.documents_sha256 {
            return fail("documents do not match manifest digest".to_string());
        }
        if m.has_schema != self.schema.is_some() || m.has_graph != self.graph.is_some() {
            return fail("manifest artifact flags do not match bundle contents".to_string());
        }
        if let Some(edge) = self
            .graph
            .iter()
            .flatten()
            .find(|e| e.a >= m.row_count || e.b >= m.row_count)
        {
            return fail(format!("graph edge {}-{} references a missing row", edge.a, edge.b));
        }
        Ok(())
    }
}

/// Abstract storage backend for header records and index bundles.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load_header`](IndexStore::load_header) | Cached header record for a file stem |
/// | [`save_header`](IndexStore::save_header) | Replace the header record for a file stem |
/// | [`load_index`](IndexStore::load_index) | Persisted bundle for a key, if present |
/// | [`save_index`](IndexStore::save_index) | Publish a bundle, replacing any previous one |
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn load_header(&self, stem: &str) -> Result<Option<HeaderRecord>>;

    async fn save_header(&self, stem: &str, record: &HeaderRecord) -> Result<()>;

    /// Returns `None` when nothing is stored under `key`. Implementations
    /// do not validate the bundle; callers use [`PersistedIndex::validate`].
    async fn load_index(&self, key: &IndexKey) -> Result<Option<PersistedIndex>>;

    /// Publish `index` under its manifest key. Readers observe either the
    /// previous bundle or the new one, never a mix.
    async fn save_index(&self, index: &PersistedIndex) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowData;

    fn bundle() -> PersistedIndex {
        let mut row = RowData::new();
        row.insert("code".into(), "PG-100".into());
        let table = Table::new(vec!["code".into()], vec![row]).unwrap();
        let documents = vec!["PG-100".to_string()];
        PersistedIndex {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                key: IndexKey::new("prices", "0123456789abcdef0123"),
                created_at: Utc::now(),
                model: "hash-bow".into(),
                dims: 2,
                row_count: 1,
                columns: vec!["code".into()],
                text_columns: vec!["code".into()],
                documents_sha256: documents_digest(&documents),
                mode: RagMode::Flat,
                has_schema: false,
                has_graph: false,
            },
            table,
            documents,
            embeddings: vec![vec![0.6, 0.8]],
            schema: None,
            graph: None,
        }
    }

    #[test]
    fn test_index_key_uses_fingerprint_prefix() {
        let key = IndexKey::new("price list", "0123456789abcdef0123");
        assert_eq!(key.as_str(), "price_list-0123456789abcdef");
        assert_ne!(key, IndexKey::new("price list", "ffff456789abcdef0123"));
    }

    #[test]
    fn test_validate_accepts_consistent_bundle() {
        bundle().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_format_version() {
        let mut b = bundle();
        b.manifest.format_version = 99;
        let err = b.validate().unwrap_err();
        assert!(err.to_string().contains("format version 99"));
    }

    #[test]
    fn test_validate_rejects_dimension_mismatch() {
        let mut b = bundle();
        b.embeddings = vec![vec![1.0, 0.0, 0.0]];
        assert!(matches!(b.validate(), Err(Error::IncompatibleIndex { .. })));
    }

    #[test]
    fn test_validate_rejects_edited_documents() {
        let mut b = bundle();
        b.documents = vec!["PG-101".into()];
        assert!(b.validate().is_err());
    }
}
