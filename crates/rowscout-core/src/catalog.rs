//! Open-or-build orchestration for one source file.
//!
//! [`Catalog::open`] turns a [`RawSheet`] into a queryable index:
//!
//! 1. Resolve the header row (caller override, else [`SchemaDetector`]).
//! 2. Build the [`Table`] and derive the [`IndexKey`] from stem + fingerprint.
//! 3. Reuse the persisted bundle when it validates and matches the table;
//!    otherwise embed, analyse the schema (graph mode only) and save.
//!
//! A stored bundle whose model or dimensions differ from the configured
//! embedder is an error, never silently re-embedded: mixing models makes
//! vectors incomparable, and the caller should rebuild explicitly.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::context::{Services, Settings};
use crate::error::Result;
use crate::graph::GraphIndex;
use crate::models::{RawSheet, Table};
use crate::rag::{RagEngine, RagIndex, RagMode};
use crate::ranker::BestMatch;
use crate::retriever::{Retriever, SmartSearchOutcome, SmartSearchRequest};
use crate::schema::{SchemaDetector, SchemaUnderstanding};
use crate::store::{
    documents_digest, IndexKey, IndexManifest, IndexStore, PersistedIndex, FORMAT_VERSION,
};
use crate::vector::VectorIndex;

/// How to open a catalog.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub mode: RagMode,
    /// Ignore any persisted bundle and rebuild.
    pub force_rebuild: bool,
    /// Use this header row instead of detecting it.
    pub header_row: Option<usize>,
}

/// A queryable index over one source file.
pub struct Catalog {
    key: IndexKey,
    header_row: usize,
    index: RagIndex,
    schema: Option<SchemaUnderstanding>,
    services: Services,
    settings: Settings,
    loaded: bool,
}

impl Catalog {
    /// Load the persisted index for `sheet`, or build and persist one.
    pub async fn open(
        sheet: &RawSheet,
        services: Services,
        store: Arc<dyn IndexStore>,
        settings: Settings,
        options: &OpenOptions,
    ) -> Result<Self> {
        let detector = SchemaDetector::new(services.completer.clone(), store.clone());
        let header_row = match options.header_row {
            Some(row) => row,
            None => detector.detect_header(sheet).await,
        };
        let table = Arc::new(Table::from_sheet(sheet, header_row)?);
        let key = IndexKey::for_sheet(sheet);
        info!(key = %key, rows = table.len(), columns = table.columns().len(), "table loaded");

        if !options.force_rebuild {
            if let Some(persisted) = store.load_index(&key).await? {
                persisted.validate()?;
                if persisted.table == *table {
                    let catalog = Self::restore(
                        key, header_row, persisted, &detector, services, settings, options.mode,
                    )
                    .await?;
                    if catalog.loaded {
                        info!(key = %catalog.key, mode = %catalog.mode(), "index loaded");
                    } else {
                        store.save_index(&catalog.to_persisted()).await?;
                    }
                    return Ok(catalog);
                }
                warn!(key = %key, "stored table differs from source; rebuilding index");
            }
        }

        let schema = match options.mode {
            RagMode::Graph => Some(detector.analyze_schema(&table).await?),
            RagMode::Flat => None,
        };
        let index =
            RagIndex::build(options.mode, table, schema.as_ref(), &services, &settings).await?;
        let catalog = Self {
            key,
            header_row,
            index,
            schema,
            services,
            settings,
            loaded: false,
        };
        store.save_index(&catalog.to_persisted()).await?;
        info!(key = %catalog.key, mode = %catalog.mode(), "index built and saved");
        Ok(catalog)
    }

    /// Reopen a validated bundle. Sets `loaded = false` when the requested
    /// mode needed new artifacts (schema or graph) that must be saved.
    async fn restore(
        key: IndexKey,
        header_row: usize,
        persisted: PersistedIndex,
        detector: &SchemaDetector,
        services: Services,
        settings: Settings,
        mode: RagMode,
    ) -> Result<Self> {
        let PersistedIndex {
            manifest,
            table,
            documents,
            embeddings,
            mut schema,
            graph,
        } = persisted;
        let table = Arc::new(table);
        let vectors = VectorIndex::from_parts(
            table.clone(),
            manifest.model,
            manifest.dims,
            manifest.text_columns,
            documents,
            embeddings,
        )?;
        vectors.ensure_compatible(services.embedder.as_ref())?;

        let mut loaded = true;
        let index = match (mode, graph) {
            (RagMode::Flat, _) => RagIndex::Flat(vectors),
            (RagMode::Graph, Some(edges)) => RagIndex::Graph(GraphIndex::from_edges(vectors, edges)?),
            (RagMode::Graph, None) => {
                loaded = false;
                if schema.is_none() {
                    schema = Some(detector.analyze_schema(&table).await?);
                }
                RagIndex::from_vectors(RagMode::Graph, vectors, schema.as_ref(), &settings)?
            }
        };

        Ok(Self {
            key,
            header_row,
            index,
            schema,
            services,
            settings,
            loaded,
        })
    }

    /// Snapshot of this catalog in the persisted bundle format.
    pub fn to_persisted(&self) -> PersistedIndex {
        let vectors = self.index.vectors();
        let table = vectors.table();
        let graph = self.index.graph().map(|g| g.edges().to_vec());
        PersistedIndex {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                key: self.key.clone(),
                created_at: Utc::now(),
                model: vectors.model().to_string(),
                dims: vectors.dims(),
                row_count: table.len(),
                columns: table.columns().to_vec(),
                text_columns: vectors.text_columns().to_vec(),
                documents_sha256: documents_digest(vectors.documents()),
                mode: self.index.mode(),
                has_schema: self.schema.is_some(),
                has_graph: graph.is_some(),
            },
            table: table.as_ref().clone(),
            documents: vectors.documents().to_vec(),
            embeddings: vectors.embeddings().to_vec(),
            schema: self.schema.clone(),
            graph,
        }
    }

    pub fn key(&self) -> &IndexKey {
        &self.key
    }

    pub fn header_row(&self) -> usize {
        self.header_row
    }

    pub fn table(&self) -> &Arc<Table> {
        self.index.vectors().table()
    }

    pub fn index(&self) -> &RagIndex {
        &self.index
    }

    pub fn mode(&self) -> RagMode {
        self.index.mode()
    }

    pub fn schema(&self) -> Option<&SchemaUnderstanding> {
        self.schema.as_ref()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// True when the index came from the store unchanged.
    pub fn was_loaded(&self) -> bool {
        self.loaded
    }

    pub fn retriever(&self) -> Retriever<'_> {
        Retriever::new(self.index.vectors(), &self.services)
    }

    /// Fuzzy-first smart search with this catalog's settings.
    pub async fn smart_search(&self, req: &SmartSearchRequest<'_>) -> Result<SmartSearchOutcome> {
        self.retriever()
            .smart_search(req, self.settings.max_distance)
            .await
    }

    /// RAG answer: strategy query plus two-pass selection.
    pub async fn ask(&self, query: &str, top_k: usize) -> Result<BestMatch> {
        RagEngine::new(&self.index, &self.services, &self.settings)
            .answer(query, top_k)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::memory::InMemoryIndexStore;
    use crate::testing::{HashEmbedder, ScriptedCompleter};

    const SCHEMA_REPLY: &str = r#"{
        "column_analysis": {"columns": {}, "primary_keys": ["code"], "value_columns": ["rate"]},
        "relationships": [{"from": "make", "to": "code", "type": "same_make"}],
        "data_patterns": {},
        "query_examples": []
    }"#;

    fn sheet(tag: &str) -> RawSheet {
        let cell = |s: &str| Some(s.to_string());
        RawSheet {
            name: "gauges.csv".into(),
            stem: "gauges".into(),
            fingerprint: crate::fingerprint(tag.as_bytes()),
            rows: vec![
                vec![cell("Description"), cell("Code"), cell("Make")],
                vec![cell("Pressure Gauge A"), cell("PG-100"), cell("Wika")],
                vec![cell("Pressure Gauge B"), cell("PG-200"), cell("Baumer")],
                vec![cell("Pressure Switch"), cell("PS-300"), cell("Wika")],
            ],
        }
    }

    struct Fixture {
        embedder: Arc<HashEmbedder>,
        completer: Arc<ScriptedCompleter>,
        store: Arc<InMemoryIndexStore>,
    }

    impl Fixture {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                embedder: Arc::new(HashEmbedder::new(32)),
                completer: Arc::new(ScriptedCompleter::new(
                    replies.into_iter().map(String::from).collect(),
                )),
                store: Arc::new(InMemoryIndexStore::new()),
            }
        }

        fn services(&self) -> Services {
            Services::new(self.embedder.clone(), self.completer.clone())
        }

        async fn open(&self, sheet: &RawSheet, options: &OpenOptions) -> Result<Catalog> {
            Catalog::open(
                sheet,
                self.services(),
                self.store.clone(),
                Settings::default(),
                options,
            )
            .await
        }
    }

    fn flat_with_header() -> OpenOptions {
        OpenOptions {
            header_row: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_open_reuses_embeddings() {
        let fx = Fixture::new(vec![]);
        let s = sheet("v1");
        let first = fx.open(&s, &flat_with_header()).await.unwrap();
        assert!(!first.was_loaded());
        let embedded = fx.embedder.texts_embedded();
        assert_eq!(embedded, 3);

        let second = fx.open(&s, &flat_with_header()).await.unwrap();
        assert!(second.was_loaded());
        assert_eq!(fx.embedder.texts_embedded(), embedded);
        assert_eq!(
            second.index().vectors().embeddings(),
            first.index().vectors().embeddings()
        );
        assert_eq!(second.table().len(), 3);
        assert_eq!(fx.completer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_changed_file_gets_new_key() {
        let fx = Fixture::new(vec![]);
        let a = fx.open(&sheet("v1"), &flat_with_header()).await.unwrap();
        let b = fx.open(&sheet("v2"), &flat_with_header()).await.unwrap();
        assert_ne!(a.key(), b.key());
        assert!(!b.was_loaded());
        assert_eq!(fx.store.index_count(), 2);
    }

    #[tokio::test]
    async fn test_force_rebuild_skips_store() {
        let fx = Fixture::new(vec![]);
        let s = sheet("v1");
        fx.open(&s, &flat_with_header()).await.unwrap();
        let opts = OpenOptions {
            force_rebuild: true,
            ..flat_with_header()
        };
        let rebuilt = fx.open(&s, &opts).await.unwrap();
        assert!(!rebuilt.was_loaded());
        assert_eq!(fx.embedder.texts_embedded(), 6);
    }

    #[tokio::test]
    async fn test_other_model_is_incompatible() {
        let fx = Fixture::new(vec![]);
        let s = sheet("v1");
        fx.open(&s, &flat_with_header()).await.unwrap();

        let services = Services::new(Arc::new(HashEmbedder::new(16)), fx.completer.clone());
        let err = Catalog::open(
            &s,
            services,
            fx.store.clone(),
            Settings::default(),
            &flat_with_header(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::IncompatibleIndex { .. }));
    }

    #[tokio::test]
    async fn test_graph_mode_analyses_schema_once() {
        let fx = Fixture::new(vec![SCHEMA_REPLY]);
        let s = sheet("v1");
        let opts = OpenOptions {
            mode: RagMode::Graph,
            header_row: Some(0),
            ..Default::default()
        };
        let built = fx.open(&s, &opts).await.unwrap();
        assert_eq!(built.index().graph().unwrap().edges().len(), 1);
        assert!(built.schema().is_some());

        let loaded = fx.open(&s, &opts).await.unwrap();
        assert!(loaded.was_loaded());
        assert_eq!(loaded.index().graph().unwrap().edges().len(), 1);
        assert_eq!(fx.completer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_flat_bundle_upgrades_to_graph() {
        let fx = Fixture::new(vec![SCHEMA_REPLY]);
        let s = sheet("v1");
        fx.open(&s, &flat_with_header()).await.unwrap();
        let opts = OpenOptions {
            mode: RagMode::Graph,
            header_row: Some(0),
            ..Default::default()
        };
        let upgraded = fx.open(&s, &opts).await.unwrap();
        assert!(!upgraded.was_loaded());
        assert_eq!(fx.embedder.texts_embedded(), 3);

        let reloaded = fx.open(&s, &opts).await.unwrap();
        assert!(reloaded.was_loaded());
    }

    #[tokio::test]
    async fn test_header_detected_when_not_given() {
        let fx = Fixture::new(vec![r#"{"header_row_index": 0, "column_names": []}"#]);
        let catalog = fx.open(&sheet("v1"), &OpenOptions::default()).await.unwrap();
        assert_eq!(catalog.header_row(), 0);
        assert_eq!(catalog.table().columns(), &["description", "code", "make"]);
        assert_eq!(fx.completer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exact_code_through_catalog() {
        let fx = Fixture::new(vec![]);
        let catalog = fx.open(&sheet("v1"), &flat_with_header()).await.unwrap();
        let columns = vec!["code".to_string()];
        let req = SmartSearchRequest::new("PG-200", catalog.settings()).with_columns(&columns);
        let outcome = catalog.smart_search(&req).await.unwrap();
        assert!(outcome.is_exact());
        assert_eq!(outcome.best_match.data["description"], "Pressure Gauge B");
    }
}
