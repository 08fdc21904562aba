//! Integration tests for the provider and store traits.
//!
//! A custom [`EmbeddingProvider`] and the scripted completer drive
//! [`Catalog::open`] against the real [`FsIndexStore`], proving that
//! persisted indexes and header detections are reused only while the source
//! bytes and the embedding model are unchanged.

use async_trait::async_trait;
use rowscout::fs_store::FsIndexStore;
use rowscout_core::embedding::EmbeddingProvider;
use rowscout_core::rag::RagMode;
use rowscout_core::store::{IndexKey, IndexStore};
use rowscout_core::testing::ScriptedCompleter;
use rowscout_core::{Catalog, Error, OpenOptions, RawSheet, Services, Settings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ─── Test Embedder ──────────────────────────────────────────────────

/// Embeds text as keyword counts over a fixed vocabulary.
struct KeywordEmbedder {
    model: &'static str,
    texts: AtomicUsize,
}

const VOCAB: [&str; 6] = ["pressure", "gauge", "valve", "ball", "wika", "audco"];

impl KeywordEmbedder {
    fn new(model: &'static str) -> Self {
        Self {
            model,
            texts: AtomicUsize::new(0),
        }
    }

    fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        self.model
    }

    fn dims(&self) -> usize {
        VOCAB.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> rowscout_core::Result<Vec<Vec<f32>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = VOCAB
                    .iter()
                    .map(|w| lower.split_whitespace().filter(|t| t == w).count() as f32)
                    .collect();
                // Bias term keeps every vector non-zero.
                v.push(0.5);
                v
            })
            .collect())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

const SCHEMA_REPLY: &str = r#"{
    "column_analysis": {
        "columns": {"make": {"type": "text", "description": "manufacturer", "format": ""}},
        "primary_keys": ["code"],
        "value_columns": ["rate"]
    },
    "relationships": [{"from": "make", "to": "code", "type": "same_make"}],
    "data_patterns": {"code": "two letters, dash, digits"},
    "query_examples": [{"type": "lookup", "example": "PG-100", "columns_used": ["code"]}]
}"#;

fn sheet(title: &str) -> RawSheet {
    let cell = |s: &str| Some(s.to_string());
    let rows = vec![
        vec![cell(title)],
        vec![],
        vec![cell("Description"), cell("Make"), cell("Code"), cell("Rate")],
        vec![cell("Pressure Gauge"), cell("Wika"), cell("PG-100"), cell("1250")],
        vec![cell("Ball Valve"), cell("Audco"), cell("BV-25"), cell("890")],
        vec![cell("Pressure Gauge Glycerine"), cell("Wika"), cell("PG-160"), cell("1340")],
    ];
    RawSheet {
        name: "prices.xlsx".into(),
        stem: "prices".into(),
        fingerprint: rowscout_core::fingerprint(title.as_bytes()),
        rows,
    }
}

fn store(tmp: &TempDir) -> Arc<FsIndexStore> {
    Arc::new(FsIndexStore::new(tmp.path().join("store"), Duration::from_secs(5)))
}

fn services(embedder: &Arc<KeywordEmbedder>, completer: &Arc<ScriptedCompleter>) -> Services {
    Services::new(embedder.clone(), completer.clone())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reopen_reuses_persisted_vectors() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new("keywords-v1"));
    let completer = Arc::new(ScriptedCompleter::new(vec![
        r#"{"header_row_index": 2, "column_names": ["Description", "Make", "Code", "Rate"]}"#
            .to_string(),
    ]));
    let s = sheet("ACME price list");

    let first = Catalog::open(
        &s,
        services(&embedder, &completer),
        store(&tmp),
        Settings::default(),
        &OpenOptions::default(),
    )
    .await
    .unwrap();
    assert!(!first.was_loaded());
    assert_eq!(first.header_row(), 2);
    assert_eq!(first.table().len(), 3);
    let embedded = embedder.texts_embedded();
    assert_eq!(embedded, 3);

    let second = Catalog::open(
        &s,
        services(&embedder, &completer),
        store(&tmp),
        Settings::default(),
        &OpenOptions::default(),
    )
    .await
    .unwrap();
    assert!(second.was_loaded());
    assert_eq!(embedder.texts_embedded(), embedded);
    assert_eq!(completer.call_count(), 1, "header detection should be cached");

    let bits = |c: &Catalog| -> Vec<u32> {
        c.index()
            .vectors()
            .embeddings()
            .iter()
            .flatten()
            .map(|f| f.to_bits())
            .collect()
    };
    assert_eq!(bits(&first), bits(&second));
}

#[tokio::test]
async fn test_changed_bytes_miss_header_cache_and_index() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new("keywords-v1"));
    let completer = Arc::new(ScriptedCompleter::new(vec![
        r#"{"header_row_index": 2, "column_names": []}"#.to_string(),
        r#"{"header_row_index": 2, "column_names": []}"#.to_string(),
    ]));

    let v1 = Catalog::open(
        &sheet("ACME price list"),
        services(&embedder, &completer),
        store(&tmp),
        Settings::default(),
        &OpenOptions::default(),
    )
    .await
    .unwrap();
    let v2 = Catalog::open(
        &sheet("ACME price list."),
        services(&embedder, &completer),
        store(&tmp),
        Settings::default(),
        &OpenOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(completer.call_count(), 2);
    assert!(!v2.was_loaded());
    assert_ne!(v1.key(), v2.key());
    assert_eq!(embedder.texts_embedded(), 6);

    let s = store(&tmp);
    let header = s.load_header("prices").await.unwrap().unwrap();
    assert_eq!(header.file_hash, rowscout_core::fingerprint(b"ACME price list."));
}

#[tokio::test]
async fn test_model_change_is_incompatible() {
    let tmp = TempDir::new().unwrap();
    let completer = Arc::new(ScriptedCompleter::silent());
    let options = OpenOptions {
        header_row: Some(2),
        ..Default::default()
    };
    let s = sheet("ACME price list");

    let v1 = Arc::new(KeywordEmbedder::new("keywords-v1"));
    Catalog::open(&s, services(&v1, &completer), store(&tmp), Settings::default(), &options)
        .await
        .unwrap();

    let v2 = Arc::new(KeywordEmbedder::new("keywords-v2"));
    let err = Catalog::open(&s, services(&v2, &completer), store(&tmp), Settings::default(), &options)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::IncompatibleIndex { .. }), "got {}", err);

    let forced = Catalog::open(
        &s,
        services(&v2, &completer),
        store(&tmp),
        Settings::default(),
        &OpenOptions {
            force_rebuild: true,
            ..options
        },
    )
    .await
    .unwrap();
    assert_eq!(forced.index().vectors().model(), "keywords-v2");
}

#[tokio::test]
async fn test_graph_mode_persists_schema_and_edges() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(KeywordEmbedder::new("keywords-v1"));
    let completer = Arc::new(ScriptedCompleter::new(vec![SCHEMA_REPLY.to_string()]));
    let options = OpenOptions {
        mode: RagMode::Graph,
        header_row: Some(2),
        ..Default::default()
    };
    let s = sheet("ACME price list");

    let built = Catalog::open(&s, services(&embedder, &completer), store(&tmp), Settings::default(), &options)
        .await
        .unwrap();
    assert_eq!(built.mode(), RagMode::Graph);
    // Both Wika rows share a make.
    assert_eq!(built.index().graph().unwrap().edges().len(), 1);

    let key = IndexKey::for_sheet(&s);
    let dir = store(&tmp).index_dir(&key);
    assert!(dir.join("schema.json").exists());
    assert!(dir.join("graph.json").exists());

    let reopened = Catalog::open(&s, services(&embedder, &completer), store(&tmp), Settings::default(), &options)
        .await
        .unwrap();
    assert!(reopened.was_loaded());
    assert_eq!(completer.call_count(), 1);
    assert_eq!(
        reopened.schema().unwrap().relationships[0].kind,
        "same_make"
    );
}
