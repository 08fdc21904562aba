//! Filesystem [`IndexStore`].
//!
//! Layout under `store.dir`:
//!
//! ```text
//! headers/<stem>_header.json
//! indexes/<key>/manifest.json
//!               table.json
//!               documents.json
//!               schema.json      (when analysed)
//!               graph.json       (graph mode)
//!               vectors.bin      (little-endian f32, row-major)
//! indexes/<key>.lock             (while a bundle is read or published)
//! ```
//!
//! A bundle is written into `indexes/.tmp-<uuid>/` and renamed into place
//! under the per-key lock. Readers take the same lock, so a load never
//! observes the gap between retiring the old bundle and publishing the new
//! one. Header records go through a temporary file and a rename.

use async_trait::async_trait;
use rowscout_core::embedding::{blob_to_matrix, matrix_to_blob};
use rowscout_core::graph::GraphEdge;
use rowscout_core::schema::{HeaderRecord, SchemaUnderstanding};
use rowscout_core::store::{IndexKey, IndexManifest, IndexStore, PersistedIndex};
use rowscout_core::{Error, Result, Table};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MANIFEST: &str = "manifest.json";
const TABLE: &str = "table.json";
const DOCUMENTS: &str = "documents.json";
const SCHEMA: &str = "schema.json";
const GRAPH: &str = "graph.json";
const VECTORS: &str = "vectors.bin";

const LOCK_POLL: Duration = Duration::from_millis(100);

#[derive(Serialize, Deserialize)]
struct GraphFile {
    edges: Vec<GraphEdge>,
}

fn io_error(context: impl std::fmt::Display, e: std::io::Error) -> Error {
    Error::Store(format!("{}: {}", context, e))
}

/// Stores header records and index bundles as plain files.
pub struct FsIndexStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FsIndexStore {
    pub fn new(root: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lock_timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn headers_dir(&self) -> PathBuf {
        self.root.join("headers")
    }

    fn indexes_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    fn header_path(&self, stem: &str) -> PathBuf {
        let safe: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.headers_dir().join(format!("{}_header.json", safe))
    }

    /// Directory holding the bundle for `key`.
    pub fn index_dir(&self, key: &IndexKey) -> PathBuf {
        self.indexes_dir().join(key.as_str())
    }

    async fn acquire_lock(&self, key: &IndexKey) -> Result<LockFile> {
        let path = self.indexes_dir().join(format!("{}.lock", key));
        let started = Instant::now();
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(LockFile { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(Error::Store(format!(
                            "timed out after {:?} waiting for lock {} (remove it if no other rowscout process is running)",
                            self.lock_timeout,
                            path.display()
                        )));
                    }
                    debug!(lock = %path.display(), "index locked by another process; waiting");
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(io_error(format!("creating lock {}", path.display()), e)),
            }
        }
    }
}

/// Exclusive lock on one index key; the file is removed on drop.
struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| io_error(format!("reading {}", path.display()), e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn read_optional_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        read_json(path).await.map(Some)
    } else {
        Ok(None)
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| io_error(format!("writing {}", path.display()), e))
}

async fn write_bundle(dir: &Path, index: &PersistedIndex) -> Result<()> {
    write_json(&dir.join(MANIFEST), &index.manifest).await?;
    write_json(&dir.join(TABLE), &index.table).await?;
    write_json(&dir.join(DOCUMENTS), &index.documents).await?;
    if let Some(schema) = &index.schema {
        write_json(&dir.join(SCHEMA), schema).await?;
    }
    if let Some(edges) = &index.graph {
        write_json(
            &dir.join(GRAPH),
            &GraphFile {
                edges: edges.clone(),
            },
        )
        .await?;
    }
    let path = dir.join(VECTORS);
    tokio::fs::write(&path, matrix_to_blob(&index.embeddings))
        .await
        .map_err(|e| io_error(format!("writing {}", path.display()), e))
}

#[async_trait]
impl IndexStore for FsIndexStore {
    async fn load_header(&self, stem: &str) -> Result<Option<HeaderRecord>> {
        read_optional_json(&self.header_path(stem)).await
    }

    async fn save_header(&self, stem: &str, record: &HeaderRecord) -> Result<()> {
        let dir = self.headers_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(format!("creating {}", dir.display()), e))?;
        let path = self.header_path(stem);
        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        write_json(&tmp, record).await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(format!("publishing {}", path.display()), e))?;
        debug!(stem, header_row = record.header_row_index, "header record saved");
        Ok(())
    }

    async fn load_index(&self, key: &IndexKey) -> Result<Option<PersistedIndex>> {
        if !tokio::fs::try_exists(self.indexes_dir()).await.unwrap_or(false) {
            return Ok(None);
        }
        let _lock = self.acquire_lock(key).await?;

        let dir = self.index_dir(key);
        let manifest: Option<IndexManifest> = read_optional_json(&dir.join(MANIFEST)).await?;
        let Some(manifest) = manifest else {
            return Ok(None);
        };

        let table: Table = read_json(&dir.join(TABLE)).await?;
        let documents: Vec<String> = read_json(&dir.join(DOCUMENTS)).await?;
        let schema: Option<SchemaUnderstanding> = read_optional_json(&dir.join(SCHEMA)).await?;
        let graph: Option<GraphFile> = read_optional_json(&dir.join(GRAPH)).await?;

        let vectors_path = dir.join(VECTORS);
        let blob = tokio::fs::read(&vectors_path)
            .await
            .map_err(|e| io_error(format!("reading {}", vectors_path.display()), e))?;
        let embeddings = blob_to_matrix(&blob, manifest.dims)
            .map_err(|e| Error::incompatible(key.as_str(), e.to_string()))?;

        debug!(key = %key, rows = manifest.row_count, "index bundle read");
        Ok(Some(PersistedIndex {
            manifest,
            table,
            documents,
            embeddings,
            schema,
            graph: graph.map(|g| g.edges),
        }))
    }

    async fn save_index(&self, index: &PersistedIndex) -> Result<()> {
        let indexes = self.indexes_dir();
        tokio::fs::create_dir_all(&indexes)
            .await
            .map_err(|e| io_error(format!("creating {}", indexes.display()), e))?;

        let key = &index.manifest.key;
        let _lock = self.acquire_lock(key).await?;

        let staging = indexes.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir(&staging)
            .await
            .map_err(|e| io_error(format!("creating {}", staging.display()), e))?;
        if let Err(e) = write_bundle(&staging, index).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        let target = self.index_dir(key);
        let mut retired = None;
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let old = indexes.join(format!(".old-{}", uuid::Uuid::new_v4()));
            tokio::fs::rename(&target, &old)
                .await
                .map_err(|e| io_error(format!("moving aside {}", target.display()), e))?;
            retired = Some(old);
        }
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| io_error(format!("publishing {}", target.display()), e))?;
        if let Some(old) = retired {
            if let Err(e) = tokio::fs::remove_dir_all(&old).await {
                warn!(dir = %old.display(), error = %e, "failed to remove replaced index");
            }
        }

        info!(key = %key, dir = %target.display(), "index published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rowscout_core::rag::RagMode;
    use rowscout_core::store::{documents_digest, FORMAT_VERSION};
    use rowscout_core::RowData;

    fn bundle(key: &IndexKey, with_graph: bool) -> PersistedIndex {
        let rows: Vec<RowData> = ["Pressure Gauge", "Ball Valve"]
            .iter()
            .map(|d| {
                let mut r = RowData::new();
                r.insert("desc".into(), d.to_string());
                r
            })
            .collect();
        let table = Table::new(vec!["desc".into()], rows).unwrap();
        let documents = vec!["Pressure Gauge".to_string(), "Ball Valve".to_string()];
        PersistedIndex {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                key: key.clone(),
                created_at: Utc::now(),
                model: "hash-bow".into(),
                dims: 3,
                row_count: 2,
                columns: vec!["desc".into()],
                text_columns: vec!["desc".into()],
                documents_sha256: documents_digest(&documents),
                mode: if with_graph { RagMode::Graph } else { RagMode::Flat },
                has_schema: false,
                has_graph: with_graph,
            },
            table,
            documents,
            embeddings: vec![vec![0.1, -2.5, 3.0e-7], vec![1.0, 0.0, f32::MIN_POSITIVE]],
            schema: None,
            graph: with_graph.then(|| {
                vec![GraphEdge {
                    a: 0,
                    b: 1,
                    relationship: "same_make".into(),
                }]
            }),
        }
    }

    fn store(dir: &Path) -> FsIndexStore {
        FsIndexStore::new(dir, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_missing_index_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        assert!(s.load_index(&IndexKey::new("prices", "abc")).await.unwrap().is_none());
        assert!(s.load_header("prices").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_vectors_bit_for_bit() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let key = IndexKey::new("prices", "0123456789abcdef99");
        let original = bundle(&key, true);
        s.save_index(&original).await.unwrap();

        let dir = s.index_dir(&key);
        for file in [MANIFEST, TABLE, DOCUMENTS, GRAPH, VECTORS] {
            assert!(dir.join(file).exists(), "{} missing", file);
        }
        assert!(!dir.join(SCHEMA).exists());
        assert_eq!(std::fs::metadata(dir.join(VECTORS)).unwrap().len(), 2 * 3 * 4);

        let loaded = s.load_index(&key).await.unwrap().unwrap();
        loaded.validate().unwrap();
        let bits = |m: &Vec<Vec<f32>>| -> Vec<u32> { m.iter().flatten().map(|f| f.to_bits()).collect() };
        assert_eq!(bits(&loaded.embeddings), bits(&original.embeddings));
        assert_eq!(loaded.table, original.table);
        assert_eq!(loaded.graph, original.graph);
        assert_eq!(loaded.manifest.key, key);
    }

    #[tokio::test]
    async fn test_republish_replaces_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let key = IndexKey::new("prices", "feed");
        s.save_index(&bundle(&key, true)).await.unwrap();
        s.save_index(&bundle(&key, false)).await.unwrap();

        let loaded = s.load_index(&key).await.unwrap().unwrap();
        assert!(loaded.graph.is_none());
        assert!(!s.index_dir(&key).join(GRAPH).exists());

        let leftovers: Vec<String> = std::fs::read_dir(tmp.path().join("indexes"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec![key.to_string()]);
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let s = FsIndexStore::new(tmp.path(), Duration::from_millis(250));
        let key = IndexKey::new("prices", "beef");
        std::fs::create_dir_all(tmp.path().join("indexes")).unwrap();
        let held = s.acquire_lock(&key).await.unwrap();

        let err = s.save_index(&bundle(&key, false)).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(err.to_string().contains("waiting for lock"));

        drop(held);
        s.save_index(&bundle(&key, false)).await.unwrap();
        assert!(!tmp.path().join("indexes").join(format!("{}.lock", key)).exists());
    }

    #[tokio::test]
    async fn test_load_waits_for_publishing_writer() {
        let tmp = tempfile::tempdir().unwrap();
        let s = FsIndexStore::new(tmp.path(), Duration::from_millis(250));
        let key = IndexKey::new("prices", "d00d");
        s.save_index(&bundle(&key, false)).await.unwrap();

        let held = s.acquire_lock(&key).await.unwrap();
        let err = s.load_index(&key).await.unwrap_err();
        assert!(err.to_string().contains("waiting for lock"));

        drop(held);
        assert!(s.load_index(&key).await.unwrap().is_some());
        assert!(!tmp.path().join("indexes").join(format!("{}.lock", key)).exists());
    }

    #[tokio::test]
    async fn test_corrupt_table_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let key = IndexKey::new("prices", "f00d");
        s.save_index(&bundle(&key, false)).await.unwrap();
        std::fs::write(
            s.index_dir(&key).join(TABLE),
            r#"{"columns": ["desc", "desc"], "rows": []}"#,
        )
        .unwrap();
        let err = s.load_index(&key).await.unwrap_err();
        assert!(err.to_string().contains("duplicate column"), "got {}", err);
    }

    #[tokio::test]
    async fn test_header_records() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let record = HeaderRecord {
            header_row_index: 3,
            file_hash: "abc".into(),
        };
        s.save_header("price list", &record).await.unwrap();
        assert!(tmp.path().join("headers/price_list_header.json").exists());
        assert_eq!(s.load_header("price list").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_truncated_vectors_are_incompatible() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let key = IndexKey::new("prices", "cafe");
        s.save_index(&bundle(&key, false)).await.unwrap();
        std::fs::write(s.index_dir(&key).join(VECTORS), [0u8; 10]).unwrap();
        let err = s.load_index(&key).await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleIndex { .. }));
    }
}
