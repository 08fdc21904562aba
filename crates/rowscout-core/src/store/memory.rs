//! In-memory [`IndexStore`] implementation for tests.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. A poisoned lock is reported
//! as [`Error::Store`] instead of panicking.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::schema::HeaderRecord;

use super::{IndexKey, IndexStore, PersistedIndex};

/// In-memory store for tests.
pub struct InMemoryIndexStore {
    headers: RwLock<HashMap<String, HeaderRecord>>,
    indexes: RwLock<HashMap<IndexKey, PersistedIndex>>,
}

impl InMemoryIndexStore {
    pub fn new() -> Self {
        Self {
            headers: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored index bundles.
    pub fn index_count(&self) -> usize {
        self.indexes.read().map(|m| m.len()).unwrap_or_default()
    }
}

impl Default for InMemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Store("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn load_header(&self, stem: &str) -> Result<Option<HeaderRecord>> {
        let headers = self.headers.read().map_err(poisoned)?;
        Ok(headers.get(stem).cloned())
    }

    async fn save_header(&self, stem: &str, record: &HeaderRecord) -> Result<()> {
        let mut headers = self.headers.write().map_err(poisoned)?;
        headers.insert(stem.to_string(), record.clone());
        Ok(())
    }

    async fn load_index(&self, key: &IndexKey) -> Result<Option<PersistedIndex>> {
        let indexes = self.indexes.read().map_err(poisoned)?;
        Ok(indexes.get(key).cloned())
    }

    async fn save_index(&self, index: &PersistedIndex) -> Result<()> {
        let mut indexes = self.indexes.write().map_err(poisoned)?;
        indexes.insert(index.manifest.key.clone(), index.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_roundtrip_replaces_wholesale() {
        let store = InMemoryIndexStore::new();
        assert!(store.load_header("prices").await.unwrap().is_none());

        let first = HeaderRecord {
            header_row_index: 2,
            file_hash: "a".into(),
        };
        store.save_header("prices", &first).await.unwrap();
        let second = HeaderRecord {
            header_row_index: 0,
            file_hash: "b".into(),
        };
        store.save_header("prices", &second).await.unwrap();
        assert_eq!(store.load_header("prices").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_index_absent_until_saved() {
        let store = InMemoryIndexStore::new();
        let key = IndexKey::new("prices", "abc");
        assert!(store.load_index(&key).await.unwrap().is_none());
        assert_eq!(store.index_count(), 0);
    }
}
