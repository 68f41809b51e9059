//! In-memory document store
//!
//! Backs tests and single-process local mode with the same collection
//! semantics as the network store.

use super::{Collection, DocumentStore};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type Docs = HashMap<String, Value>;

/// In-memory store, one map per collection.
#[derive(Default)]
pub struct MemoryStore {
    stacks: Arc<RwLock<Docs>>,
    services: Arc<RwLock<Docs>>,
    snapshots: Arc<RwLock<Docs>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, collection: Collection) -> &Arc<RwLock<Docs>> {
        match collection {
            Collection::Stacks => &self.stacks,
            Collection::Services => &self.services,
            Collection::Snapshots => &self.snapshots,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let docs = self
            .collection(collection)
            .read()
            .map_err(|_| ForgeError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(docs.get(id).cloned())
    }

    async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<()> {
        let mut docs = self
            .collection(collection)
            .write()
            .map_err(|_| ForgeError::Lock("Failed to acquire write lock".to_string()))?;
        docs.insert(id.to_string(), doc);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let mut docs = self
            .collection(collection)
            .write()
            .map_err(|_| ForgeError::Lock("Failed to acquire write lock".to_string()))?;
        docs.remove(id);
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let docs = self
            .collection(collection)
            .read()
            .map_err(|_| ForgeError::Lock("Failed to acquire read lock".to_string()))?;
        Ok(docs.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryStore::new();
        store
            .put(Collection::Stacks, "st-1", json!({"id": "st-1", "status": "building"}))
            .await
            .unwrap();

        let doc = store.get(Collection::Stacks, "st-1").await.unwrap().unwrap();
        assert_eq!(doc["status"], "building");
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = MemoryStore::new();
        store.put(Collection::Stacks, "x", json!({"a": 1})).await.unwrap();
        assert!(store.get(Collection::Services, "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStore::new();
        store.put(Collection::Services, "sv-1", json!({"v": 1})).await.unwrap();
        store.put(Collection::Services, "sv-1", json!({"v": 2})).await.unwrap();
        let doc = store.get(Collection::Services, "sv-1").await.unwrap().unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[tokio::test]
    async fn test_delete_absent_ok() {
        let store = MemoryStore::new();
        store.delete(Collection::Snapshots, "missing").await.unwrap();
    }
}
