//! State store client
//!
//! The engine keeps its whole state in a network-reachable document store
//! holding three collections: stacks, services and snapshots. All writes
//! are whole-document upserts keyed by id, last write wins; the single
//! provisioning worker is what makes that safe.

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

use crate::entity::{Service, Snapshot, Stack};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// The three collections the engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Stacks,
    Services,
    Snapshots,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Stacks => "stacks",
            Collection::Services => "services",
            Collection::Snapshots => "snapshots",
        }
    }
}

/// Raw document operations against the store. Find/insert/update by id
/// only; no multi-document transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document, `None` if absent.
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>>;

    /// Insert or replace one document (whole-document set).
    async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<()>;

    /// Delete one document. Deleting an absent document is not an error.
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// List every document in a collection.
    async fn list(&self, collection: Collection) -> Result<Vec<Value>>;
}

/// Typed facade over a [`DocumentStore`], converting entities at the
/// boundary so malformed documents surface as store errors.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<dyn DocumentStore>,
}

impl StateStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self { inner }
    }

    pub async fn get_stack(&self, id: &str) -> Result<Option<Stack>> {
        self.get_typed(Collection::Stacks, id).await
    }

    /// Fetch a stack that must exist.
    pub async fn require_stack(&self, id: &str) -> Result<Stack> {
        self.get_stack(id)
            .await?
            .ok_or_else(|| ForgeError::StackNotFound(id.to_string()))
    }

    pub async fn put_stack(&self, stack: &Stack) -> Result<()> {
        self.inner
            .put(Collection::Stacks, &stack.id, serde_json::to_value(stack)?)
            .await
    }

    pub async fn list_stacks(&self) -> Result<Vec<Stack>> {
        self.list_typed(Collection::Stacks).await
    }

    pub async fn get_service(&self, id: &str) -> Result<Option<Service>> {
        self.get_typed(Collection::Services, id).await
    }

    pub async fn require_service(&self, id: &str) -> Result<Service> {
        self.get_service(id)
            .await?
            .ok_or_else(|| ForgeError::ServiceNotFound(id.to_string()))
    }

    pub async fn put_service(&self, service: &Service) -> Result<()> {
        self.inner
            .put(Collection::Services, &service.id, serde_json::to_value(service)?)
            .await
    }

    pub async fn delete_service(&self, id: &str) -> Result<()> {
        self.inner.delete(Collection::Services, id).await
    }

    pub async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.inner
            .put(Collection::Snapshots, &snapshot.id, serde_json::to_value(snapshot)?)
            .await
    }

    pub async fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        self.get_typed(Collection::Snapshots, id).await
    }

    pub async fn require_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.get_snapshot(id)
            .await?
            .ok_or_else(|| ForgeError::SnapshotNotFound(id.to_string()))
    }

    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        self.list_typed(Collection::Snapshots).await
    }

    /// Whether any document with this id exists in the collection; used
    /// for collision checks during id allocation.
    pub async fn id_exists(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self.inner.get(collection, id).await?.is_some())
    }

    async fn get_typed<T: serde::de::DeserializeOwned>(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>> {
        match self.inner.get(collection, id).await? {
            Some(doc) => {
                let typed = serde_json::from_value(doc).map_err(|e| {
                    ForgeError::Store(format!(
                        "malformed document {}/{}: {}",
                        collection.as_str(),
                        id,
                        e
                    ))
                })?;
                Ok(Some(typed))
            }
            None => Ok(None),
        }
    }

    async fn list_typed<T: serde::de::DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<T>> {
        let docs = self.inner.list(collection).await?;
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            out.push(serde_json::from_value(doc).map_err(|e| {
                ForgeError::Store(format!("malformed document in {}: {}", collection.as_str(), e))
            })?);
        }
        Ok(out)
    }
}
