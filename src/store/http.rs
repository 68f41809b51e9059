//! HTTP document store client
//!
//! Speaks a plain JSON document API against the state store:
//! `GET/PUT/DELETE {base}/{collection}/{id}` for single documents and
//! `GET {base}/{collection}` for listing.

use super::{Collection, DocumentStore};
use crate::error::{ForgeError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

/// Document store reached over HTTP.
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStore {
    /// Create a client against the given base URL (e.g. `http://store:5984/forge`).
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn doc_url(&self, collection: Collection, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection.as_str(), id)
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/{}", self.base_url, collection.as_str())
    }
}

#[async_trait]
impl DocumentStore for HttpStore {
    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let resp = self.client.get(self.doc_url(collection, id)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json().await?)),
            status => Err(ForgeError::Store(format!(
                "GET {}/{} returned {}",
                collection.as_str(),
                id,
                status
            ))),
        }
    }

    async fn put(&self, collection: Collection, id: &str, doc: Value) -> Result<()> {
        let resp = self
            .client
            .put(self.doc_url(collection, id))
            .json(&doc)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ForgeError::Store(format!(
                "PUT {}/{} returned {}",
                collection.as_str(),
                id,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let resp = self.client.delete(self.doc_url(collection, id)).send().await?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(ForgeError::Store(format!(
                "DELETE {}/{} returned {}",
                collection.as_str(),
                id,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let resp = self.client.get(self.collection_url(collection)).send().await?;
        if !resp.status().is_success() {
            return Err(ForgeError::Store(format!(
                "GET {} returned {}",
                collection.as_str(),
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}
