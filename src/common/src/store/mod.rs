//! Schema-less document store abstraction.
//!
//! Collections are addressed by [`CollectionName`], documents by opaque string
//! IDs. The store enforces no referential constraints; every bulk operation is
//! atomic only at the level of a single call.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::model::CollectionName;

pub use memory::MemoryStore;
pub use sql::SqlDocumentStore;

/// Errors raised by store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to connect to document store: {0}")]
    Connection(String),

    #[error("Store query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported DSN scheme: {0}")]
    UnsupportedDsn(String),
}

/// A stored document: its ID and (possibly projected) body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            body,
        }
    }

    /// Decode the body into a typed projection.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.body.clone()))?)
    }

    /// Keep only the given top-level fields. An empty projection keeps all.
    pub fn project(mut self, projection: &[&str]) -> Self {
        if !projection.is_empty() {
            self.body.retain(|key, _| projection.contains(&key.as_str()));
        }
        self
    }

    /// Whether every field of `expected` equals the stored value.
    ///
    /// A `null` expectation also matches an absent field.
    pub fn matches(&self, expected: &Map<String, Value>) -> bool {
        expected
            .iter()
            .all(|(key, value)| self.body.get(key).unwrap_or(&Value::Null) == value)
    }

    /// Apply a top-level `$set`.
    pub fn apply(&mut self, set: &Map<String, Value>) {
        for (key, value) in set {
            self.body.insert(key.clone(), value.clone());
        }
    }
}

/// Operations the integrity engine needs from a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;

    /// Connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Full collection scan, ordered by ID, with field projection.
    async fn scan(
        &self,
        collection: CollectionName,
        projection: &[&str],
    ) -> Result<Vec<Document>, StoreError>;

    /// ID set of a collection.
    async fn ids(&self, collection: CollectionName) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .scan(collection, &["_id"])
            .await?
            .into_iter()
            .map(|doc| doc.id)
            .collect())
    }

    async fn count(&self, collection: CollectionName) -> Result<u64, StoreError>;

    /// Bulk delete by ID set. Returns the number of deleted documents.
    async fn delete_many(&self, collection: CollectionName, ids: &[String])
    -> Result<u64, StoreError>;

    /// Bulk top-level field update by ID set. Returns the number of updated documents.
    async fn update_many(
        &self,
        collection: CollectionName,
        ids: &[String],
        set: &Map<String, Value>,
    ) -> Result<u64, StoreError>;

    /// Conditional single-document update.
    ///
    /// Applies `set` only when every field in `expected` still holds the given
    /// value. Returns whether the document was written.
    async fn update_one(
        &self,
        collection: CollectionName,
        id: &str,
        expected: &Map<String, Value>,
        set: &Map<String, Value>,
    ) -> Result<bool, StoreError>;

    /// Insert or replace a whole document.
    async fn insert(&self, collection: CollectionName, document: Document)
    -> Result<(), StoreError>;
}

/// Open a store for the given DSN and verify connectivity.
///
/// - `memory://` opens an empty in-process store
/// - `sqlite:` / `postgres:` / `postgresql:` open a SQL-backed document table
pub async fn connect(dsn: &str) -> Result<Arc<dyn DocumentStore>, StoreError> {
    tracing::info!(dsn = %redact_dsn(dsn), "Connecting to document store");

    let store: Arc<dyn DocumentStore> = if dsn.starts_with("memory:") {
        Arc::new(MemoryStore::new())
    } else if dsn.starts_with("sqlite:")
        || dsn.starts_with("postgres:")
        || dsn.starts_with("postgresql:")
    {
        Arc::new(SqlDocumentStore::connect(dsn).await?)
    } else {
        return Err(StoreError::UnsupportedDsn(redact_dsn(dsn)));
    };

    store.ping().await?;

    tracing::info!(backend = store.backend(), "Document store connection established");
    Ok(store)
}

/// Strip credentials from a DSN before logging it.
pub fn redact_dsn(dsn: &str) -> String {
    match (dsn.find("://"), dsn.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &dsn[..scheme_end], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}
