//! Store wrapper that fails selected writes.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::model::CollectionName;
use crate::store::{Document, DocumentStore, StoreError};

/// Delegates to an inner store but rejects writes against chosen collections.
///
/// Reads always succeed, so detection logic runs normally and only the
/// mutation path sees errors.
pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    failing: HashSet<CollectionName>,
    fail_ids: HashSet<String>,
    rejected_writes: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failing: HashSet::new(),
            fail_ids: HashSet::new(),
            rejected_writes: AtomicUsize::new(0),
        }
    }

    /// Reject every write against `collection`.
    pub fn fail_writes_to(mut self, collection: CollectionName) -> Self {
        self.failing.insert(collection);
        self
    }

    /// Reject single-document updates of `id`, in any collection.
    pub fn fail_updates_of(mut self, id: &str) -> Self {
        self.fail_ids.insert(id.to_string());
        self
    }

    pub fn rejected_writes(&self) -> usize {
        self.rejected_writes.load(Ordering::Relaxed)
    }

    fn reject(&self, collection: CollectionName) -> StoreError {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
        StoreError::Connection(format!("injected write failure on {collection}"))
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    fn backend(&self) -> &'static str {
        "faulty"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn scan(
        &self,
        collection: CollectionName,
        projection: &[&str],
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.scan(collection, projection).await
    }

    async fn ids(&self, collection: CollectionName) -> Result<HashSet<String>, StoreError> {
        self.inner.ids(collection).await
    }

    async fn count(&self, collection: CollectionName) -> Result<u64, StoreError> {
        self.inner.count(collection).await
    }

    async fn delete_many(
        &self,
        collection: CollectionName,
        ids: &[String],
    ) -> Result<u64, StoreError> {
        if self.failing.contains(&collection) {
            return Err(self.reject(collection));
        }
        self.inner.delete_many(collection, ids).await
    }

    async fn update_many(
        &self,
        collection: CollectionName,
        ids: &[String],
        set: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        if self.failing.contains(&collection) {
            return Err(self.reject(collection));
        }
        self.inner.update_many(collection, ids, set).await
    }

    async fn update_one(
        &self,
        collection: CollectionName,
        id: &str,
        expected: &Map<String, Value>,
        set: &Map<String, Value>,
    ) -> Result<bool, StoreError> {
        if self.failing.contains(&collection) || self.fail_ids.contains(id) {
            return Err(self.reject(collection));
        }
        self.inner.update_one(collection, id, expected, set).await
    }

    async fn insert(
        &self,
        collection: CollectionName,
        document: Document,
    ) -> Result<(), StoreError> {
        self.inner.insert(collection, document).await
    }
}
