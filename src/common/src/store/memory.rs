//! In-process document store.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

use super::{Document, DocumentStore, StoreError};
use crate::model::CollectionName;

type Collection = BTreeMap<String, Map<String, Value>>;

/// Document store held entirely in memory.
///
/// Each trait call takes the lock once, so every call is atomic on its own,
/// matching the single-call atomicity of the SQL backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<CollectionName, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of every collection, for snapshot comparisons in tests.
    pub async fn snapshot(&self) -> HashMap<CollectionName, Collection> {
        self.collections.read().await.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn scan(
        &self,
        collection: CollectionName,
        projection: &[&str],
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, body)| {
                        Document {
                            id: id.clone(),
                            body: body.clone(),
                        }
                        .project(projection)
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ids(&self, collection: CollectionName) -> Result<HashSet<String>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn count(&self, collection: CollectionName) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(&collection).map_or(0, |docs| docs.len() as u64))
    }

    async fn delete_many(
        &self,
        collection: CollectionName,
        ids: &[String],
    ) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };

        let deleted = ids.iter().filter(|id| docs.remove(*id).is_some()).count();
        Ok(deleted as u64)
    }

    async fn update_many(
        &self,
        collection: CollectionName,
        ids: &[String],
        set: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };

        let mut updated = 0;
        for id in ids {
            if let Some(body) = docs.get_mut(id) {
                for (key, value) in set {
                    body.insert(key.clone(), value.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_one(
        &self,
        collection: CollectionName,
        id: &str,
        expected: &Map<String, Value>,
        set: &Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(body) = collections
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Ok(false);
        };

        let mut document = Document {
            id: id.to_string(),
            body: std::mem::take(body),
        };
        let matched = document.matches(expected);
        if matched {
            document.apply(set);
        }
        *body = document.body;

        Ok(matched)
    }

    async fn insert(
        &self,
        collection: CollectionName,
        document: Document,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection)
            .or_default()
            .insert(document.id, document.body);
        Ok(())
    }
}
