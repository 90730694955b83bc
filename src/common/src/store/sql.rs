//! SQL-backed document store.
//!
//! Documents live in a single `documents(collection, id, body)` table with the
//! JSON body stored as text. Projection and field updates happen in Rust so the
//! same logic serves SQLite and PostgreSQL.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPool;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Postgres, QueryBuilder, Sqlite, query, query_as, query_scalar};
use std::collections::HashSet;

use super::{Document, DocumentStore, StoreError, redact_dsn};
use crate::model::CollectionName;

/// Upper bound of bound IDs per statement, below SQLite's variable limit.
const MAX_IDS_PER_STATEMENT: usize = 500;

/// Document table on SQLite or PostgreSQL.
#[derive(Clone)]
pub enum SqlDocumentStore {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl SqlDocumentStore {
    /// Connect and make sure the document table exists.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let store = if dsn.starts_with("sqlite:") {
            let connected = if dsn.contains(":memory:") {
                // Every SQLite connection gets its own in-memory database
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect(dsn)
                    .await
            } else {
                SqlitePool::connect(&with_create_mode(dsn)).await
            };
            let pool = connected
                .map_err(|e| StoreError::Connection(format!("{}: {e}", redact_dsn(dsn))))?;
            SqlDocumentStore::Sqlite(pool)
        } else {
            let pool = PgPool::connect(dsn)
                .await
                .map_err(|e| StoreError::Connection(format!("{}: {e}", redact_dsn(dsn))))?;
            SqlDocumentStore::Postgres(pool)
        };

        store.init().await?;
        tracing::debug!(backend = store.backend(), "Document table initialized");
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        let create = r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )"#;

        match self {
            SqlDocumentStore::Sqlite(pool) => {
                query(create).execute(pool).await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                query(create).execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn fetch_all(
        &self,
        collection: CollectionName,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let rows = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query_as::<_, (String, String)>(
                    "SELECT id, body FROM documents WHERE collection = ? ORDER BY id",
                )
                .bind(collection.as_str())
                .fetch_all(pool)
                .await?
            }
            SqlDocumentStore::Postgres(pool) => {
                query_as::<_, (String, String)>(
                    "SELECT id, body FROM documents WHERE collection = $1 ORDER BY id",
                )
                .bind(collection.as_str())
                .fetch_all(pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn fetch_one(
        &self,
        collection: CollectionName,
        id: &str,
    ) -> Result<Option<String>, StoreError> {
        let body = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query_scalar::<_, String>(
                    "SELECT body FROM documents WHERE collection = ? AND id = ?",
                )
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(pool)
                .await?
            }
            SqlDocumentStore::Postgres(pool) => {
                query_scalar::<_, String>(
                    "SELECT body FROM documents WHERE collection = $1 AND id = $2",
                )
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(pool)
                .await?
            }
        };
        Ok(body)
    }

    /// Replace a body only if it still holds `previous`. Returns whether it did.
    async fn swap_body(
        &self,
        collection: CollectionName,
        id: &str,
        previous: &str,
        next: &str,
    ) -> Result<bool, StoreError> {
        let affected = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query(
                    "UPDATE documents SET body = ? WHERE collection = ? AND id = ? AND body = ?",
                )
                .bind(next)
                .bind(collection.as_str())
                .bind(id)
                .bind(previous)
                .execute(pool)
                .await?
                .rows_affected()
            }
            SqlDocumentStore::Postgres(pool) => {
                query(
                    "UPDATE documents SET body = $1 WHERE collection = $2 AND id = $3 AND body = $4",
                )
                .bind(next)
                .bind(collection.as_str())
                .bind(id)
                .bind(previous)
                .execute(pool)
                .await?
                .rows_affected()
            }
        };
        Ok(affected == 1)
    }
}

#[async_trait]
impl DocumentStore for SqlDocumentStore {
    fn backend(&self) -> &'static str {
        match self {
            SqlDocumentStore::Sqlite(_) => "sqlite",
            SqlDocumentStore::Postgres(_) => "postgres",
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                query("SELECT 1").execute(pool).await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn scan(
        &self,
        collection: CollectionName,
        projection: &[&str],
    ) -> Result<Vec<Document>, StoreError> {
        self.fetch_all(collection)
            .await?
            .into_iter()
            .map(|(id, body)| -> Result<Document, StoreError> {
                let body: Value = serde_json::from_str(&body)?;
                Ok(Document::new(id, body).project(projection))
            })
            .collect()
    }

    async fn ids(&self, collection: CollectionName) -> Result<HashSet<String>, StoreError> {
        let ids = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query_scalar::<_, String>("SELECT id FROM documents WHERE collection = ?")
                    .bind(collection.as_str())
                    .fetch_all(pool)
                    .await?
            }
            SqlDocumentStore::Postgres(pool) => {
                query_scalar::<_, String>("SELECT id FROM documents WHERE collection = $1")
                    .bind(collection.as_str())
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(ids.into_iter().collect())
    }

    async fn count(&self, collection: CollectionName) -> Result<u64, StoreError> {
        let count = match self {
            SqlDocumentStore::Sqlite(pool) => {
                query_scalar::<_, i64>("SELECT COUNT(*) FROM documents WHERE collection = ?")
                    .bind(collection.as_str())
                    .fetch_one(pool)
                    .await?
            }
            SqlDocumentStore::Postgres(pool) => {
                query_scalar::<_, i64>("SELECT COUNT(*) FROM documents WHERE collection = $1")
                    .bind(collection.as_str())
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }

    async fn delete_many(
        &self,
        collection: CollectionName,
        ids: &[String],
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut deleted = 0;
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                    let mut builder =
                        QueryBuilder::<Sqlite>::new("DELETE FROM documents WHERE collection = ");
                    builder.push_bind(collection.as_str()).push(" AND id IN (");
                    let mut separated = builder.separated(", ");
                    for id in chunk {
                        separated.push_bind(id.as_str());
                    }
                    separated.push_unseparated(")");
                    deleted += builder.build().execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                for chunk in ids.chunks(MAX_IDS_PER_STATEMENT) {
                    let mut builder =
                        QueryBuilder::<Postgres>::new("DELETE FROM documents WHERE collection = ");
                    builder.push_bind(collection.as_str()).push(" AND id IN (");
                    let mut separated = builder.separated(", ");
                    for id in chunk {
                        separated.push_bind(id.as_str());
                    }
                    separated.push_unseparated(")");
                    deleted += builder.build().execute(&mut *tx).await?.rows_affected();
                }
                tx.commit().await?;
            }
        }
        Ok(deleted)
    }

    async fn update_many(
        &self,
        collection: CollectionName,
        ids: &[String],
        set: &Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut updated = 0;

        match self {
            SqlDocumentStore::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                let rows = query_as::<_, (String, String)>(
                    "SELECT id, body FROM documents WHERE collection = ?",
                )
                .bind(collection.as_str())
                .fetch_all(&mut *tx)
                .await?;

                for (id, body) in rows.into_iter().filter(|(id, _)| wanted.contains(id.as_str())) {
                    let mut document = Document::new(id, serde_json::from_str(&body)?);
                    document.apply(set);
                    query("UPDATE documents SET body = ? WHERE collection = ? AND id = ?")
                        .bind(serde_json::to_string(&document.body)?)
                        .bind(collection.as_str())
                        .bind(document.id.as_str())
                        .execute(&mut *tx)
                        .await?;
                    updated += 1;
                }
                tx.commit().await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                let rows = query_as::<_, (String, String)>(
                    "SELECT id, body FROM documents WHERE collection = $1 FOR UPDATE",
                )
                .bind(collection.as_str())
                .fetch_all(&mut *tx)
                .await?;

                for (id, body) in rows.into_iter().filter(|(id, _)| wanted.contains(id.as_str())) {
                    let mut document = Document::new(id, serde_json::from_str(&body)?);
                    document.apply(set);
                    query("UPDATE documents SET body = $1 WHERE collection = $2 AND id = $3")
                        .bind(serde_json::to_string(&document.body)?)
                        .bind(collection.as_str())
                        .bind(document.id.as_str())
                        .execute(&mut *tx)
                        .await?;
                    updated += 1;
                }
                tx.commit().await?;
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
        let Some(previous) = self.fetch_one(collection, id).await? else {
            return Ok(false);
        };

        let mut document = Document::new(id, serde_json::from_str(&previous)?);
        if !document.matches(expected) {
            return Ok(false);
        }
        document.apply(set);

        let next = serde_json::to_string(&document.body)?;
        self.swap_body(collection, id, &previous, &next).await
    }

    async fn insert(
        &self,
        collection: CollectionName,
        document: Document,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(&document.body)?;
        match self {
            SqlDocumentStore::Sqlite(pool) => {
                query(
                    "INSERT INTO documents (collection, id, body) VALUES (?, ?, ?) \
                     ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
                )
                .bind(collection.as_str())
                .bind(document.id.as_str())
                .bind(body.as_str())
                .execute(pool)
                .await?;
            }
            SqlDocumentStore::Postgres(pool) => {
                query(
                    "INSERT INTO documents (collection, id, body) VALUES ($1, $2, $3) \
                     ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
                )
                .bind(collection.as_str())
                .bind(document.id.as_str())
                .bind(body.as_str())
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }
}

/// Add `mode=rwc` so a missing SQLite file gets created.
fn with_create_mode(dsn: &str) -> String {
    if dsn.contains('?') {
        if dsn.contains("mode=") {
            dsn.to_string()
        } else {
            format!("{dsn}&mode=rwc")
        }
    } else {
        format!("{dsn}?mode=rwc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_sqlite() -> SqlDocumentStore {
        SqlDocumentStore::connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_with_create_mode() {
        assert_eq!(with_create_mode("sqlite://a.db"), "sqlite://a.db?mode=rwc");
        assert_eq!(
            with_create_mode("sqlite://a.db?cache=shared"),
            "sqlite://a.db?cache=shared&mode=rwc"
        );
        assert_eq!(with_create_mode("sqlite://a.db?mode=ro"), "sqlite://a.db?mode=ro");
    }

    #[tokio::test]
    async fn test_insert_scan_and_delete() {
        let store = memory_sqlite().await;
        for id in ["F2", "F1", "F3"] {
            store
                .insert(
                    CollectionName::BookmarkFolders,
                    Document::new(id, json!({"userId": "U1", "name": id})),
                )
                .await
                .unwrap();
        }

        let docs = store
            .scan(CollectionName::BookmarkFolders, &["userId"])
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["F1", "F2", "F3"]);
        assert!(docs.iter().all(|d| d.body.len() == 1));

        let deleted = store
            .delete_many(
                CollectionName::BookmarkFolders,
                &["F1".to_string(), "F3".to_string(), "F9".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(
            store.ids(CollectionName::BookmarkFolders).await.unwrap(),
            HashSet::from(["F2".to_string()])
        );
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let store = memory_sqlite().await;
        store
            .insert(CollectionName::Users, Document::new("X", json!({})))
            .await
            .unwrap();
        store
            .insert(CollectionName::Articles, Document::new("X", json!({})))
            .await
            .unwrap();

        store
            .delete_many(CollectionName::Users, &["X".to_string()])
            .await
            .unwrap();
        assert_eq!(store.count(CollectionName::Users).await.unwrap(), 0);
        assert_eq!(store.count(CollectionName::Articles).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_one_compare_and_swap() {
        let store = memory_sqlite().await;
        store
            .insert(
                CollectionName::Collections,
                Document::new("C1", json!({"followers": ["U1", "U2"], "title": "t"})),
            )
            .await
            .unwrap();

        let mut set = Map::new();
        set.insert("followers".into(), json!(["U1"]));
        set.insert("followersCount".into(), json!(1));

        let mut stale = Map::new();
        stale.insert("followers".into(), json!(["U1"]));
        assert!(
            !store
                .update_one(CollectionName::Collections, "C1", &stale, &set)
                .await
                .unwrap()
        );

        let mut current = Map::new();
        current.insert("followers".into(), json!(["U1", "U2"]));
        assert!(
            store
                .update_one(CollectionName::Collections, "C1", &current, &set)
                .await
                .unwrap()
        );

        let docs = store.scan(CollectionName::Collections, &[]).await.unwrap();
        assert_eq!(docs[0].body["followers"], json!(["U1"]));
        assert_eq!(docs[0].body["followersCount"], json!(1));
        assert_eq!(docs[0].body["title"], json!("t"));
    }

    #[tokio::test]
    async fn test_update_many_sets_fields() {
        let store = memory_sqlite().await;
        for id in ["L1", "L2"] {
            store
                .insert(
                    CollectionName::BookmarkFolderLinks,
                    Document::new(id, json!({"userId": "U1"})),
                )
                .await
                .unwrap();
        }

        let mut set = Map::new();
        set.insert("stale".into(), json!(true));
        let updated = store
            .update_many(CollectionName::BookmarkFolderLinks, &["L2".to_string()], &set)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let docs = store
            .scan(CollectionName::BookmarkFolderLinks, &["stale"])
            .await
            .unwrap();
        assert!(docs[0].body.is_empty());
        assert_eq!(docs[1].body["stale"], json!(true));
    }
}
