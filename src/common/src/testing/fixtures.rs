//! Seed data for document-store tests.

use serde_json::{Value, json};
use std::sync::Arc;

use crate::model::CollectionName;
use crate::store::{Document, DocumentStore, MemoryStore};

/// Fluent builder of a seeded store.
///
/// Documents are shaped like the application writes them; helpers fill in
/// derived counters consistently unless a raw document is supplied.
#[derive(Debug, Default, Clone)]
pub struct FixtureBuilder {
    documents: Vec<(CollectionName, Document)>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an arbitrary document.
    pub fn raw(mut self, collection: CollectionName, id: &str, body: Value) -> Self {
        self.documents.push((collection, Document::new(id, body)));
        self
    }

    pub fn users<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        for id in ids {
            self = self.raw(CollectionName::Users, id, json!({ "name": format!("user {id}") }));
        }
        self
    }

    pub fn articles<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        for id in ids {
            self = self.raw(
                CollectionName::Articles,
                id,
                json!({ "title": format!("article {id}") }),
            );
        }
        self
    }

    pub fn article(self, id: &str, author_id: &str) -> Self {
        self.raw(
            CollectionName::Articles,
            id,
            json!({ "authorId": author_id, "title": format!("article {id}") }),
        )
    }

    /// A collection with `(articleId, addedByUserId)` entries and follower IDs.
    pub fn collection(
        self,
        id: &str,
        creator_id: &str,
        entries: &[(&str, &str)],
        followers: &[&str],
    ) -> Self {
        let entries: Vec<Value> = entries
            .iter()
            .map(|(article, user)| json!({ "articleId": article, "addedByUserId": user }))
            .collect();
        self.raw(
            CollectionName::Collections,
            id,
            json!({
                "name": format!("collection {id}"),
                "creatorId": creator_id,
                "validEntriesCount": entries.len(),
                "entries": entries,
                "followersCount": followers.len(),
                "followers": followers,
            }),
        )
    }

    pub fn bookmark(self, id: &str, user_id: &str, nugget_id: &str) -> Self {
        self.raw(
            CollectionName::Bookmarks,
            id,
            json!({ "userId": user_id, "nuggetId": nugget_id }),
        )
    }

    pub fn folder(self, id: &str, user_id: &str) -> Self {
        self.raw(
            CollectionName::BookmarkFolders,
            id,
            json!({ "userId": user_id, "name": format!("folder {id}") }),
        )
    }

    pub fn link(self, id: &str, user_id: &str, bookmark_id: &str, folder_id: &str) -> Self {
        self.raw(
            CollectionName::BookmarkFolderLinks,
            id,
            json!({ "userId": user_id, "bookmarkId": bookmark_id, "folderId": folder_id }),
        )
    }

    pub fn report(self, id: &str, reporter_id: &str, respondent_id: &str) -> Self {
        self.raw(
            CollectionName::Reports,
            id,
            json!({
                "reporter": { "id": reporter_id },
                "respondent": { "id": respondent_id },
                "reason": "spam",
            }),
        )
    }

    pub fn audit_log(self, id: &str, actor_id: &str, target_type: &str, target_id: &str) -> Self {
        self.raw(
            CollectionName::ModerationAuditLogs,
            id,
            json!({
                "actorId": actor_id,
                "targetType": target_type,
                "targetId": target_id,
                "action": "hide",
            }),
        )
    }

    /// Feedback, optionally attributed to a user.
    pub fn feedback(self, id: &str, user_id: Option<&str>) -> Self {
        let body = match user_id {
            Some(user) => json!({ "user": { "id": user }, "message": "nice" }),
            None => json!({ "message": "anonymous" }),
        };
        self.raw(CollectionName::Feedbacks, id, body)
    }

    /// Write every document into an existing store.
    pub async fn seed(&self, store: &dyn DocumentStore) -> Result<(), crate::store::StoreError> {
        for (collection, document) in &self.documents {
            store.insert(*collection, document.clone()).await?;
        }
        Ok(())
    }

    /// Seed a fresh in-memory store.
    pub async fn build(self) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        self.seed(store.as_ref())
            .await
            .expect("in-memory store never fails");
        store
    }
}
