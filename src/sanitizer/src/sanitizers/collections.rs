//! Collections: trim orphaned entries and followers, keep counters in step.

use anyhow::{Context, Result};
use common::CollectionName;
use common::model::{CollectionDoc, CollectionEntry};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{CleanupResult, Sanitizer, policy_allows};
use crate::references::ReferenceIndex;

impl Sanitizer {
    /// Keep only entries whose article and adding user both exist, and only
    /// followers that exist. `creatorId` is never touched.
    pub async fn sanitize_collections(&self, dry_run: bool) -> Result<CleanupResult> {
        let mut result = CleanupResult::new(
            CollectionName::Collections,
            "trim_orphaned_entries_and_followers",
            dry_run,
        );

        let index = ReferenceIndex::load(
            self.store.as_ref(),
            [CollectionName::Users, CollectionName::Articles],
        )
        .await
        .context("Failed to load user and article IDs")?;

        let documents = self
            .store
            .scan(CollectionName::Collections, CollectionDoc::PROJECTION)
            .await
            .context("Failed to scan collections")?;
        result.records_scanned = documents.len() as u64;

        let trim_entries = policy_allows(
            CollectionName::Collections,
            &["entries[].articleId", "entries[].addedByUserId"],
        );
        let trim_followers = policy_allows(CollectionName::Collections, &["followers[]"]);

        for document in documents {
            // creatorId and the counters are never decoded, so they cannot block the trim
            let (current_entries, entries_malformed) = array_items(&document.body, "entries");
            let (current_followers, followers_malformed) =
                array_items(&document.body, "followers");

            let entries: Vec<Value> = current_entries
                .iter()
                .filter(|entry| !trim_entries || entry_is_valid(&index, entry))
                .cloned()
                .collect();
            let followers: Vec<Value> = current_followers
                .iter()
                .filter(|follower| {
                    !trim_followers || index.is_valid(CollectionName::Users, follower.as_str())
                })
                .cloned()
                .collect();

            let removed_entries = current_entries.len() - entries.len();
            let removed_followers = current_followers.len() - followers.len();
            let reshaped =
                (trim_entries && entries_malformed) || (trim_followers && followers_malformed);
            if removed_entries == 0 && removed_followers == 0 && !reshaped {
                continue;
            }

            // Untrimmable arrays of the wrong shape are left exactly as found
            let entries = if entries_malformed && !trim_entries {
                document.body.get("entries").cloned().unwrap_or(Value::Null)
            } else {
                Value::Array(entries)
            };
            let followers = if followers_malformed && !trim_followers {
                document.body.get("followers").cloned().unwrap_or(Value::Null)
            } else {
                Value::Array(followers)
            };

            if dry_run {
                tracing::info!(
                    id = %document.id,
                    removed_entries = removed_entries,
                    removed_followers = removed_followers,
                    "[DRY-RUN] Would trim collection"
                );
                result.records_skipped += 1;
                continue;
            }

            // Guard on the arrays as read so a concurrent edit is not overwritten
            let mut expected = Map::new();
            for field in ["entries", "followers"] {
                expected.insert(
                    field.to_string(),
                    document.body.get(field).cloned().unwrap_or(Value::Null),
                );
            }

            let mut set = Map::new();
            if let Value::Array(items) = &entries {
                set.insert("validEntriesCount".into(), json!(items.len()));
            }
            set.insert("entries".into(), entries);
            if let Value::Array(items) = &followers {
                set.insert("followersCount".into(), json!(items.len()));
            }
            set.insert("followers".into(), followers);

            match self
                .store
                .update_one(CollectionName::Collections, &document.id, &expected, &set)
                .await
            {
                Ok(true) => {
                    tracing::info!(
                        id = %document.id,
                        removed_entries = removed_entries,
                        removed_followers = removed_followers,
                        "Trimmed collection"
                    );
                    result.records_cleaned += 1;
                }
                Ok(false) => {
                    tracing::warn!(
                        id = %document.id,
                        "Collection changed since scan, leaving it for the next run"
                    );
                    result.records_skipped += 1;
                }
                Err(e) => {
                    tracing::error!(id = %document.id, error = %e, "Failed to update collection");
                    result.errors.push(format!("collection {}: {e}", document.id));
                }
            }
        }

        Ok(result)
    }
}

/// Elements of an array field, and whether the field holds a non-array value.
fn array_items<'a>(body: &'a Map<String, Value>, field: &str) -> (&'a [Value], bool) {
    match body.get(field) {
        None | Some(Value::Null) => (&[][..], false),
        Some(Value::Array(items)) => (items, false),
        Some(_) => (&[][..], true),
    }
}

/// An entry survives only as an object whose article and adding user both exist.
fn entry_is_valid(index: &ReferenceIndex, entry: &Value) -> bool {
    match CollectionEntry::deserialize(entry) {
        Ok(entry) => {
            index.is_valid(CollectionName::Articles, entry.article_id.as_deref())
                && index.is_valid(CollectionName::Users, entry.added_by_user_id.as_deref())
        }
        Err(_) => false,
    }
}
