//! Bookmark folder links: every one of the three references must be valid.

use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use common::model::BookmarkFolderLinkDoc;
use common::{CollectionName, DocumentStore};

use super::{CleanupResult, Sanitizer, policy_allows};
use crate::references::ReferenceIndex;

/// Link IDs grouped by the parent ID stored in `field`, for the given parents only.
pub(super) async fn links_by_parent(
    store: &dyn DocumentStore,
    field: &str,
    parents: &[String],
) -> Result<HashMap<String, Vec<String>>> {
    let wanted: HashSet<&str> = parents.iter().map(String::as_str).collect();
    let links = store
        .scan(CollectionName::BookmarkFolderLinks, &[field])
        .await
        .context("Failed to scan bookmark folder links")?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for link in links {
        let parent = match link.body.get(field).and_then(|value| value.as_str()) {
            Some(parent) if wanted.contains(parent) => parent.to_string(),
            _ => continue,
        };
        grouped.entry(parent).or_default().push(link.id);
    }
    Ok(grouped)
}

impl Sanitizer {
    /// Delete links with any invalid reference, checked against fresh ID sets.
    ///
    /// Runs after the bookmark and folder cascades and also catches links
    /// whose parents were deleted outside this engine.
    pub async fn sanitize_bookmark_folder_links(&self, dry_run: bool) -> Result<CleanupResult> {
        let mut result = CleanupResult::new(
            CollectionName::BookmarkFolderLinks,
            "delete_orphaned_links",
            dry_run,
        );

        let index = ReferenceIndex::load(
            self.store.as_ref(),
            [
                CollectionName::Users,
                CollectionName::Bookmarks,
                CollectionName::BookmarkFolders,
            ],
        )
        .await
        .context("Failed to load user, bookmark and folder IDs")?;

        let documents = self
            .store
            .scan(
                CollectionName::BookmarkFolderLinks,
                BookmarkFolderLinkDoc::PROJECTION,
            )
            .await
            .context("Failed to scan bookmark folder links")?;
        result.records_scanned = documents.len() as u64;

        if !policy_allows(
            CollectionName::BookmarkFolderLinks,
            &["userId", "bookmarkId", "folderId"],
        ) {
            result.records_skipped = result.records_scanned;
            return Ok(result);
        }

        let doomed: Vec<String> = documents
            .into_iter()
            .filter(|document| {
                let link: BookmarkFolderLinkDoc = document.decode().unwrap_or_default();
                let valid = index.is_valid(CollectionName::Users, link.user_id.as_deref())
                    && index.is_valid(CollectionName::Bookmarks, link.bookmark_id.as_deref())
                    && index.is_valid(CollectionName::BookmarkFolders, link.folder_id.as_deref());
                !valid
            })
            .map(|document| document.id)
            .collect();

        tracing::info!(
            scanned = result.records_scanned,
            orphaned = doomed.len(),
            dry_run = dry_run,
            "Identified orphaned bookmark folder links"
        );

        self.delete_in_batches(&mut result, &doomed, None).await?;
        Ok(result)
    }
}
