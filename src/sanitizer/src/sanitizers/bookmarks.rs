//! Bookmarks and bookmark folders: delete orphans and cascade to their links.

use anyhow::{Context, Result};
use common::CollectionName;
use common::model::{BookmarkDoc, BookmarkFolderDoc};

use super::{CleanupResult, Sanitizer, policy_allows};
use crate::references::ReferenceIndex;

impl Sanitizer {
    /// Delete bookmarks whose user or article is gone, together with every
    /// folder link pointing at them.
    pub async fn sanitize_bookmarks(&self, dry_run: bool) -> Result<CleanupResult> {
        let mut result = CleanupResult::new(
            CollectionName::Bookmarks,
            "delete_orphaned_bookmarks",
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
            .scan(CollectionName::Bookmarks, BookmarkDoc::PROJECTION)
            .await
            .context("Failed to scan bookmarks")?;
        result.records_scanned = documents.len() as u64;

        if !policy_allows(CollectionName::Bookmarks, &["userId", "nuggetId"])
            || !policy_allows(CollectionName::BookmarkFolderLinks, &["bookmarkId"])
        {
            result.records_skipped = result.records_scanned;
            return Ok(result);
        }

        // Non-string references decode as absent, which is never valid
        let doomed: Vec<String> = documents
            .into_iter()
            .filter(|document| {
                let bookmark: BookmarkDoc = document.decode().unwrap_or_default();
                !(index.is_valid(CollectionName::Users, bookmark.user_id.as_deref())
                    && index.is_valid(CollectionName::Articles, bookmark.nugget_id.as_deref()))
            })
            .map(|document| document.id)
            .collect();

        tracing::info!(
            scanned = result.records_scanned,
            orphaned = doomed.len(),
            dry_run = dry_run,
            "Identified orphaned bookmarks"
        );

        self.delete_in_batches(&mut result, &doomed, Some("bookmarkId"))
            .await?;
        Ok(result)
    }

    /// Delete folders whose owner is gone, together with every link into them.
    pub async fn sanitize_bookmark_folders(&self, dry_run: bool) -> Result<CleanupResult> {
        let mut result = CleanupResult::new(
            CollectionName::BookmarkFolders,
            "delete_orphaned_folders",
            dry_run,
        );

        let index = ReferenceIndex::load(self.store.as_ref(), [CollectionName::Users])
            .await
            .context("Failed to load user IDs")?;

        let documents = self
            .store
            .scan(CollectionName::BookmarkFolders, BookmarkFolderDoc::PROJECTION)
            .await
            .context("Failed to scan bookmark folders")?;
        result.records_scanned = documents.len() as u64;

        if !policy_allows(CollectionName::BookmarkFolders, &["userId"])
            || !policy_allows(CollectionName::BookmarkFolderLinks, &["folderId"])
        {
            result.records_skipped = result.records_scanned;
            return Ok(result);
        }

        let doomed: Vec<String> = documents
            .into_iter()
            .filter(|document| {
                let folder: BookmarkFolderDoc = document.decode().unwrap_or_default();
                !index.is_valid(CollectionName::Users, folder.user_id.as_deref())
            })
            .map(|document| document.id)
            .collect();

        tracing::info!(
            scanned = result.records_scanned,
            orphaned = doomed.len(),
            dry_run = dry_run,
            "Identified orphaned bookmark folders"
        );

        self.delete_in_batches(&mut result, &doomed, Some("folderId"))
            .await?;
        Ok(result)
    }
}
