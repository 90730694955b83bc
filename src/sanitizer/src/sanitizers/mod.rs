//! Per-collection cleanup routines.
//!
//! Every sanitizer shares one contract: given `dry_run`, scan the collection
//! against freshly loaded valid-ID sets and either report or perform the
//! repairs it owns. All of them are idempotent and safe to call out of band.
//!
//! In dry-run mode nothing is written and `records_skipped` counts what would
//! have been cleaned.

mod audit;
mod bookmarks;
mod collections;
mod links;

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Utc;
use common::{CollectionName, DocumentStore};
use serde::{Deserialize, Serialize};

use crate::policy;
use crate::stats::SanitizationStats;

/// Cascade-safe execution order: parent cascades land before the link sweep.
pub const EXECUTION_ORDER: [CollectionName; 7] = [
    CollectionName::Collections,
    CollectionName::Bookmarks,
    CollectionName::BookmarkFolders,
    CollectionName::BookmarkFolderLinks,
    CollectionName::Reports,
    CollectionName::ModerationAuditLogs,
    CollectionName::Feedbacks,
];

/// Outcome of one sanitizer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub collection: CollectionName,
    pub operation: String,
    pub dry_run: bool,
    pub records_scanned: u64,
    pub records_cleaned: u64,
    pub records_skipped: u64,
    /// Dependent links removed (or that would be removed) by a parent cascade.
    pub records_cascaded: u64,
    pub errors: Vec<String>,
}

impl CleanupResult {
    pub fn new(collection: CollectionName, operation: &str, dry_run: bool) -> Self {
        Self {
            collection,
            operation: operation.to_string(),
            dry_run,
            records_scanned: 0,
            records_cleaned: 0,
            records_skipped: 0,
            records_cascaded: 0,
            errors: Vec::new(),
        }
    }

    /// A sanitizer that could not run at all.
    pub fn failed(collection: CollectionName, dry_run: bool, error: &anyhow::Error) -> Self {
        let mut result = Self::new(collection, "failed", dry_run);
        result.errors.push(format!("{error:#}"));
        result
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn log(&self) {
        if self.errors.is_empty() {
            tracing::info!(
                collection = %self.collection,
                operation = %self.operation,
                dry_run = self.dry_run,
                scanned = self.records_scanned,
                cleaned = self.records_cleaned,
                skipped = self.records_skipped,
                cascaded = self.records_cascaded,
                "Sanitizer finished"
            );
        } else {
            tracing::warn!(
                collection = %self.collection,
                operation = %self.operation,
                dry_run = self.dry_run,
                scanned = self.records_scanned,
                cleaned = self.records_cleaned,
                skipped = self.records_skipped,
                cascaded = self.records_cascaded,
                errors = self.errors.len(),
                "Sanitizer finished with errors"
            );
        }
    }
}

/// Runs the collection sanitizers against one store.
pub struct Sanitizer {
    store: Arc<dyn DocumentStore>,
    batch_size: usize,
}

impl Sanitizer {
    pub fn new(store: Arc<dyn DocumentStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Run one sanitizer by collection name.
    pub async fn sanitize(&self, target: CollectionName, dry_run: bool) -> Result<CleanupResult> {
        let result = match target {
            CollectionName::Collections => self.sanitize_collections(dry_run).await?,
            CollectionName::Bookmarks => self.sanitize_bookmarks(dry_run).await?,
            CollectionName::BookmarkFolders => self.sanitize_bookmark_folders(dry_run).await?,
            CollectionName::BookmarkFolderLinks => {
                self.sanitize_bookmark_folder_links(dry_run).await?
            }
            CollectionName::Reports => self.sanitize_reports(dry_run).await?,
            CollectionName::ModerationAuditLogs => {
                self.sanitize_moderation_audit_logs(dry_run).await?
            }
            CollectionName::Feedbacks => self.sanitize_feedback(dry_run).await?,
            CollectionName::Users | CollectionName::Articles => {
                bail!("{target} has no sanitizer; its references need manual review")
            }
        };
        Ok(result)
    }

    /// Run every sanitizer in [`EXECUTION_ORDER`].
    ///
    /// A sanitizer that fails outright is recorded as a failed result and the
    /// remaining sanitizers still run.
    pub async fn run_all(&self, dry_run: bool) -> SanitizationStats {
        let started_at = Utc::now();

        tracing::info!(dry_run = dry_run, backend = self.store.backend(), "Starting sanitizers");

        let mut results = Vec::with_capacity(EXECUTION_ORDER.len());
        for collection in EXECUTION_ORDER {
            let result = match self.sanitize(collection, dry_run).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        collection = %collection,
                        error = %e,
                        "Sanitizer failed"
                    );
                    CleanupResult::failed(collection, dry_run, &e)
                }
            };
            result.log();
            results.push(result);
        }

        SanitizationStats::from_results(dry_run, started_at, Utc::now(), results)
    }

    /// Delete `doomed` parents in batches, removing their dependent links first.
    ///
    /// `cascade` names the link field pointing at the parent. A batch whose
    /// cascade fails keeps its parents so no link is left dangling.
    async fn delete_in_batches(
        &self,
        result: &mut CleanupResult,
        doomed: &[String],
        cascade: Option<&'static str>,
    ) -> Result<()> {
        let collection = result.collection;
        if doomed.is_empty() {
            return Ok(());
        }

        let dependents = match cascade {
            Some(field) => links::links_by_parent(self.store.as_ref(), field, doomed).await?,
            None => Default::default(),
        };

        let total_batches = doomed.len().div_ceil(self.batch_size);
        for (batch_idx, batch) in doomed.chunks(self.batch_size).enumerate() {
            let link_ids: Vec<String> = batch
                .iter()
                .filter_map(|id| dependents.get(id))
                .flatten()
                .cloned()
                .collect();

            tracing::debug!(
                collection = %collection,
                batch = batch_idx + 1,
                total_batches = total_batches,
                batch_size = batch.len(),
                links = link_ids.len(),
                "Processing deletion batch"
            );

            if result.dry_run {
                for id in batch {
                    tracing::info!(
                        collection = %collection,
                        id = %id,
                        "[DRY-RUN] Would delete document"
                    );
                }
                result.records_skipped += batch.len() as u64;
                result.records_cascaded += link_ids.len() as u64;
                continue;
            }

            if !link_ids.is_empty() {
                match self
                    .store
                    .delete_many(CollectionName::BookmarkFolderLinks, &link_ids)
                    .await
                {
                    Ok(deleted) => result.records_cascaded += deleted,
                    Err(e) => {
                        tracing::error!(
                            collection = %collection,
                            batch = batch_idx + 1,
                            error = %e,
                            "Failed to cascade link deletion, keeping parents"
                        );
                        result.errors.push(format!(
                            "batch {}: cascade to {} failed: {e}",
                            batch_idx + 1,
                            CollectionName::BookmarkFolderLinks
                        ));
                        continue;
                    }
                }
            }

            match self.store.delete_many(collection, batch).await {
                Ok(deleted) => {
                    tracing::info!(
                        collection = %collection,
                        deleted = deleted,
                        "Deleted orphaned documents"
                    );
                    result.records_cleaned += deleted;
                }
                Err(e) => {
                    tracing::error!(
                        collection = %collection,
                        batch = batch_idx + 1,
                        error = %e,
                        "Failed to delete batch"
                    );
                    result.errors.push(format!(
                        "batch {}: delete from {collection} failed: {e}",
                        batch_idx + 1
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Whether the policy table lets a sanitizer act on every listed field.
fn policy_allows(collection: CollectionName, fields: &[&str]) -> bool {
    let denied: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|field| !policy::is_auto_fixable(collection, field))
        .collect();

    if !denied.is_empty() {
        tracing::warn!(
            collection = %collection,
            fields = ?denied,
            "Policy forbids automatic repair, leaving documents untouched"
        );
    }
    denied.is_empty()
}
