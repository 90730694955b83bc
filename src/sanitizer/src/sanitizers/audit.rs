//! Reports, moderation audit logs and feedback are never mutated.

use anyhow::{Context, Result};
use common::CollectionName;

use super::{CleanupResult, Sanitizer};

impl Sanitizer {
    pub async fn sanitize_reports(&self, dry_run: bool) -> Result<CleanupResult> {
        self.preserve(CollectionName::Reports, dry_run).await
    }

    pub async fn sanitize_moderation_audit_logs(&self, dry_run: bool) -> Result<CleanupResult> {
        self.preserve(CollectionName::ModerationAuditLogs, dry_run)
            .await
    }

    /// Attributed feedback is kept for review even when its user is gone.
    pub async fn sanitize_feedback(&self, dry_run: bool) -> Result<CleanupResult> {
        self.preserve(CollectionName::Feedbacks, dry_run).await
    }

    /// Count the collection and skip every document, in either mode.
    async fn preserve(&self, collection: CollectionName, dry_run: bool) -> Result<CleanupResult> {
        let mut result = CleanupResult::new(collection, "preserve", dry_run);

        let count = self
            .store
            .count(collection)
            .await
            .with_context(|| format!("Failed to count {collection}"))?;
        result.records_scanned = count;
        result.records_skipped = count;

        tracing::info!(
            collection = %collection,
            documents = count,
            audit_trail = collection.is_audit_trail(),
            "Preserved collection without changes"
        );

        Ok(result)
    }
}
