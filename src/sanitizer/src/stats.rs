//! Totals of a sanitizer run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sanitizers::CleanupResult;

/// Aggregated outcome of [`crate::Sanitizer::run_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationStats {
    pub run_id: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_scanned: u64,
    pub total_cleaned: u64,
    pub total_skipped: u64,
    pub total_cascaded: u64,
    /// Number of captured error strings across all results.
    pub total_errors: usize,
    pub results: Vec<CleanupResult>,
}

impl SanitizationStats {
    pub fn from_results(
        dry_run: bool,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        results: Vec<CleanupResult>,
    ) -> Self {
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as u64;

        Self {
            run_id: format!("sanitize_{}", Uuid::new_v4().simple()),
            dry_run,
            started_at,
            completed_at,
            duration_ms,
            total_scanned: results.iter().map(|r| r.records_scanned).sum(),
            total_cleaned: results.iter().map(|r| r.records_cleaned).sum(),
            total_skipped: results.iter().map(|r| r.records_skipped).sum(),
            total_cascaded: results.iter().map(|r| r.records_cascaded).sum(),
            total_errors: results.iter().map(|r| r.errors.len()).sum(),
            results,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Errors of every result, prefixed by collection.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .flat_map(|result| {
                result
                    .errors
                    .iter()
                    .map(move |error| format!("{}: {error}", result.collection))
            })
            .collect()
    }

    /// Print the per-collection breakdown.
    pub fn log(&self) {
        let mode = if self.dry_run { "dry-run" } else { "execute" };
        log::info!("=== Sanitization Summary ({mode}, run {}) ===", self.run_id);
        for result in &self.results {
            log::info!(
                "{:<22} scanned {:>6}  cleaned {:>6}  skipped {:>6}  cascaded {:>6}  errors {}",
                result.collection.as_str(),
                result.records_scanned,
                result.records_cleaned,
                result.records_skipped,
                result.records_cascaded,
                result.errors.len()
            );
        }
        log::info!(
            "Totals: {} scanned, {} cleaned, {} skipped, {} cascaded, {} errors in {}ms",
            self.total_scanned,
            self.total_cleaned,
            self.total_skipped,
            self.total_cascaded,
            self.total_errors,
            self.duration_ms
        );
        for error in self.errors() {
            log::warn!("  {error}");
        }
    }
}
