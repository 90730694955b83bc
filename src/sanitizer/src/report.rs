//! Report generation and persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::SanitizationIssue;
use crate::policy::RiskTier;
use crate::stats::SanitizationStats;
use crate::verify::VerificationResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_issues: usize,
    pub total_affected_records: usize,
    /// Issues per risk tier; every tier is present.
    pub by_category: BTreeMap<RiskTier, usize>,
    /// Issues per collection.
    pub by_collection: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationReport {
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
    pub issues: Vec<SanitizationIssue>,
    pub summary: ReportSummary,
}

impl SanitizationReport {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    /// Issues a sanitizer may fix without review.
    pub fn auto_fixable(&self) -> impl Iterator<Item = &SanitizationIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.risk_tier == RiskTier::SafeAutoFix)
    }

    pub fn log(&self) {
        let mode = if self.dry_run { "dry-run" } else { "execute" };
        log::info!("=== Integrity Report ({mode}) ===");
        log::info!(
            "{} issues affecting {} records",
            self.summary.total_issues,
            self.summary.total_affected_records
        );
        for (tier, count) in &self.summary.by_category {
            log::info!("  {tier:<20} {count}");
        }
        for issue in &self.issues {
            log::info!(
                "  [{}] {}.{} {}: {} (e.g. {})",
                issue.risk_tier,
                issue.collection,
                issue.field,
                issue.issue_type,
                issue.count,
                issue.sample_ids.join(", ")
            );
        }
    }
}

/// Build a report from discovered issues. Pure.
pub fn generate_report(issues: Vec<SanitizationIssue>, dry_run: bool) -> SanitizationReport {
    let mut by_category: BTreeMap<RiskTier, usize> =
        RiskTier::ALL.into_iter().map(|tier| (tier, 0)).collect();
    let mut by_collection: BTreeMap<String, usize> = BTreeMap::new();

    for issue in &issues {
        *by_category.entry(issue.risk_tier).or_default() += 1;
        *by_collection
            .entry(issue.collection.as_str().to_string())
            .or_default() += 1;
    }

    let summary = ReportSummary {
        total_issues: issues.len(),
        total_affected_records: issues.iter().map(|issue| issue.count).sum(),
        by_category,
        by_collection,
    };

    SanitizationReport {
        timestamp: Utc::now(),
        dry_run,
        issues,
        summary,
    }
}

/// Final report of an execute run: the second discovery pass merged with the
/// cleanup totals and the verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCleanupReport {
    #[serde(flatten)]
    pub report: SanitizationReport,
    pub cleanup: SanitizationStats,
    pub verification: VerificationResult,
}

/// Writes report artifacts under a directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    report_dir: PathBuf,
    file_name: String,
}

impl ReportWriter {
    pub fn new(report_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            report_dir: report_dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Deterministic path of the primary report.
    pub fn primary_path(&self) -> PathBuf {
        self.report_dir.join(&self.file_name)
    }

    /// Timestamp-qualified path of a post-cleanup report.
    pub fn post_cleanup_path(&self, at: DateTime<Utc>) -> PathBuf {
        let stem = Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("sanitization-report");
        self.report_dir.join(format!(
            "{stem}-post-cleanup-{}.json",
            at.format("%Y%m%dT%H%M%S%3fZ")
        ))
    }

    /// Write the primary report, to `path` if given.
    pub async fn write_report_to_file(
        &self,
        report: &SanitizationReport,
        path: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| self.primary_path());
        write_json(&path, report).await?;
        Ok(path)
    }

    pub async fn write_post_cleanup(&self, report: &PostCleanupReport) -> Result<PathBuf> {
        let path = self.post_cleanup_path(Utc::now());
        write_json(&path, report).await?;
        Ok(path)
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create report directory {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(value).context("Failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write report to {}", path.display()))?;

    tracing::info!(path = %path.display(), "Report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::IssueType;
    use chrono::TimeZone;
    use common::CollectionName;

    fn issue(collection: CollectionName, tier: RiskTier, count: usize) -> SanitizationIssue {
        SanitizationIssue {
            collection,
            field: "userId".into(),
            issue_type: IssueType::OrphanedReference,
            description: "test".into(),
            count,
            sample_ids: vec!["X1".into()],
            risk_tier: tier,
        }
    }

    #[test]
    fn test_summary_counts() {
        let report = generate_report(
            vec![
                issue(CollectionName::Bookmarks, RiskTier::SafeAutoFix, 3),
                issue(CollectionName::Bookmarks, RiskTier::SafeAutoFix, 2),
                issue(CollectionName::Reports, RiskTier::DoNotTouch, 4),
            ],
            true,
        );

        assert_eq!(report.summary.total_issues, 3);
        assert_eq!(report.summary.total_affected_records, 9);
        assert_eq!(report.summary.by_category[&RiskTier::SafeAutoFix], 2);
        assert_eq!(report.summary.by_category[&RiskTier::ConditionalCleanup], 0);
        assert_eq!(report.summary.by_category[&RiskTier::DoNotTouch], 1);
        assert_eq!(report.summary.by_collection["bookmarks"], 2);
        assert_eq!(report.auto_fixable().count(), 2);
    }

    #[test]
    fn test_empty_report_lists_every_tier() {
        let report = generate_report(Vec::new(), false);
        assert!(!report.has_issues());
        assert_eq!(report.summary.by_category.len(), 3);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["summary"]["byCategory"]["SAFE_AUTO_FIX"], 0);
        assert_eq!(value["summary"]["totalAffectedRecords"], 0);
        assert_eq!(value["dryRun"], false);
    }

    #[test]
    fn test_post_cleanup_path_is_timestamped() {
        let writer = ReportWriter::new("/tmp/reports", "sanitization-report.json");
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(
            writer.post_cleanup_path(at),
            PathBuf::from("/tmp/reports/sanitization-report-post-cleanup-20240309T140507000Z.json")
        );
        assert_eq!(
            writer.primary_path(),
            PathBuf::from("/tmp/reports/sanitization-report.json")
        );
    }

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("nested/reports"), "report.json");
        let report = generate_report(
            vec![issue(CollectionName::Bookmarks, RiskTier::SafeAutoFix, 1)],
            true,
        );

        let path = writer.write_report_to_file(&report, None).await.unwrap();
        assert_eq!(path, dir.path().join("nested/reports/report.json"));

        let written: SanitizationReport =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, report);

        let explicit = dir.path().join("elsewhere.json");
        let path = writer
            .write_report_to_file(&report, Some(&explicit))
            .await
            .unwrap();
        assert_eq!(path, explicit);
        assert!(explicit.exists());
    }
}
