//! Phase driver of a full integrity run.
//!
//! ```text
//! Connecting -> Discovering -> Reporting -> DryRunExit
//!                                        -> AwaitingConfirmation
//!                                        -> Executing -> Verifying -> Done
//! ```
//!
//! Any error outside the per-sanitizer error channel ends the run in `Failed`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::config::{Configuration, FORCE_EXECUTE_VAR};
use common::{DocumentStore, store};
use serde::Serialize;

use crate::discovery::IssueDiscovery;
use crate::report::{PostCleanupReport, ReportWriter, SanitizationReport, generate_report};
use crate::sanitizers::Sanitizer;
use crate::stats::SanitizationStats;
use crate::verify::{VerificationEngine, VerificationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Connecting,
    Discovering,
    Reporting,
    DryRunExit,
    AwaitingConfirmation,
    Executing,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Everything a run produced, plus the exit code the process should use.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub phases: Vec<Phase>,
    pub exit_code: u8,
    pub report_path: Option<PathBuf>,
    pub post_cleanup_report_path: Option<PathBuf>,
    pub initial_report: Option<SanitizationReport>,
    pub final_report: Option<SanitizationReport>,
    pub stats: Option<SanitizationStats>,
    pub verification: Option<VerificationResult>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn final_phase(&self) -> Option<Phase> {
        self.phases.last().copied()
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(phase = %phase, "Entering phase");
        self.phases.push(phase);
    }

    fn fail(&mut self, error: anyhow::Error) {
        tracing::error!(error = %format!("{error:#}"), "Run failed");
        self.error = Some(format!("{error:#}"));
        self.exit_code = 1;
        self.enter(Phase::Failed);
    }
}

/// Drives discovery, reporting, cleanup and verification for one configuration.
pub struct Orchestrator {
    config: Configuration,
    writer: ReportWriter,
}

impl Orchestrator {
    pub fn new(config: Configuration) -> Self {
        let writer = ReportWriter::new(
            config.sanitizer.report_dir.clone(),
            config.sanitizer.report_file_name.clone(),
        );
        Self { config, writer }
    }

    /// Connect to the configured store and run every phase.
    pub async fn run(&self) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        outcome.enter(Phase::Connecting);

        let store = match store::connect(&self.config.database.dsn).await {
            Ok(store) => store,
            Err(e) => {
                outcome.fail(anyhow::Error::new(e).context("Failed to connect to document store"));
                return outcome;
            }
        };

        self.drive(store, &mut outcome).await;
        outcome
    }

    /// Run every phase against an already opened store.
    pub async fn run_with_store(&self, store: Arc<dyn DocumentStore>) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        outcome.enter(Phase::Connecting);

        if let Err(e) = store.ping().await {
            outcome.fail(anyhow::Error::new(e).context("Document store is unreachable"));
            return outcome;
        }

        self.drive(store, &mut outcome).await;
        outcome
    }

    async fn drive(&self, store: Arc<dyn DocumentStore>, outcome: &mut RunOutcome) {
        if let Err(e) = self.phases(store, outcome).await {
            outcome.fail(e);
        }
    }

    async fn phases(&self, store: Arc<dyn DocumentStore>, outcome: &mut RunOutcome) -> Result<()> {
        let settings = &self.config.sanitizer;
        let discovery = IssueDiscovery::new(store.clone(), settings.sample_size);

        outcome.enter(Phase::Discovering);
        let issues = discovery
            .discover_all_issues()
            .await
            .context("Issue discovery failed")?;

        outcome.enter(Phase::Reporting);
        let report = generate_report(issues, settings.dry_run);
        report.log();
        let path = self.writer.write_report_to_file(&report, None).await?;
        log::info!("Report written to {}", path.display());
        outcome.report_path = Some(path);
        outcome.initial_report = Some(report);

        if settings.dry_run {
            outcome.enter(Phase::DryRunExit);
            log::info!("Dry run complete, no changes were made");
            outcome.exit_code = 0;
            return Ok(());
        }

        if !settings.force_execute {
            outcome.enter(Phase::AwaitingConfirmation);
            log::warn!("Execute mode requires explicit confirmation; nothing was changed");
            log::warn!("Re-run with {FORCE_EXECUTE_VAR}=true or --force to apply the fixes");
            outcome.exit_code = 1;
            return Ok(());
        }

        outcome.enter(Phase::Executing);
        let stats = Sanitizer::new(store.clone(), settings.batch_size)
            .run_all(false)
            .await;
        stats.log();

        outcome.enter(Phase::Verifying);
        let remaining = discovery
            .discover_all_issues()
            .await
            .context("Post-cleanup discovery failed")?;
        let verification = VerificationEngine::new(store, settings.sample_size)
            .verify_database_integrity()
            .await;
        verification.log();

        let final_report = generate_report(remaining, false);
        if final_report.has_issues() {
            let merged = PostCleanupReport {
                report: final_report.clone(),
                cleanup: stats.clone(),
                verification: verification.clone(),
            };
            let path = self.writer.write_post_cleanup(&merged).await?;
            log::info!(
                "{} issues remain for manual review, see {}",
                final_report.summary.total_issues,
                path.display()
            );
            outcome.post_cleanup_report_path = Some(path);
        } else {
            log::info!("No issues remain after cleanup");
        }

        outcome.final_report = Some(final_report);
        outcome.stats = Some(stats);
        outcome.verification = Some(verification);

        outcome.enter(Phase::Done);
        outcome.exit_code = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testing::{FixtureBuilder, TestConfigBuilder};

    fn fixtures() -> FixtureBuilder {
        FixtureBuilder::new()
            .users(["U1"])
            .article("A1", "U1")
            .bookmark("B1", "U1", "A1")
            .bookmark("B2", "U2", "A1")
    }

    #[tokio::test]
    async fn test_dry_run_stops_after_reporting() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixtures().build().await;
        let config = TestConfigBuilder::new().in_memory().with_report_dir(dir.path()).build();

        let outcome = Orchestrator::new(config).run_with_store(store.clone()).await;

        assert_eq!(
            outcome.phases,
            vec![Phase::Connecting, Phase::Discovering, Phase::Reporting, Phase::DryRunExit]
        );
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.report_path.unwrap().exists());
        assert_eq!(store.count(common::CollectionName::Bookmarks).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unforced_execute_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixtures().build().await;
        let config = TestConfigBuilder::new()
            .in_memory()
            .with_report_dir(dir.path())
            .execute()
            .build();

        let outcome = Orchestrator::new(config).run_with_store(store.clone()).await;

        assert_eq!(outcome.final_phase(), Some(Phase::AwaitingConfirmation));
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.stats.is_none());
        assert_eq!(store.count(common::CollectionName::Bookmarks).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_forced_execute_cleans_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixtures().build().await;
        let config = TestConfigBuilder::new()
            .in_memory()
            .with_report_dir(dir.path())
            .execute()
            .forced()
            .build();

        let outcome = Orchestrator::new(config).run_with_store(store.clone()).await;

        assert_eq!(outcome.final_phase(), Some(Phase::Done));
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stats.as_ref().unwrap().total_cleaned, 1);
        assert!(outcome.verification.as_ref().unwrap().passed);
        assert!(!outcome.final_report.as_ref().unwrap().has_issues());
        assert!(outcome.post_cleanup_report_path.is_none());
    }
}
