//! Phase trail and exit codes of complete runs.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use common::config::Configuration;
use common::store::{MemoryStore, SqlDocumentStore};
use common::testing::{FixtureBuilder, TestConfigBuilder};
use common::{CollectionName, DocumentStore};
use sanitizer::{Orchestrator, Phase, PostCleanupReport, SanitizationReport};

fn fixtures() -> FixtureBuilder {
    FixtureBuilder::new()
        .users(["U1"])
        .article("A1", "U1")
        .article("A2", "U404")
        .bookmark("B1", "U1", "A1")
        .bookmark("B2", "U2", "A1")
        .folder("F1", "U1")
        .link("L1", "U1", "B2", "F1")
}

async fn seeded() -> Arc<MemoryStore> {
    fixtures().build().await
}

fn config(dir: &Path) -> TestConfigBuilder {
    TestConfigBuilder::new().in_memory().with_report_dir(dir)
}

fn read_report(path: &Path) -> Result<SanitizationReport> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

#[tokio::test]
async fn test_dry_run_exits_zero_without_changes() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir()?;
    let store = seeded().await;
    let before = store.snapshot().await;

    let outcome = Orchestrator::new(config(dir.path()).build())
        .run_with_store(store.clone())
        .await;

    assert_eq!(
        outcome.phases,
        vec![
            Phase::Connecting,
            Phase::Discovering,
            Phase::Reporting,
            Phase::DryRunExit
        ]
    );
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(store.snapshot().await, before);

    let path = outcome.report_path.expect("primary report path");
    assert_eq!(path, dir.path().join("sanitization-report.json"));
    let report = read_report(&path)?;
    assert!(report.dry_run);
    assert_eq!(report.summary.total_issues, 2);
    Ok(())
}

#[tokio::test]
async fn test_execute_without_force_exits_one() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = seeded().await;
    let before = store.snapshot().await;

    let outcome = Orchestrator::new(config(dir.path()).execute().build())
        .run_with_store(store.clone())
        .await;

    assert_eq!(outcome.final_phase(), Some(Phase::AwaitingConfirmation));
    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.error.is_none());
    assert!(outcome.report_path.is_some());
    assert_eq!(store.snapshot().await, before);
    Ok(())
}

#[tokio::test]
async fn test_forced_execute_writes_post_cleanup_report() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir()?;
    let store = seeded().await;

    let outcome = Orchestrator::new(config(dir.path()).execute().forced().build())
        .run_with_store(store.clone())
        .await;

    assert_eq!(
        outcome.phases,
        vec![
            Phase::Connecting,
            Phase::Discovering,
            Phase::Reporting,
            Phase::Executing,
            Phase::Verifying,
            Phase::Done
        ]
    );
    assert_eq!(outcome.exit_code, 0);

    let stats = outcome.stats.as_ref().expect("cleanup stats");
    assert_eq!(stats.total_cleaned, 1);
    assert_eq!(stats.total_cascaded, 1);
    assert_eq!(store.count(CollectionName::Bookmarks).await?, 1);
    assert_eq!(store.count(CollectionName::BookmarkFolderLinks).await?, 0);

    // A2's orphaned author needs review, so the run still ends in Done
    let verification = outcome.verification.as_ref().expect("verification");
    assert!(verification.passed);
    assert!(!verification.all_passed);

    let post_path = outcome
        .post_cleanup_report_path
        .as_ref()
        .expect("post-cleanup report");
    let file_name = post_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    assert!(file_name.starts_with("sanitization-report-post-cleanup-"));

    let post: PostCleanupReport = serde_json::from_slice(&std::fs::read(post_path)?)?;
    assert_eq!(post.report.summary.total_issues, 1);
    assert_eq!(post.cleanup.total_cleaned, 1);
    assert!(post.verification.passed);

    // The primary report is untouched by the second pass
    let primary = read_report(outcome.report_path.as_ref().expect("primary report"))?;
    assert_eq!(primary.summary.total_issues, 2);
    Ok(())
}

#[tokio::test]
async fn test_clean_execute_run_skips_post_cleanup_report() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FixtureBuilder::new()
        .users(["U1"])
        .article("A1", "U1")
        .bookmark("B1", "U2", "A1")
        .build()
        .await;

    let outcome = Orchestrator::new(config(dir.path()).execute().forced().build())
        .run_with_store(store)
        .await;

    assert_eq!(outcome.final_phase(), Some(Phase::Done));
    assert!(outcome.post_cleanup_report_path.is_none());
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_store_fails_before_discovery() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(dir.path())
        .with_database_dsn("mongodb://localhost:27017/app")
        .build();

    let outcome = Orchestrator::new(config).run().await;

    assert_eq!(outcome.phases, vec![Phase::Connecting, Phase::Failed]);
    assert_eq!(outcome.exit_code, 1);
    assert!(
        outcome
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("Failed to connect")
    );
    assert!(outcome.report_path.is_none());
    Ok(())
}

#[tokio::test]
async fn test_run_against_sqlite_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dsn = format!("sqlite://{}", dir.path().join("docsweep.db").display());

    {
        let store: Arc<dyn DocumentStore> = Arc::new(SqlDocumentStore::connect(&dsn).await?);
        fixtures().seed(store.as_ref()).await?;
    }

    let config: Configuration = TestConfigBuilder::new()
        .with_database_dsn(&dsn)
        .with_report_dir(&dir.path().join("reports"))
        .execute()
        .forced()
        .build();
    let outcome = Orchestrator::new(config).run().await;

    assert_eq!(outcome.final_phase(), Some(Phase::Done), "{:?}", outcome.error);
    assert_eq!(outcome.exit_code, 0);

    let store = SqlDocumentStore::connect(&dsn).await?;
    assert_eq!(store.count(CollectionName::Bookmarks).await?, 1);
    assert_eq!(store.count(CollectionName::BookmarkFolderLinks).await?, 0);
    Ok(())
}
