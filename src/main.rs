//! docsweep: find and repair dangling references in a document store.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::utils::{handle_common_command, init_logging, load_config};
use common::cli::{CommonArgs, CommonCommands};
use common::config::{Configuration, FORCE_EXECUTE_VAR};
use common::{CollectionName, store};
use sanitizer::{
    IssueDiscovery, Orchestrator, ReportWriter, Sanitizer, VerificationEngine, generate_report,
};

#[derive(Parser, Debug)]
#[command(name = "docsweep", version, about = "Document store integrity sanitizer")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Turn dry-run off (overrides DRY_RUN)
    #[arg(long, global = true)]
    execute: bool,

    /// Confirm destructive changes (overrides FORCE_EXECUTE)
    #[arg(long, global = true)]
    force: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover, report, clean up and verify (default)
    Run,
    /// Discover issues and write the report without changing anything
    Discover {
        #[arg(long, help = "Write the report to this path instead of the configured one")]
        output: Option<PathBuf>,
    },
    /// Run the integrity checks
    Verify {
        #[arg(long, help = "Fail when an advisory check fails too")]
        strict: bool,
    },
    /// Run a single collection sanitizer
    Sanitize {
        /// Collection to sanitize, e.g. bookmarks or bookmark-folder-links
        collection: CollectionName,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

impl Cli {
    async fn run(self) -> Result<ExitCode> {
        let mut config = load_config(self.common.config.as_ref())?;
        if self.execute {
            config.sanitizer.dry_run = false;
        }
        if self.force {
            config.sanitizer.force_execute = true;
        }

        let command = self.command.unwrap_or(Commands::Run);
        tracing::debug!(command = ?command, "Dispatching command");

        if let Commands::Common(common) = &command {
            handle_common_command(common, &config)?;
            return Ok(ExitCode::SUCCESS);
        }

        config.validate().context("Invalid configuration")?;

        match command {
            Commands::Run => {
                let outcome = Orchestrator::new(config).run().await;
                if let Some(error) = &outcome.error {
                    eprintln!("Error: {error}");
                }
                log::info!(
                    "Run finished in phase {:?} with exit code {}",
                    outcome.final_phase(),
                    outcome.exit_code
                );
                Ok(ExitCode::from(outcome.exit_code))
            }
            Commands::Discover { output } => discover(&config, output).await,
            Commands::Verify { strict } => verify(&config, strict).await,
            Commands::Sanitize { collection } => sanitize(&config, collection).await,
            Commands::Common(_) => Ok(ExitCode::SUCCESS),
        }
    }
}

async fn discover(config: &Configuration, output: Option<PathBuf>) -> Result<ExitCode> {
    let store = store::connect(&config.database.dsn)
        .await
        .context("Failed to connect to document store")?;

    let issues = IssueDiscovery::new(store, config.sanitizer.sample_size)
        .discover_all_issues()
        .await?;
    let report = generate_report(issues, true);
    report.log();

    let writer = ReportWriter::new(
        config.sanitizer.report_dir.clone(),
        config.sanitizer.report_file_name.clone(),
    );
    let path = writer
        .write_report_to_file(&report, output.as_deref())
        .await?;
    log::info!("Report written to {}", path.display());

    Ok(ExitCode::SUCCESS)
}

async fn verify(config: &Configuration, strict: bool) -> Result<ExitCode> {
    let store = store::connect(&config.database.dsn)
        .await
        .context("Failed to connect to document store")?;

    let result = VerificationEngine::new(store, config.sanitizer.sample_size)
        .verify_database_integrity()
        .await;
    result.log();

    let ok = if strict { result.all_passed } else { result.passed };
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn sanitize(config: &Configuration, collection: CollectionName) -> Result<ExitCode> {
    let dry_run = config.sanitizer.dry_run;
    if !dry_run && !config.sanitizer.force_execute {
        log::warn!("Execute mode requires explicit confirmation; nothing was changed");
        log::warn!("Re-run with {FORCE_EXECUTE_VAR}=true or --force to apply the fixes");
        return Ok(ExitCode::FAILURE);
    }

    let store = store::connect(&config.database.dsn)
        .await
        .context("Failed to connect to document store")?;

    let result = Sanitizer::new(store, config.sanitizer.batch_size)
        .sanitize(collection, dry_run)
        .await?;
    result.log();
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize cleanup result")?
    );

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.common);

    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}
