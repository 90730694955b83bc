use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "docsweep.toml";

/// Prefix of layered environment overrides, split on `__`.
pub const ENV_PREFIX: &str = "DOCSWEEP__";

/// Process variable selecting dry-run mode. Anything but `"false"` keeps dry-run on.
pub const DRY_RUN_VAR: &str = "DRY_RUN";

/// Process variable confirming a destructive run. Only `"true"` confirms.
pub const FORCE_EXECUTE_VAR: &str = "FORCE_EXECUTE";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string of the document store (`memory://`, `sqlite:`, `postgres:`)
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/docsweep.db"),
        }
    }
}

impl DatabaseConfig {
    /// In-process store, mostly useful for tests and demos
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("memory://"),
        }
    }
}

/// Sanitization run configuration.
///
/// ## Safety Defaults
///
/// - `dry_run`: true (report only, never mutate)
/// - `force_execute`: false (an execute run must be confirmed explicitly)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Detect and report without mutating the store.
    ///
    /// Env: DOCSWEEP__SANITIZER__DRY_RUN, or the process variable DRY_RUN
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    /// Confirmation for an execute run.
    ///
    /// Env: DOCSWEEP__SANITIZER__FORCE_EXECUTE, or the process variable FORCE_EXECUTE
    #[serde(default)]
    pub force_execute: bool,

    /// Directory receiving report artifacts.
    ///
    /// Env: DOCSWEEP__SANITIZER__REPORT_DIR
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// File name of the primary (pre-cleanup) report.
    ///
    /// Env: DOCSWEEP__SANITIZER__REPORT_FILE_NAME
    #[serde(default = "default_report_file_name")]
    pub report_file_name: String,

    /// Number of affected document IDs kept per issue for diagnostics.
    ///
    /// Env: DOCSWEEP__SANITIZER__SAMPLE_SIZE
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Maximum IDs per bulk delete call.
    ///
    /// Env: DOCSWEEP__SANITIZER__BATCH_SIZE
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_dry_run() -> bool {
    true
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".data/reports")
}

fn default_report_file_name() -> String {
    "sanitization-report.json".to_string()
}

fn default_sample_size() -> usize {
    5
}

fn default_batch_size() -> usize {
    500
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            dry_run: default_dry_run(),
            force_execute: false,
            report_dir: default_report_dir(),
            report_file_name: default_report_file_name(),
            sample_size: default_sample_size(),
            batch_size: default_batch_size(),
        }
    }
}

impl SanitizerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_size == 0 {
            anyhow::bail!("sample_size must be positive, got {}", self.sample_size);
        }

        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be positive, got {}", self.batch_size);
        }

        if self.report_dir.as_os_str().is_empty() {
            anyhow::bail!("report_dir cannot be empty");
        }

        Ok(())
    }

    /// Apply the raw `DRY_RUN` / `FORCE_EXECUTE` process values.
    ///
    /// A present `DRY_RUN` selects execute mode only for the literal `"false"`.
    /// A present `FORCE_EXECUTE` confirms only for the literal `"true"`.
    pub fn apply_process_flags(&mut self, dry_run: Option<&str>, force_execute: Option<&str>) {
        if let Some(value) = dry_run {
            self.dry_run = value != "false";
        }

        if let Some(value) = force_execute {
            self.force_execute = value == "true";
        }
    }

    /// Path of the primary report artifact.
    pub fn report_path(&self) -> PathBuf {
        self.report_dir.join(&self.report_file_name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Document store connection
    pub database: DatabaseConfig,
    /// Sanitization run settings
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
}

impl Configuration {
    /// Load defaults, `docsweep.toml`, `DOCSWEEP__*` and the process flags.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Configuration::default()))
                .merge(Toml::file(DEFAULT_CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Same layering as [`Configuration::load`] with an explicit TOML file.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Configuration::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, Box<figment::Error>> {
        let mut config: Configuration = figment.extract().map_err(Box::new)?;

        let dry_run = std::env::var(DRY_RUN_VAR).ok();
        let force_execute = std::env::var(FORCE_EXECUTE_VAR).ok();
        config
            .sanitizer
            .apply_process_flags(dry_run.as_deref(), force_execute.as_deref());

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.dsn.is_empty() {
            anyhow::bail!("Database DSN cannot be empty");
        }

        self.sanitizer.validate()
    }
}
