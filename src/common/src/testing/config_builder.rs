//! Test configuration builder for creating test setups quickly.

use std::path::Path;

use crate::config::{Configuration, DatabaseConfig};

/// Builder for creating test configurations.
///
/// Provides a fluent API for creating configurations suitable for testing,
/// with sensible defaults that can be customized as needed.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let temp = tempfile::TempDir::new().unwrap();
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .with_report_dir(temp.path())
///     .execute()
///     .forced()
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Create a new test configuration builder with the production defaults
    /// (dry-run on, no force).
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Use the in-process store (`memory://`).
    pub fn in_memory(mut self) -> Self {
        self.config.database = DatabaseConfig::in_memory();
        self
    }

    /// Set the database DSN.
    pub fn with_database_dsn(mut self, dsn: &str) -> Self {
        self.config.database.dsn = dsn.to_string();
        self
    }

    /// Write report artifacts under `dir`.
    pub fn with_report_dir(mut self, dir: &Path) -> Self {
        self.config.sanitizer.report_dir = dir.to_path_buf();
        self
    }

    /// Turn dry-run off.
    pub fn execute(mut self) -> Self {
        self.config.sanitizer.dry_run = false;
        self
    }

    /// Confirm a destructive run.
    pub fn forced(mut self) -> Self {
        self.config.sanitizer.force_execute = true;
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.config.sanitizer.sample_size = sample_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.sanitizer.batch_size = batch_size;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
