//! Test utilities for docsweep.
//!
//! Builders for test configurations, seeded document stores, and a store
//! wrapper that injects write failures.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{FixtureBuilder, TestConfigBuilder};
//!
//! let config = TestConfigBuilder::new().in_memory().execute().forced().build();
//! let store = FixtureBuilder::new()
//!     .users(["U1"])
//!     .articles(["A1"])
//!     .bookmark("B1", "U1", "A1")
//!     .build()
//!     .await;
//! ```

mod config_builder;
mod faults;
mod fixtures;

pub use config_builder::TestConfigBuilder;
pub use faults::FaultyStore;
pub use fixtures::FixtureBuilder;
