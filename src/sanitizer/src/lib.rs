//! Integrity engine for a schema-less document store.
//!
//! Discovers dangling cross-collection references, classifies them through a
//! declarative risk policy, repairs the ones that are safe to fix and verifies
//! the result.

pub mod discovery;
pub mod orchestrator;
pub mod policy;
pub mod references;
pub mod report;
pub mod sanitizers;
pub mod stats;
pub mod verify;

pub use discovery::{IssueDiscovery, SanitizationIssue};
pub use orchestrator::{Orchestrator, Phase, RunOutcome};
pub use policy::{IssueType, RiskTier};
pub use report::{PostCleanupReport, ReportWriter, SanitizationReport, generate_report};
pub use sanitizers::{CleanupResult, EXECUTION_ORDER, Sanitizer};
pub use stats::SanitizationStats;
pub use verify::{CheckSeverity, VerificationCheck, VerificationEngine, VerificationResult};
