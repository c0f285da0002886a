//! Core data model definitions shared across sitewatch crates.
#![allow(missing_docs)]

pub mod diagnostics;
pub mod error;
pub mod finding;
pub mod ids;
pub mod issue;
pub mod project;
pub mod scan;
pub mod severity;

pub use diagnostics::{AdapterAttempt, ReachabilityOutcome, ScanDiagnostics};
pub use error::{ModelError, Result as ModelResult};
pub use finding::Finding;
pub use ids::{IssueId, ProjectId, ScanId, UrlId};
pub use issue::{Issue, IssueHash, ScanDelta, ScanFindingRecord};
pub use project::{ProjectSnapshot, ProjectStatus, SeverityCounts};
pub use scan::{
    Scan, ScanAccepted, ScanStatus, ScanTriggerRequest, ScanType, ScanView,
};
pub use severity::Severity;
