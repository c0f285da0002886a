//! # Sitewatch Core
//!
//! Scan lifecycle and issue deduplication for the sitewatch audit service.
//!
//! ## Overview
//!
//! - **Orchestration**: accepts scans, runs them on a bounded worker pool and
//!   walks the analyzer fallback chain of each scan type
//! - **Fingerprinting**: content-based identity for issues
//! - **Lifecycle**: turns the findings of one run into created, recurring and
//!   resolved issues
//! - **Aggregation**: rebuilds the per-project severity snapshot
//! - **Coordination**: commits lifecycle, scan completion and aggregation as
//!   one unit
//! - **Persistence**: storage ports with in-memory and PostgreSQL backends
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL store and migrations (default)
//! - `postgres-tests`: store tests against a live database
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sitewatch_core::{
//!     AnalyzerRegistry, HttpReachabilityProbe, InMemoryAuditStore, OrchestratorConfig,
//!     ScanOrchestrator,
//! };
//! use sitewatch_model::{ProjectId, ScanTriggerRequest, ScanType};
//!
//! # async fn run() -> sitewatch_core::Result<()> {
//! let config = OrchestratorConfig::default();
//! let probe = HttpReachabilityProbe::new(reqwest::Client::new(), config.reachability_timeout());
//! let orchestrator = ScanOrchestrator::start(
//!     config,
//!     Arc::new(InMemoryAuditStore::new()),
//!     AnalyzerRegistry::new(),
//!     Arc::new(probe),
//! );
//!
//! let accepted = orchestrator
//!     .start_scan(ScanTriggerRequest {
//!         project_id: ProjectId::new(),
//!         url: "https://example.com".into(),
//!         scan_type: ScanType::Accessibility,
//!         options: serde_json::Value::Null,
//!         scan_id: None,
//!     })
//!     .await?;
//! let view = orchestrator.scan_status(accepted.scan_id).await?;
//! println!("{} is {}", view.scan_id, view.status);
//! # Ok(())
//! # }
//! ```
#![allow(missing_docs)]

pub mod aggregation;
pub mod analyzer;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod lifecycle;
pub mod orchestration;
pub mod persistence;
pub mod reachability;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use aggregation::AggregationEngine;
pub use analyzer::{
    AnalyzerAdapter, AnalyzerError, AnalyzerRegistry, AnalyzerReport, RemoteAnalyzer,
};
pub use coordinator::{AnalysisOutcome, ScanCommit, TransactionCoordinator};
pub use error::{AuditError, Result};
pub use fingerprint::{finding_hash, issue_hash};
pub use lifecycle::{IssueLifecycleTracker, ScanContext};
pub use orchestration::{
    AnalyzerEndpointConfig, AnalyzersConfig, OrchestratorConfig, ScanOrchestrator,
};
pub use persistence::{AuditStore, AuditTransaction, InMemoryAuditStore};
#[cfg(feature = "database")]
pub use persistence::PostgresAuditStore;
pub use reachability::{HttpReachabilityProbe, ReachabilityProbe};
