//! Scan intake, the worker pool and per-target serialization.

pub mod config;
pub mod locks;
pub mod runtime;

pub use config::{AnalyzerEndpointConfig, AnalyzersConfig, OrchestratorConfig};
pub use locks::{TargetKey, TargetQueues};
pub use runtime::ScanOrchestrator;
