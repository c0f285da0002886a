//! Analyzer contract and the per-scan-type fallback chains.

mod remote;

pub use remote::RemoteAnalyzer;

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use sitewatch_model::{Finding, ScanType};
use thiserror::Error;
use url::Url;

use crate::error::{AuditError, Result};
use crate::orchestration::config::AnalyzersConfig;

/// Output of one successful analyzer invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzerReport {
    pub findings: Vec<Finding>,
    /// Coarse, analyzer-specific summary. Stored in scan diagnostics only.
    pub summary: serde_json::Value,
}

impl AnalyzerReport {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self {
            findings,
            summary: serde_json::Value::Null,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("analyzer returned HTTP {0}")]
    Status(u16),

    #[error("invalid analyzer response: {0}")]
    InvalidResponse(String),

    #[error("analyzer panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

/// One analysis strategy for a scan type.
///
/// Implementations may block on network I/O; the orchestrator wraps every
/// call in its own timeout.
#[async_trait]
pub trait AnalyzerAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        url: &Url,
        options: &serde_json::Value,
    ) -> std::result::Result<AnalyzerReport, AnalyzerError>;
}

/// Lookup table from scan type to its ordered adapter chain.
#[derive(Clone, Default)]
pub struct AnalyzerRegistry {
    chains: HashMap<ScanType, Vec<Arc<dyn AnalyzerAdapter>>>,
}

impl fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (scan_type, chain) in &self.chains {
            let names: Vec<&str> =
                chain.iter().map(|adapter| adapter.name()).collect();
            map.entry(scan_type, &names);
        }
        map.finish()
    }
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `adapter` to the end of the chain for `scan_type`.
    pub fn register(
        &mut self,
        scan_type: ScanType,
        adapter: Arc<dyn AnalyzerAdapter>,
    ) -> &mut Self {
        self.chains.entry(scan_type).or_default().push(adapter);
        self
    }

    pub fn with(
        mut self,
        scan_type: ScanType,
        adapter: Arc<dyn AnalyzerAdapter>,
    ) -> Self {
        self.register(scan_type, adapter);
        self
    }

    pub fn chain(&self, scan_type: ScanType) -> &[Arc<dyn AnalyzerAdapter>] {
        self.chains
            .get(&scan_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Scan types with no adapter at all. Scans of these types always fail.
    pub fn uncovered(&self) -> Vec<ScanType> {
        ScanType::ALL
            .into_iter()
            .filter(|scan_type| self.chain(*scan_type).is_empty())
            .collect()
    }

    /// Build remote adapters for every configured endpoint, sharing one
    /// HTTP client.
    pub fn from_config(
        config: &AnalyzersConfig,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for (scan_type, endpoints) in &config.chains {
            for endpoint in endpoints {
                if !matches!(endpoint.endpoint.scheme(), "http" | "https") {
                    return Err(AuditError::InvalidTarget(format!(
                        "analyzer {} endpoint must be http(s): {}",
                        endpoint.name, endpoint.endpoint
                    )));
                }
                let adapter = RemoteAnalyzer::new(
                    endpoint.name.clone(),
                    endpoint.endpoint.clone(),
                    client.clone(),
                );
                registry.register(*scan_type, Arc::new(adapter));
            }
        }
        Ok(registry)
    }
}
