use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sitewatch_model::ScanType;
use url::Url;

/// Worker pool and time budgets for scan execution.
///
/// Every field has a default so a partial TOML table is enough.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of worker tasks draining the scan queue.
    pub workers: usize,
    /// Scans accepted but not yet picked up by a worker.
    pub queue_capacity: usize,
    pub reachability_timeout_ms: u64,
    /// Budget for a single analyzer call.
    pub adapter_timeout_ms: u64,
    /// Budget for a whole scan, probe and commit included.
    pub scan_timeout_ms: u64,
    /// Run at most one scan at a time per (project, scan type, target).
    pub serialize_per_target: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            reachability_timeout_ms: 10_000,
            adapter_timeout_ms: 60_000,
            scan_timeout_ms: 5 * 60 * 1_000,
            serialize_per_target: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Worst-case time for a scan whose chain has `chain_len` adapters that
    /// all run into their timeout.
    pub fn worst_case_chain(&self, chain_len: usize) -> Duration {
        let adapters = u32::try_from(chain_len).unwrap_or(u32::MAX);
        self.reachability_timeout()
            .saturating_add(self.adapter_timeout().saturating_mul(adapters))
    }
}

/// One remote analyzer in a fallback chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerEndpointConfig {
    pub name: String,
    pub endpoint: Url,
}

/// Ordered analyzer endpoints per scan type. Order is fallback order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzersConfig {
    pub chains: BTreeMap<ScanType, Vec<AnalyzerEndpointConfig>>,
}

impl AnalyzersConfig {
    pub fn chain_len(&self, scan_type: ScanType) -> usize {
        self.chains.get(&scan_type).map_or(0, Vec::len)
    }

    pub fn longest_chain(&self) -> usize {
        self.chains.values().map(Vec::len).max().unwrap_or(0)
    }
}
