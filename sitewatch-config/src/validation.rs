//! Guard rails and warnings for a resolved [`Config`].

use std::fmt;

use sitewatch_model::ScanType;
use thiserror::Error;

use crate::models::Config;

/// Non-fatal finding about the configuration, shown at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            Some(hint) => write!(f, "{} ({hint})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings(Vec<ConfigWarning>);

impl ConfigWarnings {
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint(&mut self, message: impl Into<String>, hint: impl Into<String>) {
        self.0.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a ConfigWarnings {
    type Item = &'a ConfigWarning;
    type IntoIter = std::slice::Iter<'a, ConfigWarning>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Settings the process refuses to start with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("orchestrator.workers must be at least 1")]
    NoWorkers,
    #[error("orchestrator.queue_capacity must be at least 1")]
    NoQueue,
    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },
    #[error("analyzer '{name}' for {scan_type} scans must use http or https")]
    AnalyzerScheme { name: String, scan_type: ScanType },
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let orchestrator = &config.orchestrator;
    if orchestrator.workers == 0 {
        return Err(ConfigGuardRailError::NoWorkers);
    }
    if orchestrator.queue_capacity == 0 {
        return Err(ConfigGuardRailError::NoQueue);
    }
    for (name, value) in [
        ("orchestrator.reachability_timeout_ms", orchestrator.reachability_timeout_ms),
        ("orchestrator.adapter_timeout_ms", orchestrator.adapter_timeout_ms),
        ("orchestrator.scan_timeout_ms", orchestrator.scan_timeout_ms),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroTimeout { name });
        }
    }
    for (scan_type, chain) in &config.analyzers.chains {
        if let Some(endpoint) = chain
            .iter()
            .find(|endpoint| !matches!(endpoint.endpoint.scheme(), "http" | "https"))
        {
            return Err(ConfigGuardRailError::AnalyzerScheme {
                name: endpoint.name.clone(),
                scan_type: *scan_type,
            });
        }
    }

    let mut warnings = ConfigWarnings::default();

    if !config.uses_database() {
        warnings.push_with_hint(
            "DATABASE_URL is not set; scans and issues are kept in memory only",
            "set DATABASE_URL to a Postgres connection string to persist results",
        );
    }

    let uncovered: Vec<&str> = ScanType::ALL
        .iter()
        .filter(|scan_type| config.analyzers.chain_len(**scan_type) == 0)
        .map(ScanType::as_str)
        .collect();
    if !uncovered.is_empty() {
        warnings.push_with_hint(
            format!(
                "no analyzer configured for {} scans; they will fail",
                uncovered.join(", ")
            ),
            "add endpoints under [analyzers.chains.<ScanType>]",
        );
    }

    let longest = config.analyzers.longest_chain();
    let worst_case = orchestrator.worst_case_chain(longest);
    if longest > 0 && orchestrator.scan_timeout() < worst_case {
        warnings.push(format!(
            "scan timeout of {:?} is shorter than the worst case of {:?} for a chain of {} analyzers; \
             late fallbacks may be cut off",
            orchestrator.scan_timeout(),
            worst_case,
            longest
        ));
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use sitewatch_core::{AnalyzerEndpointConfig, AnalyzersConfig, OrchestratorConfig};

    use super::*;
    use crate::models::{ConfigMetadata, DatabaseConfig, ServerConfig};

    fn config(analyzers: AnalyzersConfig) -> Config {
        Config {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: Some("postgres://localhost/sitewatch".into()),
            },
            orchestrator: OrchestratorConfig::default(),
            analyzers,
            metadata: ConfigMetadata::default(),
        }
    }

    fn endpoint(name: &str, url: &str) -> AnalyzerEndpointConfig {
        AnalyzerEndpointConfig {
            name: name.into(),
            endpoint: url.parse().unwrap(),
        }
    }

    fn full_coverage() -> AnalyzersConfig {
        let mut analyzers = AnalyzersConfig::default();
        for scan_type in ScanType::ALL {
            analyzers
                .chains
                .insert(scan_type, vec![endpoint("remote", "http://127.0.0.1:9000/")]);
        }
        analyzers
    }

    #[test]
    fn complete_config_has_no_warnings() {
        let warnings = apply_guard_rails(&config(full_coverage())).unwrap();
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn uncovered_types_and_memory_storage_are_reported() {
        let mut config = config(AnalyzersConfig::default());
        config.database.url = None;

        let warnings = apply_guard_rails(&config).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.message.contains("in memory")));
        assert!(warnings.iter().any(|w| w.message.contains("accessibility")));
    }

    #[test]
    fn short_scan_budget_is_reported() {
        let mut config = config(full_coverage());
        config.orchestrator.scan_timeout_ms = 1_000;

        let warnings = apply_guard_rails(&config).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings.iter().next().unwrap().message.contains("worst case"));
    }

    #[test]
    fn zero_workers_are_refused() {
        let mut config = config(full_coverage());
        config.orchestrator.workers = 0;
        assert_eq!(
            apply_guard_rails(&config).unwrap_err(),
            ConfigGuardRailError::NoWorkers
        );
    }

    #[test]
    fn non_http_analyzer_is_refused() {
        let mut analyzers = full_coverage();
        analyzers
            .chains
            .insert(ScanType::Tls, vec![endpoint("local", "file:///tmp/analyzer")]);
        let err = apply_guard_rails(&config(analyzers)).unwrap_err();
        assert!(matches!(err, ConfigGuardRailError::AnalyzerScheme { .. }));
    }
}
