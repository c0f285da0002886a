use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sitewatch_core::{AnalyzersConfig, OrchestratorConfig};

use crate::loader::ConfigLoadError;

/// Raw configuration as written in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub analyzers: AnalyzersConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// File holding the password when `url` carries none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_url_file: Option<PathBuf>,
    pub database_password: Option<String>,
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub reachability_timeout: Option<Duration>,
    pub adapter_timeout: Option<Duration>,
    pub scan_timeout: Option<Duration>,
    pub serialize_per_target: Option<bool>,
}

impl EnvConfig {
    /// Read the process environment.
    pub fn gather() -> Result<Self, ConfigLoadError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `lookup` returns `None` for unset
    /// names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigLoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty())
        };

        Ok(Self {
            config_path: var("SITEWATCH_CONFIG_PATH").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: parse_var(&var, "SERVER_PORT")?,
            database_url: var("DATABASE_URL"),
            database_url_file: var("DATABASE_URL_FILE").map(PathBuf::from),
            database_password: var("DATABASE_PASSWORD"),
            workers: parse_var(&var, "SITEWATCH_WORKERS")?,
            queue_capacity: parse_var(&var, "SITEWATCH_QUEUE_CAPACITY")?,
            reachability_timeout: duration_var(&var, "SITEWATCH_REACHABILITY_TIMEOUT")?,
            adapter_timeout: duration_var(&var, "SITEWATCH_ADAPTER_TIMEOUT")?,
            scan_timeout: duration_var(&var, "SITEWATCH_SCAN_TIMEOUT")?,
            serialize_per_target: bool_var(&var, "SITEWATCH_SERIALIZE_PER_TARGET")?,
        })
    }

    /// Apply the orchestrator overrides on top of `base`.
    pub fn apply_orchestrator(&self, base: &mut OrchestratorConfig) {
        if let Some(workers) = self.workers {
            base.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            base.queue_capacity = capacity;
        }
        if let Some(timeout) = self.reachability_timeout {
            base.reachability_timeout_ms = millis(timeout);
        }
        if let Some(timeout) = self.adapter_timeout {
            base.adapter_timeout_ms = millis(timeout);
        }
        if let Some(timeout) = self.scan_timeout {
            base.scan_timeout_ms = millis(timeout);
        }
        if let Some(serialize) = self.serialize_per_target {
            base.serialize_per_target = serialize;
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_var<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigLoadError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigLoadError::InvalidEnv { name, value: raw })
        })
        .transpose()
}

fn duration_var<F>(var: &F, name: &'static str) -> Result<Option<Duration>, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            humantime::parse_duration(raw.trim()).map_err(|source| {
                ConfigLoadError::InvalidDuration {
                    name,
                    value: raw,
                    source,
                }
            })
        })
        .transpose()
}

fn bool_var<F>(var: &F, name: &'static str) -> Result<Option<bool>, ConfigLoadError>
where
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigLoadError::InvalidEnv { name, value: raw }),
        })
        .transpose()
}
