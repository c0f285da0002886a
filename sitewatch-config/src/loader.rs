use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::models::{Config, ConfigMetadata, DatabaseConfig, ServerConfig};
use crate::sources::{EnvConfig, FileConfig, FileDatabaseConfig};
use crate::validation::{self, ConfigGuardRailError, ConfigWarnings};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] = ["sitewatch.toml", "config/sitewatch.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Resolves configuration from `.env`, an optional TOML file and the
/// process environment, in increasing order of precedence.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        }
        .or_else(|err| match err {
            dotenvy::Error::Io(_) => Ok(false),
            other => Err(other),
        })?;

        let env = EnvConfig::gather()?;
        self.load_with_env(env, env_file_loaded)
    }

    /// Resolve against an explicit environment instead of the process one.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        let (file, config_path) = match self.resolve_config_path(&env) {
            Some(path) => (read_file_config(&path)?, Some(path)),
            None => {
                warnings.push_with_hint(
                    "No sitewatch.toml found; using defaults and environment variables",
                    "set SITEWATCH_CONFIG_PATH to point at a configuration file",
                );
                (FileConfig::default(), None)
            }
        };
        if let Some(path) = &config_path {
            debug!(path = %path.display(), "configuration file loaded");
        }

        let defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env
                .server_host
                .clone()
                .or(file.server.host)
                .unwrap_or(defaults.host),
            port: env.server_port.or(file.server.port).unwrap_or(defaults.port),
        };

        let database = DatabaseConfig {
            url: resolve_database_url(&env, &file.database)?,
        };

        let mut orchestrator = file.orchestrator;
        env.apply_orchestrator(&mut orchestrator);

        let config = Config {
            server,
            database,
            orchestrator,
            analyzers: file.analyzers,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    /// Explicit option, then `SITEWATCH_CONFIG_PATH`, then the first default
    /// location that exists.
    fn resolve_config_path(&self, env: &EnvConfig) -> Option<PathBuf> {
        self.options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone())
            .or_else(|| {
                DEFAULT_CONFIG_LOCATIONS
                    .iter()
                    .map(PathBuf::from)
                    .find(|candidate| candidate.exists())
            })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_database_url(
    env: &EnvConfig,
    file: &FileDatabaseConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(url) = &env.database_url {
        return Ok(Some(url.clone()));
    }

    if let Some(path) = &env.database_url_file
        && let Some(url) = read_secret_file(path)?
    {
        return Ok(Some(url));
    }

    let Some(stored) = file.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    else {
        return Ok(None);
    };

    let mut parsed =
        Url::parse(stored).map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
    if parsed.password().is_none() {
        let password = match &env.database_password {
            Some(password) => Some(password.clone()),
            None => match &file.password_file {
                Some(path) => read_secret_file(path)?,
                None => None,
            },
        };
        if let Some(password) = password {
            parsed
                .set_password(Some(&password))
                .map_err(|()| ConfigLoadError::InvalidDatabasePassword)?;
        }
    }
    Ok(Some(parsed.to_string()))
}

fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::SecretFileIo {
        path: path.to_path_buf(),
        source,
    })?;
    let trimmed = contents.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
    #[error("invalid duration for {name}: '{value}'")]
    InvalidDuration {
        name: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        #[source]
        source: url::ParseError,
    },
    #[error("failed to encode database password into URL")]
    InvalidDatabasePassword,
    #[error("failed to read secret file {path}")]
    SecretFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}
