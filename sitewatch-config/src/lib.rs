//! Configuration loading for sitewatch.
//!
//! Values are resolved from `.env`, an optional `sitewatch.toml` and the
//! process environment. The result is checked against guard rails; problems
//! that do not stop the process come back as [`ConfigWarnings`].
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod sources;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{Config, ConfigMetadata, DatabaseConfig, ServerConfig};
pub use sources::{EnvConfig, FileConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
