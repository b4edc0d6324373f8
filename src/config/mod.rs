//! Application configuration.
//!
//! `Config` holds the coordinator settings, the targeted fleet topology and
//! the local host identity. It is loaded from YAML files and environment
//! variables. The management CLI settings live in their own XML file
//! (`cli`).

mod cli;
mod coordinator;

pub use cli::{
    discover, CliConfig, CliConfigError, CliNamespace, ConfigResolutionError, SslConfig,
    CLI_CONFIG_ENV_VAR, CLI_CONFIG_FILE, HOME_ENV_VAR,
};
pub use coordinator::CoordinatorConfig;

use serde::Deserialize;

use crate::topology::{FleetTopology, LocalHostInfo};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FLEET_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FLEET";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FLEET_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Phase timing and retry settings.
    pub coordinator: CoordinatorConfig,
    /// Hosts and servers operations are pushed to.
    pub topology: FleetTopology,
    /// Host the coordinator runs on.
    pub local_host: LocalHostInfo,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `FLEET_CONFIG` environment variable (if set)
    /// 4. Environment variables with `FLEET__` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
