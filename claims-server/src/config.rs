//! Server configuration
//!
//! Loaded in layers: built-in defaults, then an optional YAML file, then
//! `CLAIMS_SERVER__*` environment variables (`__` separates nested keys,
//! e.g. `CLAIMS_SERVER__CLAIMS__MAX_CONFLICT_RETRIES=5`).

use claims_engine::ClaimsConfig;
use config::{Config, Environment, File};
use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};

use error_common::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnvironment {
    Development,
    Production,
}

/// Claims server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    pub port: u16,
    pub environment: DeploymentEnvironment,
    pub logging: LoggerConfig,
    pub claims: ClaimsConfig,
    /// PostgreSQL connection string; the in-memory repository is used when
    /// unset
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: DeploymentEnvironment::Development,
            logging: LoggerConfig::development(),
            claims: ClaimsConfig::default(),
            database_url: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `path` (if it exists) and the environment.
    pub fn load(path: &str) -> Result<Self, PlatformError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("CLAIMS_SERVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| PlatformError::ConfigError(e.to_string()))
    }

    pub fn is_production(&self) -> bool {
        self.environment == DeploymentEnvironment::Production
    }
}
