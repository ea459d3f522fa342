use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::Deserialize;
use std::path::Path;

/// Environment variable overriding `auth.access_token_secret`.
pub const SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
/// Environment variable overriding `server.port`.
pub const PORT_ENV: &str = "CUBICLE_PORT";

/// Application configuration structure that defines all runtime parameters.
///
/// Loaded from a TOML file whose sections mirror the subsystems:
/// `[server]`, `[auth]`, `[container]`, `[ports]`, `[terminal]`, `[files]` and
/// `[storage]`. Every field has a default, so a missing section (or an empty file)
/// falls back to the values the service was originally deployed with.
///
/// # Example
///
/// ```toml
/// [container]
/// image = "ide-base:latest"
/// memory_limit = "512m"
///
/// [ports]
/// base_port = 4000
/// ports_per_user = 10
/// ```
#[derive(Debug, PartialEq, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub container: ContainerConfig,
    pub ports: PortConfig,
    pub terminal: TerminalConfig,
    pub files: FileConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Reads and validates the configuration file, then applies environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no file is given.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(secret) = std::env::var(SECRET_ENV) {
            debug!("Using access token secret from {}", SECRET_ENV);
            self.auth.access_token_secret = secret;
        }
        if let Ok(port) = std::env::var(PORT_ENV) {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::NotInRange(format!("{}={}", PORT_ENV, port)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.access_token_secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.ports.ports_per_user == 0 {
            return Err(ConfigError::BadPortsRange(
                "ports_per_user must be at least 1".to_string(),
            ));
        }
        let last = self.ports.base_port as u32 + self.ports.ports_per_user as u32 - 1;
        if last > u16::MAX as u32 {
            return Err(ConfigError::BadPortsRange(format!(
                "base_port {} cannot hold a range of {} ports",
                self.ports.base_port, self.ports.ports_per_user
            )));
        }
        if self.ports.poll_interval_secs == 0 {
            return Err(ConfigError::NotInRange(
                "ports.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.terminal.max_per_connection == 0 {
            return Err(ConfigError::NotInRange(
                "terminal.max_per_connection must be at least 1".to_string(),
            ));
        }
        if self.terminal.cols == 0 || self.terminal.rows == 0 {
            return Err(ConfigError::NotInRange(
                "terminal.cols and terminal.rows must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
