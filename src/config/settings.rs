//! Application settings: serial link, polling cadence and register map

use crate::core::error::ConfigError;
use crate::core::register::{em6400ng_registers, RegisterDefinition, RegisterMap};
use crate::core::retry::RetryPolicy;
use crate::core::transport::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link and device address
    pub connection: ConnectionConfig,
    /// Polling cadence and retries
    pub polling: PollingConfig,
    /// Registers to poll, in display order
    pub registers: Vec<RegisterDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
            registers: em6400ng_registers(),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join("config.toml"))
            .ok_or_else(|| ConfigError::Io {
                path: "<config dir>".to_string(),
                message: "Could not determine config directory".to_string(),
            })
    }

    /// Load config from `path`, or from the default location
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse config text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save config to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |e: std::io::Error| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, content).map_err(io_err)
    }

    /// Validated register map
    pub fn register_map(&self) -> Result<RegisterMap, ConfigError> {
        RegisterMap::new(self.registers.clone())
    }
}

/// Polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Time between sweeps in milliseconds (clamped to at least 200)
    pub interval_ms: u64,
    /// Extra attempts after a timeout or line error
    pub retries: u32,
    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl PollingConfig {
    /// Retry policy for the engine
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retries, Duration::from_millis(self.retry_delay_ms))
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            retries: 0,
            retry_delay_ms: 50,
        }
    }
}
