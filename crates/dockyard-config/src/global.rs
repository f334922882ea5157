//! Global configuration for dockyard
//!
//! Located at `~/.config/dockyard/config.toml`

use crate::{ConfigError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the private bridge network every managed container joins
pub const DEFAULT_NETWORK_NAME: &str = "dockyard-network";

/// Global dockyard configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub engine: EngineConfig,
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub readiness: ReadinessConfig,
    pub install: InstallConfig,
}

/// Container engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Explicit socket path or URL. When unset the host defaults
    /// (`DOCKER_HOST`, local socket or named pipe) are used.
    pub socket: Option<String>,
    /// Request timeout in seconds for the engine client
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: 120,
        }
    }
}

/// Shared network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NETWORK_NAME.to_string(),
        }
    }
}

/// Image registry endpoints used to list published tags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Token endpoint base URL
    pub auth_url: String,
    /// Service name sent with the token request
    pub service: String,
    /// Registry API base URL
    pub registry_url: String,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auth_url: "https://auth.docker.io".to_string(),
            service: "registry.docker.io".to_string(),
            registry_url: "https://registry-1.docker.io".to_string(),
            timeout_secs: 10,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Readiness probing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Timeout of a single probe attempt in milliseconds
    pub attempt_timeout_ms: u64,
    /// Delay between two probe attempts in milliseconds
    pub poll_interval_ms: u64,
    /// Overall budget in seconds
    pub deadline_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 1_000,
            poll_interval_ms: 1_000,
            deadline_secs: 5 * 60,
        }
    }
}

impl ReadinessConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Image installation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Upper bound for a single image pull in seconds
    pub pull_timeout_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            pull_timeout_secs: 10 * 60,
        }
    }
}

impl InstallConfig {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }
}

impl GlobalConfig {
    /// Load global configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load global configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;

        tracing::debug!(
            "Loaded config from {:?}: network={}, registry={}",
            path,
            config.network.name,
            config.registry.registry_url
        );

        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "dockyard").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.network.name.trim().is_empty() {
            return Err(ConfigError::Invalid("network.name must not be empty".into()));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "readiness.poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
