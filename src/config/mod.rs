// ABOUTME: Configuration management for paysock
// Handles application config: pool tuning, transport endpoint and logging

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::socket_pool::{PoolConfig, TransportConfig};

/// Environment variable overriding `transport.endpoint`
pub const ENDPOINT_ENV: &str = "PAYSOCK_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application version
    #[serde(default = "default_version")]
    pub version: String,

    /// Socket pool tuning
    #[serde(default)]
    pub pool: PoolConfig,

    /// Real-time server connection settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for JSONL log files (default: ~/.paysock/logs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Write human-readable logs to stderr instead of a JSONL file
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            filter: default_log_filter(),
            stderr: false,
        }
    }
}

impl LoggingConfig {
    /// Resolve the log directory, falling back to ~/.paysock/logs
    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".paysock")
                .join("logs")
        })
    }
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_filter() -> String {
    "paysock=info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            pool: PoolConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the first config file found
    ///
    /// An explicit path must exist. Without one, the search order is
    /// `./.paysock/config.toml`, `~/.paysock/config.toml`,
    /// `/etc/paysock/config.toml`; built-in defaults apply if none exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match Self::get_config_paths().into_iter().find(|p| p.exists()) {
                Some(path) => Self::load_from(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Check pool and transport settings
    pub fn validate(&self) -> Result<()> {
        self.pool.validate().context("Invalid [pool] section")?;
        self.transport
            .reconnect
            .validate()
            .context("Invalid [transport.reconnect] section")?;

        // The pool's timeout must not cut the transport's retries short
        let budget = self.transport.connect_budget();
        if self.pool.connection_timeout < budget {
            bail!(
                "pool.connection_timeout ({}ms) is shorter than the transport's retry budget \
                 ({}ms = max_attempts x attempt_timeout + backoff)",
                self.pool.connection_timeout.as_millis(),
                budget.as_millis()
            );
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.is_empty() {
                self.transport.endpoint = endpoint;
            }
        }
    }

    /// Get configuration file paths in order of precedence
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. Local project config
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".paysock").join("config.toml"));
        }

        // 2. User config (~/.paysock/config.toml)
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".paysock").join("config.toml"));
        }

        // 3. System config
        paths.push(PathBuf::from("/etc/paysock/config.toml"));

        paths
    }
}
