//! Daemon Configuration
//!
//! Configuration management for the sync daemon.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wacrm_sync_core::SyncConfig;

const CONFIG_FILE_NAME: &str = "daemon.toml";

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway connection
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Synchronization tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Storage paths
    #[serde(default)]
    pub paths: PathConfig,
}

/// Gateway connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// REST base URL, e.g. `https://crm.example.com/api/whatsapp`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket URL of the push channel (push disabled if not set)
    #[serde(default)]
    pub push_url: Option<String>,

    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,

    /// Gateway instance the session belongs to
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Configuration directory
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000/api/whatsapp".to_string()
}

fn default_instance_id() -> String {
    "default".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("wacrm-sync")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            push_url: None,
            api_token: None,
            instance_id: default_instance_id(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            sync: SyncConfig::default(),
            paths: PathConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let mut config = Config::default();
            if let Some(parent) = path.parent() {
                config.paths.config_dir = parent.to_path_buf();
            }
            config.save_to(path)?;
            tracing::info!("Wrote default configuration to {}", path.display());
            config
        };

        config.sync = config.sync.validate();
        Ok(config)
    }

    /// Save configuration to the configured directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.config_path())
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        Ok(())
    }

    /// Path of the configuration file
    pub fn config_path(&self) -> PathBuf {
        self.paths.config_dir.join(CONFIG_FILE_NAME)
    }
}
