//! Codebridge configuration management
//! Handles loading and saving the config file

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Codebridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path to the assistant CLI binary (resolved via PATH when empty)
    #[serde(default)]
    pub claude_path: String,

    /// Queue settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Session lifetime settings
    #[serde(default)]
    pub session: SessionConfig,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long an identical message is rejected as a duplicate
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// How many times a failing message is attempted before dead-lettering
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_dedup_window_secs() -> u64 {
    8
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Stored buffer content is evicted after this many seconds
    #[serde(default = "default_message_ttl_secs")]
    pub message_ttl_secs: u64,

    /// First inactivity warning
    #[serde(default = "default_warn_secs")]
    pub warn_secs: u64,

    /// Second inactivity warning
    #[serde(default = "default_warn_long_secs")]
    pub warn_long_secs: u64,

    /// Session expires past this much inactivity
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,
}

fn default_message_ttl_secs() -> u64 {
    3600
}

fn default_warn_secs() -> u64 {
    3600
}

fn default_warn_long_secs() -> u64 {
    43200
}

fn default_expire_secs() -> u64 {
    86400
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            message_ttl_secs: default_message_ttl_secs(),
            warn_secs: default_warn_secs(),
            warn_long_secs: default_warn_long_secs(),
            expire_secs: default_expire_secs(),
        }
    }
}

impl Config {
    /// Load config from the default location or specified path
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = Self::config_path(path)?;

        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&raw).context("Failed to parse config file")?;

        debug!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save config to the default location or specified path
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = Self::config_path(path)?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let raw = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(&config_path, raw).context("Failed to write config file")?;

        debug!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => {
                let home = dirs::home_dir().context("Could not determine home directory")?;
                Ok(home.join(".codebridge").join("config.yaml"))
            }
        }
    }

    /// Resolve the assistant CLI path: explicit config > PATH lookup > bare name
    pub fn resolve_claude_path(&self) -> String {
        if !self.claude_path.is_empty() {
            return self.claude_path.clone();
        }
        which::which("claude")
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| "claude".to_string())
    }
}
