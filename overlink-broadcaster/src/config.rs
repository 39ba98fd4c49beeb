//! Event hub configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Event hub configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Outbound frames buffered per console before sends start to wait
    pub queue_capacity: usize,

    /// Upper bound for delivering one broadcast to one console (ms).
    /// A console that does not accept in time is dropped.
    pub send_timeout_ms: u64,

    /// Default bound for directed replies (ms)
    pub reply_timeout_ms: u64,

    /// Unix socket for the local event listener (None = platform default)
    pub socket_path: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            send_timeout_ms: 5_000,
            reply_timeout_ms: 5_000,
            socket_path: None,
        }
    }
}

impl HubConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse event hub config")
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Load from the platform config location.
    pub fn load_default() -> Result<Self> {
        let path = overlink_paths::get_event_config_path()?;
        Self::load(&path)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Configured socket path, or the platform default.
    pub fn resolve_socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(path) => Ok(path.clone()),
            None => overlink_paths::get_event_socket_path(),
        }
    }
}
