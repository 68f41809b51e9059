//! Engine configuration
//!
//! Loaded once at startup from a YAML file; every field has a default so
//! a missing file or a partial file both work.

use crate::error::{ForgeError, Result};
use crate::fabric::local::DEFAULT_RUNTIME_SOCKET;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which provisioning fabric to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FabricKind {
    /// Local container runtime over its unix socket
    Local,
    /// In-process fabric, for dry runs
    Memory,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Document-store base URL; in-memory state when unset
    pub store_url: Option<String>,
    /// Fabric backing new stacks
    pub fabric: FabricKind,
    /// Unix socket of the local container runtime
    pub runtime_socket: PathBuf,
    /// Directory holding per-stack SSH keys
    pub ssh_key_dir: PathBuf,
    /// Login user for remote agent execution
    pub login_user: String,
    /// Directory personalities render configuration into
    pub staging_dir: PathBuf,
    /// Bound of the provisioning work queue
    pub queue_depth: usize,
    /// Delay between transient-error retries, in seconds
    pub retry_delay_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("stackforge");
        Self {
            store_url: None,
            fabric: FabricKind::Local,
            runtime_socket: PathBuf::from(DEFAULT_RUNTIME_SOCKET),
            ssh_key_dir: data_dir.join("keys"),
            login_user: "stackforge".to_string(),
            staging_dir: data_dir.join("staging"),
            queue_depth: 64,
            retry_delay_secs: 20,
        }
    }
}

impl EngineConfig {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("stackforge")
            .join("config.yaml")
    }

    /// Load from a YAML file, falling back to defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(ForgeError::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.login_user.is_empty() {
            return Err(ForgeError::InvalidConfig(
                "login_user must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}
