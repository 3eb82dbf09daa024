//! Configuration loading and types

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Settings shared by the executors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Environment variable naming the SSH agent socket
    #[serde(default = "default_agent_socket_env")]
    pub agent_socket_env: String,
    /// Prefix applied to every command when privilege elevation is requested
    #[serde(default = "default_sudo_prefix")]
    pub sudo_prefix: String,
    /// Per-command timeout used when the caller does not give one
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: u64,
    /// Drop the connection after this many idle seconds
    #[serde(default)]
    pub inactivity_timeout_secs: Option<u64>,
    /// Send keepalive requests at this interval
    #[serde(default)]
    pub keepalive_interval_secs: Option<u64>,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            agent_socket_env: default_agent_socket_env(),
            sudo_prefix: default_sudo_prefix(),
            default_timeout_minutes: default_timeout_minutes(),
            inactivity_timeout_secs: None,
            keepalive_interval_secs: None,
            log_level: default_log_level(),
        }
    }
}

fn default_agent_socket_env() -> String {
    "SSH_AUTH_SOCK".to_string()
}

fn default_sudo_prefix() -> String {
    "sudo ".to_string()
}

fn default_timeout_minutes() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ExecConfig {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns `ExecError::Io` if the file cannot be read and
    /// `ExecError::Config` if it cannot be parsed
    pub fn load(path: &Path) -> Result<Self, ExecError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ExecError::Config(format!("{}: {e}", path.display())))
    }

    /// Load from default paths or use defaults
    ///
    /// # Errors
    /// Returns an error if a config file exists but cannot be loaded
    pub fn load_default() -> Result<Self, ExecError> {
        if let Ok(path) = std::env::var("SSHEXEC_CONFIG") {
            return Self::load(&PathBuf::from(path));
        }

        let paths = [
            PathBuf::from("sshexec.toml"),
            dirs::config_dir()
                .map(|p| p.join("sshexec/sshexec.toml"))
                .unwrap_or_default(),
        ];

        for path in paths {
            if path.is_file() {
                return Self::load(&path);
            }
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    /// Build the russh client configuration
    #[must_use]
    pub fn client_config(&self) -> Arc<russh::client::Config> {
        let config = russh::client::Config {
            inactivity_timeout: self.inactivity_timeout_secs.map(Duration::from_secs),
            keepalive_interval: self.keepalive_interval_secs.map(Duration::from_secs),
            ..Default::default()
        };
        Arc::new(config)
    }
}
