//! Request and result types for command execution

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

/// Remote address in `host:port` form
///
/// There is no implicit default port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// IP address or hostname, without IPv6 brackets
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Target {
    /// Parse an `ip-or-hostname:port` address
    ///
    /// # Errors
    /// Returns `ExecError::Connection` if the port is missing or invalid
    pub fn parse(addr: &str) -> Result<Self, ExecError> {
        let invalid = |reason: &str| ExecError::Connection {
            host: addr.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| invalid("address must be in host:port form"))?;
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        // Unbracketed IPv6 is ambiguous with the port separator
        if host.contains(':') && !addr.starts_with('[') {
            return Err(invalid("IPv6 addresses must be bracketed"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ordered commands sharing one privilege flag and one per-command timeout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBatch {
    /// Commands in execution order
    pub commands: Vec<String>,
    /// Prefix every command with the sudo prefix
    pub use_sudo: bool,
    /// Deadline applied independently to each command
    pub timeout: Duration,
}

impl CommandBatch {
    /// Create a batch with the given per-command timeout
    pub fn new<I, S>(commands: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            use_sudo: false,
            timeout,
        }
    }

    /// Create a batch with a timeout expressed in minutes
    pub fn with_timeout_minutes<I, S>(commands: I, minutes: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(commands, Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Request privilege elevation
    #[must_use]
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    /// Number of commands in the batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch has no commands
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// How a remote command finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Process exited with a status code
    Status(u32),
    /// Process was terminated by a signal
    Signal(String),
    /// Channel closed without reporting an exit status
    Unknown,
}

impl ExitOutcome {
    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Status(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Status(code) => write!(f, "exit status {code}"),
            ExitOutcome::Signal(sig) => write!(f, "killed by signal {sig}"),
            ExitOutcome::Unknown => write!(f, "exited without exit status"),
        }
    }
}

/// Output captured from one command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
}
