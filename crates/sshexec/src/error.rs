//! Error types for sshexec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while connecting, executing or copying
///
/// Callers can tell "never got to run" (`Config`, `Auth`, `Connection`,
/// `Session`, `ExecStart`) apart from "ran and failed" (`RemoteCommand`)
/// and "timed out" (`Timeout`, `Signal`).
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Required environment or setup is missing
    #[error("configuration error: {0}")]
    Config(String),

    /// No usable signer, malformed key or rejected authentication
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Failed to dial the remote host
    #[error("failed to create SSH connection to {host}: {reason}")]
    Connection {
        /// Address that was dialed
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// A session could not be opened on the connection
    #[error("unable to create SSH session: {0}")]
    Session(String),

    /// The remote side could not start the process
    #[error("failed to start command [{command}] on {host}: {reason}")]
    ExecStart {
        /// Command text as dispatched
        command: String,
        /// Remote host
        host: String,
        /// Underlying cause
        reason: String,
    },

    /// Command exceeded its deadline and was killed
    #[error(
        "timeout on command [{command}] on {host} after {timeout:?}: Stdout [{stdout}]: Stderr [{stderr}]"
    )]
    Timeout {
        /// Command text as dispatched
        command: String,
        /// Remote host
        host: String,
        /// Deadline that was exceeded
        timeout: Duration,
        /// Stdout captured before the kill
        stdout: String,
        /// Stderr captured before the kill
        stderr: String,
    },

    /// Command timed out and the kill signal could not be delivered
    #[error(
        "command timed out and unable to send kill signal to command [{command}] on host [{host}]: {reason}"
    )]
    Signal {
        /// Command text as dispatched
        command: String,
        /// Remote host
        host: String,
        /// Why the signal was not delivered
        reason: String,
    },

    /// Command ran but the remote side reported failure
    #[error(
        "failed to run command [{command}] on {host}: Err[{reason}]: Stdout [{stdout}]: Stderr [{stderr}]"
    )]
    RemoteCommand {
        /// Command text as dispatched
        command: String,
        /// Remote host
        host: String,
        /// Exit status or signal reported by the remote
        reason: String,
        /// Captured stdout of the failing command
        stdout: String,
        /// Captured stderr of the failing command
        stderr: String,
        /// Outputs of the batch, index-aligned with the input commands
        outputs: Vec<String>,
    },

    /// Copy operation failed
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl ExecError {
    /// Whether the command reached the remote host, so side effects may exist
    #[must_use]
    pub fn ran_remotely(&self) -> bool {
        matches!(
            self,
            ExecError::RemoteCommand { .. } | ExecError::Timeout { .. } | ExecError::Signal { .. }
        )
    }

    /// Outputs captured before a remote failure stopped the batch
    ///
    /// Only `RemoteCommand` carries partial output; timeouts and aborted
    /// batches leave the remote in an indeterminate state and return none.
    #[must_use]
    pub fn partial_output(&self) -> Option<&[String]> {
        match self {
            ExecError::RemoteCommand { outputs, .. } => Some(outputs),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_carries_outputs() {
        let err = ExecError::RemoteCommand {
            command: "false".to_string(),
            host: "10.0.0.1:22".to_string(),
            reason: "exit status 1".to_string(),
            stdout: String::new(),
            stderr: "boom".to_string(),
            outputs: vec!["a".to_string(), String::new()],
        };

        assert!(err.ran_remotely());
        assert_eq!(err.partial_output().map(<[String]>::len), Some(2));
        let msg = err.to_string();
        assert!(msg.contains("[false]"));
        assert!(msg.contains("10.0.0.1:22"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_never_ran_errors() {
        let err = ExecError::Session("channel closed".to_string());
        assert!(!err.ran_remotely());
        assert!(err.partial_output().is_none());

        let err = ExecError::Timeout {
            command: "sleep 100".to_string(),
            host: "h:22".to_string(),
            timeout: Duration::from_secs(60),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(err.ran_remotely());
        assert!(err.partial_output().is_none());
    }

    #[test]
    fn test_signal_and_remote_messages() {
        let err = ExecError::Signal {
            command: "sleep 100".to_string(),
            host: "h:22".to_string(),
            reason: "channel closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "command timed out and unable to send kill signal to command [sleep 100] on host [h:22]: channel closed"
        );
        assert!(err.partial_output().is_none());

        let err = ExecError::RemoteCommand {
            command: "fail".to_string(),
            host: "h:22".to_string(),
            reason: "exit status 1".to_string(),
            stdout: "partial".to_string(),
            stderr: "bad".to_string(),
            outputs: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "failed to run command [fail] on h:22: Err[exit status 1]: Stdout [partial]: Stderr [bad]"
        );
    }
}
