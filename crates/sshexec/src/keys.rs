//! Credential resolution: SSH agent, key files and keys from the environment

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKey, PublicKey, decode_secret_key};
use tracing::{debug, instrument};

use crate::config::ExecConfig;
use crate::error::ExecError;

/// Signing identities usable for public key authentication
#[derive(Clone)]
pub enum Signers {
    /// Identities held by an SSH agent, signed through its socket
    Agent {
        /// Agent socket the identities were read from
        socket: PathBuf,
        /// Public halves advertised by the agent
        identities: Vec<PublicKey>,
    },
    /// A single private key loaded into memory
    Key(Arc<PrivateKey>),
}

/// Immutable authentication material bound to a user
#[derive(Clone)]
pub struct Credentials {
    user: String,
    signers: Signers,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signers = match &self.signers {
            Signers::Agent { socket, identities } => {
                format!("agent({}, {} identities)", socket.display(), identities.len())
            }
            Signers::Key(key) => format!("key({})", key.algorithm()),
        };
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("signers", &signers)
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials through the agent named by `socket_env`
    ///
    /// # Errors
    /// - `ExecError::Config` if the environment variable is unset
    /// - `ExecError::Connection` if the socket cannot be dialed
    /// - `ExecError::Auth` if the agent yields no usable signers
    pub async fn from_agent(user: impl Into<String>, socket_env: &str) -> Result<Self, ExecError> {
        let socket = env::var_os(socket_env)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExecError::Config(format!("{socket_env} not set")))?;
        Self::from_agent_socket(user, Path::new(&socket)).await
    }

    /// Resolve credentials from the agent listening on `socket`
    ///
    /// # Errors
    /// Same as [`Credentials::from_agent`], minus the configuration check
    #[instrument(skip(user))]
    pub async fn from_agent_socket(
        user: impl Into<String>,
        socket: &Path,
    ) -> Result<Self, ExecError> {
        let mut agent = connect_agent(socket).await?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| ExecError::Auth(format!("could not get key signatures: {e}")))?;

        if identities.is_empty() {
            return Err(ExecError::Auth(
                "no identities available in SSH agent".to_string(),
            ));
        }

        debug!(count = identities.len(), "loaded identities from agent");

        Ok(Self {
            user: user.into(),
            signers: Signers::Agent {
                socket: socket.to_path_buf(),
                identities,
            },
        })
    }

    /// Load a private key file
    ///
    /// # Errors
    /// Returns `ExecError::Io` if the file is unreadable and
    /// `ExecError::Auth` if the key is malformed
    #[instrument(skip(user, path), fields(path = %path.display()))]
    pub fn from_key_file(user: impl Into<String>, path: &Path) -> Result<Self, ExecError> {
        let buf = std::fs::read(path)
            .map_err(|e| ExecError::Io(format!("{}: {e}", path.display())))?;
        Self::from_key_bytes(user, &buf)
    }

    /// Parse an in-memory private key (OpenSSH or PEM encoded)
    ///
    /// # Errors
    /// Returns `ExecError::Auth` if the key is malformed or encrypted
    pub fn from_key_bytes(user: impl Into<String>, buf: &[u8]) -> Result<Self, ExecError> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| ExecError::Auth("private key is not valid UTF-8".to_string()))?;
        let key = decode_secret_key(text, None)
            .map_err(|e| ExecError::Auth(format!("unable to parse private key: {e}")))?;

        Ok(Self {
            user: user.into(),
            signers: Signers::Key(Arc::new(key)),
        })
    }

    /// Principal name to authenticate as
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Resolved signing identities
    #[must_use]
    pub fn signers(&self) -> &Signers {
        &self.signers
    }
}

/// Dial the agent socket
///
/// # Errors
/// Returns `ExecError::Connection` if the socket cannot be dialed
pub(crate) async fn connect_agent(
    socket: &Path,
) -> Result<AgentClient<tokio::net::UnixStream>, ExecError> {
    AgentClient::connect_uds(socket)
        .await
        .map_err(|e| ExecError::Connection {
            host: socket.display().to_string(),
            reason: format!("cannot connect to SSH agent: {e}"),
        })
}

/// SSH key resolution strategy
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Use SSH agent
    Agent,
    /// Base64-encoded key from environment
    Env(String),
}

impl KeySource {
    /// Resolve the key source into credentials for `user`
    ///
    /// # Errors
    /// See [`Credentials::from_agent`] and [`Credentials::from_key_file`].
    /// `Path` additionally rejects keys readable by group or others, and
    /// `Env` fails with `ExecError::Config` if the variable is unset.
    pub async fn resolve(&self, user: &str, config: &ExecConfig) -> Result<Credentials, ExecError> {
        match self {
            KeySource::Path(path) => {
                validate_key_permissions(path)?;
                Credentials::from_key_file(user, path)
            }
            KeySource::Agent => Credentials::from_agent(user, &config.agent_socket_env).await,
            KeySource::Env(var_name) => {
                let encoded = env::var(var_name)
                    .map_err(|_| ExecError::Config(format!("environment variable {var_name} not set")))?;
                let key_data = base64_decode(&encoded)
                    .map_err(|e| ExecError::Auth(format!("invalid base64 in {var_name}: {e}")))?;
                Credentials::from_key_bytes(user, &key_data)
            }
        }
    }
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn validate_key_permissions(path: &Path) -> Result<(), ExecError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| ExecError::Io(format!("{}: {e}", path.display())))?;

    // group and other bits must be clear
    if metadata.permissions().mode() & 0o77 != 0 {
        return Err(ExecError::Auth(format!(
            "key file permissions too open: {} (should be 600)",
            path.display()
        )));
    }

    Ok(())
}
