//! One SSH connection per logical operation

use async_trait::async_trait;
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Disconnect, client};
use tracing::{debug, info, instrument, warn};

use crate::config::ExecConfig;
use crate::error::ExecError;
use crate::keys::{Credentials, Signers, connect_agent};
use crate::result::Target;
use crate::session::{SessionSource, SshSession};

/// SSH client handler for russh
#[derive(Debug)]
pub struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not verified
        Ok(true)
    }
}

/// Authenticated connection to one host
///
/// Owned by the call that opened it. Call [`Connection::close`] when done;
/// dropping the connection tears the transport down without a disconnect
/// message.
pub struct Connection {
    handle: client::Handle<ClientHandler>,
    host: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("closed", &self.handle.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dial `host` (`ip-or-hostname:port`) and authenticate with `credentials`
    ///
    /// # Errors
    /// - `ExecError::Connection` if the address is invalid or the dial fails
    /// - `ExecError::Auth` if no signer is accepted
    #[instrument(skip(credentials, config), fields(user = %credentials.user()))]
    pub async fn open(
        host: &str,
        credentials: &Credentials,
        config: &ExecConfig,
    ) -> Result<Self, ExecError> {
        let target = Target::parse(host)?;

        info!(host = %host, user = %credentials.user(), "connecting to SSH");

        let mut handle = client::connect(
            config.client_config(),
            (target.host.as_str(), target.port),
            ClientHandler,
        )
        .await
        .map_err(|e| ExecError::Connection {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        authenticate(&mut handle, credentials).await?;

        info!(host = %host, "SSH connected and authenticated");

        Ok(Self {
            handle,
            host: host.to_string(),
        })
    }

    /// Address this connection was opened against
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Open a fresh session on this connection
    ///
    /// # Errors
    /// Returns `ExecError::Session` if the connection is no longer usable
    pub async fn session(&self) -> Result<SshSession, ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::Session(e.to_string()))?;
        Ok(SshSession::new(channel))
    }

    /// Disconnect from the remote host
    pub async fn close(self) {
        match self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            Ok(()) => info!(host = %self.host, "SSH disconnected"),
            Err(e) => warn!(host = %self.host, error = %e, "failed to disconnect cleanly"),
        }
    }
}

#[async_trait]
impl SessionSource for Connection {
    type Session = SshSession;

    fn host(&self) -> &str {
        &self.host
    }

    async fn open_session(&mut self) -> Result<SshSession, ExecError> {
        self.session().await
    }
}

async fn authenticate(
    handle: &mut client::Handle<ClientHandler>,
    credentials: &Credentials,
) -> Result<(), ExecError> {
    let user = credentials.user();
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten();

    match credentials.signers() {
        Signers::Key(key) => {
            let auth_res = handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                .await
                .map_err(|e| ExecError::Auth(e.to_string()))?;

            if !auth_res.success() {
                return Err(ExecError::Auth(
                    "public key authentication failed".to_string(),
                ));
            }
            Ok(())
        }
        Signers::Agent { socket, identities } => {
            let mut agent = connect_agent(socket).await?;

            for identity in identities {
                match handle
                    .authenticate_publickey_with(user, identity.clone(), hash_alg, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(()),
                    Ok(_) => debug!(key = %identity.algorithm(), "agent identity rejected"),
                    Err(e) => debug!(error = %e, "agent signing failed"),
                }
            }

            Err(ExecError::Auth(format!(
                "none of the {} agent identities were accepted",
                identities.len()
            )))
        }
    }
}
