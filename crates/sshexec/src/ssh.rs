//! Network-backed executor using russh

use std::path::Path;

use async_trait::async_trait;
use tracing::{error, instrument};

use crate::config::ExecConfig;
use crate::connector::Connection;
use crate::error::ExecError;
use crate::keys::{Credentials, KeySource};
use crate::result::CommandBatch;
use crate::runner::CommandRunner;
use crate::scp::{self, FileHeader};
use crate::traits::{Contents, Executor};

/// SSH command executor
///
/// Holds resolved credentials only; each operation dials its own
/// connection and disconnects before returning.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    credentials: Credentials,
    config: ExecConfig,
    runner: CommandRunner,
}

impl SshExecutor {
    /// Create an executor from already resolved credentials
    #[must_use]
    pub fn new(credentials: Credentials, config: ExecConfig) -> Self {
        let runner = CommandRunner::new(config.sudo_prefix.clone());
        Self {
            credentials,
            config,
            runner,
        }
    }

    /// Authenticate through the SSH agent
    ///
    /// # Errors
    /// See [`Credentials::from_agent`]
    pub async fn with_agent(user: &str, config: ExecConfig) -> Result<Self, ExecError> {
        let credentials = Credentials::from_agent(user, &config.agent_socket_env).await?;
        Ok(Self::new(credentials, config))
    }

    /// Authenticate with a private key file
    ///
    /// # Errors
    /// See [`Credentials::from_key_file`]
    pub fn with_key_file(user: &str, path: &Path, config: ExecConfig) -> Result<Self, ExecError> {
        let credentials = Credentials::from_key_file(user, path)?;
        Ok(Self::new(credentials, config))
    }

    /// Authenticate with any supported key source
    ///
    /// # Errors
    /// See [`KeySource::resolve`]
    pub async fn from_source(
        user: &str,
        source: &KeySource,
        config: ExecConfig,
    ) -> Result<Self, ExecError> {
        let credentials = source.resolve(user, &config).await?;
        Ok(Self::new(credentials, config))
    }

    /// Credentials used for every connection
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Upload over a fresh connection, closing it on every path
    async fn upload(
        &self,
        payload: Payload<'_>,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        let conn = Connection::open(host, &self.credentials, &self.config).await?;

        let result = async {
            let session = conn.session().await?;
            let mut stream = session
                .into_stream(&scp::sink_command(destination_path))
                .await
                .map_err(|e| ExecError::Transfer(e.to_string()))?;
            match payload {
                Payload::Bytes { header, contents } => scp::copy(&mut stream, header, contents).await,
                Payload::Path(source) => scp::copy_path(&mut stream, source).await,
            }
        }
        .await;

        conn.close().await;
        if let Err(e) = &result {
            error!(host = %host, destination = %destination_path, error = %e, "copy failed");
        }
        result
    }
}

/// What an upload streams to the remote
enum Payload<'a> {
    Bytes {
        header: &'a FileHeader,
        contents: Contents<'a>,
    },
    Path(&'a Path),
}

#[async_trait]
impl Executor for SshExecutor {
    #[instrument(skip(self, header, contents), fields(name = %header.name, size = header.size))]
    async fn copy(
        &self,
        header: &FileHeader,
        contents: Contents<'_>,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        self.upload(Payload::Bytes { header, contents }, host, destination_path)
            .await
    }

    #[instrument(skip(self))]
    async fn copy_path(
        &self,
        source_path: &Path,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        self.upload(Payload::Path(source_path), host, destination_path)
            .await
    }

    #[instrument(skip(self, commands), fields(commands = commands.len()))]
    async fn exec(
        &self,
        host: &str,
        commands: &[String],
        timeout_minutes: u64,
        use_sudo: bool,
    ) -> Result<Vec<String>, ExecError> {
        let batch = CommandBatch::with_timeout_minutes(commands.iter().cloned(), timeout_minutes)
            .with_sudo(use_sudo);

        let mut conn = Connection::open(host, &self.credentials, &self.config).await?;
        let result = self.runner.run(&mut conn, &batch).await;
        conn.close().await;
        result
    }

    fn executor_type(&self) -> &'static str {
        "ssh"
    }
}
