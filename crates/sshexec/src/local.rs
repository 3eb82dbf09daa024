//! Local command execution using `tokio::process`
//!
//! Runs batches through the same [`CommandRunner`] as the SSH executor, with
//! each command spawned as `sh -c <command>` on this machine.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::config::ExecConfig;
use crate::error::ExecError;
use crate::result::CommandBatch;
use crate::runner::CommandRunner;
use crate::scp::FileHeader;
use crate::session::{CommandSession, SessionEvent, SessionSource};
use crate::traits::{Contents, Executor};

/// Source of local process sessions
#[derive(Debug, Clone)]
pub struct LocalSessions {
    host: String,
}

impl Default for LocalSessions {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl LocalSessions {
    /// Create a source that reports `host` in errors
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

#[async_trait]
impl SessionSource for LocalSessions {
    type Session = LocalSession;

    fn host(&self) -> &str {
        &self.host
    }

    async fn open_session(&mut self) -> Result<LocalSession, ExecError> {
        Ok(LocalSession::default())
    }
}

/// One local child process, leading its own process group
#[derive(Debug, Default)]
pub struct LocalSession {
    child: Option<Child>,
    events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    forwarders: Vec<JoinHandle<()>>,
    exited: bool,
}

#[async_trait]
impl CommandSession for LocalSession {
    async fn start(&mut self, command: &str) -> io::Result<()> {
        // Use shell to support pipes, redirections, etc.
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            self.forwarders
                .push(tokio::spawn(forward(stdout, tx.clone(), SessionEvent::Stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            self.forwarders
                .push(tokio::spawn(forward(stderr, tx, SessionEvent::Stderr)));
        }

        self.child = Some(child);
        self.events = Some(rx);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.events.as_mut()?.recv().await {
            return Some(event);
        }
        if self.exited {
            return None;
        }

        // Both pipes are closed, only the exit status is left
        let status = self.child.as_mut()?.wait().await.ok()?;
        self.exited = true;
        match (status.code(), status.signal()) {
            (Some(code), _) => Some(SessionEvent::ExitStatus(code.cast_unsigned())),
            (None, Some(signal)) => Some(SessionEvent::ExitSignal(signal.to_string())),
            (None, None) => None,
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        let Some(child) = self.child.as_mut() else {
            return Err(io::Error::other("no running process"));
        };
        match child.id().and_then(|pid| i32::try_from(pid).ok()) {
            // the shell leads its group, so this also reaches background jobs
            Some(pgid) => match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                // already gone
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(io::Error::from(e)),
            },
            None => child.start_kill(),
        }
    }

    async fn close(mut self) {
        // grandchildren may still hold the pipes open
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.try_wait() {
                debug!(error = %e, "failed to reap local process");
            }
        }
    }
}

async fn forward<R>(
    mut pipe: R,
    tx: mpsc::UnboundedSender<SessionEvent>,
    wrap: fn(Vec<u8>) -> SessionEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(wrap(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

/// Local command executor
///
/// Ignores the host argument; commands run on this machine and copies write
/// to the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    runner: CommandRunner,
}

impl LocalExecutor {
    /// Create a new local executor
    #[must_use]
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            runner: CommandRunner::new(config.sudo_prefix.clone()),
        }
    }

    /// Run a batch on this machine
    ///
    /// # Errors
    /// Same as [`CommandRunner::run`]
    pub async fn run_batch(&self, batch: &CommandBatch) -> Result<Vec<String>, ExecError> {
        self.runner.run(&mut LocalSessions::default(), batch).await
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    #[instrument(skip(self, header, contents), level = "debug")]
    async fn copy(
        &self,
        header: &FileHeader,
        contents: Contents<'_>,
        _host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tokio::fs::File::create(destination_path).await?;
        let written = tokio::io::copy(&mut contents.take(header.size), &mut file).await?;
        if written != header.size {
            return Err(ExecError::Transfer(format!(
                "source ended after {written} of {} bytes",
                header.size
            )));
        }
        tokio::fs::set_permissions(
            destination_path,
            std::fs::Permissions::from_mode(header.mode & 0o7777),
        )
        .await?;

        debug!(destination = %destination_path, bytes = written, "local copy complete");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn copy_path(
        &self,
        source_path: &Path,
        _host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        tokio::fs::copy(source_path, destination_path)
            .await
            .map_err(|e| ExecError::Io(format!("{}: {e}", source_path.display())))?;
        Ok(())
    }

    #[instrument(skip(self, commands), level = "debug")]
    async fn exec(
        &self,
        host: &str,
        commands: &[String],
        timeout_minutes: u64,
        use_sudo: bool,
    ) -> Result<Vec<String>, ExecError> {
        let batch = CommandBatch::with_timeout_minutes(commands.iter().cloned(), timeout_minutes)
            .with_sudo(use_sudo);
        self.runner.run(&mut LocalSessions::new(host), &batch).await
    }

    fn executor_type(&self) -> &'static str {
        "local"
    }
}
