//! Per-command session abstraction and its russh implementation

use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;
use russh::{Channel, ChannelMsg, ChannelStream, Sig, client};
use tracing::debug;

use crate::error::ExecError;

/// Something a running command reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes written to standard output
    Stdout(Vec<u8>),
    /// Bytes written to standard error
    Stderr(Vec<u8>),
    /// Process exited with a status code
    ExitStatus(u32),
    /// Process was terminated by a signal
    ExitSignal(String),
}

/// A single command context; runs at most one command
#[async_trait]
pub trait CommandSession: Send {
    /// Dispatch the command without waiting for it to finish
    async fn start(&mut self, command: &str) -> io::Result<()>;

    /// Next event from the running command, `None` once the session is closed
    ///
    /// Must be cancel safe: it is raced against the command deadline.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Forcefully terminate the running command
    async fn kill(&mut self) -> io::Result<()>;

    /// Release the session
    async fn close(self);
}

/// Opens fresh sessions for one host
#[async_trait]
pub trait SessionSource: Send {
    /// Session type produced by this source
    type Session: CommandSession;

    /// Host label used in errors and logs
    fn host(&self) -> &str;

    /// Open a new session
    ///
    /// # Errors
    /// Returns `ExecError::Session` if the channel is unusable
    async fn open_session(&mut self) -> Result<Self::Session, ExecError>;
}

/// Session backed by a russh channel
pub struct SshSession {
    channel: Channel<client::Msg>,
    /// Messages that arrived while waiting for the exec reply
    pending: VecDeque<ChannelMsg>,
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("channel", &self.channel.id())
            .finish_non_exhaustive()
    }
}

impl SshSession {
    pub(crate) fn new(channel: Channel<client::Msg>) -> Self {
        Self {
            channel,
            pending: VecDeque::new(),
        }
    }

    /// Run `command` and turn the channel into a byte stream over its stdin/stdout
    ///
    /// Used by the transfer codec, which speaks its own protocol with the
    /// remote process.
    ///
    /// # Errors
    /// Returns an error if the exec request cannot be sent
    pub async fn into_stream(self, command: &str) -> io::Result<ChannelStream<client::Msg>> {
        self.channel
            .exec(true, command)
            .await
            .map_err(io::Error::other)?;
        Ok(self.channel.into_stream())
    }

    fn translate(msg: ChannelMsg) -> Option<SessionEvent> {
        match msg {
            ChannelMsg::Data { data } => Some(SessionEvent::Stdout(data.to_vec())),
            ChannelMsg::ExtendedData { data, ext: 1 } => Some(SessionEvent::Stderr(data.to_vec())),
            ChannelMsg::ExitStatus { exit_status } => Some(SessionEvent::ExitStatus(exit_status)),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                Some(SessionEvent::ExitSignal(format!("{signal_name:?}")))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl CommandSession for SshSession {
    async fn start(&mut self, command: &str) -> io::Result<()> {
        self.channel
            .exec(true, command)
            .await
            .map_err(io::Error::other)?;

        // Wait for the server to accept or refuse the exec request
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(io::Error::other("remote refused to start the command"));
                }
                Some(msg) => self.pending.push_back(msg),
                None => return Err(io::Error::other("channel closed before command started")),
            }
        }
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        while let Some(msg) = self.pending.pop_front() {
            if let Some(event) = Self::translate(msg) {
                return Some(event);
            }
        }
        loop {
            // Eof may precede the exit status, keep reading until close
            if let Some(event) = Self::translate(self.channel.wait().await?) {
                return Some(event);
            }
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.channel
            .signal(Sig::KILL)
            .await
            .map_err(io::Error::other)
    }

    async fn close(self) {
        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "failed to close session channel");
        }
    }
}
