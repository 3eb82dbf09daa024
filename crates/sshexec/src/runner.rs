//! Sequential command batch execution with per-command deadlines

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandBatch, CommandOutput, ExitOutcome};
use crate::session::{CommandSession, SessionEvent, SessionSource};

/// Runs command batches one command at a time, each in its own session
#[derive(Debug, Clone)]
pub struct CommandRunner {
    sudo_prefix: String,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new("sudo ")
    }
}

/// Result of racing a command against its deadline
enum Race {
    Completed(ExitOutcome),
    TimedOut,
}

impl CommandRunner {
    /// Create a runner using `sudo_prefix` for privilege elevation
    pub fn new(sudo_prefix: impl Into<String>) -> Self {
        Self {
            sudo_prefix: sudo_prefix.into(),
        }
    }

    /// Text actually dispatched for `command`
    #[must_use]
    pub fn dispatch_text(&self, command: &str, use_sudo: bool) -> String {
        if use_sudo {
            format!("{}{command}", self.sudo_prefix)
        } else {
            command.to_string()
        }
    }

    /// Execute every command of `batch` in order
    ///
    /// Returns the captured stdout of each command, index-aligned with
    /// `batch.commands`. Execution stops at the first failing command.
    ///
    /// # Errors
    /// - `ExecError::Session` if a session cannot be opened (no output kept)
    /// - `ExecError::ExecStart` if the remote cannot start a command
    /// - `ExecError::RemoteCommand` if a command reports failure; its
    ///   `outputs` holds everything captured up to and including it
    /// - `ExecError::Timeout` if a command exceeded `batch.timeout` and was killed
    /// - `ExecError::Signal` if the kill signal could not be delivered
    #[instrument(skip(self, source, batch), fields(host = %source.host(), commands = batch.len()))]
    pub async fn run<S>(&self, source: &mut S, batch: &CommandBatch) -> Result<Vec<String>, ExecError>
    where
        S: SessionSource,
    {
        let host = source.host().to_string();
        let mut outputs = vec![String::new(); batch.len()];

        for (index, original) in batch.commands.iter().enumerate() {
            let mut session = source.open_session().await?;
            let command = self.dispatch_text(original, batch.use_sudo);

            let result = run_one(&mut session, &command, &host, batch.timeout).await;
            session.close().await;

            let (outcome, output) = result?;
            outputs[index] = output.stdout;

            if !outcome.success() {
                error!(command = %command, outcome = %outcome, "remote command failed");
                return Err(ExecError::RemoteCommand {
                    command,
                    host,
                    reason: outcome.to_string(),
                    stdout: outputs[index].clone(),
                    stderr: output.stderr,
                    outputs,
                });
            }
        }

        Ok(outputs)
    }
}

/// Run one command on an open session, racing completion against the deadline
async fn run_one<T>(
    session: &mut T,
    command: &str,
    host: &str,
    timeout: Duration,
) -> Result<(ExitOutcome, CommandOutput), ExecError>
where
    T: CommandSession,
{
    debug!(command = %command, "executing remote command");
    let start = Instant::now();

    session
        .start(command)
        .await
        .map_err(|e| ExecError::ExecStart {
            command: command.to_string(),
            host: host.to_string(),
            reason: e.to_string(),
        })?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let race = tokio::select! {
        biased;
        outcome = collect(session, &mut stdout, &mut stderr) => Race::Completed(outcome),
        () = sleep(timeout) => Race::TimedOut,
    };

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    };

    match race {
        Race::Completed(outcome) => {
            debug!(
                command = %command,
                outcome = %outcome,
                duration = ?start.elapsed(),
                "remote command completed"
            );
            Ok((outcome, output))
        }
        Race::TimedOut => {
            warn!(command = %command, timeout = ?timeout, "command timed out, sending kill");
            if let Err(e) = session.kill().await {
                error!(command = %command, error = %e, "unable to send kill signal");
                return Err(ExecError::Signal {
                    command: command.to_string(),
                    host: host.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(ExecError::Timeout {
                command: command.to_string(),
                host: host.to_string(),
                timeout,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// Drain session events into the capture buffers until the session closes
async fn collect<T>(session: &mut T, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> ExitOutcome
where
    T: CommandSession,
{
    let mut outcome = ExitOutcome::Unknown;
    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::Stdout(data) => stdout.extend_from_slice(&data),
            SessionEvent::Stderr(data) => stderr.extend_from_slice(&data),
            SessionEvent::ExitStatus(code) => outcome = ExitOutcome::Status(code),
            SessionEvent::ExitSignal(signal) => outcome = ExitOutcome::Signal(signal),
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;

    /// Scripted behaviour of one fake command
    #[derive(Clone)]
    enum Script {
        /// Emit these events then close
        Finish(Vec<SessionEvent>),
        /// Emit these events then never finish
        Hang(Vec<SessionEvent>),
        /// Refuse to start
        RefuseStart,
    }

    #[derive(Default)]
    struct Spy {
        dispatched: Vec<String>,
        kills: usize,
        closed: usize,
    }

    struct FakeSession {
        script: Script,
        events: VecDeque<SessionEvent>,
        kill_fails: bool,
        spy: Arc<Mutex<Spy>>,
    }

    #[async_trait]
    impl CommandSession for FakeSession {
        async fn start(&mut self, command: &str) -> io::Result<()> {
            self.spy.lock().unwrap().dispatched.push(command.to_string());
            match &self.script {
                Script::RefuseStart => Err(io::Error::other("exec request refused")),
                Script::Finish(events) | Script::Hang(events) => {
                    self.events = events.iter().cloned().collect();
                    Ok(())
                }
            }
        }

        async fn next_event(&mut self) -> Option<SessionEvent> {
            if let Some(event) = self.events.pop_front() {
                return Some(event);
            }
            if matches!(self.script, Script::Hang(_)) {
                std::future::pending::<()>().await;
            }
            None
        }

        async fn kill(&mut self) -> io::Result<()> {
            if self.kill_fails {
                return Err(io::Error::other("channel gone"));
            }
            self.spy.lock().unwrap().kills += 1;
            Ok(())
        }

        async fn close(self) {
            self.spy.lock().unwrap().closed += 1;
        }
    }

    struct FakeSource {
        scripts: VecDeque<Script>,
        fail_open_at: Option<usize>,
        opened: usize,
        kill_fails: bool,
        spy: Arc<Mutex<Spy>>,
    }

    impl FakeSource {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: scripts.into(),
                fail_open_at: None,
                opened: 0,
                kill_fails: false,
                spy: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl SessionSource for FakeSource {
        type Session = FakeSession;

        fn host(&self) -> &str {
            "10.0.0.5:22"
        }

        async fn open_session(&mut self) -> Result<FakeSession, ExecError> {
            if self.fail_open_at == Some(self.opened) {
                return Err(ExecError::Session("connection torn down".to_string()));
            }
            self.opened += 1;
            let script = self.scripts.pop_front().expect("no script left");
            Ok(FakeSession {
                script,
                events: VecDeque::new(),
                kill_fails: self.kill_fails,
                spy: self.spy.clone(),
            })
        }
    }

    fn ok(stdout: &str) -> Script {
        Script::Finish(vec![
            SessionEvent::Stdout(stdout.as_bytes().to_vec()),
            SessionEvent::ExitStatus(0),
        ])
    }

    fn batch(commands: &[&str]) -> CommandBatch {
        CommandBatch::new(commands.iter().copied(), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_all_commands_succeed_in_order() {
        let mut source = FakeSource::new(vec![ok("Mon Jan 1\n"), ok(""), ok("HELLO\n")]);
        let batch = batch(&["date", "echo \"HELLO\" > /tmp/file", "cat /tmp/file"]);

        let outputs = CommandRunner::default().run(&mut source, &batch).await.unwrap();

        assert_eq!(outputs, vec!["Mon Jan 1\n", "", "HELLO\n"]);
        let spy = source.spy.lock().unwrap();
        assert_eq!(spy.dispatched, batch.commands);
        assert_eq!(spy.closed, 3);
        assert_eq!(spy.kills, 0);
    }

    #[tokio::test]
    async fn test_sudo_prefix_leaves_caller_commands_untouched() {
        let mut source = FakeSource::new(vec![ok("a"), ok("b")]);
        let batch = batch(&["whoami", "id -u"]).with_sudo(true);

        CommandRunner::default().run(&mut source, &batch).await.unwrap();

        let spy = source.spy.lock().unwrap();
        assert_eq!(spy.dispatched, vec!["sudo whoami", "sudo id -u"]);
        assert_eq!(batch.commands, vec!["whoami", "id -u"]);
    }

    #[tokio::test]
    async fn test_remote_failure_returns_partial_output() {
        let failing = Script::Finish(vec![
            SessionEvent::Stdout(b"partial".to_vec()),
            SessionEvent::Stderr(b"no such file".to_vec()),
            SessionEvent::ExitStatus(1),
        ]);
        let mut source = FakeSource::new(vec![ok("first\n"), failing, ok("never")]);
        let batch = batch(&["echo first", "cat /missing", "echo never"]);

        let err = CommandRunner::default().run(&mut source, &batch).await.unwrap_err();

        match &err {
            ExecError::RemoteCommand {
                command,
                host,
                stdout,
                stderr,
                outputs,
                ..
            } => {
                assert_eq!(command, "cat /missing");
                assert_eq!(host, "10.0.0.5:22");
                assert_eq!(stdout, "partial");
                assert_eq!(stderr, "no such file");
                assert_eq!(outputs, &vec!["first\n", "partial", ""]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("cat /missing"));
        assert_eq!(source.spy.lock().unwrap().dispatched.len(), 2);
    }

    #[tokio::test]
    async fn test_exit_signal_is_remote_failure() {
        let killed = Script::Finish(vec![SessionEvent::ExitSignal("KILL".to_string())]);
        let mut source = FakeSource::new(vec![killed]);

        let err = CommandRunner::default()
            .run(&mut source, &batch(&["yes"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::RemoteCommand { .. }));
    }

    #[tokio::test]
    async fn test_missing_exit_status_is_remote_failure() {
        let mut source = FakeSource::new(vec![Script::Finish(vec![])]);

        let err = CommandRunner::default()
            .run(&mut source, &batch(&["true"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::RemoteCommand { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_discards_output() {
        let hang = Script::Hang(vec![SessionEvent::Stdout(b"tick\n".to_vec())]);
        let mut source = FakeSource::new(vec![ok("before"), hang, ok("after")]);
        let batch = batch(&["true", "sleep 1000", "true"]);

        let err = CommandRunner::default().run(&mut source, &batch).await.unwrap_err();

        match &err {
            ExecError::Timeout {
                command, stdout, ..
            } => {
                assert_eq!(command, "sleep 1000");
                assert_eq!(stdout, "tick\n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.partial_output().is_none());
        let spy = source.spy.lock().unwrap();
        assert_eq!(spy.kills, 1);
        assert_eq!(spy.closed, 2);
        assert_eq!(spy.dispatched.len(), 2);
    }

    #[tokio::test]
    async fn test_kill_failure_is_signal_error() {
        let mut source = FakeSource::new(vec![Script::Hang(vec![])]);
        source.kill_fails = true;

        let err = CommandRunner::default()
            .run(&mut source, &batch(&["sleep 1000"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Signal { .. }));
        assert!(err.partial_output().is_none());
        assert_eq!(source.spy.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_start_failure_stops_batch() {
        let mut source = FakeSource::new(vec![ok("a"), Script::RefuseStart, ok("c")]);

        let err = CommandRunner::default()
            .run(&mut source, &batch(&["a", "b", "c"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::ExecStart { ref command, .. } if command == "b"));
        assert!(!err.ran_remotely());
        assert_eq!(source.spy.lock().unwrap().closed, 2);
    }

    #[tokio::test]
    async fn test_session_failure_aborts_without_output() {
        let mut source = FakeSource::new(vec![ok("a"), ok("b")]);
        source.fail_open_at = Some(1);

        let err = CommandRunner::default()
            .run(&mut source, &batch(&["a", "b"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Session(_)));
        assert!(err.partial_output().is_none());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mut source = FakeSource::new(vec![]);
        let outputs = CommandRunner::default()
            .run(&mut source, &batch(&[]))
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_dispatch_text() {
        let runner = CommandRunner::new("doas ");
        assert_eq!(runner.dispatch_text("reboot", true), "doas reboot");
        assert_eq!(runner.dispatch_text("reboot", false), "reboot");
    }
}
