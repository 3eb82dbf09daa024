//! Tests against a real SSH server
//!
//! Run with `SSHEXEC_TEST_HOST=127.0.0.1:22 SSHEXEC_TEST_USER=$USER cargo test -- --ignored`.
//! Authentication goes through the SSH agent unless `SSHEXEC_TEST_KEY` names a key file.

use std::path::PathBuf;
use std::time::Duration;

use sshexec::connector::Connection;
use sshexec::runner::CommandRunner;
use sshexec::{CommandBatch, Credentials, ExecConfig, ExecError, Executor, SshExecutor};

struct Live {
    host: String,
    credentials: Credentials,
}

async fn live() -> Live {
    let host = std::env::var("SSHEXEC_TEST_HOST").expect("SSHEXEC_TEST_HOST not set");
    let user = std::env::var("SSHEXEC_TEST_USER").expect("SSHEXEC_TEST_USER not set");
    let credentials = match std::env::var("SSHEXEC_TEST_KEY") {
        Ok(path) => Credentials::from_key_file(user, &PathBuf::from(path)).unwrap(),
        Err(_) => Credentials::from_agent(user, "SSH_AUTH_SOCK").await.unwrap(),
    };
    Live { host, credentials }
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_exec_batch() {
    let live = live().await;
    let executor = SshExecutor::new(live.credentials, ExecConfig::default());

    let commands = vec![
        "date".to_string(),
        "echo \"HELLO\" > /tmp/sshexec-file".to_string(),
        "cat /tmp/sshexec-file".to_string(),
        "rm /tmp/sshexec-file".to_string(),
    ];
    let outputs = executor.exec(&live.host, &commands, 10, false).await.unwrap();

    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs[2], "HELLO\n");
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_remote_failure_keeps_earlier_output() {
    let live = live().await;
    let executor = SshExecutor::new(live.credentials, ExecConfig::default());

    let commands = vec!["echo first".to_string(), "exit 3".to_string(), "echo never".to_string()];
    let err = executor.exec(&live.host, &commands, 1, false).await.unwrap_err();

    assert_eq!(
        err.partial_output().unwrap(),
        &["first\n".to_string(), String::new(), String::new()]
    );
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_timeout_kills_command() {
    let live = live().await;
    let mut conn = Connection::open(&live.host, &live.credentials, &ExecConfig::default())
        .await
        .unwrap();

    let batch = CommandBatch::new(["sleep 30"], Duration::from_secs(1));
    let result = CommandRunner::default().run(&mut conn, &batch).await;
    conn.close().await;

    assert!(matches!(result, Err(ExecError::Timeout { .. })));
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_copy_path() {
    let live = live().await;
    let executor = SshExecutor::new(live.credentials, ExecConfig::default());

    let source = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
    executor
        .copy_path(&source, &live.host, "/tmp/sshexec-copy.toml")
        .await
        .unwrap();

    let outputs = executor
        .exec(
            &live.host,
            &["cat /tmp/sshexec-copy.toml".to_string(), "rm /tmp/sshexec-copy.toml".to_string()],
            1,
            false,
        )
        .await
        .unwrap();
    assert_eq!(outputs[0], std::fs::read_to_string(&source).unwrap());
}
