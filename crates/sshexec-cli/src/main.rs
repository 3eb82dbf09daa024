//! sshexec CLI
//!
//! Uploads files to and runs command batches on a remote host over SSH

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use sshexec::{Executor, ExecConfig, KeySource, MockExecutor, SshExecutor};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sshexec")]
#[command(about = "Run commands and copy files over SSH", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// Remote address in host:port form
    #[arg(long, default_value = "127.0.0.1:22")]
    host: String,

    /// Remote user (defaults to $USER)
    #[arg(long, env = "USER")]
    user: String,

    /// Private key file; the SSH agent is used when omitted
    #[arg(long)]
    key: Option<PathBuf>,

    /// Environment variable holding a base64-encoded private key
    #[arg(long, conflicts_with = "key")]
    key_env: Option<String>,
}

impl Target {
    fn key_source(&self) -> KeySource {
        match (&self.key, &self.key_env) {
            (Some(path), _) => KeySource::Path(path.clone()),
            (None, Some(var)) => KeySource::Env(var.clone()),
            (None, None) => KeySource::Agent,
        }
    }

    async fn executor(&self, config: &ExecConfig) -> Result<SshExecutor> {
        Ok(SshExecutor::from_source(&self.user, &self.key_source(), config.clone()).await?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run commands in order, one session per command
    Exec {
        #[command(flatten)]
        target: Target,

        /// Per-command timeout in minutes
        #[arg(long)]
        timeout: Option<u64>,

        /// Prefix every command with sudo
        #[arg(long)]
        sudo: bool,

        /// Print outputs as a JSON array
        #[arg(long)]
        json: bool,

        /// Commands to run
        #[arg(required = true, last = true)]
        commands: Vec<String>,
    },
    /// Upload a local file
    Copy {
        #[command(flatten)]
        target: Target,

        /// Local file to upload
        source: PathBuf,

        /// Remote destination path
        destination: String,
    },
    /// Copy this demo's source, run a few commands, then repeat with the mock executor
    Demo {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ExecConfig::load(path)?,
        None => ExecConfig::load_default()?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Exec {
            target,
            timeout,
            sudo,
            json,
            commands,
        } => {
            let executor = target.executor(&config).await?;
            let timeout = timeout.unwrap_or(config.default_timeout_minutes);
            let outputs = executor
                .exec(&target.host, &commands, timeout, sudo)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outputs)?);
            } else {
                for output in outputs {
                    print!("{output}");
                }
            }
        }
        Commands::Copy {
            target,
            source,
            destination,
        } => {
            let executor = target.executor(&config).await?;
            executor
                .copy_path(&source, &target.host, &destination)
                .await?;
            tracing::info!(source = %source.display(), destination = %destination, "copied");
        }
        Commands::Demo { target } => {
            println!("- Real Demo -");
            let executor = target.executor(&config).await?;
            run_demo(&executor, &target.host).await?;

            println!("- Mock Demo -");
            let mock = MockExecutor::new()
                .on_exec(|_, _, _, _| Ok(vec!["In Mock function".to_string()]));
            run_demo(&mock, &target.host).await?;
        }
    }

    Ok(())
}

async fn run_demo(executor: &dyn Executor, host: &str) -> Result<()> {
    let source = PathBuf::from(file!());
    print!("Copying {} to server...", source.display());
    executor
        .copy_path(&source, host, "/tmp/scpdemo-copy.rs")
        .await?;
    println!("Done");

    println!("Running commands...");
    let commands: Vec<String> = [
        "date",
        "echo \"HELLO\" > /tmp/file",
        "cat /tmp/file",
        "ls -al",
        "rm /tmp/file",
        "rm /tmp/scpdemo-copy.rs",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let outputs = executor.exec(host, &commands, 10, false).await?;
    println!("{outputs:#?}");
    Ok(())
}
