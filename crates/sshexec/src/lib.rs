//! sshexec: Remote command execution and file upload over SSH
//!
//! Every operation opens its own connection, runs commands strictly in
//! order with a per-command deadline, and closes the connection before
//! returning. [`mock::MockExecutor`] stands in for the network in tests.

pub mod config;
pub mod connector;
pub mod error;
pub mod keys;
pub mod local;
pub mod mock;
pub mod result;
pub mod runner;
pub mod scp;
pub mod session;
pub mod ssh;
pub mod traits;

pub use config::ExecConfig;
pub use error::ExecError;
pub use keys::{Credentials, KeySource};
pub use mock::MockExecutor;
pub use result::CommandBatch;
pub use ssh::SshExecutor;
pub use traits::Executor;
