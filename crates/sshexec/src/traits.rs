//! Executor capability shared by the real and mock implementations

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::ExecError;
use crate::scp::FileHeader;

/// Byte source accepted by [`Executor::copy`]
pub type Contents<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Copy files to and run commands on a remote host
///
/// Every call opens and closes its own connection.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Upload `header.size` bytes from `contents` to `destination_path` on `host`
    async fn copy(
        &self,
        header: &FileHeader,
        contents: Contents<'_>,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError>;

    /// Upload the local file at `source_path` to `destination_path` on `host`
    async fn copy_path(
        &self,
        source_path: &Path,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError>;

    /// Run `commands` in order on `host`, returning each command's stdout
    async fn exec(
        &self,
        host: &str,
        commands: &[String],
        timeout_minutes: u64,
        use_sudo: bool,
    ) -> Result<Vec<String>, ExecError>;

    /// Get executor type name
    fn executor_type(&self) -> &'static str;
}
