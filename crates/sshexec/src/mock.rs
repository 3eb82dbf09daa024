//! Mock executor for unit tests
//!
//! Every operation delegates to a replaceable function. The defaults succeed
//! without doing anything, and nothing here touches the network.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::scp::FileHeader;
use crate::traits::{Contents, Executor};

/// Behaviour of [`Executor::copy`]
pub type CopyFn =
    Box<dyn Fn(&FileHeader, Contents<'_>, &str, &str) -> Result<(), ExecError> + Send + Sync>;
/// Behaviour of [`Executor::copy_path`]
pub type CopyPathFn = Box<dyn Fn(&Path, &str, &str) -> Result<(), ExecError> + Send + Sync>;
/// Behaviour of [`Executor::exec`]
pub type ExecFn =
    Box<dyn Fn(&str, &[String], u64, bool) -> Result<Vec<String>, ExecError> + Send + Sync>;

/// Executor whose operations are plain, swappable functions
pub struct MockExecutor {
    /// Called by `copy`
    pub copy_fn: CopyFn,
    /// Called by `copy_path`
    pub copy_path_fn: CopyPathFn,
    /// Called by `exec`
    pub exec_fn: ExecFn,
}

impl fmt::Debug for MockExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockExecutor").finish_non_exhaustive()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            copy_fn: Box::new(copy_noop),
            copy_path_fn: Box::new(copy_path_noop),
            exec_fn: Box::new(exec_noop),
        }
    }
}

fn copy_noop(_: &FileHeader, _: Contents<'_>, _: &str, _: &str) -> Result<(), ExecError> {
    Ok(())
}

fn copy_path_noop(_: &Path, _: &str, _: &str) -> Result<(), ExecError> {
    Ok(())
}

fn exec_noop(_: &str, _: &[String], _: u64, _: bool) -> Result<Vec<String>, ExecError> {
    Ok(vec![String::new()])
}

impl MockExecutor {
    /// Create a mock where every operation succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the `copy` behaviour
    #[must_use]
    pub fn on_copy<F>(mut self, f: F) -> Self
    where
        F: Fn(&FileHeader, Contents<'_>, &str, &str) -> Result<(), ExecError> + Send + Sync + 'static,
    {
        self.copy_fn = Box::new(f);
        self
    }

    /// Replace the `copy_path` behaviour
    #[must_use]
    pub fn on_copy_path<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path, &str, &str) -> Result<(), ExecError> + Send + Sync + 'static,
    {
        self.copy_path_fn = Box::new(f);
        self
    }

    /// Replace the `exec` behaviour
    #[must_use]
    pub fn on_exec<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &[String], u64, bool) -> Result<Vec<String>, ExecError> + Send + Sync + 'static,
    {
        self.exec_fn = Box::new(f);
        self
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn copy(
        &self,
        header: &FileHeader,
        contents: Contents<'_>,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        (self.copy_fn)(header, contents, host, destination_path)
    }

    async fn copy_path(
        &self,
        source_path: &Path,
        host: &str,
        destination_path: &str,
    ) -> Result<(), ExecError> {
        (self.copy_path_fn)(source_path, host, destination_path)
    }

    async fn exec(
        &self,
        host: &str,
        commands: &[String],
        timeout_minutes: u64,
        use_sudo: bool,
    ) -> Result<Vec<String>, ExecError> {
        (self.exec_fn)(host, commands, timeout_minutes, use_sudo)
    }

    fn executor_type(&self) -> &'static str {
        "mock"
    }
}
