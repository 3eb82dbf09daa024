//! Minimal scp sink protocol for uploading a single file
//!
//! The remote end runs `scp -t <destination>`. Every step is acknowledged
//! with a single byte: `0` for ok, `1` (warning) or `2` (error) followed by
//! a message line.

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::error::ExecError;

/// Metadata sent ahead of the file contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Exact number of bytes that will be streamed
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// File name announced to the remote
    pub name: String,
}

impl FileHeader {
    /// Create a header for `size` bytes
    pub fn new(size: u64, mode: u32, name: impl Into<String>) -> Self {
        Self {
            size,
            mode,
            name: name.into(),
        }
    }

    /// Build a header from a local file's metadata
    ///
    /// # Errors
    /// Returns `ExecError::Io` if the file cannot be inspected
    pub async fn from_path(path: &Path) -> Result<Self, ExecError> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ExecError::Io(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(ExecError::Io(format!("{} is not a regular file", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ExecError::Io(format!("{} has no file name", path.display())))?;

        Ok(Self::new(metadata.len(), metadata.permissions().mode(), name))
    }

    fn control_line(&self) -> Result<String, ExecError> {
        if self.name.is_empty() || self.name.contains(['/', '\n']) {
            return Err(ExecError::Transfer(format!("invalid file name {:?}", self.name)));
        }
        Ok(format!("C{:04o} {} {}\n", self.mode & 0o7777, self.size, self.name))
    }
}

/// Remote command that receives a file into `destination`
#[must_use]
pub fn sink_command(destination: &str) -> String {
    format!("scp -qt {}", shell_quote(destination))
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Stream exactly `header.size` bytes from `contents` to a remote scp sink
///
/// # Errors
/// Returns `ExecError::Transfer` if the remote rejects the file, the stream
/// fails, or `contents` ends before `header.size` bytes
#[instrument(skip(stream, contents), fields(name = %header.name, size = header.size))]
pub async fn copy<S, R>(stream: &mut S, header: &FileHeader, contents: &mut R) -> Result<(), ExecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin + ?Sized,
{
    let control = header.control_line()?;

    read_ack(stream).await?;

    stream.write_all(control.as_bytes()).await.map_err(transfer)?;
    stream.flush().await.map_err(transfer)?;
    read_ack(stream).await?;

    let sent = tokio::io::copy(&mut contents.take(header.size), stream)
        .await
        .map_err(transfer)?;
    if sent != header.size {
        return Err(ExecError::Transfer(format!(
            "source ended after {sent} of {} bytes",
            header.size
        )));
    }

    stream.write_all(&[0]).await.map_err(transfer)?;
    stream.flush().await.map_err(transfer)?;
    read_ack(stream).await?;

    stream.shutdown().await.map_err(transfer)?;
    debug!(bytes = sent, "file transferred");
    Ok(())
}

/// Upload the local file at `source` using its own size, mode and name
///
/// # Errors
/// Returns `ExecError::Io` if the file cannot be opened and
/// `ExecError::Transfer` if the copy fails
pub async fn copy_path<S>(stream: &mut S, source: &Path) -> Result<(), ExecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = FileHeader::from_path(source).await?;
    let mut file = tokio::fs::File::open(source)
        .await
        .map_err(|e| ExecError::Io(format!("{}: {e}", source.display())))?;
    copy(stream, &header, &mut file).await
}

async fn read_ack<S>(stream: &mut S) -> Result<(), ExecError>
where
    S: AsyncRead + Unpin,
{
    let mut code = [0u8; 1];
    if stream.read(&mut code).await.map_err(transfer)? == 0 {
        return Err(ExecError::Transfer(
            "remote closed the stream unexpectedly".to_string(),
        ));
    }

    match code[0] {
        0 => Ok(()),
        1 | 2 => {
            let mut message = Vec::new();
            let mut byte = [0u8; 1];
            while stream.read(&mut byte).await.map_err(transfer)? == 1 && byte[0] != b'\n' {
                message.push(byte[0]);
            }
            Err(ExecError::Transfer(
                String::from_utf8_lossy(&message).trim().to_string(),
            ))
        }
        other => Err(ExecError::Transfer(format!(
            "unexpected response byte {other:#04x}"
        ))),
    }
}

fn transfer(e: std::io::Error) -> ExecError {
    ExecError::Transfer(e.to_string())
}
