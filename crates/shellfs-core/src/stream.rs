//! Write-back output stream.
//!
//! Writes accumulate in memory. Every [`RemoteOutputStream::flush`] uploads
//! the whole buffer as the complete content of the remote file, so after
//! writing N bytes, flushing, writing M more and flushing again the remote
//! file holds N+M bytes, not N+(N+M). Each flush re-sends everything written
//! so far; there is no remote append.
//!
//! Flushing does not refresh the filesystem's cached attributes for the path.

use std::io;
use std::sync::Arc;

use shellfs_path::RemotePath;

use crate::error::{FsError, FsResult};
use crate::fs::RemoteFileSystem;

pub struct RemoteOutputStream {
    fs: Arc<RemoteFileSystem>,
    path: RemotePath,
    buffer: Vec<u8>,
    /// Bytes written since the last successful flush.
    dirty: bool,
    closed: bool,
}

impl RemoteOutputStream {
    pub fn new(fs: Arc<RemoteFileSystem>, path: RemotePath) -> Self {
        Self {
            fs,
            path,
            buffer: Vec::new(),
            dirty: false,
            closed: false,
        }
    }

    pub fn path(&self) -> &RemotePath {
        &self.path
    }

    /// Bytes buffered so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append to the local buffer. No I/O.
    pub fn write(&mut self, data: &[u8]) -> FsResult<()> {
        self.ensure_open()?;
        self.buffer.extend_from_slice(data);
        self.dirty = true;
        Ok(())
    }

    /// Upload the entire buffer as the remote file's content.
    pub async fn flush(&mut self) -> FsResult<()> {
        self.ensure_open()?;
        let mut content: &[u8] = &self.buffer;
        self.fs
            .from_input_stream(&self.path, &mut content, self.buffer.len() as u64)
            .await?;
        self.dirty = false;
        tracing::debug!(path = %self.path, bytes = self.buffer.len(), "write-back flushed");
        Ok(())
    }

    /// Final flush, then refuse further writes. Idempotent.
    pub async fn close(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush().await?;
        self.closed = true;
        Ok(())
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.closed {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream for {} is closed", self.path),
            )));
        }
        Ok(())
    }
}

impl Drop for RemoteOutputStream {
    fn drop(&mut self) {
        if self.dirty && !self.closed {
            tracing::warn!(
                path = %self.path,
                bytes = self.buffer.len(),
                "write-back stream dropped with unflushed data"
            );
        }
    }
}
