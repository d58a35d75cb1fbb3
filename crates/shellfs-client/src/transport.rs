//! The remote transport capability.
//!
//! Everything the filesystem needs from the remote host fits in two
//! capabilities: run a single-line command and capture its output, and move
//! bulk content in either direction. Implementations are shared across caller
//! threads; each call is one blocking round trip from the caller's view.

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::TransportResult;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Exit status, when the server reported one.
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    /// Output with only stdout populated and a zero exit status.
    pub fn stdout(data: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: data.into(),
            stderr: Vec::new(),
            exit_status: Some(0),
        }
    }

    /// Stdout as text, replacing invalid UTF-8.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr as text, replacing invalid UTF-8.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// True when the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// True if either stream contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.stdout_lossy().contains(needle) || self.stderr_lossy().contains(needle)
    }
}

/// Modify/access timestamps stamped on an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub modified: SystemTime,
    pub accessed: SystemTime,
}

impl FileTimes {
    /// Both timestamps set to the current time.
    pub fn now() -> Self {
        let now = SystemTime::now();
        Self {
            modified: now,
            accessed: now,
        }
    }
}

/// Remote session capability: command execution plus bulk transfer.
///
/// Paths are remote path strings as the remote shell sees them.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run a single-line shell command and capture its output.
    async fn exec(&self, command: &str) -> TransportResult<ExecOutput>;

    /// Copy `remote` to the local filesystem.
    ///
    /// If `local` is an existing directory the remote entry is created inside
    /// it; otherwise `local` names the destination file. `recursive` is
    /// required for directories.
    async fn download(&self, remote: &str, local: &Path, recursive: bool) -> TransportResult<()>;

    /// Read the full content of a remote regular file.
    async fn download_to_vec(&self, remote: &str) -> TransportResult<Vec<u8>>;

    /// Upload exactly `size` bytes from `source` as the complete content of
    /// `remote`, with the given permission bits and timestamps.
    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        remote: &str,
        permissions: u32,
        times: FileTimes,
    ) -> TransportResult<()>;

    /// Upload a local file or directory tree to `remote`.
    ///
    /// With `target_is_directory` the local entry is placed inside the remote
    /// directory; otherwise `remote` names the destination file.
    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        recursive: bool,
        target_is_directory: bool,
    ) -> TransportResult<()>;

    /// Returns true while the session is established.
    fn is_open(&self) -> bool;

    /// Tear the session down. Idempotent.
    async fn close(&self) -> TransportResult<()>;
}
