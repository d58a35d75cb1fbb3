//! Locally staged copies of remote paths.
//!
//! Checkout/checkin: [`LocalFile::open`] downloads the remote path into the
//! staging tree, callers work on the local copy, and [`LocalFile::commit`]
//! uploads it back. Nothing syncs in between.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shellfs_path::RemotePath;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{FsError, FsResult};
use crate::fs::RemoteFileSystem;

/// A local staging copy bound to a remote path.
#[derive(Clone)]
pub struct LocalFile {
    fs: Arc<RemoteFileSystem>,
    remote: RemotePath,
    local: PathBuf,
}

impl LocalFile {
    /// Localize `remote` (full download) and bind to the staged copy.
    pub async fn open(fs: Arc<RemoteFileSystem>, remote: &RemotePath) -> FsResult<Self> {
        let remote = fs.to_absolute_path(remote);
        let local = fs.localize(&remote).await?;
        Ok(Self { fs, remote, local })
    }

    /// Bind to the staging location of `remote` without downloading, for
    /// content that does not exist remotely yet.
    pub fn staged(fs: Arc<RemoteFileSystem>, remote: &RemotePath) -> Self {
        let remote = fs.to_absolute_path(remote);
        let local = fs.staging_path(&remote);
        Self { fs, remote, local }
    }

    pub fn remote(&self) -> &RemotePath {
        &self.remote
    }

    pub fn local_path(&self) -> &Path {
        &self.local
    }

    /// Upload the local copy over the remote path.
    ///
    /// A directory lands inside the remote parent so that it replaces the
    /// remote directory of the same name; `recursive` is required for it.
    pub async fn commit(&self, recursive: bool) -> FsResult<()> {
        let meta = tokio::fs::metadata(&self.local).await?;
        if meta.is_dir() {
            let parent = self.remote.parent().unwrap_or_else(RemotePath::root);
            self.fs.commit_folder_to(&parent, &self.local, recursive).await
        } else if meta.is_file() {
            self.fs.commit_file_to(&self.remote, &self.local).await
        } else {
            tracing::debug!(local = %self.local.display(), "nothing to commit");
            Ok(())
        }
    }

    /// Open the local copy for writing; the writer commits on close.
    pub async fn open_writer(&self, append: bool) -> FsResult<LocalFileWriter> {
        if let Some(parent) = self.local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.local)
            .await?;
        Ok(LocalFileWriter {
            file: self.clone(),
            gate: Mutex::new(WriterState::Open(file)),
        })
    }
}

/// Writer over a [`LocalFile`]'s staged copy.
///
/// `close` flushes the remaining bytes and commits under one exclusive gate,
/// so a concurrent `close` or write on the same writer waits for it and then
/// sees the writer closed. A failed commit leaves the writer uncommitted and
/// the next `close` retries it.
pub struct LocalFileWriter {
    file: LocalFile,
    gate: Mutex<WriterState>,
}

enum WriterState {
    Open(tokio::fs::File),
    /// Local bytes are on disk but the remote has not accepted them.
    Uncommitted,
    Committed,
}

impl LocalFileWriter {
    pub fn local_file(&self) -> &LocalFile {
        &self.file
    }

    pub async fn write_all(&self, data: &[u8]) -> FsResult<()> {
        let mut gate = self.gate.lock().await;
        let WriterState::Open(file) = &mut *gate else {
            return Err(closed(&self.file.remote));
        };
        file.write_all(data).await?;
        Ok(())
    }

    /// Flush, close the local file and commit it. Idempotent once a commit
    /// has succeeded.
    pub async fn close(&self) -> FsResult<()> {
        let mut gate = self.gate.lock().await;
        match &mut *gate {
            WriterState::Committed => return Ok(()),
            WriterState::Uncommitted => {}
            WriterState::Open(file) => {
                file.flush().await?;
                file.sync_all().await?;
                *gate = WriterState::Uncommitted;
            }
        }
        self.file.commit(true).await?;
        *gate = WriterState::Committed;
        Ok(())
    }
}

fn closed(remote: &RemotePath) -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        format!("writer for {} is closed", remote),
    ))
}
