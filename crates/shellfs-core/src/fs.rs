//! The remote filesystem orchestrator.
//!
//! [`RemoteFileSystem`] owns one transport and one attribute cache and turns
//! path-level requests into remote commands and bulk transfers:
//!
//! ```text
//!   get_file_attributes ─► cache ─miss─► ls -ld / ls -ldu ─► snapshot ─► cache
//!   localize            ─► download into <staging>/<remote parent>
//!   commit_*            ─► upload from local staging copy
//!   from_input_stream   ─► attributes (create) ─► upload with snapshot mode
//!   lookup_user/group   ─► id, getent passwd / getent group
//! ```
//!
//! Every remote failure surfaces as an [`FsError`]; the only automatic retry
//! is the single `touch`-and-relist when creating a missing target.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shellfs_client::shell::quote;
use shellfs_client::{ExecOutput, FileTimes, RemoteTransport, SshTransport, TransportError};
use shellfs_path::RemotePath;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::instrument;

use crate::attributes::{FileAttributes, Listing};
use crate::cache::AttrCache;
use crate::config::FsConfig;
use crate::constants::{LS_TIME_STYLE, MOUNTINFO_PATH, ROOT, SUPPORTED_VIEWS};
use crate::error::{FsError, FsResult};
use crate::matcher::PathMatcher;
use crate::mount::{MountEntry, parse_mountinfo};
use crate::principal::{self, Principal};
use crate::stream::RemoteOutputStream;

const NO_SUCH_FILE: &str = "No such file or directory";
const IS_A_DIRECTORY: &str = "Is a directory";

/// A remote Linux directory tree reached through a [`RemoteTransport`].
pub struct RemoteFileSystem {
    transport: Arc<dyn RemoteTransport>,
    default_dir: RemotePath,
    staging_root: PathBuf,
    cache: AttrCache,
}

impl RemoteFileSystem {
    /// Validate `config` and open an SSH session to its host.
    #[instrument(skip(config), fields(host = %config.host, root = %config.root_dir))]
    pub async fn connect(config: &FsConfig) -> FsResult<Self> {
        config.validate()?;
        let transport = SshTransport::connect(config.ssh_config())
            .await
            .map_err(|e| match e {
                TransportError::Configuration(msg) => FsError::Configuration(msg),
                other => FsError::Transport(other),
            })?;
        Self::with_transport(Arc::new(transport), config)
    }

    /// Build on an existing transport. Only `root_dir`, staging and cache
    /// settings of `config` are used.
    pub fn with_transport(
        transport: Arc<dyn RemoteTransport>,
        config: &FsConfig,
    ) -> FsResult<Self> {
        config.validate_root()?;
        Ok(Self {
            transport,
            default_dir: RemotePath::from(config.root_dir.as_str()),
            staging_root: config.staging_root(),
            cache: config.attr_cache(),
        })
    }

    /// Join segments into a path. No I/O.
    pub fn get_path(&self, first: &str, more: &[&str]) -> RemotePath {
        RemotePath::from_segments(first, more)
    }

    pub fn root_directories(&self) -> Vec<RemotePath> {
        vec![RemotePath::root()]
    }

    pub fn separator(&self) -> &'static str {
        ROOT
    }

    pub fn is_read_only(&self) -> bool {
        false
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn supported_file_attribute_views(&self) -> &'static [&'static str] {
        &SUPPORTED_VIEWS
    }

    /// The configured root directory.
    pub fn default_directory(&self) -> &RemotePath {
        &self.default_dir
    }

    pub fn to_absolute_path(&self, path: &RemotePath) -> RemotePath {
        path.to_absolute(&self.default_dir)
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn attr_cache(&self) -> &AttrCache {
        &self.cache
    }

    pub fn transport(&self) -> &Arc<dyn RemoteTransport> {
        &self.transport
    }

    async fn exec(&self, command: &str) -> FsResult<ExecOutput> {
        tracing::debug!(cmd = %command, "remote exec");
        Ok(self.transport.exec(command).await?)
    }

    /// Run a command whose non-zero exit is a failure.
    async fn exec_checked(&self, command: &str) -> FsResult<ExecOutput> {
        let output = self.exec(command).await?;
        match output.exit_status {
            Some(status) if status != 0 => Err(FsError::command(
                command,
                format!("exit {}: {}", status, output.stderr_lossy().trim_end()),
            )),
            _ => Ok(output),
        }
    }

    /// Attributes of `path`, from cache or by listing it remotely.
    ///
    /// With `create_if_missing`, a missing target is created with `touch`
    /// and listed once more; a second miss is an error.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn get_file_attributes(
        &self,
        path: &RemotePath,
        create_if_missing: bool,
    ) -> FsResult<FileAttributes> {
        let key = self.to_absolute_path(path).to_string_lossy().into_owned();
        if let Some(attrs) = self.cache.get(&key) {
            return Ok(attrs);
        }

        let quoted = quote(&key);
        let modify_cmd = format!("ls -ld --time-style {} {}", quote(LS_TIME_STYLE), quoted);
        let mut modified = self.exec(&modify_cmd).await?;
        if reports_missing(&modified) {
            if !create_if_missing {
                return Err(FsError::not_found(key));
            }
            tracing::debug!(path = %key, "creating missing target");
            self.exec(&format!("touch {}", quoted)).await?;
            modified = self.exec(&modify_cmd).await?;
            if reports_missing(&modified) {
                return Err(FsError::not_found(key));
            }
        }

        let access_cmd = format!("ls -ldu --time-style {} {}", quote(LS_TIME_STYLE), quoted);
        let accessed = self.exec(&access_cmd).await?;

        let modified_text = modified.stdout_lossy();
        let accessed_text = accessed.stdout_lossy();
        let attrs = FileAttributes::from_listings(
            Listing::parse(&modify_cmd, &modified_text, &key)?,
            Listing::parse(&access_cmd, &accessed_text, &key)?,
        )?;
        self.cache.insert(key, attrs.clone());
        Ok(attrs)
    }

    /// Attributes without creating anything.
    pub async fn attributes(&self, path: &RemotePath) -> FsResult<FileAttributes> {
        self.get_file_attributes(path, false).await
    }

    /// True if `path` exists; other failures propagate.
    pub async fn exists(&self, path: &RemotePath) -> FsResult<bool> {
        match self.get_file_attributes(path, false).await {
            Ok(_) => Ok(true),
            Err(FsError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Local staging location mirroring `remote` under the staging root.
    pub fn staging_path(&self, remote: &RemotePath) -> PathBuf {
        let absolute = self.to_absolute_path(remote).normalize();
        let mut local = self.staging_root.clone();
        for name in &absolute {
            local.push(&*name.to_string_lossy());
        }
        local
    }

    /// Download `remote` (recursively for a directory) into its staging
    /// location and return that local path. Existing staged content is
    /// overwritten.
    #[instrument(skip_all, fields(path = %remote))]
    pub async fn localize(&self, remote: &RemotePath) -> FsResult<PathBuf> {
        let absolute = self.to_absolute_path(remote).normalize();
        let attrs = self.get_file_attributes(&absolute, false).await?;
        let local_parent = match absolute.parent() {
            Some(parent) => self.staging_path(&parent),
            None => self.staging_root.clone(),
        };
        tokio::fs::create_dir_all(&local_parent).await?;

        let source = absolute.to_string_lossy();
        tracing::debug!(path = %source, local = %local_parent.display(), "download");
        self.transport
            .download(&source, &local_parent, attrs.is_directory())
            .await?;
        Ok(self.staging_path(&absolute))
    }

    /// Upload a local file as the complete content of `remote`.
    #[instrument(skip_all, fields(path = %remote, local = %local.display()))]
    pub async fn commit_file_to(&self, remote: &RemotePath, local: &Path) -> FsResult<()> {
        let target = self.to_absolute_path(remote).to_string_lossy().into_owned();
        self.transport.upload_path(local, &target, false, false).await?;
        Ok(())
    }

    /// Upload a local directory into the remote directory `remote_dir`.
    #[instrument(skip_all, fields(path = %remote_dir, local = %local.display()))]
    pub async fn commit_folder_to(
        &self,
        remote_dir: &RemotePath,
        local: &Path,
        recursive: bool,
    ) -> FsResult<()> {
        if !recursive {
            return Err(FsError::illegal_argument(format!(
                "committing folder {} requires a recursive transfer",
                local.display()
            )));
        }
        let target = self.to_absolute_path(remote_dir).to_string_lossy().into_owned();
        self.transport.upload_path(local, &target, true, true).await?;
        Ok(())
    }

    /// Upload exactly `size` bytes from `source` as the content of `path`,
    /// creating it first if needed. The upload keeps the target's permission
    /// bits and stamps the current time.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn from_input_stream(
        &self,
        path: &RemotePath,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> FsResult<()> {
        let attrs = self.get_file_attributes(path, true).await?;
        let target = self.to_absolute_path(path).to_string_lossy().into_owned();
        tracing::debug!(path = %target, bytes = size, "upload");
        self.transport
            .upload(source, size, &target, attrs.permissions().mode(), FileTimes::now())
            .await?;
        Ok(())
    }

    /// Write the full content of the regular file `path` into `sink`.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn to_output_stream(
        &self,
        path: &RemotePath,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> FsResult<()> {
        let data = self.read_to_vec(path).await?;
        sink.write_all(&data).await?;
        sink.flush().await?;
        Ok(())
    }

    /// Full content of the regular file `path`.
    pub async fn read_to_vec(&self, path: &RemotePath) -> FsResult<Vec<u8>> {
        let absolute = self.to_absolute_path(path);
        let source = absolute.to_string_lossy().into_owned();
        if self.get_file_attributes(&absolute, false).await?.is_directory() {
            return Err(FsError::is_a_directory(source));
        }
        tracing::debug!(path = %source, "download to memory");
        Ok(self.transport.download_to_vec(&source).await?)
    }

    /// In-memory reader over the content of `path`.
    pub async fn open_reader(&self, path: &RemotePath) -> FsResult<Cursor<Vec<u8>>> {
        Ok(Cursor::new(self.read_to_vec(path).await?))
    }

    /// Write-back stream replacing the content of `path` on every flush.
    pub fn output_stream(self: &Arc<Self>, path: &RemotePath) -> RemoteOutputStream {
        RemoteOutputStream::new(Arc::clone(self), path.clone())
    }

    /// Resolve a user name to its uid via `id`, falling back to
    /// `getent passwd`.
    #[instrument(skip(self))]
    pub async fn lookup_user(&self, name: &str) -> FsResult<Principal> {
        let id = self.exec(&format!("id {}", quote(name))).await?;
        if let Some(uid) = principal::parse_id_output(&id.stdout_lossy()) {
            return Ok(Principal::user(uid, name));
        }
        let passwd = self.exec(&format!("getent passwd {}", quote(name))).await?;
        principal::parse_passwd_record(&passwd.stdout_lossy())
            .map(|uid| Principal::user(uid, name))
            .ok_or_else(|| FsError::principal_not_found(name))
    }

    /// Resolve a group name to its gid via `getent group`.
    #[instrument(skip(self))]
    pub async fn lookup_group(&self, name: &str) -> FsResult<Principal> {
        let group = self.exec(&format!("getent group {}", quote(name))).await?;
        principal::parse_group_record(&group.stdout_lossy())
            .map(|gid| Principal::group(gid, name))
            .ok_or_else(|| FsError::principal_not_found(name))
    }

    /// `cp <source> <target>` on the remote host; returns its stdout.
    #[instrument(skip_all, fields(source = %source, target = %target))]
    pub async fn copy(&self, source: &RemotePath, target: &RemotePath) -> FsResult<String> {
        let command = format!(
            "cp {} {}",
            quote(&self.to_absolute_path(source).to_string_lossy()),
            quote(&self.to_absolute_path(target).to_string_lossy())
        );
        Ok(self.exec_checked(&command).await?.stdout_lossy())
    }

    /// `mv <source> <target>` on the remote host; returns its stdout.
    #[instrument(skip_all, fields(source = %source, target = %target))]
    pub async fn move_path(&self, source: &RemotePath, target: &RemotePath) -> FsResult<String> {
        let command = format!(
            "mv {} {}",
            quote(&self.to_absolute_path(source).to_string_lossy()),
            quote(&self.to_absolute_path(target).to_string_lossy())
        );
        Ok(self.exec_checked(&command).await?.stdout_lossy())
    }

    /// MD5 digest of a remote regular file, as printed by `md5sum`.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn md5(&self, path: &RemotePath) -> FsResult<String> {
        let target = self.to_absolute_path(path).to_string_lossy().into_owned();
        let command = format!("md5sum {}", quote(&target));
        let output = self.exec(&command).await?;
        if output.mentions(IS_A_DIRECTORY) {
            return Err(FsError::is_a_directory(target));
        }
        if output.mentions(NO_SUCH_FILE) {
            return Err(FsError::not_found(target));
        }
        let text = output.stdout_lossy();
        if text.trim().is_empty() {
            return Err(FsError::command(command, output.stderr_lossy().trim_end().to_string()));
        }
        match text.split_whitespace().collect::<Vec<_>>().as_slice() {
            [digest, _name] => Ok(digest.to_string()),
            fields => Err(FsError::format(
                command,
                format!("expected 2 fields, got {}", fields.len()),
            )),
        }
    }

    /// Canonical form of `path`.
    ///
    /// Following links asks the remote host (`readlink -e`). Otherwise the
    /// path is walked from the root: `.` is dropped, and `..` removes the
    /// previous name only when that name is not a symbolic link. The result
    /// must exist.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn to_real_path(
        &self,
        path: &RemotePath,
        follow_links: bool,
    ) -> FsResult<RemotePath> {
        let absolute = self.to_absolute_path(path);
        if follow_links {
            let target = absolute.to_string_lossy().into_owned();
            let output = self.exec(&format!("readlink -e {}", quote(&target))).await?;
            let real = output.stdout_lossy();
            let real = real.trim_end_matches('\n');
            if real.is_empty() {
                return Err(FsError::not_found(target));
            }
            return Ok(RemotePath::from(real));
        }

        let mut result = RemotePath::root();
        for name in &absolute {
            if name.is_dot() {
                continue;
            }
            if name.is_dot_dot() {
                let attrs = self.get_file_attributes(&result, false).await?;
                if !attrs.is_symbolic_link() {
                    if let Some(parent) = result.parent() {
                        result = parent;
                    }
                    continue;
                }
            }
            result = result.resolve(&name);
        }
        self.get_file_attributes(&result, false).await?;
        Ok(result)
    }

    /// Mounted filesystems, parsed best-effort from the remote mountinfo.
    pub async fn mount_entries(&self) -> FsResult<Vec<MountEntry>> {
        let output = self.exec(&format!("cat {}", MOUNTINFO_PATH)).await?;
        if !output.success() {
            tracing::warn!(stderr = %output.stderr_lossy().trim_end(), "mount table unavailable");
        }
        Ok(parse_mountinfo(&output.stdout_lossy()))
    }

    /// Mount entries not marked `ignore`.
    pub async fn file_stores(&self) -> FsResult<Vec<MountEntry>> {
        Ok(self
            .mount_entries()
            .await?
            .into_iter()
            .filter(|entry| !entry.is_ignored())
            .collect())
    }

    /// Matcher for `"glob:<pattern>"` or `"regex:<pattern>"`.
    pub fn path_matcher(&self, syntax_and_pattern: &str) -> FsResult<PathMatcher> {
        PathMatcher::new(syntax_and_pattern)
    }

    /// Tear down the session. Idempotent.
    pub async fn close(&self) -> FsResult<()> {
        self.transport.close().await?;
        Ok(())
    }
}

/// True when a listing shows the target does not exist.
fn reports_missing(output: &ExecOutput) -> bool {
    output.stdout.iter().all(u8::is_ascii_whitespace) || output.mentions(NO_SUCH_FILE)
}
