//! In-memory remote host.
//!
//! [`MemoryTransport`] answers the shell commands the filesystem layer issues
//! (`ls -ld`, `touch`, `id`, `getent`, `cp`, `mv`, `readlink -e`, `md5sum`,
//! `cat /proc/self/mountinfo`) from an in-process tree, and serves transfers
//! against local disk. Tests use it to drive the filesystem without a server,
//! to inspect which commands ran, and to inject failures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use shellfs_path::RemotePath;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{TransportError, TransportResult};
use crate::shell;
use crate::transport::{ExecOutput, FileTimes, RemoteTransport};

const LS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const MAX_SYMLINK_HOPS: usize = 40;
const DEFAULT_MOUNTINFO: &str = "22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw\n";

#[derive(Debug, Clone)]
enum Kind {
    File(Vec<u8>),
    Dir,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Entry {
    kind: Kind,
    mode: u32,
    owner: String,
    group: String,
    modified: SystemTime,
    accessed: SystemTime,
}

impl Entry {
    fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Dir)
    }

    fn size(&self) -> usize {
        match &self.kind {
            Kind::File(data) => data.len(),
            Kind::Dir => 4096,
            Kind::Symlink(target) => target.len(),
        }
    }

    fn permission_string(&self) -> String {
        let kind = match self.kind {
            Kind::File(_) => '-',
            Kind::Dir => 'd',
            Kind::Symlink(_) => 'l',
        };
        let mode = if matches!(self.kind, Kind::Symlink(_)) { 0o777 } else { self.mode };
        let mut s = String::with_capacity(10);
        s.push(kind);
        for shift in [6u32, 3, 0] {
            let bits = (mode >> shift) & 0o7;
            s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        s
    }
}

struct Account {
    name: String,
    id: u32,
    gid: u32,
}

impl Account {
    fn new(name: &str, id: u32, gid: u32) -> Self {
        Self {
            name: name.to_string(),
            id,
            gid,
        }
    }
}

/// Snapshot of the local tree read for an upload.
enum LocalNode {
    File {
        rel: Vec<String>,
        data: Vec<u8>,
        mode: u32,
    },
    Dir {
        rel: Vec<String>,
        mode: u32,
    },
}

struct Host {
    entries: BTreeMap<String, Entry>,
    users: Vec<Account>,
    groups: Vec<Account>,
    scripts: Vec<(String, ExecOutput)>,
    commands: Vec<String>,
    transfers: Vec<String>,
    failures_pending: usize,
    owner: String,
    group: String,
    closed: bool,
}

/// A fake remote host backed by memory.
pub struct MemoryTransport {
    host: Mutex<Host>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A host with an empty root directory and the `root` account.
    pub fn new() -> Self {
        let now = SystemTime::now();
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            Entry {
                kind: Kind::Dir,
                mode: 0o755,
                owner: "root".into(),
                group: "root".into(),
                modified: now,
                accessed: now,
            },
        );
        Self {
            host: Mutex::new(Host {
                entries,
                users: vec![Account::new("root", 0, 0)],
                groups: vec![Account::new("root", 0, 0)],
                scripts: Vec::new(),
                commands: Vec::new(),
                transfers: Vec::new(),
                failures_pending: 0,
                owner: "root".into(),
                group: "root".into(),
                closed: false,
            }),
        }
    }

    /// Owner and group stamped on entries created from now on.
    pub fn set_identity(&self, owner: &str, group: &str) {
        let mut host = self.host.lock();
        host.owner = owner.to_string();
        host.group = group.to_string();
    }

    pub fn add_user(&self, name: &str, uid: u32, gid: u32) {
        self.host.lock().users.push(Account::new(name, uid, gid));
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.host.lock().groups.push(Account::new(name, gid, gid));
    }

    /// Create a directory and any missing parents.
    pub fn mkdir(&self, path: &str) {
        let mut host = self.host.lock();
        let mut current = String::new();
        for name in components(path) {
            current.push('/');
            current.push_str(name);
            if !host.entries.contains_key(&current) {
                let entry = host.new_entry(Kind::Dir, 0o755);
                host.entries.insert(current.clone(), entry);
            }
        }
    }

    /// Create or replace a regular file, creating parents as needed.
    pub fn write_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let key = key_of(path);
        if let Some(parent) = parent_key(&key) {
            self.mkdir(&parent);
        }
        let mut host = self.host.lock();
        let entry = host.new_entry(Kind::File(data.into()), 0o644);
        host.entries.insert(key, entry);
    }

    pub fn symlink(&self, path: &str, target: &str) {
        let key = key_of(path);
        if let Some(parent) = parent_key(&key) {
            self.mkdir(&parent);
        }
        let mut host = self.host.lock();
        let entry = host.new_entry(Kind::Symlink(target.to_string()), 0o777);
        host.entries.insert(key, entry);
    }

    pub fn set_mode(&self, path: &str, mode: u32) {
        if let Some(entry) = self.host.lock().entries.get_mut(&key_of(path)) {
            entry.mode = mode & 0o7777;
        }
    }

    pub fn set_owner(&self, path: &str, owner: &str, group: &str) {
        if let Some(entry) = self.host.lock().entries.get_mut(&key_of(path)) {
            entry.owner = owner.to_string();
            entry.group = group.to_string();
        }
    }

    pub fn set_times(&self, path: &str, modified: SystemTime, accessed: SystemTime) {
        if let Some(entry) = self.host.lock().entries.get_mut(&key_of(path)) {
            entry.modified = modified;
            entry.accessed = accessed;
        }
    }

    /// Content of a regular file, following symlinks.
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        let host = self.host.lock();
        let key = host.resolve(path, true)?;
        match &host.entries.get(&key)?.kind {
            Kind::File(data) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let host = self.host.lock();
        host.resolve(path, false)
            .is_some_and(|key| host.entries.contains_key(&key))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let host = self.host.lock();
        host.resolve(path, true)
            .and_then(|key| host.entries.get(&key).map(Entry::is_dir))
            .unwrap_or(false)
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        let host = self.host.lock();
        let key = host.resolve(path, true)?;
        host.entries.get(&key).map(|e| e.mode)
    }

    /// Answer every command starting with `prefix` with `output`.
    ///
    /// Scripts take precedence over built-in commands; the latest matching
    /// script wins.
    pub fn script(&self, prefix: &str, output: ExecOutput) {
        self.host.lock().scripts.push((prefix.to_string(), output));
    }

    /// Fail the next `count` transport calls with a channel error.
    pub fn fail_next(&self, count: usize) {
        self.host.lock().failures_pending = count;
    }

    /// Every command executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.host.lock().commands.clone()
    }

    /// Number of executed commands whose first word is `program`.
    pub fn command_count(&self, program: &str) -> usize {
        self.host
            .lock()
            .commands
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(program))
            .count()
    }

    /// Transfers performed so far, as `"upload <path>"` / `"download <path>"`.
    pub fn transfers(&self) -> Vec<String> {
        self.host.lock().transfers.clone()
    }

    fn begin(&self, record: impl FnOnce(&mut Host)) -> TransportResult<()> {
        let mut host = self.host.lock();
        if host.closed {
            return Err(TransportError::Closed);
        }
        if host.failures_pending > 0 {
            host.failures_pending -= 1;
            return Err(TransportError::channel("injected failure"));
        }
        record(&mut host);
        Ok(())
    }
}

impl Host {
    fn new_entry(&self, kind: Kind, mode: u32) -> Entry {
        let now = SystemTime::now();
        Entry {
            kind,
            mode,
            owner: self.owner.clone(),
            group: self.group.clone(),
            modified: now,
            accessed: now,
        }
    }

    /// Physical key for `path`, resolving symlinks in every component and in
    /// the last one only with `follow_last`. The last component need not
    /// exist; `None` if an earlier one is missing or not a directory.
    fn resolve(&self, path: &str, follow_last: bool) -> Option<String> {
        let mut pending: Vec<String> = components(path).rev().map(str::to_string).collect();
        let mut current: Vec<String> = Vec::new();
        let mut hops = 0;

        while let Some(name) = pending.pop() {
            match name.as_str() {
                "." => continue,
                ".." => {
                    current.pop();
                    continue;
                }
                _ => {}
            }
            current.push(name);
            let key = join(&current);
            let last = pending.is_empty();
            match self.entries.get(&key) {
                Some(Entry { kind: Kind::Symlink(target), .. }) if !last || follow_last => {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return None;
                    }
                    current.pop();
                    if target.starts_with('/') {
                        current.clear();
                    }
                    pending.extend(components(target).rev().map(str::to_string));
                }
                Some(entry) if !last && !entry.is_dir() => return None,
                None if !last => return None,
                _ => {}
            }
        }
        Some(join(&current))
    }

    fn lookup(&self, path: &str, follow_last: bool) -> Option<(String, &Entry)> {
        let key = self.resolve(path, follow_last)?;
        let entry = self.entries.get(&key)?;
        Some((key, entry))
    }

    fn run(&mut self, command: &str) -> ExecOutput {
        if let Some((_, output)) = self
            .scripts
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return output.clone();
        }

        let words = shell::split_words(command);
        let args: Vec<&str> = words.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["ls", flags, .., path] if flags.starts_with("-ld") => {
                self.ls(path, flags.contains('u'))
            }
            ["touch", path] => self.touch(path),
            ["id", name] => self.id(name),
            ["getent", "passwd", name] => self.getent_passwd(name),
            ["getent", "group", name] => self.getent_group(name),
            ["readlink", "-e", path] => self.readlink(path),
            ["cp", "-r", source, target] => self.copy(source, target, true),
            ["cp", source, target] => self.copy(source, target, false),
            ["mv", source, target] => self.rename(source, target),
            ["md5sum", path] => self.md5sum(path),
            ["cat", "/proc/self/mountinfo"] => ExecOutput::stdout(DEFAULT_MOUNTINFO),
            [program, ..] => failure(127, format!("sh: {}: command not found\n", program)),
            [] => ExecOutput::stdout(""),
        }
    }

    fn ls(&self, path: &str, access_time: bool) -> ExecOutput {
        let Some((_, entry)) = self.lookup(path, false) else {
            return failure(
                2,
                format!("ls: cannot access '{}': No such file or directory\n", path),
            );
        };
        let time = if access_time { entry.accessed } else { entry.modified };
        let stamp = DateTime::<Local>::from(time).format(LS_TIME_FORMAT);
        let link = match &entry.kind {
            Kind::Symlink(target) => format!(" -> {}", target),
            _ => String::new(),
        };
        ExecOutput::stdout(format!(
            "{} 1 {} {} {} {} {}{}\n",
            entry.permission_string(),
            entry.owner,
            entry.group,
            entry.size(),
            stamp,
            path,
            link
        ))
    }

    fn touch(&mut self, path: &str) -> ExecOutput {
        let Some(key) = self.resolve(path, true) else {
            return failure(
                1,
                format!("touch: cannot touch '{}': No such file or directory\n", path),
            );
        };
        let now = SystemTime::now();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.modified = now;
            entry.accessed = now;
            return ExecOutput::stdout("");
        }
        let parent_is_dir = parent_key(&key)
            .and_then(|p| self.entries.get(&p))
            .is_some_and(Entry::is_dir);
        if !parent_is_dir {
            return failure(
                1,
                format!("touch: cannot touch '{}': No such file or directory\n", path),
            );
        }
        let entry = self.new_entry(Kind::File(Vec::new()), 0o644);
        self.entries.insert(key, entry);
        ExecOutput::stdout("")
    }

    fn id(&self, name: &str) -> ExecOutput {
        let Some(user) = self.users.iter().find(|u| u.name == name) else {
            return failure(1, format!("id: '{}': no such user\n", name));
        };
        let group = self
            .groups
            .iter()
            .find(|g| g.id == user.gid)
            .map(|g| g.name.as_str())
            .unwrap_or(user.name.as_str());
        ExecOutput::stdout(format!(
            "uid={}({}) gid={}({}) groups={}({})\n",
            user.id, user.name, user.gid, group, user.gid, group
        ))
    }

    fn getent_passwd(&self, name: &str) -> ExecOutput {
        match self.users.iter().find(|u| u.name == name) {
            Some(u) => ExecOutput::stdout(format!(
                "{}:x:{}:{}::/home/{}:/bin/sh\n",
                u.name, u.id, u.gid, u.name
            )),
            None => failure(2, String::new()),
        }
    }

    fn getent_group(&self, name: &str) -> ExecOutput {
        match self.groups.iter().find(|g| g.name == name) {
            Some(g) => ExecOutput::stdout(format!("{}:x:{}:\n", g.name, g.id)),
            None => failure(2, String::new()),
        }
    }

    fn readlink(&self, path: &str) -> ExecOutput {
        match self.lookup(path, true) {
            Some((key, _)) => ExecOutput::stdout(format!("{}\n", key)),
            None => failure(1, String::new()),
        }
    }

    fn md5sum(&self, path: &str) -> ExecOutput {
        match self.lookup(path, true) {
            None => failure(1, format!("md5sum: {}: No such file or directory\n", path)),
            Some((_, entry)) if entry.is_dir() => {
                failure(1, format!("md5sum: {}: Is a directory\n", path))
            }
            Some(_) => failure(1, "md5sum: digest not scripted on memory host\n".to_string()),
        }
    }

    /// Destination key for `cp`/`mv`: inside `target` when it is a directory.
    fn destination(&self, source_key: &str, target: &str) -> Option<String> {
        let target_key = self.resolve(target, true)?;
        match self.entries.get(&target_key) {
            Some(entry) if entry.is_dir() => {
                let name = source_key.rsplit('/').next().unwrap_or_default();
                Some(join_key(&target_key, name))
            }
            _ => {
                let parent_ok = parent_key(&target_key)
                    .and_then(|p| self.entries.get(&p))
                    .is_some_and(Entry::is_dir);
                parent_ok.then_some(target_key)
            }
        }
    }

    fn subtree(&self, key: &str) -> Vec<(String, Entry)> {
        let prefix = format!("{}/", key);
        self.entries
            .iter()
            .filter(|(k, _)| k.as_str() == key || k.starts_with(&prefix))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    fn copy(&mut self, source: &str, target: &str, recursive: bool) -> ExecOutput {
        let Some((source_key, entry)) = self.lookup(source, true) else {
            return failure(1, format!("cp: cannot stat '{}': No such file or directory\n", source));
        };
        if entry.is_dir() && !recursive {
            return failure(1, format!("cp: -r not specified; omitting directory '{}'\n", source));
        }
        let Some(dest) = self.destination(&source_key, target) else {
            return failure(
                1,
                format!("cp: cannot create '{}': No such file or directory\n", target),
            );
        };
        for (key, entry) in self.subtree(&source_key) {
            let moved = format!("{}{}", dest, &key[source_key.len()..]);
            self.entries.insert(moved, entry);
        }
        ExecOutput::stdout("")
    }

    fn rename(&mut self, source: &str, target: &str) -> ExecOutput {
        let Some((source_key, _)) = self.lookup(source, false) else {
            return failure(1, format!("mv: cannot stat '{}': No such file or directory\n", source));
        };
        let Some(dest) = self.destination(&source_key, target) else {
            return failure(
                1,
                format!("mv: cannot move to '{}': No such file or directory\n", target),
            );
        };
        if dest == source_key {
            return ExecOutput::stdout("");
        }
        for (key, entry) in self.subtree(&source_key) {
            self.entries.remove(&key);
            let moved = format!("{}{}", dest, &key[source_key.len()..]);
            self.entries.insert(moved, entry);
        }
        ExecOutput::stdout("")
    }

    /// Entries to write locally for a download of `remote`.
    fn export(&self, remote: &str, recursive: bool) -> TransportResult<Vec<(String, Entry)>> {
        let (key, entry) = self.lookup(remote, true).ok_or_else(|| {
            TransportError::protocol(format!("scp: {}: No such file or directory", remote))
        })?;
        if entry.is_dir() && !recursive {
            return Err(TransportError::protocol(format!("scp: {}: not a regular file", remote)));
        }
        let base = parent_key(&key).unwrap_or_else(|| "/".to_string());
        Ok(self
            .subtree(&key)
            .into_iter()
            .map(|(k, e)| {
                let rel = k.strip_prefix(&base).unwrap_or(&k).trim_start_matches('/').to_string();
                (rel, e)
            })
            .collect())
    }

    fn import(&mut self, dest: &str, nodes: Vec<LocalNode>) -> TransportResult<()> {
        let parent_is_dir = parent_key(dest)
            .and_then(|p| self.entries.get(&p))
            .is_some_and(Entry::is_dir);
        if !parent_is_dir {
            return Err(TransportError::protocol(format!(
                "scp: {}: No such file or directory",
                dest
            )));
        }
        for node in nodes {
            let (rel, kind, mode) = match node {
                LocalNode::Dir { rel, mode } => (rel, Kind::Dir, mode),
                LocalNode::File { rel, data, mode } => (rel, Kind::File(data), mode),
            };
            let key = rel.iter().fold(dest.to_string(), |acc, n| join_key(&acc, n));
            let entry = self.new_entry(kind, mode);
            self.entries.insert(key, entry);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn exec(&self, command: &str) -> TransportResult<ExecOutput> {
        self.begin(|host| host.commands.push(command.to_string()))?;
        let output = self.host.lock().run(command);
        tracing::trace!(command, status = ?output.exit_status, "memory exec");
        Ok(output)
    }

    async fn download(&self, remote: &str, local: &Path, recursive: bool) -> TransportResult<()> {
        self.begin(|host| host.transfers.push(format!("download {}", remote)))?;
        let entries = self.host.lock().export(remote, recursive)?;

        let local_is_dir = tokio::fs::metadata(local).await.map(|m| m.is_dir()).unwrap_or(false);
        for (rel, entry) in entries {
            let dest = if local_is_dir {
                local.join(&rel)
            } else {
                // The top-level entry takes the name `local`.
                let mut parts = rel.splitn(2, '/');
                parts.next();
                match parts.next() {
                    Some(rest) => local.join(rest),
                    None => local.to_path_buf(),
                }
            };
            match entry.kind {
                Kind::Dir => tokio::fs::create_dir_all(&dest).await?,
                Kind::File(data) => tokio::fs::write(&dest, data).await?,
                Kind::Symlink(_) => {}
            }
        }
        Ok(())
    }

    async fn download_to_vec(&self, remote: &str) -> TransportResult<Vec<u8>> {
        self.begin(|host| host.transfers.push(format!("download {}", remote)))?;
        let host = self.host.lock();
        match host.lookup(remote, true) {
            Some((_, Entry { kind: Kind::File(data), .. })) => Ok(data.clone()),
            Some(_) => Err(TransportError::protocol(format!(
                "{} is a directory and cannot be read as a stream",
                remote
            ))),
            None => Err(TransportError::protocol(format!(
                "scp: {}: No such file or directory",
                remote
            ))),
        }
    }

    async fn upload(
        &self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        remote: &str,
        permissions: u32,
        times: FileTimes,
    ) -> TransportResult<()> {
        self.begin(|host| host.transfers.push(format!("upload {}", remote)))?;
        let mut data = Vec::new();
        source.take(size).read_to_end(&mut data).await?;
        if data.len() as u64 != size {
            return Err(TransportError::protocol(format!(
                "source ended after {} of {} bytes",
                data.len(),
                size
            )));
        }

        let mut host = self.host.lock();
        let key = host.resolve(remote, true).ok_or_else(|| {
            TransportError::protocol(format!("scp: {}: No such file or directory", remote))
        })?;
        if host.entries.get(&key).is_some_and(Entry::is_dir) {
            return Err(TransportError::protocol(format!("scp: {}: Is a directory", remote)));
        }
        let parent_is_dir = parent_key(&key)
            .and_then(|p| host.entries.get(&p))
            .is_some_and(Entry::is_dir);
        if !parent_is_dir {
            return Err(TransportError::protocol(format!(
                "scp: {}: No such file or directory",
                remote
            )));
        }
        let (owner, group) = match host.entries.get(&key) {
            Some(existing) => (existing.owner.clone(), existing.group.clone()),
            None => (host.owner.clone(), host.group.clone()),
        };
        host.entries.insert(
            key,
            Entry {
                kind: Kind::File(data),
                mode: permissions & 0o7777,
                owner,
                group,
                modified: times.modified,
                accessed: times.accessed,
            },
        );
        Ok(())
    }

    async fn upload_path(
        &self,
        local: &Path,
        remote: &str,
        recursive: bool,
        target_is_directory: bool,
    ) -> TransportResult<()> {
        self.begin(|host| host.transfers.push(format!("upload {}", remote)))?;
        let nodes = read_local_tree(local, recursive).await?;
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransportError::protocol(format!("{} has no file name", local.display()))
            })?;

        let mut host = self.host.lock();
        let dest = if target_is_directory {
            let dir = host
                .resolve(remote, true)
                .filter(|k| host.entries.get(k).is_some_and(Entry::is_dir))
                .ok_or_else(|| {
                    TransportError::protocol(format!("scp: {}: Not a directory", remote))
                })?;
            join_key(&dir, &name)
        } else {
            host.resolve(remote, true).ok_or_else(|| {
                TransportError::protocol(format!("scp: {}: No such file or directory", remote))
            })?
        };
        host.import(&dest, nodes)
    }

    fn is_open(&self) -> bool {
        !self.host.lock().closed
    }

    async fn close(&self) -> TransportResult<()> {
        self.host.lock().closed = true;
        Ok(())
    }
}

async fn read_local_tree(root: &Path, recursive: bool) -> TransportResult<Vec<LocalNode>> {
    let meta = tokio::fs::metadata(root).await?;
    if !meta.is_dir() {
        let data = tokio::fs::read(root).await?;
        return Ok(vec![LocalNode::File {
            rel: Vec::new(),
            data,
            mode: local_mode(&meta),
        }]);
    }
    if !recursive {
        return Err(TransportError::protocol(format!(
            "{} is a directory; recursive transfer required",
            root.display()
        )));
    }

    let mut nodes = vec![LocalNode::Dir {
        rel: Vec::new(),
        mode: local_mode(&meta),
    }];
    let mut queue: Vec<(PathBuf, Vec<String>)> = vec![(root.to_path_buf(), Vec::new())];
    while let Some((dir, rel)) = queue.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let mut child_rel = rel.clone();
            child_rel.push(entry.file_name().to_string_lossy().into_owned());
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                nodes.push(LocalNode::Dir {
                    rel: child_rel.clone(),
                    mode: local_mode(&meta),
                });
                queue.push((entry.path(), child_rel));
            } else {
                let data = tokio::fs::read(entry.path()).await?;
                nodes.push(LocalNode::File {
                    rel: child_rel,
                    data,
                    mode: local_mode(&meta),
                });
            }
        }
    }
    Ok(nodes)
}

#[cfg(unix)]
fn local_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

fn failure(status: u32, stderr: String) -> ExecOutput {
    ExecOutput {
        stdout: Vec::new(),
        stderr: stderr.into_bytes(),
        exit_status: Some(status),
    }
}

fn components(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|n| !n.is_empty())
}

fn join(names: &[String]) -> String {
    format!("/{}", names.join("/"))
}

fn join_key(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Lexically normalized absolute key.
fn key_of(path: &str) -> String {
    RemotePath::root()
        .resolve_str(path)
        .normalize()
        .to_string_lossy()
        .into_owned()
}

fn parent_key(key: &str) -> Option<String> {
    RemotePath::from(key)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[tokio::test]
    async fn test_ls_formats_seven_fields() {
        let host = MemoryTransport::new();
        host.write_file("/home/u/a.txt", "hello");
        host.set_owner("/home/u/a.txt", "alice", "staff");
        host.set_mode("/home/u/a.txt", 0o640);

        let out = host
            .exec("ls -ld --time-style '+%Y-%m-%d %H:%M:%S' /home/u/a.txt")
            .await
            .unwrap();
        let line = out.stdout_lossy();
        let fields: Vec<&str> = line
            .trim_end()
            .strip_suffix(" /home/u/a.txt")
            .unwrap()
            .split_whitespace()
            .collect();
        assert_eq!(fields.len(), 7);
        assert_eq!(fields[0], "-rw-r-----");
        assert_eq!(fields[2], "alice");
        assert_eq!(fields[3], "staff");
        assert_eq!(fields[4], "5");
    }

    #[tokio::test]
    async fn test_ls_missing_and_symlink() {
        let host = MemoryTransport::new();
        host.write_file("/data/real", "x");
        host.symlink("/data/link", "/data/real");

        let missing = host.exec("ls -ld /nope").await.unwrap();
        assert!(missing.stdout.is_empty());
        assert!(missing.mentions("No such file or directory"));

        let link = host.exec("ls -ld /data/link").await.unwrap();
        assert!(link.stdout_lossy().starts_with('l'));
        assert!(link.stdout_lossy().trim_end().ends_with("/data/link -> /data/real"));
    }

    #[tokio::test]
    async fn test_access_time_flag() {
        let host = MemoryTransport::new();
        host.write_file("/f", "");
        let modified = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        let accessed = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        host.set_times("/f", modified, accessed);

        let m = host.exec("ls -ld /f").await.unwrap().stdout_lossy();
        let a = host.exec("ls -ldu /f").await.unwrap().stdout_lossy();
        assert_ne!(m, a);
        let expected = DateTime::<Local>::from(accessed).format(LS_TIME_FORMAT).to_string();
        assert!(a.contains(&expected));
    }

    #[tokio::test]
    async fn test_touch_creates_only_under_existing_dir() {
        let host = MemoryTransport::new();
        host.mkdir("/tmp");
        assert!(host.exec("touch /tmp/new").await.unwrap().success());
        assert_eq!(host.read_file("/tmp/new").unwrap(), b"");
        assert!(!host.exec("touch /missing/new").await.unwrap().success());
        assert_eq!(host.command_count("touch"), 2);
    }

    #[tokio::test]
    async fn test_resolve_through_symlinked_dir() {
        let host = MemoryTransport::new();
        host.write_file("/srv/real/f", "1");
        host.symlink("/srv/alias", "real");
        assert_eq!(host.read_file("/srv/alias/f").unwrap(), b"1");

        let out = host.exec("readlink -e /srv/alias/../alias/f").await.unwrap();
        assert_eq!(out.stdout_lossy(), "/srv/real/f\n");
        assert!(!host.exec("readlink -e /srv/alias/none").await.unwrap().success());
    }

    #[tokio::test]
    async fn test_cp_and_mv() {
        let host = MemoryTransport::new();
        host.write_file("/a/one", "1");
        host.mkdir("/b");
        host.exec("cp /a/one /b").await.unwrap();
        assert_eq!(host.read_file("/b/one").unwrap(), b"1");

        host.exec("mv /a /c").await.unwrap();
        assert!(!host.exists("/a/one"));
        assert_eq!(host.read_file("/c/one").unwrap(), b"1");

        let refused = host.exec("cp /c /d").await.unwrap();
        assert!(refused.mentions("omitting directory"));
    }

    #[tokio::test]
    async fn test_principal_commands() {
        let host = MemoryTransport::new();
        host.add_group("devs", 1000);
        host.add_user("alice", 1000, 1000);
        let id = host.exec("id alice").await.unwrap();
        assert_eq!(id.stdout_lossy(), "uid=1000(alice) gid=1000(devs) groups=1000(devs)\n");
        let passwd = host.exec("getent passwd root").await.unwrap();
        assert_eq!(passwd.stdout_lossy().trim_end().split(':').count(), 7);
        assert!(!host.exec("getent group nobody").await.unwrap().success());
    }

    #[tokio::test]
    async fn test_scripts_override_builtins() {
        let host = MemoryTransport::new();
        host.script("id root", failure(1, "id: 'root': no such user\n".into()));
        assert!(!host.exec("id root").await.unwrap().success());
        assert!(host.exec("getent passwd root").await.unwrap().success());
    }

    #[tokio::test]
    async fn test_transfers_round_trip_local_disk() {
        let host = MemoryTransport::new();
        host.write_file("/proj/src/lib.rs", "pub fn x() {}");
        host.write_file("/proj/README", "hi");
        let local = tempfile::tempdir().unwrap();

        host.download("/proj", local.path(), true).await.unwrap();
        assert_eq!(std::fs::read(local.path().join("proj/src/lib.rs")).unwrap(), b"pub fn x() {}");

        host.mkdir("/copy");
        host.upload_path(&local.path().join("proj"), "/copy", true, true)
            .await
            .unwrap();
        assert_eq!(host.read_file("/copy/proj/README").unwrap(), b"hi");

        let mut body: &[u8] = b"payload";
        host.upload(&mut body, 7, "/copy/p.bin", 0o600, FileTimes::now())
            .await
            .unwrap();
        assert_eq!(host.download_to_vec("/copy/p.bin").await.unwrap(), b"payload");
        assert_eq!(host.mode("/copy/p.bin"), Some(0o600));
    }

    #[tokio::test]
    async fn test_failure_injection_and_close() {
        let host = MemoryTransport::new();
        host.fail_next(1);
        assert!(matches!(host.exec("id root").await, Err(TransportError::ChannelFailed(_))));
        assert!(host.exec("id root").await.is_ok());

        host.close().await.unwrap();
        assert!(!host.is_open());
        assert!(matches!(host.exec("id root").await, Err(TransportError::Closed)));
    }
}
