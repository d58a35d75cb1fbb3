//! SCP wire protocol.
//!
//! Bulk transfer runs the remote `scp` binary in sink (`-t`) or source (`-f`)
//! mode on an exec channel and speaks the classic record protocol over the
//! channel's byte stream:
//!
//! ```text
//!   T<mtime> 0 <atime> 0\n     timestamps for the next entry
//!   C<mode> <size> <name>\n    regular file, followed by <size> bytes + \0
//!   D<mode> 0 <name>\n         enter directory
//!   E\n                        leave directory
//! ```
//!
//! Every record is answered by a one-byte status: `\0` ok, `\x01` warning or
//! `\x02` fatal, the latter two followed by a message line. The functions here
//! are generic over the stream so they run unchanged over an SSH channel or an
//! in-process duplex pipe.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
};

use crate::constants::SCP_COMMAND;
use crate::error::{TransportError, TransportResult};
use crate::shell;
use crate::transport::FileTimes;

const STATUS_OK: u8 = 0;
const STATUS_WARNING: u8 = 1;
const STATUS_FATAL: u8 = 2;

/// One protocol record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Times { modified: u64, accessed: u64 },
    File { mode: u32, size: u64, name: String },
    Directory { mode: u32, name: String },
    EndDirectory,
}

impl Record {
    /// Wire form, including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Record::Times { modified, accessed } => format!("T{} 0 {} 0\n", modified, accessed),
            Record::File { mode, size, name } => {
                format!("C{:04o} {} {}\n", mode & 0o7777, size, name)
            }
            Record::Directory { mode, name } => format!("D{:04o} 0 {}\n", mode & 0o7777, name),
            Record::EndDirectory => "E\n".to_string(),
        }
    }

    /// Parse one record line (with or without its newline).
    pub fn parse(line: &str) -> TransportResult<Record> {
        let line = line.trim_end_matches('\n');
        let malformed = || TransportError::protocol(format!("malformed scp record: {:?}", line));
        let (kind, rest) = line.split_at_checked(1).ok_or_else(malformed)?;

        match kind {
            "E" if rest.is_empty() => Ok(Record::EndDirectory),
            "T" => {
                let fields: Vec<&str> = rest.split(' ').collect();
                if fields.len() != 4 {
                    return Err(malformed());
                }
                let modified = fields[0].parse().map_err(|_| malformed())?;
                let accessed = fields[2].parse().map_err(|_| malformed())?;
                Ok(Record::Times { modified, accessed })
            }
            "C" | "D" => {
                let mut fields = rest.splitn(3, ' ');
                let mode = fields
                    .next()
                    .and_then(|m| u32::from_str_radix(m, 8).ok())
                    .ok_or_else(malformed)?;
                let size: u64 = fields
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(malformed)?;
                let name = fields.next().filter(|n| !n.is_empty()).ok_or_else(malformed)?;
                if name.contains('/') || name == "." || name == ".." {
                    return Err(TransportError::protocol(format!("unsafe entry name: {:?}", name)));
                }
                let name = name.to_string();
                if kind == "C" {
                    Ok(Record::File { mode, size, name })
                } else {
                    Ok(Record::Directory { mode, name })
                }
            }
            _ => Err(malformed()),
        }
    }
}

/// Remote invocation for receiving an upload at `target`.
pub fn sink_command(
    target: &str,
    recursive: bool,
    target_is_directory: bool,
    preserve_times: bool,
) -> String {
    let mut cmd = format!("{} -t", SCP_COMMAND);
    if recursive {
        cmd.push_str(" -r");
    }
    if target_is_directory {
        cmd.push_str(" -d");
    }
    if preserve_times {
        cmd.push_str(" -p");
    }
    cmd.push(' ');
    cmd.push_str(&shell::quote(target));
    cmd
}

/// Remote invocation for sending `path` to us.
pub fn source_command(path: &str, recursive: bool) -> String {
    let mut cmd = format!("{} -f", SCP_COMMAND);
    if recursive {
        cmd.push_str(" -r");
    }
    cmd.push(' ');
    cmd.push_str(&shell::quote(path));
    cmd
}

/// Upload `size` bytes from `source` as one file named `name`.
///
/// The remote side must be a sink started with [`sink_command`].
pub async fn send_file<S>(
    stream: &mut S,
    source: &mut (dyn AsyncRead + Send + Unpin),
    size: u64,
    name: &str,
    mode: u32,
    times: Option<FileTimes>,
) -> TransportResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    read_status(stream).await?;
    if let Some(times) = times {
        send_record(
            stream,
            &Record::Times {
                modified: unix_seconds(times.modified),
                accessed: unix_seconds(times.accessed),
            },
        )
        .await?;
    }
    send_record(
        stream,
        &Record::File {
            mode,
            size,
            name: name.to_string(),
        },
    )
    .await?;
    send_payload(stream, source, size).await
}

/// Upload a local file, or with `recursive` a local directory tree.
pub async fn send_path<S>(stream: &mut S, local: &Path, recursive: bool) -> TransportResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    read_status(stream).await?;
    let meta = tokio::fs::metadata(local).await?;
    if meta.is_dir() {
        if !recursive {
            return Err(TransportError::protocol(format!(
                "{} is a directory; recursive transfer required",
                local.display()
            )));
        }
        send_dir(stream, local.to_path_buf()).await
    } else {
        send_local_file(stream, local).await
    }
}

fn send_dir<'a, S>(stream: &'a mut S, dir: PathBuf) -> BoxFuture<'a, TransportResult<()>>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    Box::pin(async move {
        let meta = tokio::fs::metadata(&dir).await?;
        send_record(
            stream,
            &Record::Directory {
                mode: local_mode(&meta),
                name: entry_name(&dir)?,
            },
        )
        .await?;

        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();

        for child in children {
            if tokio::fs::metadata(&child).await?.is_dir() {
                send_dir(&mut *stream, child).await?;
            } else {
                send_local_file(&mut *stream, &child).await?;
            }
        }

        send_record(stream, &Record::EndDirectory).await
    })
}

async fn send_local_file<S>(stream: &mut S, path: &Path) -> TransportResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let meta = tokio::fs::metadata(path).await?;
    let size = meta.len();
    send_record(
        stream,
        &Record::File {
            mode: local_mode(&meta),
            size,
            name: entry_name(path)?,
        },
    )
    .await?;
    let mut file = tokio::fs::File::open(path).await?;
    send_payload(stream, &mut file, size).await
}

async fn send_payload<S>(
    stream: &mut S,
    source: &mut (dyn AsyncRead + Send + Unpin),
    size: u64,
) -> TransportResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let mut limited = source.take(size);
    let copied = tokio::io::copy(&mut limited, stream).await?;
    if copied != size {
        return Err(TransportError::protocol(format!(
            "source ended after {} of {} bytes",
            copied, size
        )));
    }
    stream.write_all(&[STATUS_OK]).await?;
    stream.flush().await?;
    read_status(stream).await
}

/// Receive whatever the source sends into `target`.
///
/// If `target` is an existing directory, entries are created inside it;
/// otherwise the single top-level entry is written to `target` itself.
pub async fn receive_to<S>(stream: &mut S, target: &Path) -> TransportResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let target_is_dir = tokio::fs::metadata(target)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut received = false;

    send_ok(stream).await?;
    while let Some(record) = next_record(stream).await? {
        let destination = |name: &str| match dirs.last() {
            Some(dir) => dir.join(name),
            None if target_is_dir => target.join(name),
            None => target.to_path_buf(),
        };
        match record {
            Record::Times { .. } => send_ok(stream).await?,
            Record::File { mode, size, name } => {
                let dest = destination(&name);
                send_ok(stream).await?;
                let mut file = tokio::fs::File::create(&dest).await?;
                let mut limited = (&mut *stream).take(size);
                let copied = tokio::io::copy(&mut limited, &mut file).await?;
                if copied != size {
                    return Err(TransportError::protocol(format!(
                        "{}: stream ended after {} of {} bytes",
                        dest.display(),
                        copied,
                        size
                    )));
                }
                file.flush().await?;
                apply_mode(&dest, mode).await?;
                read_status(stream).await?;
                send_ok(stream).await?;
                received = true;
                tracing::trace!(path = %dest.display(), bytes = size, "scp received file");
            }
            Record::Directory { name, .. } => {
                let dest = destination(&name);
                tokio::fs::create_dir_all(&dest).await?;
                dirs.push(dest);
                send_ok(stream).await?;
                received = true;
            }
            Record::EndDirectory => {
                if dirs.pop().is_none() {
                    return Err(TransportError::protocol("unbalanced end-of-directory record"));
                }
                send_ok(stream).await?;
            }
        }
    }

    if !dirs.is_empty() {
        return Err(TransportError::protocol("stream ended inside a directory"));
    }
    if !received {
        return Err(TransportError::protocol("source sent nothing"));
    }
    Ok(())
}

/// Receive a single regular file into memory.
pub async fn receive_to_vec<S>(stream: &mut S, remote: &str) -> TransportResult<Vec<u8>>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    send_ok(stream).await?;
    while let Some(record) = next_record(stream).await? {
        match record {
            Record::Times { .. } => send_ok(stream).await?,
            Record::File { size, .. } => {
                send_ok(stream).await?;
                let mut data = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);
                (&mut *stream).take(size).read_to_end(&mut data).await?;
                if data.len() as u64 != size {
                    return Err(TransportError::protocol(format!(
                        "{}: stream ended after {} of {} bytes",
                        remote,
                        data.len(),
                        size
                    )));
                }
                read_status(stream).await?;
                send_ok(stream).await?;
                return Ok(data);
            }
            Record::Directory { .. } => {
                return Err(TransportError::protocol(format!(
                    "{} is a directory and cannot be read as a stream",
                    remote
                )));
            }
            Record::EndDirectory => {
                return Err(TransportError::protocol("unexpected end-of-directory record"));
            }
        }
    }
    Err(TransportError::protocol(format!("{}: source sent nothing", remote)))
}

async fn send_record<S>(stream: &mut S, record: &Record) -> TransportResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    stream.write_all(record.encode().as_bytes()).await?;
    stream.flush().await?;
    read_status(stream).await
}

async fn send_ok<S>(stream: &mut S) -> TransportResult<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(&[STATUS_OK]).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one status byte; warnings and fatal errors become `Protocol` errors.
async fn read_status<S>(stream: &mut S) -> TransportResult<()>
where
    S: AsyncBufRead + Unpin,
{
    let mut status = [0u8; 1];
    if stream.read(&mut status).await? == 0 {
        return Err(TransportError::protocol("peer closed the stream before acknowledging"));
    }
    match status[0] {
        STATUS_OK => Ok(()),
        STATUS_WARNING | STATUS_FATAL => {
            let mut message = Vec::new();
            stream.read_until(b'\n', &mut message).await?;
            Err(TransportError::protocol(String::from_utf8_lossy(&message).trim().to_string()))
        }
        other => Err(TransportError::protocol(format!("unexpected status byte {:#04x}", other))),
    }
}

/// Read the next record, or `None` at a clean end of stream.
async fn next_record<S>(stream: &mut S) -> TransportResult<Option<Record>>
where
    S: AsyncBufRead + Unpin,
{
    let lead = match stream.fill_buf().await?.first() {
        Some(&b) => b,
        None => return Ok(None),
    };
    let mut line = Vec::new();
    stream.read_until(b'\n', &mut line).await?;
    if lead == STATUS_WARNING || lead == STATUS_FATAL {
        return Err(TransportError::protocol(
            String::from_utf8_lossy(&line[1..]).trim().to_string(),
        ));
    }
    let text = String::from_utf8(line)
        .map_err(|_| TransportError::protocol("record line is not valid UTF-8"))?;
    Record::parse(&text).map(Some)
}

fn entry_name(path: &Path) -> TransportResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransportError::protocol(format!("{} has no file name", path.display())))
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
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

#[cfg(unix)]
async fn apply_mode(path: &Path, mode: u32) -> TransportResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn apply_mode(_path: &Path, _mode: u32) -> TransportResult<()> {
    Ok(())
}
