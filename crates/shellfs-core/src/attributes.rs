//! POSIX attribute snapshots parsed from `ls -ld` listings.

use std::fmt;
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::constants::{LS_FIELD_COUNT, LS_TIME_FORMAT};
use crate::error::{FsError, FsResult};

/// The nine POSIX permission bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PosixPermissions(u16);

impl PosixPermissions {
    pub const OWNER_READ: u32 = 0o400;
    pub const OWNER_WRITE: u32 = 0o200;
    pub const OWNER_EXECUTE: u32 = 0o100;
    pub const GROUP_READ: u32 = 0o040;
    pub const GROUP_WRITE: u32 = 0o020;
    pub const GROUP_EXECUTE: u32 = 0o010;
    pub const OTHERS_READ: u32 = 0o004;
    pub const OTHERS_WRITE: u32 = 0o002;
    pub const OTHERS_EXECUTE: u32 = 0o001;

    /// Keep only the permission bits of `mode`.
    pub fn from_mode(mode: u32) -> Self {
        Self((mode & 0o777) as u16)
    }

    pub fn mode(self) -> u32 {
        u32::from(self.0)
    }

    pub fn contains(self, bits: u32) -> bool {
        self.mode() & bits == bits
    }

    /// Parse the nine permission characters of an `ls` mode string
    /// (`rwxr-x---`). Set-id and sticky markers in lower case imply execute.
    pub fn parse(symbolic: &str) -> Option<Self> {
        let bytes = symbolic.as_bytes();
        if bytes.len() != 9 {
            return None;
        }
        let mut mode = 0u32;
        for (i, &b) in bytes.iter().enumerate() {
            let bit = 1u32 << (8 - i);
            let set = match i % 3 {
                0 => b == b'r',
                1 => b == b'w',
                _ => matches!(b, b'x' | b's' | b't'),
            };
            if set {
                mode |= bit;
            }
        }
        Some(Self::from_mode(mode))
    }
}

impl fmt::Display for PosixPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SYMBOLS: [char; 3] = ['r', 'w', 'x'];
        let mode = self.mode();
        for i in 0..9 {
            let set = mode & (1 << (8 - i)) != 0;
            f.write_fmt(format_args!("{}", if set { SYMBOLS[i % 3] } else { '-' }))?;
        }
        Ok(())
    }
}

/// Entry type from the first character of an `ls` mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    /// Devices, sockets, fifos.
    Other,
}

impl FileKind {
    fn from_type_char(c: u8) -> Self {
        match c {
            b'-' => FileKind::Regular,
            b'd' => FileKind::Directory,
            b'l' => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }
}

/// Immutable attribute snapshot of one remote path.
///
/// Symbolic links are reported as links, not followed. There is no creation
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    kind: FileKind,
    size: u64,
    owner: String,
    group: String,
    permissions: PosixPermissions,
    last_modified: SystemTime,
    last_access: SystemTime,
}

impl FileAttributes {
    /// Build a snapshot from the modify-time and access-time listings of
    /// `path` (`ls -ld` and `ls -ldu`).
    pub fn from_listings(modified: Listing<'_>, accessed: Listing<'_>) -> FsResult<Self> {
        let perm = modified.fields[0].as_bytes();
        if perm.len() != 10 {
            return Err(modified.error(format!("mode string {:?}", modified.fields[0])));
        }
        let permissions = std::str::from_utf8(&perm[1..])
            .ok()
            .and_then(PosixPermissions::parse)
            .ok_or_else(|| modified.error(format!("mode string {:?}", modified.fields[0])))?;
        let size = modified.fields[4]
            .parse()
            .map_err(|_| modified.error(format!("size {:?}", modified.fields[4])))?;

        Ok(Self {
            kind: FileKind::from_type_char(perm[0]),
            size,
            owner: modified.fields[2].to_string(),
            group: modified.fields[3].to_string(),
            permissions,
            last_modified: modified.timestamp()?,
            last_access: accessed.timestamp()?,
        })
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_regular_file(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    pub fn is_other(&self) -> bool {
        self.kind == FileKind::Other
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn permissions(&self) -> PosixPermissions {
        self.permissions
    }

    pub fn last_modified_time(&self) -> SystemTime {
        self.last_modified
    }

    pub fn last_access_time(&self) -> SystemTime {
        self.last_access
    }

    /// Always `None`: remote listings do not report a creation time.
    pub fn creation_time(&self) -> Option<SystemTime> {
        None
    }
}

/// The seven fields of one `ls -ld` line, with the echoed path removed:
/// `<mode> <links> <owner> <group> <size> <date> <time>`.
#[derive(Debug, Clone)]
pub struct Listing<'a> {
    command: &'a str,
    fields: Vec<&'a str>,
}

impl<'a> Listing<'a> {
    /// Split the output of `command` for `path` into its fields.
    ///
    /// Anything other than exactly seven fields is a format error.
    pub fn parse(command: &'a str, output: &'a str, path: &str) -> FsResult<Self> {
        let line = output.lines().next().unwrap_or_default();
        let fields: Vec<&str> = strip_echoed_path(line, path).split_whitespace().collect();
        if fields.len() != LS_FIELD_COUNT {
            return Err(FsError::format(
                command,
                format!("expected {} fields, got {}: {:?}", LS_FIELD_COUNT, fields.len(), line),
            ));
        }
        Ok(Self { command, fields })
    }

    fn timestamp(&self) -> FsResult<SystemTime> {
        let text = format!("{} {}", self.fields[5], self.fields[6]);
        let naive = NaiveDateTime::parse_from_str(&text, LS_TIME_FORMAT)
            .map_err(|e| self.error(format!("timestamp {:?}: {}", text, e)))?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(SystemTime::from)
            .ok_or_else(|| self.error(format!("timestamp {:?} does not exist locally", text)))
    }

    fn error(&self, detail: String) -> FsError {
        FsError::format(self.command, detail)
    }
}

/// Remove ` <path>` and any ` -> <target>` from the end of a listing line.
fn strip_echoed_path<'l>(line: &'l str, path: &str) -> &'l str {
    let needle = format!(" {}", path);
    for (idx, _) in line.match_indices(&needle) {
        let rest = &line[idx + needle.len()..];
        if rest.is_empty() || rest.starts_with(" -> ") {
            return &line[..idx];
        }
    }
    line
}
