//! Remote Linux filesystem over a shell session.
//!
//! Paths come from `shellfs-path`, commands and transfers go through a
//! `shellfs-client` transport, and this crate ties them together:
//!
//! | Module        | Role                                                  |
//! |---------------|-------------------------------------------------------|
//! | [`fs`]        | orchestrator: attributes, staging, streams, lookups   |
//! | [`cache`]     | bounded LRU of attribute snapshots, optional TTL      |
//! | [`attributes`]| `ls -ld` listing parser and snapshot type             |
//! | [`stream`]    | write-back stream, whole buffer uploaded per flush    |
//! | [`local_file`]| staged local copy committed back on close             |
//! | [`principal`] | user and group principals                             |
//! | [`mount`]     | mountinfo parsing                                     |
//! | [`matcher`]   | `glob:` and `regex:` path matchers                    |
//! | [`config`]    | TOML configuration                                    |
//!
//! Content is never synced incrementally: reads download whole files and
//! writes upload whole files.

pub mod attributes;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod fs;
pub mod local_file;
pub mod matcher;
pub mod mount;
pub mod principal;
pub mod stream;

pub use attributes::{FileAttributes, FileKind, PosixPermissions};
pub use cache::AttrCache;
pub use config::{AuthConfig, FsConfig};
pub use error::{FsError, FsResult};
pub use fs::RemoteFileSystem;
pub use local_file::{LocalFile, LocalFileWriter};
pub use matcher::PathMatcher;
pub use mount::MountEntry;
pub use principal::{Principal, PrincipalKind};
pub use shellfs_path::RemotePath;
pub use stream::RemoteOutputStream;
