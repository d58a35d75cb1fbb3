//! Filesystem constants.

/// Argument to `ls --time-style`.
pub const LS_TIME_STYLE: &str = "+%Y-%m-%d %H:%M:%S";

/// Timestamp format requested from `ls --time-style` and used to parse it.
pub const LS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whitespace fields in one `ls -ld` line once the echoed path is removed.
pub const LS_FIELD_COUNT: usize = 7;

/// Fields in a `getent passwd` record.
pub const PASSWD_FIELD_COUNT: usize = 7;

/// Fields in a `getent group` record.
pub const GROUP_FIELD_COUNT: usize = 4;

/// Default bound on cached attribute snapshots.
pub const DEFAULT_ATTR_CACHE_CAPACITY: usize = 1024;

/// Path separator and the single root directory.
pub const ROOT: &str = "/";

/// Remote table of mounts for the calling process.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Attribute views served by [`crate::FileAttributes`].
pub const SUPPORTED_VIEWS: [&str; 4] = ["basic", "posix", "unix", "owner"];
