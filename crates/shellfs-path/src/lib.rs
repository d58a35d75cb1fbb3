//! POSIX path algebra for remote shellfs trees.
//!
//! This crate has **no I/O and no internal shellfs dependencies**. A pure
//! leaf crate. A [`RemotePath`] is an immutable byte string plus a table of
//! name offsets computed once at construction.
//!
//! # Semantics
//!
//! | Operation        | Behavior                                        |
//! |------------------|-------------------------------------------------|
//! | `normalize`      | drops `.`, cancels `name/..` until fixed point  |
//! | `resolve`        | absolute argument replaces, else joins with `/` |
//! | `relativize`     | `..` per unmatched base name, then the tail     |
//! | `starts_with`    | whole names only (`/ab` ∉ `/a`)                 |
//! | `Ord`            | unsigned byte compare, shorter-is-less          |
//!
//! Anything that needs the remote host (real paths, attribute-guided `..`
//! elimination) lives in `shellfs-core`.

mod error;
mod path;

pub use error::{PathError, PathResult};
pub use path::{Names, RemotePath, SEPARATOR};
