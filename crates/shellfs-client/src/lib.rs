//! Remote session transport for shellfs.
//!
//! The filesystem layer talks to the remote host only through
//! [`RemoteTransport`]: single-line command execution plus bulk transfer.
//!
//! | Implementation      | Backing                                        |
//! |---------------------|------------------------------------------------|
//! | [`SshTransport`]    | russh session, exec channels, remote `scp`     |
//! | [`MemoryTransport`] | in-process tree answering the same commands    |

pub mod constants;
pub mod error;
pub mod memory;
pub mod scp;
pub mod shell;
pub mod ssh;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use memory::MemoryTransport;
pub use ssh::{Credentials, SessionStatus, SshConfig, SshTransport};
pub use transport::{ExecOutput, FileTimes, RemoteTransport};
