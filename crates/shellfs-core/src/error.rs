//! Filesystem error types.

use std::io;

use shellfs_client::TransportError;
use shellfs_path::PathError;
use thiserror::Error;

/// Filesystem error type.
#[derive(Debug, Error)]
pub enum FsError {
    /// Connection or root parameters are unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Remote path does not exist.
    #[error("no such file or directory: {path}")]
    NotFound { path: String },

    /// User or group name could not be resolved.
    #[error("principal not found: {name}")]
    PrincipalNotFound { name: String },

    /// A remote command produced output of an unexpected shape.
    #[error("unexpected output from `{context}`: {detail}")]
    Format { context: String, detail: String },

    /// A remote command ran but reported failure.
    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a PrincipalNotFound error.
    pub fn principal_not_found(name: impl Into<String>) -> Self {
        Self::PrincipalNotFound { name: name.into() }
    }

    /// Create a Format error.
    pub fn format(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Format {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Create a Command error.
    pub fn command(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            detail: detail.into(),
        }
    }

    /// Create an IllegalArgument error.
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }
}

impl From<PathError> for FsError {
    fn from(e: PathError) -> Self {
        match e {
            PathError::TypeMismatch(msg) => FsError::TypeMismatch(msg),
            PathError::IllegalArgument(msg) => FsError::IllegalArgument(msg),
        }
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Configuration(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::NotFound { path } => io::Error::new(io::ErrorKind::NotFound, path),
            FsError::PrincipalNotFound { name } => io::Error::new(io::ErrorKind::NotFound, name),
            e @ FsError::Format { .. } => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            e @ FsError::Command { .. } => io::Error::other(e.to_string()),
            FsError::Transport(TransportError::Io(e)) => e,
            FsError::Transport(e) => {
                io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
            }
            FsError::TypeMismatch(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::IllegalArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::Io(e) => e,
        }
    }
}

/// Filesystem result type.
pub type FsResult<T> = Result<T, FsError>;
