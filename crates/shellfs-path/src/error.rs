//! Path algebra error types.

use thiserror::Error;

/// Failures of pure path operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// Paths of incompatible classes were combined (e.g. relativizing an
    /// absolute path against a relative one).
    #[error("path type mismatch: {0}")]
    TypeMismatch(String),

    /// An index or range argument was out of bounds.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
}

impl PathError {
    /// Create a TypeMismatch error.
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    /// Create an IllegalArgument error.
    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }
}

/// Path algebra result type.
pub type PathResult<T> = Result<T, PathError>;
