//! Error types for remote archive access.
//!
//! Every fallible library operation returns [`Result<T>`]. The variants map
//! onto the ways a remote read can go wrong: the transport failed, the bytes
//! are not a valid ZIP structure, the archive uses a feature we do not
//! handle, a requested name is absent, or the caller cancelled.

use std::io;

/// Boxed error used as the source of [`Error::Network`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for rangezip operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure: connection, timeout, unexpected status.
    #[error("network error: {0}")]
    Network(#[source] BoxError),

    /// Structurally invalid archive data.
    #[error("invalid ZIP format: {0}")]
    Format(String),

    /// A recognized ZIP feature this crate does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// No entry with the requested name.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// The operation was cancelled through its token.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn network(err: impl Into<BoxError>) -> Self {
        Error::Network(err.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Format(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            Error::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            Error::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
            // Not Interrupted: std copy loops retry that kind forever.
            Error::Cancelled | Error::Network(_) => io::Error::other(err),
        }
    }
}
