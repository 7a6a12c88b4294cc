//! Error types for transfer operations.

use std::io;
use thiserror::Error;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors that can occur while talking to a remote store.
#[derive(Debug, Error)]
pub enum TransferError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection to the remote could not be established or was lost.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A remote operation timed out.
    #[error("{operation} timed out")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The requested remote file does not exist.
    #[error("remote file not found: {remote}")]
    NotFound {
        /// Remote path of the missing file.
        remote: String,
    },

    /// The remote location is not an initialized repository.
    #[error("no repository at {location}")]
    RepositoryMissing {
        /// Location description.
        location: String,
    },

    /// A remote file name does not match its kind's naming pattern.
    #[error("invalid {kind} file name: {name:?}")]
    InvalidName {
        /// Kind the name was parsed as.
        kind: &'static str,
        /// The offending name.
        name: String,
    },

    /// The operation was attempted on a disconnected port that cannot
    /// reconnect on its own.
    #[error("not connected to remote")]
    NotConnected,

    /// All retry attempts failed.
    #[error("{operation} of {remote} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// The operation that was retried.
        operation: &'static str,
        /// Remote file involved, if any.
        remote: String,
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the last attempt.
        #[source]
        last: Box<TransferError>,
    },
}

impl TransferError {
    /// Creates a retryable connection error.
    pub fn connection_retryable(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable connection error.
    pub fn connection_fatal(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a not-found error for a remote path.
    pub fn not_found(remote: impl Into<String>) -> Self {
        Self::NotFound {
            remote: remote.into(),
        }
    }

    /// Returns true if this error is transient and the operation can be
    /// retried after reconnecting.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::ConnectionFailed { retryable, .. } => *retryable,
            TransferError::Timeout { .. } | TransferError::NotConnected => true,
            TransferError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
