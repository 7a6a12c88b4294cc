//! Error types for the sync engine.

use syncvault_core::CoreError;
use syncvault_protocol::ProtocolError;
use syncvault_storage::TransferError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote store error.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// History, chunking, crypto or restore error.
    #[error(transparent)]
    Core(CoreError),

    /// Wire format error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// Another engine holds the sync folder.
    #[error("sync folder {path} is locked by another process")]
    Locked {
        /// Sync folder.
        path: String,
    },

    /// Another replica announced an action that excludes this one.
    #[error("repository is busy: replica {replica} is running {action}")]
    RepositoryBusy {
        /// Replica holding the marker.
        replica: String,
        /// Announced action.
        action: &'static str,
    },

    /// The repository's encryption setting does not match the configuration.
    #[error("repository mismatch: {message}")]
    RepositoryMismatch {
        /// What differs.
        message: String,
    },

    /// The local state file could not be read or written.
    #[error("local state error: {message}")]
    LocalState {
        /// What failed.
        message: String,
    },

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl SyncError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a local state error.
    pub fn local_state(message: impl Into<String>) -> Self {
        Self::LocalState {
            message: message.into(),
        }
    }

    /// Returns true if repeating the whole cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transfer(err) => {
                err.is_retryable() || matches!(err, TransferError::RetriesExhausted { .. })
            }
            SyncError::RepositoryBusy { .. } => true,
            _ => false,
        }
    }

    /// Returns true for corrupted or tampered repository data.
    pub fn is_integrity(&self) -> bool {
        matches!(self, SyncError::Core(err) if err.is_integrity())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Cancelled => SyncError::Cancelled,
            other => SyncError::Core(other),
        }
    }
}
