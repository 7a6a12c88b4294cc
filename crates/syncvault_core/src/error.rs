//! Error types for SyncVault core.

use std::io;
use syncvault_protocol::{ChunkChecksum, FileHistoryId, MultiChunkId, ProtocolError, Timestamp};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SyncVault core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding a repository object failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// No database version is open for recording.
    #[error("no open database version: the last one was sealed")]
    DatabaseVersionSealed,

    /// A database version is already open.
    #[error("a database version is already open")]
    DatabaseVersionOpen,

    /// Two database versions share a key but differ in content.
    #[error("database version {key} was received with different content")]
    DivergentDatabaseVersion {
        /// `replica/sequence` of the version.
        key: String,
    },

    /// No live file exists at the path.
    #[error("no file at {path}")]
    PathNotFound {
        /// Relative path.
        path: String,
    },

    /// Chunk lengths do not add up to the recorded file size.
    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Relative path.
        path: String,
        /// Recorded size.
        expected: u64,
        /// Sum of chunk lengths or reconstructed size.
        actual: u64,
    },

    /// A version references a chunk that no multichunk contains.
    #[error("chunk {chunk} referenced by {path} is not stored in any multichunk")]
    UnresolvedChunk {
        /// Chunk checksum.
        chunk: ChunkChecksum,
        /// Referencing path.
        path: String,
    },

    /// A chunk's bytes do not hash to its checksum.
    #[error("chunk {chunk} in multichunk {multichunk} is corrupted")]
    ChecksumMismatch {
        /// Expected chunk checksum.
        chunk: ChunkChecksum,
        /// Containing multichunk.
        multichunk: MultiChunkId,
    },

    /// A reconstructed file does not match its recorded checksum.
    #[error("restored content of {path} does not match its checksum")]
    FileChecksumMismatch {
        /// Relative path.
        path: String,
    },

    /// A multichunk failed to decrypt, parse or verify.
    #[error("multichunk {multichunk} is corrupted: {reason}")]
    MultiChunkCorrupted {
        /// Multichunk id.
        multichunk: MultiChunkId,
        /// What failed.
        reason: String,
    },

    /// A multichunk could not be obtained from its source.
    #[error("failed to fetch multichunk {multichunk}: {source}")]
    MultiChunkFetch {
        /// Multichunk id.
        multichunk: MultiChunkId,
        /// Underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Encrypted content was found but no key is configured.
    #[error("{what} is encrypted but no key is configured")]
    EncryptionRequired {
        /// Object description.
        what: String,
    },

    /// Encryption failed.
    #[error("encryption failed: {message}")]
    EncryptionFailed {
        /// Description of the failure.
        message: String,
    },

    /// Decryption failed (wrong key or tampered data).
    #[error("decryption of {what} failed")]
    DecryptionFailed {
        /// Object description.
        what: String,
    },

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {message}")]
    KeyDerivationFailed {
        /// Description of the failure.
        message: String,
    },

    /// Unknown file history.
    #[error("file history {history} not found")]
    FileHistoryNotFound {
        /// History id.
        history: FileHistoryId,
    },

    /// The history has no such version.
    #[error("file history {history} has no version {version}")]
    VersionNotFound {
        /// History id.
        history: FileHistoryId,
        /// Requested version.
        version: u64,
    },

    /// No restorable version exists before the instant.
    #[error("file history {history} has no version before {before}")]
    NoVersionBefore {
        /// History id.
        history: FileHistoryId,
        /// Requested instant.
        before: Timestamp,
    },

    /// The selected version is a deletion.
    #[error("version {version} of file history {history} is a deletion")]
    NothingToRestore {
        /// History id.
        history: FileHistoryId,
        /// Selected version.
        version: u64,
    },

    /// The restore request is ambiguous or its target is invalid.
    #[error("invalid restore request: {message}")]
    InvalidRestoreRequest {
        /// What is wrong.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid restore request error.
    pub fn invalid_restore(message: impl Into<String>) -> Self {
        Self::InvalidRestoreRequest {
            message: message.into(),
        }
    }

    /// Creates a multichunk corruption error.
    pub fn corrupted(multichunk: MultiChunkId, reason: impl Into<String>) -> Self {
        Self::MultiChunkCorrupted {
            multichunk,
            reason: reason.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption_failed(message: impl Into<String>) -> Self {
        Self::EncryptionFailed {
            message: message.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption_failed(what: impl Into<String>) -> Self {
        Self::DecryptionFailed { what: what.into() }
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a key derivation failed error.
    pub fn key_derivation_failed(message: impl Into<String>) -> Self {
        Self::KeyDerivationFailed {
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate corrupted or tampered data.
    ///
    /// Integrity errors are never retried.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            CoreError::ChecksumMismatch { .. }
                | CoreError::FileChecksumMismatch { .. }
                | CoreError::MultiChunkCorrupted { .. }
                | CoreError::SizeMismatch { .. }
                | CoreError::DecryptionFailed { .. }
        )
    }
}
