//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding repository objects.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The object does not start with the expected magic.
    #[error("invalid magic: expected {expected:?}, found {found:?}")]
    InvalidMagic {
        /// Expected magic.
        expected: [u8; 4],
        /// Found bytes.
        found: Vec<u8>,
    },

    /// The object was written by an unsupported format version.
    #[error("unsupported format version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version found in the object.
        found: u16,
        /// Highest supported version.
        supported: u16,
    },

    /// The input ended before a complete structure was read.
    #[error("truncated {what}")]
    Truncated {
        /// What was being read.
        what: &'static str,
    },

    /// A replica id contains characters outside `[A-Za-z0-9_]` or is empty.
    #[error("invalid replica id: {0:?}")]
    InvalidReplicaId(String),

    /// A hex string is not a valid 32-byte hash.
    #[error("invalid hash: {0:?}")]
    InvalidHash(String),

    /// A database version violates a structural invariant.
    #[error("malformed database version {key}: {reason}")]
    Malformed {
        /// `replica/sequence` of the offending version.
        key: String,
        /// What is wrong.
        reason: String,
    },
}

impl ProtocolError {
    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }
}
