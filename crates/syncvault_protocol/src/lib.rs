//! # SyncVault Protocol
//!
//! The shared data model and wire formats of a SyncVault repository.
//!
//! This crate defines:
//! - Identifiers (chunk, multichunk and file checksums, history ids, replica ids)
//! - [`VectorClock`] and its causal [`ClockOrdering`]
//! - [`FileVersion`], the unit of a file's history
//! - [`DatabaseVersion`], the per-replica commit unit exchanged through the repository
//! - The multichunk container body layout
//! - The repository marker ([`RepoManifest`])
//! - The common binary [envelope](envelope)
//!
//! ## Encoding
//!
//! Database versions and the repository marker are CBOR-encoded with
//! `ciborium`. Multichunk bodies use a fixed little-endian layout so chunk
//! data can be sliced without decoding. Every object is framed in an
//! envelope carrying a magic, a format version and flags.
//!
//! Encryption is applied outside this crate; the envelope only records
//! whether the payload is encrypted.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod database_version;
pub mod envelope;
mod error;
mod file_version;
mod ids;
pub mod multichunk;
mod repo;

pub use clock::{ClockOrdering, VectorClock};
pub use database_version::{
    ChunkRecord, DatabaseVersion, DatabaseVersionHeader, MultiChunkRecord, DATABASE_MAGIC,
};
pub use error::{ProtocolError, ProtocolResult};
pub use file_version::{FileMetadata, FileStatus, FileType, FileVersion};
pub use ids::{
    ChunkChecksum, DatabaseVersionKey, FileChecksum, FileHistoryId, MultiChunkId, ReplicaId,
    Timestamp, HASH_SIZE,
};
pub use repo::{EncryptionInfo, RepoManifest, REPO_MAGIC};

/// Current format version written into every envelope.
pub const FORMAT_VERSION: u16 = 1;
