//! # SyncVault Core
//!
//! The versioned, content-addressed history of a SyncVault replica.
//!
//! This crate provides:
//! - Content-defined chunking ([`Chunker`])
//! - Deduplication and multichunk packing ([`ChunkStore`])
//! - Per-file version chains and database versions ([`HistoryModel`])
//! - Deterministic reconciliation of concurrent histories ([`rebuild`])
//! - Point-in-time restore ([`restore`])
//! - Detection of unreferenced multichunks ([`cleanup_candidates`])
//! - AES-256-GCM encryption of repository objects ([`CryptoManager`])
//!
//! ## Key Invariants
//!
//! - Identical bytes always produce identical chunks
//! - A sealed database version is immutable
//! - The merged history is a pure function of the known database versions
//! - Conflicting concurrent versions are kept, never dropped
//! - Restores never change history and never leave partial files
//!
//! No I/O towards the repository happens here; the sync engine moves bytes
//! through a transfer port and hands them to this crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod cancel;
mod chunk_store;
mod chunker;
mod cleanup;
mod config;
mod crypto;
mod error;
mod history;
mod reconcile;
mod restore;

pub use cache::MultiChunkCache;
pub use cancel::CancelFlag;
pub use chunk_store::{
    extract_chunk, open_multichunk, ChunkIndex, ChunkLocation, ChunkStore, SealedMultiChunk,
};
pub use chunker::{Chunk, ChunkRef, ChunkStream, Chunker};
pub use cleanup::{cleanup_candidates, reclaimable_bytes};
pub use config::{ChunkStoreConfig, ChunkerConfig};
pub use crypto::{
    generate_salt, CryptoManager, EncryptionKey, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use history::merged::{
    ConflictKind, ConflictMarker, DeferReason, Deferred, FileHistory, MergedHistory,
    MergedVersion,
};
pub use history::{HistoryModel, MergeReport};
pub use reconcile::{conflicted_copy_path, rebuild};
pub use restore::{
    restore, restore_version_to, select_version, MultiChunkFetcher, MultiChunkSource,
    RestoreRequest, RestoredFile,
};
