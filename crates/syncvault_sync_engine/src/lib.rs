//! # SyncVault Sync Engine
//!
//! Sync cycles for one SyncVault replica.
//!
//! This crate provides:
//! - Sync folder ownership (lock file, persisted local state)
//! - Indexing: scanning, change detection, parallel chunking
//! - Publishing multichunks and database versions
//! - Downloading, merging and applying remote database versions
//! - Cleanup of unreferenced multichunks
//! - Restoring old or conflicting file versions
//!
//! ## Architecture
//!
//! The engine implements a **down-then-up** model:
//! 1. Download database versions the replica has not seen
//! 2. Merge them into the history and apply the result to the sync folder
//! 3. Index the sync folder and publish local changes as one database version
//!
//! Every remote call goes through a retrying transfer port, so any backend
//! implementing `TransferPort` can hold the repository.
//!
//! ## Key Invariants
//!
//! - Multichunks are uploaded before the database version referencing them
//! - A sealed database version is never lost: it stays queued until uploaded
//! - Local edits are never overwritten by remote versions
//! - Cleanup announces removals before deleting anything
//! - Only one engine owns a sync folder at a time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod dir;
mod engine;
mod error;
mod indexer;
mod local_state;
mod remote;
mod state;

pub use config::SyncConfig;
pub use dir::{SyncDir, META_DIR};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use indexer::{
    chunk_files, diff, inspect, scan, ChunkedFile, LocalChanges, RESTORE_TEMP_PREFIX,
};
pub use local_state::{LocalEntry, LocalState, LOCAL_STATE_MAGIC};
pub use state::{CleanupResult, DownResult, SyncCycleResult, SyncState, SyncStats, UpResult};
