//! Engine state, statistics and cycle results.

use std::time::{Duration, Instant};
use syncvault_core::{ConflictMarker, MergeReport};
use syncvault_protocol::{DatabaseVersionKey, MultiChunkId};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle.
    Idle,
    /// Engine is opening a session with the remote.
    Connecting,
    /// Engine is downloading and merging remote database versions.
    Downloading,
    /// Engine is scanning and chunking the sync folder.
    Indexing,
    /// Engine is uploading multichunks and a database version.
    Uploading,
    /// Engine is removing unreferenced multichunks.
    CleaningUp,
    /// Engine has completed a cycle.
    Synced,
    /// The last cycle failed.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running. No other cycle may start then.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting
                | SyncState::Downloading
                | SyncState::Indexing
                | SyncState::Uploading
                | SyncState::CleaningUp
        )
    }
}

/// Cumulative statistics of one engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that finished without error.
    pub cycles_completed: u64,
    /// Remote database versions downloaded.
    pub database_versions_downloaded: u64,
    /// Own database versions uploaded.
    pub database_versions_published: u64,
    /// Multichunks uploaded.
    pub multichunks_uploaded: u64,
    /// Stored bytes uploaded in multichunks.
    pub bytes_uploaded: u64,
    /// Remote changes written into the sync folder.
    pub files_applied: u64,
    /// Conflicts reported by merges.
    pub conflicts_encountered: u64,
    /// Multichunks deleted by cleanup.
    pub multichunks_removed: u64,
    /// Completion time of the last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Message of the last error.
    pub last_error: Option<String>,
}

/// Outcome of downloading and merging.
#[derive(Debug, Clone, Default)]
pub struct DownResult {
    /// Database versions downloaded in this cycle.
    pub downloaded: usize,
    /// What the merge did with them.
    pub report: MergeReport,
    /// Remote versions written into the sync folder.
    pub files_written: usize,
    /// Entries removed from the sync folder.
    pub files_removed: usize,
}

impl DownResult {
    /// Conflicts created by this merge.
    #[must_use]
    pub fn conflicts(&self) -> &[ConflictMarker] {
        &self.report.conflicts
    }
}

/// Outcome of indexing and publishing local changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpResult {
    /// Database version published by this cycle.
    pub published: Option<DatabaseVersionKey>,
    /// File versions it records.
    pub file_versions: usize,
    /// Multichunks uploaded.
    pub multichunks_uploaded: usize,
    /// Stored bytes uploaded.
    pub bytes_uploaded: u64,
    /// Earlier database versions whose upload was retried successfully.
    pub republished: usize,
}

/// Result of a full cycle: down, then up.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Download phase.
    pub down: DownResult,
    /// Upload phase.
    pub up: UpResult,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    /// Multichunks deleted from the repository.
    pub removed: Vec<MultiChunkId>,
    /// Stored bytes freed.
    pub reclaimed_bytes: u64,
    /// Database version announcing the removal.
    pub published: Option<DatabaseVersionKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Connecting.is_active());
        assert!(SyncState::Downloading.is_active());
        assert!(SyncState::Indexing.is_active());
        assert!(SyncState::Uploading.is_active());
        assert!(SyncState::CleaningUp.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Synced.is_active());
        assert!(!SyncState::Error.is_active());
    }
}
