//! The merged, read-only view of all applied database versions.

use crate::chunk_store::{ChunkIndex, ChunkLocation};
use std::collections::{BTreeMap, HashSet};
use syncvault_protocol::{
    ChunkChecksum, DatabaseVersionKey, FileHistoryId, FileVersion, Timestamp, VectorClock,
};

/// Which kind of competition a conflict marker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Two concurrent versions of the same history with divergent content.
    /// The loser is kept as a conflicted entry and does not become head.
    SameHistory,
    /// Two different histories claimed the same path. The loser stays the
    /// head of its history under a conflicted-copy path.
    SamePath,
}

/// Record of a resolved conflict. Both variants stay restorable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    /// Kind of conflict.
    pub kind: ConflictKind,
    /// History of the losing version.
    pub history_id: FileHistoryId,
    /// Merged version number of the losing version.
    pub version: u64,
    /// Version number the losing replica recorded.
    pub recorded_version: u64,
    /// Path the losing replica recorded.
    pub path: String,
    /// Database version that carried the losing version.
    pub loser: DatabaseVersionKey,
    /// Database version that carried the winning version.
    pub winner: DatabaseVersionKey,
    /// History of the winning version.
    pub winner_history: FileHistoryId,
    /// Merged version number of the winning version.
    pub winner_version: u64,
}

/// A file version as placed in the merged history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedVersion {
    /// The version with its merged number and effective path.
    pub file: FileVersion,
    /// Number originally recorded by the authoring replica.
    pub recorded_version: u64,
    /// Database version that introduced it.
    pub origin: DatabaseVersionKey,
    /// Sealing time of that database version.
    pub timestamp: Timestamp,
    /// Set when this version lost a conflict.
    pub conflict: Option<ConflictMarker>,
}

impl MergedVersion {
    /// Returns true if this version lost a same-history conflict and is
    /// kept only for restore.
    #[must_use]
    pub fn is_conflict_copy(&self) -> bool {
        matches!(
            &self.conflict,
            Some(marker) if marker.kind == ConflictKind::SameHistory
        )
    }

    /// Version number in the merged history.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.file.version
    }
}

/// All merged versions of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHistory {
    id: FileHistoryId,
    versions: Vec<MergedVersion>,
    head: Option<usize>,
}

impl FileHistory {
    pub(crate) fn new(id: FileHistoryId) -> Self {
        Self {
            id,
            versions: Vec::new(),
            head: None,
        }
    }

    pub(crate) fn push(&mut self, version: MergedVersion) {
        let becomes_head = !version.is_conflict_copy();
        self.versions.push(version);
        if becomes_head {
            self.head = Some(self.versions.len() - 1);
        }
    }

    /// History id.
    #[must_use]
    pub fn id(&self) -> FileHistoryId {
        self.id
    }

    /// The current winning version.
    #[must_use]
    pub fn head(&self) -> Option<&MergedVersion> {
        self.head.map(|i| &self.versions[i])
    }

    /// Returns true if the head exists and is not a deletion.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.head().is_some_and(|h| !h.file.is_deleted())
    }

    /// Version with merged number `number`.
    #[must_use]
    pub fn version(&self, number: u64) -> Option<&MergedVersion> {
        self.versions
            .binary_search_by_key(&number, |v| v.file.version)
            .ok()
            .map(|i| &self.versions[i])
    }

    /// All versions in increasing number order, conflicted ones included.
    #[must_use]
    pub fn versions(&self) -> &[MergedVersion] {
        &self.versions
    }

    /// Highest version number, 0 for an empty history.
    #[must_use]
    pub fn last_number(&self) -> u64 {
        self.versions.last().map_or(0, |v| v.file.version)
    }
}

/// Why a database version is not applied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// It references chunks no known multichunk contains.
    MissingChunks(Vec<ChunkChecksum>),
    /// A version it depends on is unknown or itself deferred.
    MissingPredecessor,
    /// It violates a structural invariant.
    Malformed(String),
}

/// A database version held back from the merged view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    /// Key of the held-back version.
    pub key: DatabaseVersionKey,
    /// Why.
    pub reason: DeferReason,
}

/// Consistent snapshot of the merged history.
///
/// A pure function of the set of known database versions: every replica
/// holding the same set computes the same snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedHistory {
    pub(crate) histories: BTreeMap<FileHistoryId, FileHistory>,
    pub(crate) paths: BTreeMap<String, FileHistoryId>,
    pub(crate) index: ChunkIndex,
    pub(crate) clock: VectorClock,
    pub(crate) order: Vec<DatabaseVersionKey>,
    pub(crate) applied: HashSet<DatabaseVersionKey>,
    pub(crate) deferred: Vec<Deferred>,
    pub(crate) conflicts: Vec<ConflictMarker>,
}

impl MergedHistory {
    /// An empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// History with `id`.
    #[must_use]
    pub fn history(&self, id: &FileHistoryId) -> Option<&FileHistory> {
        self.histories.get(id)
    }

    /// All histories, deleted ones included.
    pub fn histories(&self) -> impl Iterator<Item = &FileHistory> {
        self.histories.values()
    }

    /// History whose live head sits at `path`.
    #[must_use]
    pub fn live_at(&self, path: &str) -> Option<&FileHistory> {
        self.paths.get(path).and_then(|id| self.histories.get(id))
    }

    /// Live heads keyed by path: the merged state of the sync folder.
    #[must_use]
    pub fn live_files(&self) -> BTreeMap<&str, &MergedVersion> {
        self.paths
            .iter()
            .filter_map(|(path, id)| {
                let head = self.histories.get(id)?.head()?;
                Some((path.as_str(), head))
            })
            .collect()
    }

    /// Index of stored chunks and multichunks.
    #[must_use]
    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// Where the chunk with `checksum` is stored.
    #[must_use]
    pub fn resolve_chunk(&self, checksum: &ChunkChecksum) -> Option<ChunkLocation> {
        self.index.get(checksum).copied()
    }

    /// Pointwise maximum of all applied clocks.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    /// Applied database versions in replay order.
    #[must_use]
    pub fn applied(&self) -> &[DatabaseVersionKey] {
        &self.order
    }

    /// Returns true if `key` is part of this snapshot.
    #[must_use]
    pub fn is_applied(&self, key: &DatabaseVersionKey) -> bool {
        self.applied.contains(key)
    }

    /// Database versions known but held back.
    #[must_use]
    pub fn deferred(&self) -> &[Deferred] {
        &self.deferred
    }

    /// Every conflict resolved during replay.
    #[must_use]
    pub fn conflicts(&self) -> &[ConflictMarker] {
        &self.conflicts
    }
}
