//! Database versions, the unit of exchange between replicas.

use crate::clock::VectorClock;
use crate::error::{ProtocolError, ProtocolResult};
use crate::file_version::{FileStatus, FileType, FileVersion};
use crate::ids::{ChunkChecksum, DatabaseVersionKey, MultiChunkId, ReplicaId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Envelope magic for database version deltas.
pub const DATABASE_MAGIC: [u8; 4] = *b"SVDB";

/// Identity and causal position of a database version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseVersionHeader {
    /// Authoring replica.
    pub replica: ReplicaId,
    /// Sequence within the authoring replica, starting at 1.
    pub sequence: u64,
    /// Causal snapshot. `clock[replica] == sequence`.
    pub clock: VectorClock,
    /// Wall-clock time of sealing, monotonic per replica.
    pub timestamp: Timestamp,
}

/// Location of a newly introduced chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk checksum.
    pub checksum: ChunkChecksum,
    /// Chunk length in bytes.
    pub length: u32,
    /// Containing multichunk.
    pub multichunk: MultiChunkId,
    /// Offset of the chunk within the multichunk's data section.
    pub offset: u64,
}

/// A newly introduced multichunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiChunkRecord {
    /// Multichunk id.
    pub id: MultiChunkId,
    /// Size of the uploaded object in bytes.
    pub stored_size: u64,
    /// Number of chunks packed into it.
    pub chunk_count: u32,
}

/// A per-replica commit: the file versions, chunks and multichunks one
/// replica introduced in one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseVersion {
    /// Identity and causal position.
    pub header: DatabaseVersionHeader,
    /// File versions appended by this commit.
    pub file_versions: Vec<FileVersion>,
    /// Chunks introduced by this commit.
    pub chunks: Vec<ChunkRecord>,
    /// Multichunks introduced by this commit.
    pub multichunks: Vec<MultiChunkRecord>,
    /// Multichunks deleted by a cleanup pass.
    pub removed_multichunks: Vec<MultiChunkId>,
}

impl DatabaseVersion {
    /// The `(replica, sequence)` key.
    #[must_use]
    pub fn key(&self) -> DatabaseVersionKey {
        DatabaseVersionKey::new(self.header.replica.clone(), self.header.sequence)
    }

    /// Authoring replica.
    #[must_use]
    pub fn replica(&self) -> &ReplicaId {
        &self.header.replica
    }

    /// Sequence within the authoring replica.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.header.sequence
    }

    /// Causal snapshot.
    #[must_use]
    pub fn clock(&self) -> &VectorClock {
        &self.header.clock
    }

    /// Sealing time.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        self.header.timestamp
    }

    /// Returns true if the commit carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_versions.is_empty()
            && self.chunks.is_empty()
            && self.multichunks.is_empty()
            && self.removed_multichunks.is_empty()
    }

    /// Checks invariants that need no outside context.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] naming the first violation.
    pub fn validate(&self) -> ProtocolResult<()> {
        let malformed = |reason: String| ProtocolError::Malformed {
            key: self.key().to_string(),
            reason,
        };

        if self.header.sequence == 0 {
            return Err(malformed("sequence must start at 1".into()));
        }
        let own = self.header.clock.get(&self.header.replica);
        if own != self.header.sequence {
            return Err(malformed(format!(
                "clock entry {own} does not match sequence {}",
                self.header.sequence
            )));
        }

        let introduced: HashSet<MultiChunkId> = self.multichunks.iter().map(|m| m.id).collect();
        for chunk in &self.chunks {
            if !introduced.contains(&chunk.multichunk) {
                return Err(malformed(format!(
                    "chunk {} points at unknown multichunk {}",
                    chunk.checksum, chunk.multichunk
                )));
            }
        }

        let mut seen = HashSet::new();
        for fv in &self.file_versions {
            if fv.version == 0 {
                return Err(malformed(format!("{}: version 0", fv.path)));
            }
            if !seen.insert((fv.history_id, fv.version)) {
                return Err(malformed(format!(
                    "history {} version {} recorded twice",
                    fv.history_id, fv.version
                )));
            }
            if !valid_relative_path(&fv.path) {
                return Err(malformed(format!("invalid path {:?}", fv.path)));
            }
            let carries_chunks = fv.file_type == FileType::File && fv.status != FileStatus::Deleted;
            if !carries_chunks && !fv.chunks.is_empty() {
                return Err(malformed(format!("{}: unexpected content chunks", fv.path)));
            }
        }
        Ok(())
    }

    /// CBOR payload without envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_cbor(&self) -> ProtocolResult<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::into_writer(self, &mut out).map_err(|e| ProtocolError::encode(e.to_string()))?;
        Ok(out)
    }

    /// Decodes a CBOR payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid encoding.
    pub fn from_cbor(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::decode(e.to_string()))
    }
}

/// Relative, `/`-separated, no empty, `.` or `..` components.
fn valid_relative_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}
