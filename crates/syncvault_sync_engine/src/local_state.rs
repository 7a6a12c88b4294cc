//! Persisted per-replica state.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use syncvault_protocol::{
    envelope, DatabaseVersion, DatabaseVersionKey, FileChecksum, FileMetadata, FileType,
    ReplicaId, Timestamp,
};

/// Envelope magic of the local state file.
pub const LOCAL_STATE_MAGIC: [u8; 4] = *b"SVLS";

/// Last synced state of one entry of the sync folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    /// Entry type.
    pub file_type: FileType,
    /// Size in bytes.
    pub size: u64,
    /// Modification time.
    pub modified: Timestamp,
    /// Unix permission bits.
    pub permissions: Option<u32>,
    /// Symlink target.
    pub link_target: Option<String>,
    /// Whole-file checksum of regular files.
    pub checksum: Option<FileChecksum>,
}

impl LocalEntry {
    /// Returns true if `other` describes the same on-disk state.
    ///
    /// Regular files compare by size and modification time, symlinks by
    /// target; folders only by type.
    #[must_use]
    pub fn unchanged(&self, other: &LocalEntry) -> bool {
        if self.file_type != other.file_type {
            return false;
        }
        match self.file_type {
            FileType::File => self.size == other.size && self.modified == other.modified,
            FileType::Folder => true,
            FileType::Symlink => self.link_target == other.link_target,
        }
    }

    /// Metadata for recording this entry as a file version.
    #[must_use]
    pub fn to_metadata(&self) -> FileMetadata {
        FileMetadata {
            file_type: self.file_type,
            size: self.size,
            modified: self.modified,
            permissions: self.permissions,
            link_target: self.link_target.clone(),
            checksum: self.checksum,
        }
    }
}

/// Everything a replica persists between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    /// Replica the state belongs to.
    pub replica: ReplicaId,
    /// Every known database version, own and downloaded.
    pub known: Vec<DatabaseVersion>,
    /// Own database versions sealed but not yet uploaded.
    pub pending_publish: Vec<DatabaseVersionKey>,
    /// Sync folder state as of the last cycle, keyed by relative path.
    pub index: BTreeMap<String, LocalEntry>,
}

impl LocalState {
    /// Empty state for `replica`.
    #[must_use]
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            known: Vec::new(),
            pending_publish: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// Encodes the state.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalState`] if serialization fails.
    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        let mut payload = Vec::new();
        ciborium::into_writer(self, &mut payload)
            .map_err(|e| SyncError::local_state(format!("encode: {e}")))?;
        Ok(envelope::seal(&LOCAL_STATE_MAGIC, 0, &payload))
    }

    /// Decodes a state file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalState`] for a bad envelope or payload.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        let env = envelope::open(&LOCAL_STATE_MAGIC, bytes)
            .map_err(|e| SyncError::local_state(e.to_string()))?;
        ciborium::from_reader(env.payload)
            .map_err(|e| SyncError::local_state(format!("decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: u64, modified: u64) -> LocalEntry {
        LocalEntry {
            file_type: FileType::File,
            size,
            modified: Timestamp::from_millis(modified),
            permissions: Some(0o644),
            link_target: None,
            checksum: None,
        }
    }

    #[test]
    fn change_detection() {
        assert!(entry(3, 10).unchanged(&entry(3, 10)));
        assert!(!entry(3, 10).unchanged(&entry(4, 10)));
        assert!(!entry(3, 10).unchanged(&entry(3, 11)));

        let folder = LocalEntry {
            file_type: FileType::Folder,
            ..entry(0, 1)
        };
        let touched = LocalEntry {
            modified: Timestamp::from_millis(99),
            ..folder.clone()
        };
        assert!(folder.unchanged(&touched));
        assert!(!folder.unchanged(&entry(0, 1)));
    }

    #[test]
    fn encoded_state_decodes() {
        let mut state = LocalState::new(ReplicaId::new("desk").unwrap());
        state.index.insert("a/b.txt".into(), entry(5, 42));
        state
            .pending_publish
            .push(DatabaseVersionKey::new(ReplicaId::new("desk").unwrap(), 3));

        let decoded = LocalState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn rejects_foreign_files() {
        let framed = envelope::seal(b"SVDB", 0, b"");
        assert!(matches!(
            LocalState::decode(&framed),
            Err(SyncError::LocalState { .. })
        ));
    }
}
