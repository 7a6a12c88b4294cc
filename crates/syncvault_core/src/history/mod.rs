//! File histories and database versions.
//!
//! A [`HistoryModel`] owns every database version this replica knows about,
//! its own and those downloaded from other replicas, together with the
//! merged snapshot computed from them. Local changes are recorded into one
//! open batch at a time; sealing the batch produces the next database
//! version of this replica.
//!
//! The model itself is not locked. The sync engine serializes writers
//! behind a mutex, while readers work on [`HistoryModel::snapshot`].

pub mod merged;

use crate::chunk_store::SealedMultiChunk;
use crate::chunker::ChunkRef;
use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::reconcile;
use merged::{ConflictMarker, Deferred, MergedHistory};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use syncvault_protocol::{
    envelope, ChunkRecord, DatabaseVersion, DatabaseVersionHeader, DatabaseVersionKey,
    FileHistoryId, FileMetadata, FileStatus, FileType, FileVersion, MultiChunkId,
    MultiChunkRecord, ProtocolError, ReplicaId, Timestamp, DATABASE_MAGIC,
};
use tracing::{debug, info, warn};

/// Outcome of [`HistoryModel::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Database versions that became part of the merged history, including
    /// previously deferred ones that could now be applied.
    pub applied: Vec<DatabaseVersionKey>,
    /// Inputs that were already known.
    pub duplicates: usize,
    /// Everything still held back after the merge.
    pub deferred: Vec<Deferred>,
    /// Conflicts that did not exist before the merge.
    pub conflicts: Vec<ConflictMarker>,
}

/// Changes collected for the next local database version.
#[derive(Debug, Default)]
struct OpenBatch {
    file_versions: Vec<FileVersion>,
    chunks: Vec<ChunkRecord>,
    multichunks: Vec<MultiChunkRecord>,
    removed_multichunks: Vec<MultiChunkId>,
    /// Path state after the batch so far. `None` marks a path vacated in
    /// this batch.
    paths: HashMap<String, Option<FileHistoryId>>,
    /// Last version number used per history in this batch.
    numbers: HashMap<FileHistoryId, u64>,
}

impl OpenBatch {
    fn is_empty(&self) -> bool {
        self.file_versions.is_empty()
            && self.multichunks.is_empty()
            && self.removed_multichunks.is_empty()
    }
}

/// History store of one replica.
#[derive(Debug)]
pub struct HistoryModel {
    replica: ReplicaId,
    known: BTreeMap<DatabaseVersionKey, Arc<DatabaseVersion>>,
    merged: Arc<MergedHistory>,
    open: Option<OpenBatch>,
}

impl HistoryModel {
    /// Creates an empty model for `replica`.
    #[must_use]
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            known: BTreeMap::new(),
            merged: Arc::new(MergedHistory::new()),
            open: None,
        }
    }

    /// Restores a model from previously known database versions.
    pub fn from_known(
        replica: ReplicaId,
        versions: impl IntoIterator<Item = DatabaseVersion>,
    ) -> Self {
        let known = versions
            .into_iter()
            .map(|dv| (dv.key(), Arc::new(dv)))
            .collect();
        let mut model = Self {
            replica,
            known,
            merged: Arc::new(MergedHistory::new()),
            open: None,
        };
        model.rebuild();
        model
    }

    /// This replica's id.
    #[must_use]
    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// Consistent read view of the merged history.
    #[must_use]
    pub fn snapshot(&self) -> Arc<MergedHistory> {
        Arc::clone(&self.merged)
    }

    /// Every known database version in key order.
    pub fn known_versions(&self) -> impl Iterator<Item = &Arc<DatabaseVersion>> {
        self.known.values()
    }

    /// Known database version with `key`.
    #[must_use]
    pub fn get(&self, key: &DatabaseVersionKey) -> Option<&Arc<DatabaseVersion>> {
        self.known.get(key)
    }

    /// Returns true if the database version with `key` is known.
    #[must_use]
    pub fn contains(&self, key: &DatabaseVersionKey) -> bool {
        self.known.contains_key(key)
    }

    /// Highest sequence sealed by this replica, 0 if none.
    #[must_use]
    pub fn last_local_sequence(&self) -> u64 {
        self.last_local().map_or(0, |dv| dv.sequence())
    }

    fn last_local(&self) -> Option<&Arc<DatabaseVersion>> {
        let from = DatabaseVersionKey::new(self.replica.clone(), 0);
        let to = DatabaseVersionKey::new(self.replica.clone(), u64::MAX);
        self.known.range(from..=to).next_back().map(|(_, dv)| dv)
    }

    /// Opens a batch for local changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseVersionOpen`] if a batch is already open.
    pub fn begin_database_version(&mut self) -> CoreResult<()> {
        if self.open.is_some() {
            return Err(CoreError::DatabaseVersionOpen);
        }
        self.open = Some(OpenBatch::default());
        Ok(())
    }

    /// Returns true while a batch is open.
    #[must_use]
    pub fn has_open(&self) -> bool {
        self.open.is_some()
    }

    /// Returns true if the open batch holds anything to seal.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.open.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Discards the open batch, if any.
    pub fn abort_database_version(&mut self) {
        if let Some(batch) = self.open.take() {
            debug!(
                replica = %self.replica,
                versions = batch.file_versions.len(),
                "aborted database version"
            );
        }
    }

    /// Records the current state of the entry at `path`.
    ///
    /// Continues the history currently at `path` or starts a new one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseVersionSealed`] without an open batch and
    /// [`CoreError::SizeMismatch`] if the chunk lengths of a regular file do
    /// not add up to its size.
    pub fn record_version(
        &mut self,
        path: &str,
        metadata: FileMetadata,
        chunks: &[ChunkRef],
    ) -> CoreResult<FileVersion> {
        let batch = self.open.as_mut().ok_or(CoreError::DatabaseVersionSealed)?;
        let existing = live_history(batch, &self.merged, path);
        let (id, status) = match existing {
            Some(id) => (id, FileStatus::Changed),
            None => (FileHistoryId::generate(), FileStatus::New),
        };
        let fv = build_version(batch, &self.merged, id, path, status, metadata, chunks)?;
        batch.paths.insert(path.to_string(), Some(id));
        batch.file_versions.push(fv.clone());
        Ok(fv)
    }

    /// Records that the entry at `path` was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PathNotFound`] if nothing is live at `path` and
    /// [`CoreError::DatabaseVersionSealed`] without an open batch.
    pub fn record_deletion(&mut self, path: &str) -> CoreResult<FileVersion> {
        let batch = self.open.as_mut().ok_or(CoreError::DatabaseVersionSealed)?;
        let id = live_history(batch, &self.merged, path).ok_or_else(|| {
            CoreError::PathNotFound {
                path: path.to_string(),
            }
        })?;
        let file_type =
            last_version(batch, &self.merged, &id).map_or(FileType::File, |v| v.file_type);
        let metadata = FileMetadata {
            file_type,
            size: 0,
            modified: Timestamp::now(),
            permissions: None,
            link_target: None,
            checksum: None,
        };
        let fv = build_version(batch, &self.merged, id, path, FileStatus::Deleted, metadata, &[])?;
        batch.paths.insert(path.to_string(), None);
        batch.file_versions.push(fv.clone());
        Ok(fv)
    }

    /// Records that the entry at `from` now lives at `to`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PathNotFound`] if nothing is live at `from`, plus
    /// the errors of [`record_version`](Self::record_version).
    pub fn record_move(
        &mut self,
        from: &str,
        to: &str,
        metadata: FileMetadata,
        chunks: &[ChunkRef],
    ) -> CoreResult<FileVersion> {
        let batch = self.open.as_mut().ok_or(CoreError::DatabaseVersionSealed)?;
        let id = live_history(batch, &self.merged, from).ok_or_else(|| {
            CoreError::PathNotFound {
                path: from.to_string(),
            }
        })?;
        let fv = build_version(batch, &self.merged, id, to, FileStatus::Renamed, metadata, chunks)?;
        batch.paths.insert(from.to_string(), None);
        batch.paths.insert(to.to_string(), Some(id));
        batch.file_versions.push(fv.clone());
        Ok(fv)
    }

    /// Records a sealed multichunk and the chunks it holds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseVersionSealed`] without an open batch.
    pub fn register_multichunk(&mut self, multichunk: &SealedMultiChunk) -> CoreResult<()> {
        let batch = self.open.as_mut().ok_or(CoreError::DatabaseVersionSealed)?;
        batch.multichunks.push(multichunk.record);
        batch.chunks.extend_from_slice(&multichunk.chunks);
        Ok(())
    }

    /// Records multichunks removed from the repository by cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseVersionSealed`] without an open batch.
    pub fn record_multichunk_removal(
        &mut self,
        ids: impl IntoIterator<Item = MultiChunkId>,
    ) -> CoreResult<()> {
        let batch = self.open.as_mut().ok_or(CoreError::DatabaseVersionSealed)?;
        batch.removed_multichunks.extend(ids);
        Ok(())
    }

    /// Seals the open batch into the next local database version and merges
    /// it.
    ///
    /// The batch is consumed even when sealing fails.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseVersionSealed`] without an open batch and
    /// [`CoreError::UnresolvedChunk`] if a recorded version references a
    /// chunk stored in no known or registered multichunk.
    pub fn seal_database_version(&mut self) -> CoreResult<Arc<DatabaseVersion>> {
        let batch = self.open.take().ok_or(CoreError::DatabaseVersionSealed)?;

        let registered: HashSet<_> = batch.chunks.iter().map(|c| c.checksum).collect();
        for fv in &batch.file_versions {
            for chunk in &fv.chunks {
                if !registered.contains(chunk) && !self.merged.index().contains(chunk) {
                    return Err(CoreError::UnresolvedChunk {
                        chunk: *chunk,
                        path: fv.path.clone(),
                    });
                }
            }
        }

        let sequence = self.last_local_sequence() + 1;
        let mut clock = self.merged.clock().clone();
        clock.set(self.replica.clone(), sequence);
        let floor = self
            .last_local()
            .map_or(0, |dv| dv.timestamp().as_millis() + 1);
        let timestamp = Timestamp::from_millis(Timestamp::now().as_millis().max(floor));

        let dv = DatabaseVersion {
            header: DatabaseVersionHeader {
                replica: self.replica.clone(),
                sequence,
                clock,
                timestamp,
            },
            file_versions: batch.file_versions,
            chunks: batch.chunks,
            multichunks: batch.multichunks,
            removed_multichunks: batch.removed_multichunks,
        };
        dv.validate()?;

        let dv = Arc::new(dv);
        let key = dv.key();
        self.known.insert(key.clone(), Arc::clone(&dv));
        self.rebuild();
        if !self.merged.is_applied(&key) {
            warn!(key = %key, "sealed database version is deferred");
        }
        info!(
            key = %key,
            versions = dv.file_versions.len(),
            multichunks = dv.multichunks.len(),
            "sealed database version"
        );
        Ok(dv)
    }

    /// Adds database versions received from the repository.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DivergentDatabaseVersion`] if an input reuses a
    /// known key with different content. Nothing is merged in that case.
    pub fn merge(&mut self, versions: Vec<DatabaseVersion>) -> CoreResult<MergeReport> {
        let mut fresh: BTreeMap<DatabaseVersionKey, DatabaseVersion> = BTreeMap::new();
        let mut duplicates = 0;
        for dv in versions {
            let key = dv.key();
            let previous = self
                .known
                .get(&key)
                .map(|known| known.as_ref())
                .or_else(|| fresh.get(&key));
            match previous {
                Some(previous) if *previous == dv => duplicates += 1,
                Some(_) => {
                    return Err(CoreError::DivergentDatabaseVersion {
                        key: key.to_string(),
                    })
                }
                None => {
                    fresh.insert(key, dv);
                }
            }
        }

        let before = self.snapshot();
        if !fresh.is_empty() {
            for (key, dv) in fresh {
                self.known.insert(key, Arc::new(dv));
            }
            self.rebuild();
        }
        let after = &self.merged;

        let report = MergeReport {
            applied: after
                .applied()
                .iter()
                .filter(|key| !before.is_applied(key))
                .cloned()
                .collect(),
            duplicates,
            deferred: after.deferred().to_vec(),
            conflicts: after
                .conflicts()
                .iter()
                .filter(|marker| !before.conflicts().contains(marker))
                .cloned()
                .collect(),
        };
        info!(
            replica = %self.replica,
            applied = report.applied.len(),
            duplicates,
            deferred = report.deferred.len(),
            conflicts = report.conflicts.len(),
            "merged database versions"
        );
        Ok(report)
    }

    fn rebuild(&mut self) {
        self.merged = Arc::new(reconcile::rebuild(self.known.values()));
    }

    /// Decodes a downloaded database version without touching the model.
    ///
    /// `expected` is the key encoded in the remote file name; encrypted
    /// payloads are authenticated against it.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for a bad envelope or payload,
    /// [`CoreError::EncryptionRequired`] for encrypted data without a key,
    /// [`CoreError::DecryptionFailed`] if authentication fails or a
    /// plaintext version shows up in an encrypted repository, and
    /// [`ProtocolError::Malformed`] if the content carries a different key.
    pub fn load_remote_database_version(
        bytes: &[u8],
        expected: &DatabaseVersionKey,
        crypto: Option<&CryptoManager>,
    ) -> CoreResult<DatabaseVersion> {
        let env = envelope::open(&DATABASE_MAGIC, bytes)?;
        let what = format!("database version {expected}");
        let payload = match (env.is_encrypted(), crypto) {
            (true, Some(crypto)) => {
                crypto.decrypt(env.payload, expected.to_string().as_bytes(), &what)?
            }
            (true, None) => return Err(CoreError::EncryptionRequired { what }),
            (false, Some(_)) => {
                return Err(CoreError::decryption_failed(format!("{what} (not encrypted)")))
            }
            (false, None) => env.payload.to_vec(),
        };

        let dv = DatabaseVersion::from_cbor(&payload)?;
        if dv.key() != *expected {
            return Err(ProtocolError::Malformed {
                key: expected.to_string(),
                reason: format!("content carries key {}", dv.key()),
            }
            .into());
        }
        Ok(dv)
    }

    /// Encodes a database version for upload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn encode_database_version(
        dv: &DatabaseVersion,
        crypto: Option<&CryptoManager>,
    ) -> CoreResult<Vec<u8>> {
        let payload = dv.to_cbor()?;
        Ok(match crypto {
            Some(crypto) => {
                let aad = dv.key().to_string();
                let ciphertext = crypto.encrypt(&payload, aad.as_bytes())?;
                envelope::seal(&DATABASE_MAGIC, envelope::FLAG_ENCRYPTED, &ciphertext)
            }
            None => envelope::seal(&DATABASE_MAGIC, 0, &payload),
        })
    }
}

/// History live at `path`, looking at the open batch before the merged view.
fn live_history(batch: &OpenBatch, merged: &MergedHistory, path: &str) -> Option<FileHistoryId> {
    match batch.paths.get(path) {
        Some(state) => *state,
        None => merged.live_at(path).map(|h| h.id()),
    }
}

fn last_version<'a>(
    batch: &'a OpenBatch,
    merged: &'a MergedHistory,
    id: &FileHistoryId,
) -> Option<&'a FileVersion> {
    batch
        .file_versions
        .iter()
        .rev()
        .find(|fv| fv.history_id == *id)
        .or_else(|| merged.history(id)?.head().map(|h| &h.file))
}

fn build_version(
    batch: &mut OpenBatch,
    merged: &MergedHistory,
    id: FileHistoryId,
    path: &str,
    status: FileStatus,
    metadata: FileMetadata,
    chunks: &[ChunkRef],
) -> CoreResult<FileVersion> {
    let carries_content = metadata.file_type == FileType::File && status != FileStatus::Deleted;
    if carries_content {
        let actual: u64 = chunks.iter().map(|c| u64::from(c.length)).sum();
        if actual != metadata.size {
            return Err(CoreError::SizeMismatch {
                path: path.to_string(),
                expected: metadata.size,
                actual,
            });
        }
    }

    let last = batch
        .numbers
        .get(&id)
        .copied()
        .or_else(|| merged.history(&id).map(|h| h.last_number()))
        .unwrap_or(0);
    let version = last + 1;
    batch.numbers.insert(id, version);

    Ok(FileVersion {
        history_id: id,
        version,
        path: path.to_string(),
        file_type: metadata.file_type,
        status,
        size: if carries_content { metadata.size } else { 0 },
        modified: metadata.modified,
        permissions: metadata.permissions,
        link_target: metadata.link_target,
        checksum: if carries_content { metadata.checksum } else { None },
        chunks: if carries_content {
            chunks.iter().map(|c| c.checksum).collect()
        } else {
            Vec::new()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::chunker::Chunker;
    use crate::config::{ChunkStoreConfig, ChunkerConfig};
    use crate::crypto::EncryptionKey;

    fn replica(name: &str) -> ReplicaId {
        ReplicaId::new(name).unwrap()
    }

    /// Chunks `data`, seals its multichunk into the open batch and returns the refs.
    fn store(model: &mut HistoryModel, data: &[u8]) -> Vec<ChunkRef> {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let mut chunks = ChunkStore::new(
            ChunkStoreConfig::default(),
            chunker.config(),
            None,
        )
        .unwrap();
        chunks.seed(model.snapshot().index());
        let pieces = chunker.chunk_bytes(data);
        for piece in &pieces {
            chunks.add_chunk(piece);
        }
        for mc in chunks.seal_all().unwrap() {
            model.register_multichunk(&mc).unwrap();
        }
        pieces.iter().map(|c| c.to_ref()).collect()
    }

    fn write(model: &mut HistoryModel, path: &str, data: &[u8]) -> FileVersion {
        let refs = store(model, data);
        model
            .record_version(path, FileMetadata::file(data.len() as u64, Timestamp::from_millis(5)), &refs)
            .unwrap()
    }

    #[test]
    fn records_new_then_changed() {
        let mut model = HistoryModel::new(replica("a"));
        model.begin_database_version().unwrap();
        let first = write(&mut model, "doc.txt", b"hello");
        assert_eq!(first.status, FileStatus::New);
        assert_eq!(first.version, 1);
        let dv = model.seal_database_version().unwrap();
        assert_eq!(dv.sequence(), 1);

        model.begin_database_version().unwrap();
        let second = write(&mut model, "doc.txt", b"hello world");
        assert_eq!(second.status, FileStatus::Changed);
        assert_eq!(second.version, 2);
        assert_eq!(second.history_id, first.history_id);
        let dv2 = model.seal_database_version().unwrap();

        assert_eq!(dv2.sequence(), 2);
        assert!(dv2.timestamp() > dv.timestamp());
        let snapshot = model.snapshot();
        let head = snapshot.live_at("doc.txt").unwrap().head().unwrap();
        assert_eq!(head.version(), 2);
        assert_eq!(model.last_local_sequence(), 2);
    }

    #[test]
    fn recording_requires_open_batch() {
        let mut model = HistoryModel::new(replica("a"));
        let err = model
            .record_version("x", FileMetadata::folder(Timestamp::from_millis(1)), &[])
            .unwrap_err();
        assert!(matches!(err, CoreError::DatabaseVersionSealed));

        model.begin_database_version().unwrap();
        assert!(matches!(
            model.begin_database_version(),
            Err(CoreError::DatabaseVersionOpen)
        ));
        model.seal_database_version().unwrap();
        assert!(matches!(
            model.seal_database_version(),
            Err(CoreError::DatabaseVersionSealed)
        ));
    }

    #[test]
    fn size_must_match_chunks() {
        let mut model = HistoryModel::new(replica("a"));
        model.begin_database_version().unwrap();
        let refs = store(&mut model, b"12345");
        let err = model
            .record_version("f", FileMetadata::file(4, Timestamp::from_millis(1)), &refs)
            .unwrap_err();
        assert!(matches!(err, CoreError::SizeMismatch { expected: 4, actual: 5, .. }));
    }

    #[test]
    fn unresolved_chunks_fail_sealing() {
        let mut model = HistoryModel::new(replica("a"));
        model.begin_database_version().unwrap();
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let refs: Vec<_> = chunker.chunk_bytes(b"never stored").iter().map(|c| c.to_ref()).collect();
        model
            .record_version("f", FileMetadata::file(12, Timestamp::from_millis(1)), &refs)
            .unwrap();

        assert!(matches!(
            model.seal_database_version(),
            Err(CoreError::UnresolvedChunk { .. })
        ));
        assert!(!model.has_open());
        assert_eq!(model.last_local_sequence(), 0);
    }

    #[test]
    fn deletion_and_move() {
        let mut model = HistoryModel::new(replica("a"));
        model.begin_database_version().unwrap();
        let created = write(&mut model, "a.txt", b"data");
        write(&mut model, "b.txt", b"other");
        model.seal_database_version().unwrap();

        model.begin_database_version().unwrap();
        let refs = store(&mut model, b"data");
        let moved = model
            .record_move("a.txt", "dir/a.txt", FileMetadata::file(4, Timestamp::from_millis(9)), &refs)
            .unwrap();
        assert_eq!(moved.history_id, created.history_id);
        assert_eq!(moved.status, FileStatus::Renamed);
        let deleted = model.record_deletion("b.txt").unwrap();
        assert!(deleted.is_deleted());
        assert!(matches!(
            model.record_deletion("b.txt"),
            Err(CoreError::PathNotFound { .. })
        ));
        model.seal_database_version().unwrap();

        let snapshot = model.snapshot();
        let live: Vec<_> = snapshot.live_files().keys().map(|p| p.to_string()).collect();
        assert_eq!(live, vec!["dir/a.txt".to_string()]);
    }

    #[test]
    fn recreated_path_starts_new_history() {
        let mut model = HistoryModel::new(replica("a"));
        model.begin_database_version().unwrap();
        let first = write(&mut model, "f", b"one");
        model.record_deletion("f").unwrap();
        let again = write(&mut model, "f", b"two");
        assert_ne!(again.history_id, first.history_id);
        assert_eq!(again.status, FileStatus::New);
    }

    #[test]
    fn merging_twice_is_idempotent() {
        let mut a = HistoryModel::new(replica("a"));
        a.begin_database_version().unwrap();
        write(&mut a, "f", b"content");
        let dv = a.seal_database_version().unwrap();

        let mut b = HistoryModel::new(replica("b"));
        let first = b.merge(vec![(*dv).clone()]).unwrap();
        assert_eq!(first.applied, vec![dv.key()]);
        let snapshot = b.snapshot();

        let second = b.merge(vec![(*dv).clone()]).unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.duplicates, 1);
        assert_eq!(*b.snapshot(), *snapshot);
        assert_eq!(*b.snapshot(), *a.snapshot());
    }

    #[test]
    fn divergent_key_is_rejected() {
        let mut a = HistoryModel::new(replica("a"));
        a.begin_database_version().unwrap();
        write(&mut a, "f", b"content");
        let dv = a.seal_database_version().unwrap();

        let mut tampered = (*dv).clone();
        tampered.file_versions[0].path = "g".into();
        let mut b = HistoryModel::new(replica("b"));
        b.merge(vec![(*dv).clone()]).unwrap();
        assert!(matches!(
            b.merge(vec![tampered]),
            Err(CoreError::DivergentDatabaseVersion { .. })
        ));
    }

    #[test]
    fn codec_round_trip_and_key_binding() {
        let mut a = HistoryModel::new(replica("a"));
        a.begin_database_version().unwrap();
        write(&mut a, "f", b"content");
        let dv = a.seal_database_version().unwrap();
        let key = dv.key();

        let plain = HistoryModel::encode_database_version(&dv, None).unwrap();
        let decoded = HistoryModel::load_remote_database_version(&plain, &key, None).unwrap();
        assert_eq!(decoded, *dv);

        let crypto = CryptoManager::new(EncryptionKey::generate());
        let sealed = HistoryModel::encode_database_version(&dv, Some(&crypto)).unwrap();
        let decoded =
            HistoryModel::load_remote_database_version(&sealed, &key, Some(&crypto)).unwrap();
        assert_eq!(decoded, *dv);

        let other = DatabaseVersionKey::new(replica("a"), 2);
        assert!(matches!(
            HistoryModel::load_remote_database_version(&sealed, &other, Some(&crypto)),
            Err(CoreError::DecryptionFailed { .. })
        ));
        assert!(matches!(
            HistoryModel::load_remote_database_version(&sealed, &key, None),
            Err(CoreError::EncryptionRequired { .. })
        ));
        assert!(matches!(
            HistoryModel::load_remote_database_version(&plain, &other, None),
            Err(CoreError::Protocol(ProtocolError::Malformed { .. }))
        ));
    }

    #[test]
    fn from_known_rebuilds_snapshot() {
        let mut a = HistoryModel::new(replica("a"));
        a.begin_database_version().unwrap();
        write(&mut a, "f", b"content");
        a.seal_database_version().unwrap();

        let restored = HistoryModel::from_known(
            replica("a"),
            a.known_versions().map(|dv| (**dv).clone()),
        );
        assert_eq!(*restored.snapshot(), *a.snapshot());
        assert_eq!(restored.last_local_sequence(), 1);
    }
}
