//! Detection of multichunks no live file needs.

use crate::history::merged::MergedHistory;
use std::collections::{BTreeSet, HashSet};
use syncvault_protocol::{ChunkChecksum, MultiChunkId};

/// Multichunks none of whose chunks is referenced by a live file version.
///
/// A version is live when it is not a deletion and its history's head is
/// not a deletion either, so every restorable version of a live file stays
/// reachable. Versions that lost a conflict stay referenced even after
/// their history ends in a deletion. Everything else in such a history is
/// released.
#[must_use]
pub fn cleanup_candidates(snapshot: &MergedHistory) -> Vec<MultiChunkId> {
    let referenced: HashSet<&ChunkChecksum> = snapshot
        .histories()
        .flat_map(|h| {
            let live = h.is_live();
            h.versions()
                .iter()
                .filter(move |v| live || v.is_conflict_copy())
        })
        .filter(|v| !v.file.is_deleted())
        .flat_map(|v| v.file.chunks.iter())
        .collect();

    let needed: HashSet<MultiChunkId> = snapshot
        .index()
        .chunks()
        .filter(|(checksum, _)| referenced.contains(checksum))
        .map(|(_, location)| location.multichunk)
        .collect();

    let candidates: BTreeSet<MultiChunkId> = snapshot
        .index()
        .multichunks()
        .map(|record| record.id)
        .filter(|id| !needed.contains(id))
        .collect();
    candidates.into_iter().collect()
}

/// Stored bytes freed by removing `candidates`.
#[must_use]
pub fn reclaimable_bytes(snapshot: &MergedHistory, candidates: &[MultiChunkId]) -> u64 {
    candidates
        .iter()
        .filter_map(|id| snapshot.index().multichunk(id))
        .map(|record| record.stored_size)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use crate::chunker::Chunker;
    use crate::config::{ChunkStoreConfig, ChunkerConfig};
    use crate::history::HistoryModel;
    use syncvault_protocol::{FileMetadata, ReplicaId, Timestamp};

    /// Writes `data` to `path` in its own multichunk and database version.
    fn commit(model: &mut HistoryModel, path: &str, data: &[u8]) -> MultiChunkId {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let mut store =
            ChunkStore::new(ChunkStoreConfig::default(), chunker.config(), None).unwrap();
        store.seed(model.snapshot().index());
        let chunks = chunker.chunk_bytes(data);
        for c in &chunks {
            store.add_chunk(c);
        }
        model.begin_database_version().unwrap();
        let sealed = store.seal_all().unwrap();
        for mc in &sealed {
            model.register_multichunk(mc).unwrap();
        }
        let refs: Vec<_> = chunks.iter().map(|c| c.to_ref()).collect();
        model
            .record_version(path, FileMetadata::file(data.len() as u64, Timestamp::from_millis(1)), &refs)
            .unwrap();
        model.seal_database_version().unwrap();
        sealed[0].id
    }

    #[test]
    fn deleted_file_releases_its_multichunks() {
        let mut model = HistoryModel::new(ReplicaId::new("a").unwrap());
        let kept = commit(&mut model, "keep", b"kept content");
        let gone = commit(&mut model, "gone", b"deleted content");
        assert!(cleanup_candidates(&model.snapshot()).is_empty());

        model.begin_database_version().unwrap();
        model.record_deletion("gone").unwrap();
        model.seal_database_version().unwrap();

        let snapshot = model.snapshot();
        let candidates = cleanup_candidates(&snapshot);
        assert_eq!(candidates, vec![gone]);
        assert!(!candidates.contains(&kept));
        assert!(reclaimable_bytes(&snapshot, &candidates) > 0);
    }

    #[test]
    fn old_versions_of_live_files_are_kept() {
        let mut model = HistoryModel::new(ReplicaId::new("a").unwrap());
        let v1 = commit(&mut model, "f", b"version one");
        let v2 = commit(&mut model, "f", b"version two");
        let candidates = cleanup_candidates(&model.snapshot());
        assert!(!candidates.contains(&v1));
        assert!(!candidates.contains(&v2));
    }

    #[test]
    fn edit_concurrent_with_deletion_is_kept() {
        let mut a = HistoryModel::new(ReplicaId::new("a").unwrap());
        let mut b = HistoryModel::new(ReplicaId::new("b").unwrap());
        let original = commit(&mut a, "f", b"original content");
        b.merge(a.known_versions().map(|dv| (**dv).clone()).collect())
            .unwrap();
        let edit = commit(&mut b, "f", b"edited on b");

        a.begin_database_version().unwrap();
        a.record_deletion("f").unwrap();
        a.seal_database_version().unwrap();

        let mut fresh = HistoryModel::new(ReplicaId::new("c").unwrap());
        let all: Vec<_> = a
            .known_versions()
            .chain(b.known_versions())
            .map(|dv| (**dv).clone())
            .collect();
        fresh.merge(all).unwrap();

        let snapshot = fresh.snapshot();
        let head = snapshot.live_at("f").unwrap().head().unwrap();
        assert_eq!(head.file.chunks, vec![ChunkChecksum::digest(b"edited on b")]);

        let candidates = cleanup_candidates(&snapshot);
        assert!(!candidates.contains(&edit));
        assert!(!candidates.contains(&original));
    }

    #[test]
    fn conflict_copies_survive_deletion_of_the_winner() {
        let mut a = HistoryModel::new(ReplicaId::new("a").unwrap());
        let mut b = HistoryModel::new(ReplicaId::new("b").unwrap());
        commit(&mut a, "f", b"base version");
        b.merge(a.known_versions().map(|dv| (**dv).clone()).collect())
            .unwrap();
        commit(&mut a, "f", b"winning edit on a");
        let losing = commit(&mut b, "f", b"losing edit on b");

        a.merge(b.known_versions().map(|dv| (**dv).clone()).collect())
            .unwrap();
        let snapshot = a.snapshot();
        let history = snapshot.live_at("f").unwrap();
        assert!(history.versions().iter().any(|v| v.is_conflict_copy()));

        a.begin_database_version().unwrap();
        a.record_deletion("f").unwrap();
        a.seal_database_version().unwrap();

        let candidates = cleanup_candidates(&a.snapshot());
        assert!(!candidates.contains(&losing));
        assert!(!candidates.is_empty());
    }

    #[test]
    fn removal_drops_multichunks_from_the_index() {
        let mut model = HistoryModel::new(ReplicaId::new("a").unwrap());
        commit(&mut model, "f", b"short lived");
        model.begin_database_version().unwrap();
        model.record_deletion("f").unwrap();
        model.seal_database_version().unwrap();

        let candidates = cleanup_candidates(&model.snapshot());
        model.begin_database_version().unwrap();
        model.record_multichunk_removal(candidates.clone()).unwrap();
        model.seal_database_version().unwrap();

        let snapshot = model.snapshot();
        assert_eq!(snapshot.index().multichunk_count(), 0);
        assert!(cleanup_candidates(&snapshot).is_empty());
    }
}
