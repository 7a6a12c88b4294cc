//! Deterministic reconciliation of database versions.
//!
//! The merged history is rebuilt from the full set of known database
//! versions on every merge:
//!
//! 1. Versions are ordered topologically by vector clock. A version is
//!    ready once its replica's previous version and every dependency named
//!    in its clock are applied; among ready versions the smallest replica
//!    id goes first.
//! 2. Each version is validated as a whole before anything is applied.
//!    Invalid ones are deferred, and so is everything depending on them.
//! 3. File versions are replayed in that order. A version that does not
//!    causally follow its history's head and differs from it loses and is
//!    kept as a conflicted entry, except that an edit always beats a
//!    concurrent deletion. A live version landing on a path owned by
//!    another history is moved to a conflicted-copy path.
//!
//! The result depends only on the set of inputs, which makes merging
//! idempotent and convergent across replicas.

use crate::history::merged::{
    ConflictKind, ConflictMarker, DeferReason, Deferred, FileHistory, MergedHistory, MergedVersion,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use syncvault_protocol::{
    ChunkChecksum, DatabaseVersion, DatabaseVersionKey, FileHistoryId, FileStatus, FileType,
    FileVersion, ReplicaId,
};
use tracing::debug;

/// Rebuilds the merged history from `versions`.
///
/// Keys must be unique; callers deduplicate before calling.
pub fn rebuild<'a, I>(versions: I) -> MergedHistory
where
    I: IntoIterator<Item = &'a Arc<DatabaseVersion>>,
{
    let mut pending: BTreeMap<ReplicaId, BTreeMap<u64, &'a Arc<DatabaseVersion>>> = BTreeMap::new();
    for dv in versions {
        pending
            .entry(dv.replica().clone())
            .or_default()
            .insert(dv.sequence(), dv);
    }

    let mut merged = MergedHistory::new();
    let mut emitted: HashMap<ReplicaId, u64> = HashMap::new();
    let mut blocked: BTreeSet<ReplicaId> = BTreeSet::new();

    while let Some(dv) = next_ready(&pending, &emitted, &blocked) {
        let replica = dv.replica().clone();
        if let Some(seqs) = pending.get_mut(&replica) {
            seqs.remove(&dv.sequence());
        }
        match check(&merged, dv) {
            Ok(()) => {
                apply(&mut merged, dv);
                emitted.insert(replica, dv.sequence());
            }
            Err(reason) => {
                debug!(key = %dv.key(), ?reason, "deferring database version");
                merged.deferred.push(Deferred {
                    key: dv.key(),
                    reason,
                });
                blocked.insert(replica);
            }
        }
    }

    for seqs in pending.values() {
        for dv in seqs.values() {
            merged.deferred.push(Deferred {
                key: dv.key(),
                reason: DeferReason::MissingPredecessor,
            });
        }
    }
    merged.deferred.sort_by(|a, b| a.key.cmp(&b.key));
    merged
}

fn next_ready<'a>(
    pending: &BTreeMap<ReplicaId, BTreeMap<u64, &'a Arc<DatabaseVersion>>>,
    emitted: &HashMap<ReplicaId, u64>,
    blocked: &BTreeSet<ReplicaId>,
) -> Option<&'a Arc<DatabaseVersion>> {
    pending
        .iter()
        .filter(|(replica, _)| !blocked.contains(*replica))
        .find_map(|(replica, seqs)| {
            let want = emitted.get(replica).copied().unwrap_or(0) + 1;
            let dv = *seqs.get(&want)?;
            let deps_met = dv.clock().iter().all(|(dep, count)| {
                dep == replica || emitted.get(dep).copied().unwrap_or(0) >= count
            });
            deps_met.then_some(dv)
        })
}

/// Validates `dv` against the current merged state without changing it.
fn check(merged: &MergedHistory, dv: &DatabaseVersion) -> Result<(), DeferReason> {
    dv.validate()
        .map_err(|e| DeferReason::Malformed(e.to_string()))?;

    let introduced: HashMap<ChunkChecksum, u32> =
        dv.chunks.iter().map(|c| (c.checksum, c.length)).collect();
    let mut missing = BTreeSet::new();

    for fv in &dv.file_versions {
        if fv.file_type != FileType::File || fv.is_deleted() {
            continue;
        }
        let mut total = 0u64;
        let mut complete = true;
        for checksum in &fv.chunks {
            let length = merged
                .index
                .get(checksum)
                .map(|loc| loc.length)
                .or_else(|| introduced.get(checksum).copied());
            match length {
                Some(length) => total += u64::from(length),
                None => {
                    missing.insert(*checksum);
                    complete = false;
                }
            }
        }
        if complete && total != fv.size {
            return Err(DeferReason::Malformed(format!(
                "{}: chunks hold {total} bytes but size is {}",
                fv.path, fv.size
            )));
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeferReason::MissingChunks(missing.into_iter().collect()))
    }
}

fn apply(merged: &mut MergedHistory, dv: &DatabaseVersion) {
    for record in &dv.multichunks {
        merged.index.insert_multichunk(*record);
    }
    for record in &dv.chunks {
        merged.index.insert_chunk(record);
    }
    for fv in &dv.file_versions {
        replay(merged, dv, fv);
    }
    for id in &dv.removed_multichunks {
        merged.index.remove_multichunk(id);
    }
    merged.clock.merge(dv.clock());
    merged.order.push(dv.key());
    merged.applied.insert(dv.key());
}

/// Outcome of comparing an incoming version to its history's head.
enum Placement {
    Accept,
    Lose(ConflictMarker),
}

fn replay(merged: &mut MergedHistory, dv: &DatabaseVersion, fv: &FileVersion) {
    let key = dv.key();
    let id = fv.history_id;
    let history = merged.histories.get(&id);
    let last = history.map_or(0, FileHistory::last_number);
    let number = if fv.version > last { fv.version } else { last + 1 };

    let placement = match history.and_then(FileHistory::head) {
        None => Placement::Accept,
        Some(head) => {
            let follows = head.origin == key
                || dv.clock().get(&head.origin.replica) >= head.origin.sequence;
            // Concurrent edits win over deletions, whichever is replayed first.
            let revives = head.file.is_deleted() && !fv.is_deleted();
            if revives && !follows {
                debug!(history = %id, version = number, "edit outlives concurrent deletion");
            }
            if follows || revives || head.file.same_content(fv) {
                Placement::Accept
            } else {
                Placement::Lose(ConflictMarker {
                    kind: ConflictKind::SameHistory,
                    history_id: id,
                    version: number,
                    recorded_version: fv.version,
                    path: fv.path.clone(),
                    loser: key.clone(),
                    winner: head.origin.clone(),
                    winner_history: id,
                    winner_version: head.file.version,
                })
            }
        }
    };

    let mut file = fv.clone();
    file.version = number;

    let conflict = match placement {
        Placement::Lose(marker) => {
            debug!(history = %id, version = number, loser = %key, "concurrent edit kept as conflict");
            Some(marker)
        }
        Placement::Accept => {
            release_head_path(merged, &id);
            let conflict = if file.is_deleted() {
                None
            } else {
                claim_path(merged, &mut file, dv.replica(), &key, fv.version)
            };
            if !file.is_deleted() {
                merged.paths.insert(file.path.clone(), id);
            }
            conflict
        }
    };

    if let Some(marker) = &conflict {
        merged.conflicts.push(marker.clone());
    }
    merged
        .histories
        .entry(id)
        .or_insert_with(|| FileHistory::new(id))
        .push(MergedVersion {
            file,
            recorded_version: fv.version,
            origin: key,
            timestamp: dv.timestamp(),
            conflict,
        });
}

/// Frees the path held by the current head of `id`.
fn release_head_path(merged: &mut MergedHistory, id: &FileHistoryId) {
    let Some(head) = merged.histories.get(id).and_then(FileHistory::head) else {
        return;
    };
    if head.file.is_deleted() {
        return;
    }
    if merged.paths.get(&head.file.path) == Some(id) {
        merged.paths.remove(&head.file.path);
    }
}

/// Moves `file` to a conflicted-copy path if another live history owns its path.
fn claim_path(
    merged: &MergedHistory,
    file: &mut FileVersion,
    replica: &ReplicaId,
    key: &DatabaseVersionKey,
    recorded_version: u64,
) -> Option<ConflictMarker> {
    let owner = *merged.paths.get(&file.path)?;
    if owner == file.history_id {
        return None;
    }
    let winner = merged.histories.get(&owner)?.head()?;
    let marker = ConflictMarker {
        kind: ConflictKind::SamePath,
        history_id: file.history_id,
        version: file.version,
        recorded_version,
        path: file.path.clone(),
        loser: key.clone(),
        winner: winner.origin.clone(),
        winner_history: owner,
        winner_version: winner.file.version,
    };
    let renamed = previous_copy_path(merged, file)
        .unwrap_or_else(|| {
            conflicted_copy_path(&file.path, replica, file.version, |p| {
                merged.paths.contains_key(p)
            })
        });
    debug!(path = %file.path, renamed, "path conflict");
    file.path = renamed;
    file.status = FileStatus::Renamed;
    Some(marker)
}

/// The copy path of `file`'s history when its head already lost the same path.
fn previous_copy_path(merged: &MergedHistory, file: &FileVersion) -> Option<String> {
    let head = merged.histories.get(&file.history_id)?.head()?;
    let marker = head.conflict.as_ref()?;
    let same_claim = marker.kind == ConflictKind::SamePath && marker.path == file.path;
    (same_claim && !merged.paths.contains_key(&head.file.path)).then(|| head.file.path.clone())
}

/// `"dir/name (conflicted copy, replica, v3).ext"`, made unique with `taken`.
pub fn conflicted_copy_path(
    path: &str,
    replica: &ReplicaId,
    version: u64,
    taken: impl Fn(&str) -> bool,
) -> String {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    };
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };

    let mut attempt = 1;
    loop {
        let suffix = if attempt == 1 {
            format!("conflicted copy, {replica}, v{version}")
        } else {
            format!("conflicted copy, {replica}, v{version}, {attempt}")
        };
        let file_name = format!("{stem} ({suffix}){ext}");
        let candidate = match dir {
            Some(dir) => format!("{dir}/{file_name}"),
            None => file_name,
        };
        if !taken(&candidate) {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncvault_protocol::{
        ChunkRecord, DatabaseVersionHeader, MultiChunkId, MultiChunkRecord, Timestamp, VectorClock,
    };

    fn r(name: &str) -> ReplicaId {
        ReplicaId::new(name).unwrap()
    }

    struct Builder {
        dv: DatabaseVersion,
    }

    impl Builder {
        fn new(replica: &str, seq: u64, deps: &[(&str, u64)]) -> Self {
            let mut clock = VectorClock::new();
            for (dep, n) in deps {
                clock.set(r(dep), *n);
            }
            clock.set(r(replica), seq);
            Self {
                dv: DatabaseVersion {
                    header: DatabaseVersionHeader {
                        replica: r(replica),
                        sequence: seq,
                        clock,
                        timestamp: Timestamp::from_millis(seq * 1000),
                    },
                    file_versions: vec![],
                    chunks: vec![],
                    multichunks: vec![],
                    removed_multichunks: vec![],
                },
            }
        }

        /// Adds a file version whose content is stored in this version.
        fn file(mut self, history: u8, version: u64, path: &str, content: &[u8]) -> Self {
            let checksum = ChunkChecksum::digest(content);
            let mc = MultiChunkId::digest(content);
            self.dv.multichunks.push(MultiChunkRecord {
                id: mc,
                stored_size: content.len() as u64,
                chunk_count: 1,
            });
            self.dv.chunks.push(ChunkRecord {
                checksum,
                length: content.len() as u32,
                multichunk: mc,
                offset: 0,
            });
            self.dv.file_versions.push(FileVersion {
                history_id: FileHistoryId::from_bytes([history; 16]),
                version,
                path: path.into(),
                file_type: FileType::File,
                status: if version == 1 { FileStatus::New } else { FileStatus::Changed },
                size: content.len() as u64,
                modified: Timestamp::from_millis(1),
                permissions: None,
                link_target: None,
                checksum: None,
                chunks: vec![checksum],
            });
            self
        }

        fn delete(mut self, history: u8, version: u64, path: &str) -> Self {
            self.dv.file_versions.push(FileVersion {
                history_id: FileHistoryId::from_bytes([history; 16]),
                version,
                path: path.into(),
                file_type: FileType::File,
                status: FileStatus::Deleted,
                size: 0,
                modified: Timestamp::from_millis(1),
                permissions: None,
                link_target: None,
                checksum: None,
                chunks: vec![],
            });
            self
        }

        fn build(self) -> Arc<DatabaseVersion> {
            Arc::new(self.dv)
        }
    }

    fn h(n: u8) -> FileHistoryId {
        FileHistoryId::from_bytes([n; 16])
    }

    #[test]
    fn linear_history() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f.txt", b"one").build();
        let a2 = Builder::new("a", 2, &[]).file(1, 2, "f.txt", b"two").build();
        let merged = rebuild([&a2, &a1]);

        let history = merged.history(&h(1)).unwrap();
        assert_eq!(history.versions().len(), 2);
        assert_eq!(history.head().unwrap().version(), 2);
        assert!(merged.conflicts().is_empty());
        assert_eq!(merged.applied().len(), 2);
        assert_eq!(merged.clock().get(&r("a")), 2);
    }

    #[test]
    fn causal_successor_from_other_replica_is_accepted() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f.txt", b"one").build();
        let b1 = Builder::new("b", 1, &[("a", 1)]).file(1, 2, "f.txt", b"two").build();
        let merged = rebuild([&b1, &a1]);

        assert_eq!(merged.applied()[0], a1.key());
        let head = merged.history(&h(1)).unwrap().head().unwrap();
        assert_eq!(head.origin, b1.key());
        assert!(merged.conflicts().is_empty());
    }

    #[test]
    fn concurrent_edit_keeps_both_versions() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f.txt", b"base").build();
        let a2 = Builder::new("a", 2, &[]).file(1, 2, "f.txt", b"foo").build();
        let b1 = Builder::new("b", 1, &[("a", 1)]).file(1, 2, "f.txt", b"bar").build();

        let merged = rebuild([&a1, &a2, &b1]);
        let history = merged.history(&h(1)).unwrap();
        assert_eq!(history.versions().len(), 3);

        // "a" sorts first: a/2 is applied before b/1, so b/1 loses.
        let head = history.head().unwrap();
        assert_eq!(head.origin, a2.key());
        assert_eq!(head.version(), 2);
        let loser = history.version(3).unwrap();
        assert!(loser.is_conflict_copy());
        assert_eq!(loser.recorded_version, 2);
        assert_eq!(loser.file.chunks, vec![ChunkChecksum::digest(b"bar")]);

        assert_eq!(merged.conflicts().len(), 1);
        let marker = &merged.conflicts()[0];
        assert_eq!(marker.kind, ConflictKind::SameHistory);
        assert_eq!(marker.loser, b1.key());
        assert_eq!(marker.winner, a2.key());
    }

    #[test]
    fn identical_concurrent_edits_do_not_conflict() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f.txt", b"base").build();
        let a2 = Builder::new("a", 2, &[]).file(1, 2, "f.txt", b"same").build();
        let b1 = Builder::new("b", 1, &[("a", 1)]).file(1, 2, "f.txt", b"same").build();

        let merged = rebuild([&a1, &a2, &b1]);
        assert!(merged.conflicts().is_empty());
        assert_eq!(merged.history(&h(1)).unwrap().head().unwrap().origin, b1.key());
    }

    #[test]
    fn same_path_from_two_histories() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "notes.md", b"from a").build();
        let b1 = Builder::new("b", 1, &[]).file(2, 1, "notes.md", b"from b").build();

        let merged = rebuild([&b1, &a1]);
        let live = merged.live_files();
        assert_eq!(live.len(), 2);
        assert_eq!(live["notes.md"].origin, a1.key());
        let copy = "notes (conflicted copy, b, v1).md";
        assert_eq!(live[copy].file.history_id, h(2));
        assert_eq!(live[copy].file.status, FileStatus::Renamed);
        assert_eq!(merged.conflicts()[0].kind, ConflictKind::SamePath);
        assert_eq!(merged.conflicts()[0].path, "notes.md");
    }

    #[test]
    fn later_versions_keep_their_conflicted_copy_path() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "notes.md", b"from a").build();
        let b1 = Builder::new("b", 1, &[]).file(2, 1, "notes.md", b"from b").build();
        let b2 = Builder::new("b", 2, &[]).file(2, 2, "notes.md", b"from b, again").build();

        let merged = rebuild([&a1, &b1, &b2]);
        let copy = "notes (conflicted copy, b, v1).md";
        let live = merged.live_files();
        assert_eq!(live.len(), 2);
        assert_eq!(live[copy].version(), 2);
        assert_eq!(live[copy].file.chunks, vec![ChunkChecksum::digest(b"from b, again")]);
        assert_eq!(merged.conflicts().len(), 2);
    }

    #[test]
    fn edit_beats_deletion_replayed_before_it() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f.txt", b"base").build();
        let a2 = Builder::new("a", 2, &[]).delete(1, 2, "f.txt").build();
        let b1 = Builder::new("b", 1, &[("a", 1)]).file(1, 2, "f.txt", b"edited").build();

        let merged = rebuild([&a1, &a2, &b1]);
        let history = merged.history(&h(1)).unwrap();
        assert!(history.is_live());
        let head = history.head().unwrap();
        assert_eq!(head.origin, b1.key());
        assert_eq!(head.version(), 3);
        assert!(!head.is_conflict_copy());
        assert_eq!(merged.live_at("f.txt").unwrap().id(), h(1));
        assert!(merged.conflicts().is_empty());
    }

    #[test]
    fn deletion_replayed_after_an_edit_loses() {
        let b1 = Builder::new("b", 1, &[]).file(1, 1, "f.txt", b"base").build();
        let a1 = Builder::new("a", 1, &[("b", 1)]).file(1, 2, "f.txt", b"edited").build();
        let b2 = Builder::new("b", 2, &[]).delete(1, 2, "f.txt").build();

        let merged = rebuild([&b1, &a1, &b2]);
        let history = merged.history(&h(1)).unwrap();
        assert!(history.is_live());
        assert_eq!(history.head().unwrap().origin, a1.key());
        let loser = history.version(3).unwrap();
        assert!(loser.is_conflict_copy());
        assert!(loser.file.is_deleted());
    }

    #[test]
    fn missing_chunks_defer_version_and_dependents() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f", b"x").build();
        let mut a2 = Builder::new("a", 2, &[]).file(1, 2, "f", b"y").dv;
        a2.chunks.clear();
        a2.multichunks.clear();
        let a2 = Arc::new(a2);
        let a3 = Builder::new("a", 3, &[]).file(1, 3, "f", b"z").build();
        let b1 = Builder::new("b", 1, &[("a", 2)]).file(2, 1, "g", b"w").build();

        let merged = rebuild([&a1, &a2, &a3, &b1]);
        assert_eq!(merged.applied(), &[a1.key()]);
        let reasons: Vec<_> = merged.deferred().iter().map(|d| (&d.key, &d.reason)).collect();
        assert_eq!(reasons.len(), 3);
        assert!(matches!(reasons[0].1, DeferReason::MissingChunks(c) if c.len() == 1));
        assert_eq!(*reasons[1].1, DeferReason::MissingPredecessor);
        assert_eq!(*reasons[2].0, b1.key());
        assert_eq!(*reasons[2].1, DeferReason::MissingPredecessor);
    }

    #[test]
    fn gap_in_sequence_defers() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f", b"1").build();
        let a3 = Builder::new("a", 3, &[]).file(1, 3, "f", b"3").build();
        let merged = rebuild([&a1, &a3]);
        assert_eq!(merged.applied().len(), 1);
        assert_eq!(merged.deferred()[0].key, a3.key());
    }

    #[test]
    fn size_mismatch_is_malformed() {
        let mut bad = Builder::new("a", 1, &[]).file(1, 1, "f", b"abc").dv;
        bad.file_versions[0].size = 10;
        let merged = rebuild([&Arc::new(bad)]);
        assert!(matches!(merged.deferred()[0].reason, DeferReason::Malformed(_)));
    }

    #[test]
    fn deletion_frees_path() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f", b"1").build();
        let a2 = Builder::new("a", 2, &[]).delete(1, 2, "f").build();
        let a3 = Builder::new("a", 3, &[]).file(2, 1, "f", b"new").build();
        let merged = rebuild([&a1, &a2, &a3]);

        assert!(!merged.history(&h(1)).unwrap().is_live());
        assert_eq!(merged.live_at("f").unwrap().id(), h(2));
        assert!(merged.conflicts().is_empty());
    }

    #[test]
    fn removed_multichunks_leave_the_index() {
        let a1 = Builder::new("a", 1, &[]).file(1, 1, "f", b"gone").build();
        let mut a2 = Builder::new("a", 2, &[]).delete(1, 2, "f").dv;
        a2.removed_multichunks.push(MultiChunkId::digest(b"gone"));
        let merged = rebuild([&a1, &Arc::new(a2)]);
        assert_eq!(merged.index().multichunk_count(), 0);
        assert!(!merged.index().contains(&ChunkChecksum::digest(b"gone")));
    }

    #[test]
    fn conflicted_copy_names() {
        let replica = r("laptop");
        assert_eq!(
            conflicted_copy_path("a/b/report.pdf", &replica, 4, |_| false),
            "a/b/report (conflicted copy, laptop, v4).pdf"
        );
        assert_eq!(
            conflicted_copy_path(".bashrc", &replica, 1, |_| false),
            ".bashrc (conflicted copy, laptop, v1)"
        );
        let first = "x (conflicted copy, laptop, v2)";
        assert_eq!(
            conflicted_copy_path("x", &replica, 2, |p| p == first),
            "x (conflicted copy, laptop, v2, 2)"
        );
    }
}
