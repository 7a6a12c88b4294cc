//! Multi-replica reconciliation tests over the public API.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use syncvault_core::{
    restore, CancelFlag, ChunkStore, ChunkStoreConfig, Chunker, ChunkerConfig, ConflictKind,
    CoreError, CoreResult, HistoryModel, MultiChunkCache, MultiChunkFetcher, MultiChunkSource,
    RestoreRequest,
};
use syncvault_protocol::{DatabaseVersion, FileMetadata, MultiChunkId, ReplicaId, Timestamp};

/// Multichunks shared by all simulated replicas.
#[derive(Default)]
struct Remote {
    multichunks: parking_lot::Mutex<HashMap<MultiChunkId, Vec<u8>>>,
}

impl MultiChunkSource for Remote {
    fn fetch(&self, id: &MultiChunkId) -> CoreResult<Vec<u8>> {
        self.multichunks
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::MultiChunkFetch {
                multichunk: *id,
                source: "not uploaded".into(),
            })
    }
}

struct Replica {
    model: HistoryModel,
    chunker: Chunker,
}

impl Replica {
    fn new(name: &str) -> Self {
        Self {
            model: HistoryModel::new(ReplicaId::new(name).unwrap()),
            chunker: Chunker::new(
                ChunkerConfig::default()
                    .with_min_size(32)
                    .with_avg_size(128)
                    .with_max_size(512),
            )
            .unwrap(),
        }
    }

    /// Writes one file and seals it as a database version.
    fn write(&mut self, remote: &Remote, path: &str, data: &[u8]) -> Arc<DatabaseVersion> {
        let mut store = ChunkStore::new(
            ChunkStoreConfig::default().with_multichunk_size(2048),
            self.chunker.config(),
            None,
        )
        .unwrap();
        store.seed(self.model.snapshot().index());
        let chunks = self.chunker.chunk_bytes(data);
        for chunk in &chunks {
            store.add_chunk(chunk);
        }
        self.model.begin_database_version().unwrap();
        for mc in store.seal_all().unwrap() {
            remote.multichunks.lock().insert(mc.id, mc.data.to_vec());
            self.model.register_multichunk(&mc).unwrap();
        }
        let refs: Vec<_> = chunks.iter().map(|c| c.to_ref()).collect();
        let meta = FileMetadata::file(data.len() as u64, Timestamp::from_millis(7));
        self.model.record_version(path, meta, &refs).unwrap();
        self.model.seal_database_version().unwrap()
    }

    fn delete(&mut self, path: &str) -> Option<Arc<DatabaseVersion>> {
        self.model.begin_database_version().unwrap();
        if self.model.record_deletion(path).is_err() {
            self.model.abort_database_version();
            return None;
        }
        Some(self.model.seal_database_version().unwrap())
    }

    fn receive(&mut self, published: &[Arc<DatabaseVersion>]) {
        let fresh: Vec<_> = published
            .iter()
            .filter(|dv| !self.model.contains(&dv.key()))
            .map(|dv| (**dv).clone())
            .collect();
        self.model.merge(fresh).unwrap();
    }
}

#[test]
fn concurrent_edit_keeps_both_variants_restorable() {
    let remote = Arc::new(Remote::default());
    let mut a = Replica::new("alpha");
    let mut b = Replica::new("beta");

    let base = a.write(&remote, "notes.txt", b"shared base text");
    b.receive(&[base.clone()]);

    let from_a = a.write(&remote, "notes.txt", b"foo");
    let from_b = b.write(&remote, "notes.txt", b"bar");
    a.receive(&[from_b]);
    b.receive(&[from_a]);

    let snapshot = a.model.snapshot();
    assert_eq!(*snapshot, *b.model.snapshot());

    let history = snapshot.live_at("notes.txt").unwrap();
    assert_eq!(history.versions().len(), 3);
    let conflicted: Vec<_> = history.versions().iter().filter(|v| v.is_conflict_copy()).collect();
    assert_eq!(conflicted.len(), 1);
    assert_eq!(snapshot.conflicts().len(), 1);
    assert_eq!(snapshot.conflicts()[0].kind, ConflictKind::SameHistory);

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MultiChunkCache::new(4));
    let fetcher = MultiChunkFetcher::new(Arc::clone(&remote), cache, None);
    let mut contents = Vec::new();
    for number in [2, 3] {
        let request = RestoreRequest::version(history.id(), number, format!("v{number}"));
        let restored =
            restore(&snapshot, &request, dir.path(), &fetcher, &CancelFlag::new()).unwrap();
        contents.push(std::fs::read(restored.path).unwrap());
    }
    contents.sort();
    assert_eq!(contents, vec![b"bar".to_vec(), b"foo".to_vec()]);
}

#[test]
fn restore_one_past_the_last_version_is_not_found() {
    let remote = Remote::default();
    let mut a = Replica::new("a");
    a.write(&remote, "f", b"1");
    a.write(&remote, "f", b"2");
    let snapshot = a.model.snapshot();
    let id = snapshot.live_at("f").unwrap().id();

    let err = syncvault_core::select_version(&snapshot, &RestoreRequest::version(id, 3, "f"))
        .unwrap_err();
    assert!(matches!(err, CoreError::VersionNotFound { version: 3, .. }));
}

/// One step of a simulated multi-replica session.
#[derive(Debug, Clone)]
enum Step {
    Write { replica: usize, file: usize, seed: u8 },
    Delete { replica: usize, file: usize },
    Sync { replica: usize },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..3usize, 0..3usize, any::<u8>())
            .prop_map(|(replica, file, seed)| Step::Write { replica, file, seed }),
        1 => (0..3usize, 0..3usize).prop_map(|(replica, file)| Step::Delete { replica, file }),
        2 => (0..3usize).prop_map(|replica| Step::Sync { replica }),
    ]
}

fn run_session(steps: &[Step]) -> Vec<Arc<DatabaseVersion>> {
    let remote = Remote::default();
    let mut replicas: Vec<_> = ["r0", "r1", "r2"].iter().map(|n| Replica::new(n)).collect();
    let mut published: Vec<Arc<DatabaseVersion>> = Vec::new();

    for step in steps {
        match *step {
            Step::Write { replica, file, seed } => {
                let data: Vec<u8> =
                    (0..(seed as usize * 7 + 1)).map(|i| (i as u8) ^ seed).collect();
                let dv = replicas[replica].write(&remote, &format!("file{file}"), &data);
                published.push(dv);
            }
            Step::Delete { replica, file } => {
                if let Some(dv) = replicas[replica].delete(&format!("file{file}")) {
                    published.push(dv);
                }
            }
            Step::Sync { replica } => replicas[replica].receive(&published),
        }
    }
    published
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn delivery_order_does_not_matter(
        steps in prop::collection::vec(step_strategy(), 1..16),
        order in any::<u64>(),
    ) {
        let published = run_session(&steps);

        let mut all_at_once = Replica::new("observer");
        all_at_once.receive(&published);

        // Deliver one by one in a shuffled order.
        let mut shuffled = published.clone();
        let mut state = order | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            shuffled.swap(i, (state % (i as u64 + 1)) as usize);
        }
        let mut one_by_one = Replica::new("observer");
        for dv in &shuffled {
            one_by_one.receive(std::slice::from_ref(dv));
        }

        prop_assert_eq!(&*all_at_once.model.snapshot(), &*one_by_one.model.snapshot());
        prop_assert!(all_at_once.model.snapshot().deferred().is_empty());

        // Merging everything again changes nothing.
        let before = all_at_once.model.snapshot();
        let again = published.iter().map(|dv| (**dv).clone()).collect();
        let report = all_at_once.model.merge(again).unwrap();
        prop_assert_eq!(report.duplicates, published.len());
        prop_assert_eq!(&*before, &*all_at_once.model.snapshot());
    }
}
