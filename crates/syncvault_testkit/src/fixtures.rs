//! Test fixtures and replica helpers.
//!
//! A [`TestCluster`] owns one in-memory repository; every replica it hands
//! out syncs a temporary folder against that repository.

use crate::logging::init_tracing;
use std::collections::BTreeMap;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;
use syncvault_core::{ChunkStoreConfig, ChunkerConfig};
use syncvault_protocol::ReplicaId;
use syncvault_storage::{InMemoryTransfer, RetryPolicy};
use syncvault_sync_engine::{SyncConfig, SyncEngine, SyncResult, META_DIR};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Chunking parameters small enough that a few KiB span many chunks.
pub fn small_chunker() -> ChunkerConfig {
    ChunkerConfig::default()
        .with_min_size(64)
        .with_avg_size(256)
        .with_max_size(1024)
}

/// Multichunks of at most 4 KiB.
pub fn small_chunk_store() -> ChunkStoreConfig {
    ChunkStoreConfig::default().with_multichunk_size(4 * 1024)
}

/// Retries with millisecond delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(4)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_jitter(false)
}

/// Test configuration for `replica` syncing `root`.
pub fn test_config(replica: &str, root: impl Into<PathBuf>) -> SyncConfig {
    SyncConfig::new(
        ReplicaId::new(replica).expect("Invalid replica id"),
        root,
    )
    .with_workers(2)
    .with_chunker(small_chunker())
    .with_chunk_store(small_chunk_store())
    .with_retry(fast_retry())
}

/// One replica with its own temporary sync folder.
pub struct TestReplica {
    /// The engine.
    pub engine: SyncEngine<InMemoryTransfer>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestReplica {
    /// Opens a replica on a fresh temporary folder.
    ///
    /// # Errors
    ///
    /// Returns the error of [`SyncEngine::open`].
    pub fn open(config: SyncConfig, remote: &InMemoryTransfer) -> SyncResult<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = SyncConfig {
            root: temp_dir.path().to_path_buf(),
            ..config
        };
        let engine = SyncEngine::open(config, remote.handle())?;
        Ok(Self {
            engine,
            _temp_dir: temp_dir,
        })
    }

    /// The sync folder.
    pub fn path(&self) -> &Path {
        self.engine.root()
    }

    /// Absolute path of `rel`.
    pub fn join(&self, rel: &str) -> PathBuf {
        self.path().join(rel)
    }

    /// Writes `data` to `rel`, creating parent folders.
    pub fn write(&self, rel: &str, data: &[u8]) {
        let path = self.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent folders");
        }
        fs::write(path, data).expect("Failed to write file");
    }

    /// Reads `rel`.
    pub fn read(&self, rel: &str) -> Vec<u8> {
        fs::read(self.join(rel)).expect("Failed to read file")
    }

    /// Returns true if `rel` exists.
    pub fn exists(&self, rel: &str) -> bool {
        self.join(rel).symlink_metadata().is_ok()
    }

    /// Removes the file at `rel`.
    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.join(rel)).expect("Failed to remove file");
    }

    /// Renames `from` to `to`.
    pub fn rename(&self, from: &str, to: &str) {
        fs::rename(self.join(from), self.join(to)).expect("Failed to rename file");
    }

    /// Regular files below the sync folder, by relative path.
    pub fn files(&self) -> BTreeMap<String, Vec<u8>> {
        read_tree(self.path())
    }
}

impl Deref for TestReplica {
    type Target = SyncEngine<InMemoryTransfer>;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Replicas sharing one in-memory repository.
pub struct TestCluster {
    remote: InMemoryTransfer,
    password: Option<String>,
}

impl TestCluster {
    /// Creates a cluster with a plaintext repository.
    pub fn new() -> Self {
        init_tracing();
        Self {
            remote: InMemoryTransfer::new(),
            password: None,
        }
    }

    /// Creates a cluster whose repository is encrypted with `password`.
    pub fn encrypted(password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Self::new()
        }
    }

    /// The shared repository.
    pub fn remote(&self) -> &InMemoryTransfer {
        &self.remote
    }

    /// Opens replica `name` with the test defaults.
    pub fn replica(&self, name: &str) -> TestReplica {
        self.replica_with(name, |config| config)
    }

    /// Opens replica `name` after `customize` adjusted its configuration.
    pub fn replica_with(
        &self,
        name: &str,
        customize: impl FnOnce(SyncConfig) -> SyncConfig,
    ) -> TestReplica {
        match self.try_replica_with(name, customize) {
            Ok(replica) => replica,
            Err(err) => panic!("Failed to open replica {name}: {err}"),
        }
    }

    /// Like [`replica_with`](Self::replica_with), returning the open error.
    ///
    /// # Errors
    ///
    /// Returns the error of [`SyncEngine::open`].
    pub fn try_replica_with(
        &self,
        name: &str,
        customize: impl FnOnce(SyncConfig) -> SyncConfig,
    ) -> SyncResult<TestReplica> {
        let mut config = test_config(name, PathBuf::new());
        config.password = self.password.clone();
        TestReplica::open(customize(config), &self.remote)
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes every file of `tree` below `root`.
pub fn write_tree(root: &Path, tree: &BTreeMap<String, Vec<u8>>) {
    for (rel, data) in tree {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent folders");
        }
        fs::write(path, data).expect("Failed to write file");
    }
}

/// Regular files below `root`, skipping engine metadata.
pub fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == META_DIR))
        .map(|e| e.expect("Failed to walk sync folder"))
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .expect("Entry outside root")
                .to_string_lossy()
                .replace('\\', "/");
            (rel, fs::read(e.path()).expect("Failed to read file"))
        })
        .collect()
}
