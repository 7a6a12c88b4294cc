//! The sync engine.

use crate::apply::apply_snapshot;
use crate::config::SyncConfig;
use crate::dir::SyncDir;
use crate::error::{SyncError, SyncResult};
use crate::indexer::{self, ChunkedFile, LocalChanges};
use crate::local_state::{LocalEntry, LocalState};
use crate::remote::{download_bytes, open_repository, repository_crypto, RemoteMultiChunks};
use crate::state::{CleanupResult, DownResult, SyncCycleResult, SyncState, SyncStats, UpResult};
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use syncvault_core::{
    cleanup_candidates, reclaimable_bytes, CancelFlag, ChunkStore, Chunker, CoreError,
    CryptoManager, HistoryModel, MergedHistory, MultiChunkCache, MultiChunkFetcher,
    RestoreRequest, RestoredFile, SealedMultiChunk,
};
use syncvault_protocol::{
    DatabaseVersion, DatabaseVersionKey, FileType, ReplicaId, Timestamp,
};
use syncvault_storage::{
    ActionKind, RemoteFile, RemoteFileKind, RetryingTransfer, TransferPort,
};
use tracing::{debug, info, warn};

/// Local index and publish queue, persisted with the history.
#[derive(Debug, Default)]
struct LocalBook {
    index: BTreeMap<String, LocalEntry>,
    pending_publish: Vec<DatabaseVersionKey>,
}

/// Synchronizes one sync folder with a repository.
///
/// Every remote call goes through a [`RetryingTransfer`]. Cycles (`down`,
/// `up`, `sync`, `cleanup`) are serialized; restores and snapshots can run
/// concurrently with a cycle.
pub struct SyncEngine<T: TransferPort> {
    config: SyncConfig,
    transfer: RetryingTransfer<T>,
    dir: SyncDir,
    history: Mutex<HistoryModel>,
    local: Mutex<LocalBook>,
    crypto: Option<Arc<CryptoManager>>,
    chunker: Chunker,
    cache: Arc<MultiChunkCache>,
    pool: ThreadPool,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancel: CancelFlag,
    running: Mutex<()>,
}

impl<T: TransferPort> SyncEngine<T> {
    /// Opens the sync folder and connects it to the repository behind
    /// `transfer`.
    ///
    /// # Errors
    ///
    /// Returns configuration errors, [`SyncError::Locked`] if another
    /// engine holds the folder, transfer errors, and
    /// [`SyncError::RepositoryMismatch`] if the password setting does not
    /// fit the repository.
    pub fn open(config: SyncConfig, transfer: T) -> SyncResult<Self> {
        config.validate()?;
        let dir = SyncDir::open(&config.root)?;
        let transfer = RetryingTransfer::new(transfer, config.retry.clone());

        transfer.init(config.create_repository)?;
        let manifest = open_repository(&transfer, &dir.tmp_dir(), &config)?;
        let crypto = repository_crypto(&manifest, config.password.as_deref())?;

        let state = match dir.load_state()? {
            Some(state) if state.replica == config.replica => state,
            Some(state) => {
                return Err(SyncError::invalid_config(format!(
                    "sync folder belongs to replica {}, not {}",
                    state.replica, config.replica
                )))
            }
            None => LocalState::new(config.replica.clone()),
        };
        let history = HistoryModel::from_known(config.replica.clone(), state.known);

        let chunker = Chunker::new(config.chunker)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("syncvault-indexer-{i}"))
            .build()
            .map_err(|e| SyncError::invalid_config(format!("worker pool: {e}")))?;

        info!(
            replica = %config.replica,
            root = %config.root.display(),
            encrypted = crypto.is_some(),
            known = history.known_versions().count(),
            "opened sync engine"
        );

        Ok(Self {
            cache: Arc::new(MultiChunkCache::new(config.cache_capacity)),
            transfer,
            dir,
            history: Mutex::new(history),
            local: Mutex::new(LocalBook {
                index: state.index,
                pending_publish: state.pending_publish,
            }),
            crypto,
            chunker,
            pool,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancel: CancelFlag::new(),
            running: Mutex::new(()),
            config,
        })
    }

    /// This replica's id.
    pub fn replica(&self) -> &ReplicaId {
        &self.config.replica
    }

    /// The sync folder.
    pub fn root(&self) -> &Path {
        self.dir.root()
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The retrying port every remote call goes through.
    pub fn transfer(&self) -> &RetryingTransfer<T> {
        &self.transfer
    }

    /// Consistent read view of the merged history.
    pub fn snapshot(&self) -> Arc<MergedHistory> {
        self.history.lock().snapshot()
    }

    /// Cancels the running cycle or restore.
    ///
    /// The flag is cleared when the next cycle starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Runs `f` as one cycle: serialized, state tracked, errors recorded.
    fn cycle<R>(&self, name: &str, f: impl FnOnce() -> SyncResult<R>) -> SyncResult<R> {
        let Some(_guard) = self.running.try_lock() else {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: name.into(),
            });
        };
        if self.state().is_active() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: name.into(),
            });
        }
        self.cancel.reset();

        self.set_state(SyncState::Connecting);
        let result = self.transfer.connect().map_err(SyncError::from).and_then(|()| f());
        match &result {
            Ok(_) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(err) => {
                warn!(replica = %self.config.replica, cycle = name, error = %err, "cycle failed");
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(err.to_string());
            }
        }
        result
    }

    /// Downloads unknown database versions, merges them and, unless
    /// disabled, writes the merged state into the sync folder.
    ///
    /// # Errors
    ///
    /// Returns transfer, integrity and I/O errors. Versions merged before a
    /// failure stay merged.
    pub fn down(&self) -> SyncResult<DownResult> {
        self.cycle("down", || self.run_down())
    }

    /// Indexes the sync folder and publishes local changes as one database
    /// version.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RepositoryBusy`] while another replica cleans
    /// up, plus transfer, integrity and I/O errors. Nothing is recorded
    /// when the cycle fails before sealing.
    pub fn up(&self) -> SyncResult<UpResult> {
        self.cycle("up", || self.run_up())
    }

    /// Runs `down`, then `up`.
    ///
    /// # Errors
    ///
    /// See [`down`](Self::down) and [`up`](Self::up).
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.cycle("sync", || {
            let down = self.run_down()?;
            self.cancel.check()?;
            let up = self.run_up()?;
            Ok(SyncCycleResult {
                down,
                up,
                duration: start.elapsed(),
            })
        })
    }

    /// Deletes multichunks no live file needs, after announcing the removal
    /// in a database version.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RepositoryBusy`] while another replica uploads
    /// or cleans up, plus transfer errors.
    pub fn cleanup(&self) -> SyncResult<CleanupResult> {
        self.cycle("cleanup", || {
            self.run_down()?;
            self.set_state(SyncState::CleaningUp);
            let marker = self.acquire_action(ActionKind::Cleanup)?;
            let result = self.run_cleanup();
            self.release_action(&marker);
            result
        })
    }

    /// Restores a file version below the sync folder.
    ///
    /// # Errors
    ///
    /// Returns selection, integrity, transfer and I/O errors.
    pub fn restore(&self, request: &RestoreRequest) -> SyncResult<RestoredFile> {
        self.restore_into(request, self.dir.root())
    }

    /// Restores a file version below `root`.
    ///
    /// # Errors
    ///
    /// See [`restore`](Self::restore).
    pub fn restore_into(&self, request: &RestoreRequest, root: &Path) -> SyncResult<RestoredFile> {
        let snapshot = self.snapshot();
        let fetcher = self.fetcher();
        Ok(syncvault_core::restore(
            &snapshot,
            request,
            root,
            &fetcher,
            &self.cancel,
        )?)
    }

    fn fetcher(&self) -> MultiChunkFetcher<RemoteMultiChunks<'_, RetryingTransfer<T>>> {
        MultiChunkFetcher::new(
            RemoteMultiChunks::new(&self.transfer, self.dir.tmp_dir()),
            Arc::clone(&self.cache),
            self.crypto.clone(),
        )
    }

    fn run_down(&self) -> SyncResult<DownResult> {
        self.set_state(SyncState::Downloading);
        let listed = self.transfer.list(RemoteFileKind::Database)?;

        let mut fresh = Vec::new();
        {
            let history = self.history.lock();
            for descriptor in listed.values() {
                let Some((replica, sequence)) = descriptor.file.database_key() else {
                    continue;
                };
                let key = DatabaseVersionKey::new(ReplicaId::new(replica)?, sequence);
                if !history.contains(&key) {
                    fresh.push((key, descriptor.file.clone()));
                }
            }
        }

        let mut downloaded = Vec::with_capacity(fresh.len());
        for (key, remote) in &fresh {
            self.cancel.check()?;
            let bytes = download_bytes(&self.transfer, remote, &self.dir.tmp_dir())?;
            let dv =
                HistoryModel::load_remote_database_version(&bytes, key, self.crypto.as_deref())?;
            debug!(key = %key, files = dv.file_versions.len(), "downloaded database version");
            downloaded.push(dv);
        }

        let count = downloaded.len();
        let (report, snapshot) = {
            let mut history = self.history.lock();
            let report = history.merge(downloaded)?;
            (report, history.snapshot())
        };
        for marker in &report.conflicts {
            warn!(
                kind = ?marker.kind,
                history = %marker.history_id,
                path = %marker.path,
                loser = %marker.loser,
                winner = %marker.winner,
                "conflicting versions kept side by side"
            );
        }
        for deferred in &report.deferred {
            debug!(key = %deferred.key, reason = ?deferred.reason, "database version deferred");
        }

        let outcome = if self.config.apply_remote_changes {
            let fetcher = self.fetcher();
            let mut local = self.local.lock();
            apply_snapshot(
                self.dir.root(),
                &snapshot,
                &mut local.index,
                &fetcher,
                &self.cancel,
            )
        } else {
            Ok(Default::default())
        };
        // Keep what was applied even if applying stopped early.
        self.save_state()?;
        let outcome = outcome?;

        {
            let mut stats = self.stats.write();
            stats.database_versions_downloaded += count as u64;
            stats.conflicts_encountered += report.conflicts.len() as u64;
            stats.files_applied += (outcome.written + outcome.removed) as u64;
        }
        info!(
            replica = %self.config.replica,
            downloaded = count,
            applied = report.applied.len(),
            written = outcome.written,
            removed = outcome.removed,
            "down finished"
        );
        Ok(DownResult {
            downloaded: count,
            report,
            files_written: outcome.written,
            files_removed: outcome.removed,
        })
    }

    fn run_up(&self) -> SyncResult<UpResult> {
        self.set_state(SyncState::Indexing);
        let marker = self.acquire_action(ActionKind::Up)?;
        let result = self.publish_local_changes();
        self.release_action(&marker);
        result
    }

    fn publish_local_changes(&self) -> SyncResult<UpResult> {
        let mut result = UpResult {
            republished: self.republish_pending()?,
            ..UpResult::default()
        };

        let scanned = indexer::scan(self.dir.root(), &self.cancel)?;
        let changes = indexer::diff(&self.local.lock().index, &scanned);
        if changes.is_empty() {
            debug!(replica = %self.config.replica, "no local changes");
            return Ok(result);
        }

        let (files, others): (Vec<_>, Vec<_>) = changes
            .changed
            .iter()
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .partition(|(_, entry)| entry.file_type == FileType::File);
        let chunked =
            indexer::chunk_files(&self.pool, &self.chunker, self.dir.root(), files, &self.cancel)?;

        self.set_state(SyncState::Uploading);
        let sealed = self.upload_multichunks(&chunked, &mut result)?;

        let recorded = {
            let mut history = self.history.lock();
            history.begin_database_version()?;
            let index = self.local.lock().index.clone();
            match record_changes(&mut history, &sealed, &changes, &chunked, &others, &index) {
                Ok(count) if !history.has_changes() => {
                    history.abort_database_version();
                    Ok((count, None))
                }
                Ok(count) => history
                    .seal_database_version()
                    .map(|dv| (count, Some(dv)))
                    .map_err(SyncError::from),
                Err(err) => {
                    history.abort_database_version();
                    Err(err)
                }
            }
        };
        let (file_versions, dv) = recorded?;

        {
            let mut local = self.local.lock();
            for path in &changes.deleted {
                local.index.remove(path);
            }
            for file in &chunked {
                local.index.insert(file.path.clone(), file.entry.clone());
            }
            for (path, entry) in &others {
                local.index.insert(path.clone(), entry.clone());
            }
            if let Some(dv) = &dv {
                local.pending_publish.push(dv.key());
            }
        }
        self.save_state()?;

        if let Some(dv) = dv {
            self.publish(&dv)?;
            result.published = Some(dv.key());
            result.file_versions = file_versions;
        }
        info!(
            replica = %self.config.replica,
            published = ?result.published.as_ref().map(ToString::to_string),
            file_versions = result.file_versions,
            multichunks = result.multichunks_uploaded,
            "up finished"
        );
        Ok(result)
    }

    /// Packs new chunks into multichunks and uploads them, in file order.
    fn upload_multichunks(
        &self,
        chunked: &[ChunkedFile],
        result: &mut UpResult,
    ) -> SyncResult<Vec<SealedMultiChunk>> {
        let mut store =
            ChunkStore::new(self.config.chunk_store, self.chunker.config(), self.crypto.clone())?;
        store.seed(self.snapshot().index());

        let mut uploaded = Vec::new();
        for file in chunked {
            for chunk in &file.chunks {
                store.add_chunk(chunk);
                if store.has_full_multichunk() {
                    if let Some(mc) = store.seal_multichunk()? {
                        self.upload_multichunk(&mc, result)?;
                        uploaded.push(mc);
                    }
                }
            }
            self.cancel.check()?;
        }
        for mc in store.seal_all()? {
            self.upload_multichunk(&mc, result)?;
            uploaded.push(mc);
        }
        store.drain_uploads();
        Ok(uploaded)
    }

    fn upload_multichunk(&self, mc: &SealedMultiChunk, result: &mut UpResult) -> SyncResult<()> {
        self.cancel.check()?;
        let remote = RemoteFile::multichunk(&mc.id.to_hex())?;
        self.transfer.upload(&mc.data, &remote)?;
        result.multichunks_uploaded += 1;
        result.bytes_uploaded += mc.record.stored_size;

        let mut stats = self.stats.write();
        stats.multichunks_uploaded += 1;
        stats.bytes_uploaded += mc.record.stored_size;
        debug!(multichunk = %mc.id, chunks = mc.record.chunk_count, "uploaded multichunk");
        Ok(())
    }

    /// Uploads a sealed database version and drops it from the publish
    /// queue.
    fn publish(&self, dv: &DatabaseVersion) -> SyncResult<()> {
        let key = dv.key();
        let bytes = HistoryModel::encode_database_version(dv, self.crypto.as_deref())?;
        let remote = RemoteFile::database(key.replica.as_str(), key.sequence)?;
        if let Err(err) = self.transfer.upload(&bytes, &remote) {
            warn!(key = %key, error = %err, "database version stays queued for upload");
            return Err(err.into());
        }
        self.local.lock().pending_publish.retain(|k| *k != key);
        self.stats.write().database_versions_published += 1;
        self.save_state()?;
        info!(key = %key, remote = %remote, "published database version");
        Ok(())
    }

    /// Uploads database versions sealed by earlier cycles that never made
    /// it to the repository.
    fn republish_pending(&self) -> SyncResult<usize> {
        let pending = self.local.lock().pending_publish.clone();
        let mut count = 0;
        for key in pending {
            let dv = self.history.lock().get(&key).cloned();
            match dv {
                Some(dv) => {
                    self.publish(&dv)?;
                    count += 1;
                }
                None => {
                    warn!(key = %key, "queued database version is unknown, dropping it");
                    self.local.lock().pending_publish.retain(|k| *k != key);
                }
            }
        }
        Ok(count)
    }

    fn run_cleanup(&self) -> SyncResult<CleanupResult> {
        let snapshot = self.snapshot();
        let candidates = cleanup_candidates(&snapshot);
        if candidates.is_empty() {
            debug!(replica = %self.config.replica, "nothing to clean up");
            return Ok(CleanupResult::default());
        }
        let reclaimed_bytes = reclaimable_bytes(&snapshot, &candidates);

        let dv = {
            let mut history = self.history.lock();
            history.begin_database_version()?;
            let recorded = history
                .record_multichunk_removal(candidates.iter().copied())
                .and_then(|()| history.seal_database_version());
            if recorded.is_err() {
                history.abort_database_version();
            }
            recorded?
        };
        self.local.lock().pending_publish.push(dv.key());
        self.save_state()?;
        self.publish(&dv)?;

        for id in &candidates {
            self.cancel.check()?;
            let remote = RemoteFile::multichunk(&id.to_hex())?;
            if !self.transfer.delete(&remote)? {
                debug!(multichunk = %id, "multichunk was already gone");
            }
        }
        self.stats.write().multichunks_removed += candidates.len() as u64;
        info!(
            replica = %self.config.replica,
            removed = candidates.len(),
            reclaimed_bytes,
            "cleanup finished"
        );
        Ok(CleanupResult {
            removed: candidates,
            reclaimed_bytes,
            published: Some(dv.key()),
        })
    }

    /// Announces `kind` with an action marker.
    ///
    /// The marker is written before other replicas' markers are checked,
    /// so two replicas starting excluded actions at once both back off.
    fn acquire_action(&self, kind: ActionKind) -> SyncResult<RemoteFile> {
        let replica = self.config.replica.as_str();
        let marker = RemoteFile::action(kind, replica, Timestamp::now().as_millis())?;
        self.transfer.upload(replica.as_bytes(), &marker)?;

        match self.blocking_action(kind, &marker) {
            Ok(None) => Ok(marker),
            Ok(Some(busy)) => {
                self.release_action(&marker);
                Err(busy)
            }
            Err(err) => {
                self.release_action(&marker);
                Err(err)
            }
        }
    }

    /// Finds a fresh marker of another replica that excludes `kind`, and
    /// removes this replica's leftover markers.
    fn blocking_action(
        &self,
        kind: ActionKind,
        own: &RemoteFile,
    ) -> SyncResult<Option<SyncError>> {
        let now = Timestamp::now().as_millis();
        let timeout = u64::try_from(self.config.action_timeout.as_millis()).unwrap_or(u64::MAX);

        for descriptor in self.transfer.list(RemoteFileKind::Action)?.values() {
            let Some((other, replica, started)) = descriptor.file.action_info() else {
                continue;
            };
            if replica == self.config.replica.as_str() {
                if descriptor.file != *own {
                    debug!(marker = %descriptor.file, "removing leftover action marker");
                    self.release_action(&descriptor.file);
                }
                continue;
            }
            let excludes = kind == ActionKind::Cleanup || other == ActionKind::Cleanup;
            if !excludes {
                continue;
            }
            if now.saturating_sub(started) > timeout {
                debug!(marker = %descriptor.file, "ignoring stale action marker");
                continue;
            }
            return Ok(Some(SyncError::RepositoryBusy {
                replica: replica.to_string(),
                action: action_label(other),
            }));
        }
        Ok(None)
    }

    fn release_action(&self, marker: &RemoteFile) {
        if let Err(err) = self.transfer.delete(marker) {
            warn!(marker = %marker, error = %err, "failed to remove action marker");
        }
    }

    fn save_state(&self) -> SyncResult<()> {
        let known = self
            .history
            .lock()
            .known_versions()
            .map(|dv| (**dv).clone())
            .collect();
        let local = self.local.lock();
        let state = LocalState {
            replica: self.config.replica.clone(),
            known,
            pending_publish: local.pending_publish.clone(),
            index: local.index.clone(),
        };
        drop(local);
        self.dir.save_state(&state)
    }
}

fn action_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Up => "up",
        ActionKind::Cleanup => "cleanup",
    }
}

/// Records `changes` into the open batch. Returns the number of file
/// versions recorded.
///
/// A deleted file whose content reappears under a new path is recorded as
/// a move. Files whose content did not change are not recorded.
fn record_changes(
    history: &mut HistoryModel,
    sealed: &[SealedMultiChunk],
    changes: &LocalChanges,
    chunked: &[ChunkedFile],
    others: &[(String, LocalEntry)],
    index: &BTreeMap<String, LocalEntry>,
) -> SyncResult<usize> {
    for mc in sealed {
        history.register_multichunk(mc)?;
    }

    let mut recorded = 0;
    let mut moved_from = HashSet::new();
    for file in chunked {
        let refs = file.refs();
        let metadata = file.entry.to_metadata();

        if let Some(old) = index.get(&file.path) {
            let same = old.file_type == FileType::File
                && old.checksum.is_some()
                && old.checksum == file.entry.checksum
                && old.permissions == file.entry.permissions;
            if same {
                continue;
            }
        } else if let Some(from) = changes.deleted.iter().find(|path| {
            !moved_from.contains(*path)
                && index.get(*path).is_some_and(|old| {
                    old.checksum.is_some() && old.checksum == file.entry.checksum
                })
        }) {
            match history.record_move(from, &file.path, metadata.clone(), &refs) {
                Ok(_) => {
                    debug!(from = %from, to = %file.path, "recorded move");
                    moved_from.insert(from.clone());
                    recorded += 1;
                    continue;
                }
                Err(CoreError::PathNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        history.record_version(&file.path, metadata, &refs)?;
        recorded += 1;
    }

    for (path, entry) in others {
        history.record_version(path, entry.to_metadata(), &[])?;
        recorded += 1;
    }

    for path in &changes.deleted {
        if moved_from.contains(path) {
            continue;
        }
        match history.record_deletion(path) {
            Ok(_) => recorded += 1,
            Err(CoreError::PathNotFound { .. }) => {
                debug!(path = %path, "deleted entry was never recorded");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use syncvault_storage::{InMemoryTransfer, RetryPolicy};
    use tempfile::tempdir;

    fn open(root: &Path, remote: &InMemoryTransfer) -> SyncEngine<InMemoryTransfer> {
        let config = SyncConfig::new(ReplicaId::new("alpha").unwrap(), root)
            .with_workers(2)
            .with_retry(RetryPolicy::no_retry());
        match SyncEngine::open(config, remote.handle()) {
            Ok(engine) => engine,
            Err(err) => panic!("open failed: {err}"),
        }
    }

    #[test]
    fn sync_engine_initial_state() {
        let dir = tempdir().unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);

        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().cycles_completed, 0);
        assert!(remote.contains(&RemoteFile::repo()));
        assert!(engine.snapshot().live_files().is_empty());
    }

    #[test]
    fn empty_folder_publishes_nothing() {
        let dir = tempdir().unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);

        let result = engine.sync().unwrap();
        assert_eq!(result.down.downloaded, 0);
        assert_eq!(result.up.published, None);
        assert_eq!(engine.state(), SyncState::Synced);
        assert_eq!(remote.count(RemoteFileKind::Database), 0);
        assert_eq!(remote.count(RemoteFileKind::Action), 0);
    }

    #[test]
    fn up_publishes_once() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"first file").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"second file").unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);

        let up = engine.up().unwrap();
        let key = up.published.clone().unwrap();
        assert_eq!(key.to_string(), "alpha/1");
        assert_eq!(up.file_versions, 3);
        assert!(up.multichunks_uploaded >= 1);
        assert!(remote.contains(&RemoteFile::database("alpha", 1).unwrap()));
        assert_eq!(engine.stats().database_versions_published, 1);

        let again = engine.up().unwrap();
        assert_eq!(again.published, None);
        assert_eq!(again.multichunks_uploaded, 0);
    }

    #[test]
    fn second_engine_on_same_folder_is_locked() {
        let dir = tempdir().unwrap();
        let remote = InMemoryTransfer::new();
        let _engine = open(dir.path(), &remote);

        let config = SyncConfig::new(ReplicaId::new("alpha").unwrap(), dir.path());
        assert!(matches!(
            SyncEngine::open(config, remote.handle()),
            Err(SyncError::Locked { .. })
        ));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("kept.txt"), b"persisted").unwrap();
        let remote = InMemoryTransfer::new();
        {
            let engine = open(dir.path(), &remote);
            engine.up().unwrap();
        }

        let engine = open(dir.path(), &remote);
        assert!(engine.snapshot().live_at("kept.txt").is_some());
        assert_eq!(engine.up().unwrap().published, None);
        assert_eq!(engine.down().unwrap().downloaded, 0);
    }

    #[test]
    fn foreign_cleanup_blocks_up() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"waiting").unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);

        let marker =
            RemoteFile::action(ActionKind::Cleanup, "beta", Timestamp::now().as_millis()).unwrap();
        remote.upload(b"beta", &marker).unwrap();

        assert!(matches!(
            engine.up(),
            Err(SyncError::RepositoryBusy { ref replica, action: "cleanup" }) if replica == "beta"
        ));
        assert_eq!(engine.state(), SyncState::Error);
        assert!(engine.stats().last_error.is_some());
        // Only the foreign marker is left.
        assert_eq!(remote.count(RemoteFileKind::Action), 1);
        assert_eq!(remote.count(RemoteFileKind::Database), 0);
    }

    #[test]
    fn stale_markers_are_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"not waiting").unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);

        let stale = RemoteFile::action(ActionKind::Cleanup, "beta", 1).unwrap();
        remote.upload(b"beta", &stale).unwrap();
        let concurrent_up =
            RemoteFile::action(ActionKind::Up, "gamma", Timestamp::now().as_millis()).unwrap();
        remote.upload(b"gamma", &concurrent_up).unwrap();

        assert!(engine.up().unwrap().published.is_some());
    }

    #[test]
    fn failed_publish_is_retried_next_cycle() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"queued").unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);

        remote.fail_kind(RemoteFileKind::Database, 1, false);
        assert!(matches!(engine.up(), Err(SyncError::Transfer(_))));
        assert_eq!(engine.state(), SyncState::Error);
        assert!(!remote.contains(&RemoteFile::database("alpha", 1).unwrap()));
        // The sealed version is already part of the local history.
        assert!(engine.snapshot().live_at("a.txt").is_some());

        let up = engine.up().unwrap();
        assert_eq!(up.republished, 1);
        assert_eq!(up.published, None);
        assert!(remote.contains(&RemoteFile::database("alpha", 1).unwrap()));
    }

    #[test]
    fn cleanup_without_garbage_is_a_no_op() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"live").unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);
        engine.up().unwrap();

        let result = engine.cleanup().unwrap();
        assert!(result.removed.is_empty());
        assert_eq!(result.published, None);
        assert_eq!(remote.count(RemoteFileKind::Action), 0);
    }

    #[test]
    fn cleanup_removes_multichunks_of_deleted_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("gone.txt"), b"about to be deleted").unwrap();
        let remote = InMemoryTransfer::new();
        let engine = open(dir.path(), &remote);
        engine.up().unwrap();
        let uploaded = remote.count(RemoteFileKind::MultiChunk);
        assert!(uploaded >= 1);

        fs::remove_file(dir.path().join("gone.txt")).unwrap();
        engine.up().unwrap();
        let result = engine.cleanup().unwrap();

        assert_eq!(result.removed.len(), uploaded);
        assert!(result.reclaimed_bytes > 0);
        assert_eq!(remote.count(RemoteFileKind::MultiChunk), 0);
        assert_eq!(result.published.unwrap().to_string(), "alpha/3");
    }
}
