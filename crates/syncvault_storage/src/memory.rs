//! In-memory transfer port for testing.

use crate::error::{TransferError, TransferResult};
use crate::local::persist_atomically;
use crate::port::TransferPort;
use crate::remote_file::{RemoteFile, RemoteFileDescriptor, RemoteFileKind};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct SharedStore {
    objects: RwLock<BTreeMap<(RemoteFileKind, String), Bytes>>,
    initialized: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    kind: Option<RemoteFileKind>,
    remaining: u32,
    retryable: bool,
}

/// An in-process repository.
///
/// Handles created with [`handle`](Self::handle) share the same objects, so
/// several replicas in one test can sync through a single store. Each handle
/// has its own connection state and fault plan.
///
/// # Fault injection
///
/// [`fail_next`](Self::fail_next) and [`fail_kind`](Self::fail_kind) make
/// the next data operations fail. Connecting never fails, which lets a
/// retrying wrapper recover.
///
/// # Example
///
/// ```rust
/// use syncvault_storage::{InMemoryTransfer, RemoteFile, TransferPort};
///
/// let a = InMemoryTransfer::new();
/// a.init(true).unwrap();
/// let b = a.handle();
///
/// a.upload(b"marker", &RemoteFile::repo()).unwrap();
/// assert!(b.contains(&RemoteFile::repo()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryTransfer {
    store: Arc<SharedStore>,
    connected: AtomicBool,
    connects: AtomicU64,
    operations: AtomicU64,
    faults: Mutex<Vec<Fault>>,
}

impl InMemoryTransfer {
    /// Creates an empty, uninitialized store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates another handle onto the same objects.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ..Self::default()
        }
    }

    /// Fails the next `count` data operations of any kind.
    pub fn fail_next(&self, count: u32, retryable: bool) {
        self.faults.lock().push(Fault {
            kind: None,
            remaining: count,
            retryable,
        });
    }

    /// Fails the next `count` data operations touching `kind`.
    pub fn fail_kind(&self, kind: RemoteFileKind, count: u32, retryable: bool) {
        self.faults.lock().push(Fault {
            kind: Some(kind),
            remaining: count,
            retryable,
        });
    }

    /// Clears all pending faults.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Flips one byte in the middle of a stored object.
    ///
    /// Returns false if the object does not exist or is empty.
    pub fn corrupt(&self, remote: &RemoteFile) -> bool {
        let mut objects = self.store.objects.write();
        let Some(data) = objects.get_mut(&key(remote)) else {
            return false;
        };
        if data.is_empty() {
            return false;
        }
        let mut bytes = data.to_vec();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        *data = Bytes::from(bytes);
        true
    }

    /// Returns true if the object exists.
    #[must_use]
    pub fn contains(&self, remote: &RemoteFile) -> bool {
        self.store.objects.read().contains_key(&key(remote))
    }

    /// Returns a copy of a stored object.
    #[must_use]
    pub fn get(&self, remote: &RemoteFile) -> Option<Bytes> {
        self.store.objects.read().get(&key(remote)).cloned()
    }

    /// Number of stored objects of `kind`.
    #[must_use]
    pub fn count(&self, kind: RemoteFileKind) -> usize {
        self.store
            .objects
            .read()
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Number of times this handle established a session.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of data operations attempted through this handle.
    #[must_use]
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// Returns true if this handle has an open session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn begin(&self, kind: RemoteFileKind) -> TransferResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        self.connect()?;
        self.check_fault(kind)?;
        if !self.store.initialized.load(Ordering::SeqCst) {
            return Err(TransferError::RepositoryMissing {
                location: "memory".into(),
            });
        }
        Ok(())
    }

    fn check_fault(&self, kind: RemoteFileKind) -> TransferResult<()> {
        let mut faults = self.faults.lock();
        let Some(fault) = faults
            .iter_mut()
            .find(|f| f.remaining > 0 && f.kind.map_or(true, |k| k == kind))
        else {
            return Ok(());
        };
        fault.remaining -= 1;
        let retryable = fault.retryable;
        faults.retain(|f| f.remaining > 0);
        // A failed operation drops the session, as a real connection would.
        self.connected.store(false, Ordering::SeqCst);
        Err(TransferError::ConnectionFailed {
            message: format!("injected {kind} failure"),
            retryable,
        })
    }
}

fn key(remote: &RemoteFile) -> (RemoteFileKind, String) {
    (remote.kind(), remote.name().to_string())
}

impl TransferPort for InMemoryTransfer {
    fn connect(&self) -> TransferResult<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn disconnect(&self) -> TransferResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn init(&self, create_if_missing: bool) -> TransferResult<()> {
        self.connect()?;
        if self.store.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !create_if_missing {
            return Err(TransferError::RepositoryMissing {
                location: "memory".into(),
            });
        }
        self.store.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn upload(&self, data: &[u8], remote: &RemoteFile) -> TransferResult<()> {
        self.begin(remote.kind())?;
        self.store
            .objects
            .write()
            .insert(key(remote), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn download(&self, remote: &RemoteFile, local: &Path) -> TransferResult<()> {
        self.begin(remote.kind())?;
        let data = self
            .store
            .objects
            .read()
            .get(&key(remote))
            .cloned()
            .ok_or_else(|| TransferError::not_found(remote.path()))?;
        persist_atomically(local, &data)
    }

    fn delete(&self, remote: &RemoteFile) -> TransferResult<bool> {
        self.begin(remote.kind())?;
        Ok(self.store.objects.write().remove(&key(remote)).is_some())
    }

    fn list(&self, kind: RemoteFileKind) -> TransferResult<BTreeMap<String, RemoteFileDescriptor>> {
        self.begin(kind)?;
        let objects = self.store.objects.read();
        Ok(objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .filter_map(|((k, name), data)| {
                let file = RemoteFile::parse(*k, name).ok()?;
                Some((
                    name.clone(),
                    RemoteFileDescriptor {
                        file,
                        size: data.len() as u64,
                    },
                ))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> InMemoryTransfer {
        let store = InMemoryTransfer::new();
        store.init(true).unwrap();
        store
    }

    #[test]
    fn init_without_create_fails_on_empty_store() {
        let store = InMemoryTransfer::new();
        assert!(matches!(
            store.init(false),
            Err(TransferError::RepositoryMissing { .. })
        ));
        store.init(true).unwrap();
        store.init(false).unwrap();
    }

    #[test]
    fn upload_download_delete() {
        let store = store();
        let dir = tempdir().unwrap();
        let file = RemoteFile::database("a", 1).unwrap();

        store.upload(b"payload", &file).unwrap();
        let local = dir.path().join("out");
        store.download(&file, &local).unwrap();
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");

        assert!(store.delete(&file).unwrap());
        assert!(!store.delete(&file).unwrap());
        assert!(matches!(
            store.download(&file, &local),
            Err(TransferError::NotFound { .. })
        ));
    }

    #[test]
    fn list_filters_by_kind() {
        let store = store();
        store.upload(b"1", &RemoteFile::database("a", 1).unwrap()).unwrap();
        store.upload(b"22", &RemoteFile::database("b", 3).unwrap()).unwrap();
        store
            .upload(b"333", &RemoteFile::multichunk(&"0".repeat(64)).unwrap())
            .unwrap();

        let dbs = store.list(RemoteFileKind::Database).unwrap();
        assert_eq!(dbs.len(), 2);
        assert_eq!(dbs["db-b-0000000003"].size, 2);
        assert_eq!(store.list(RemoteFileKind::MultiChunk).unwrap().len(), 1);
        assert!(store.list(RemoteFileKind::Action).unwrap().is_empty());
    }

    #[test]
    fn handles_share_objects() {
        let a = store();
        let b = a.handle();
        a.upload(b"x", &RemoteFile::repo()).unwrap();
        assert_eq!(b.get(&RemoteFile::repo()).unwrap().as_ref(), b"x");
    }

    #[test]
    fn injected_faults_are_consumed() {
        let store = store();
        store.fail_next(2, true);
        let file = RemoteFile::repo();

        let err = store.upload(b"x", &file).unwrap_err();
        assert!(err.is_retryable());
        assert!(!store.is_connected());
        assert!(store.upload(b"x", &file).is_err());
        store.upload(b"x", &file).unwrap();
        assert_eq!(store.operation_count(), 3);
    }

    #[test]
    fn kind_faults_only_hit_their_kind() {
        let store = store();
        store.fail_kind(RemoteFileKind::MultiChunk, 1, false);

        store.upload(b"x", &RemoteFile::repo()).unwrap();
        let err = store
            .upload(b"y", &RemoteFile::multichunk(&"a".repeat(64)).unwrap())
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn corrupt_flips_a_byte() {
        let store = store();
        let file = RemoteFile::repo();
        store.upload(b"abc", &file).unwrap();
        assert!(store.corrupt(&file));
        assert_ne!(store.get(&file).unwrap().as_ref(), b"abc");
    }
}
