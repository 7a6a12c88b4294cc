//! Transfer port trait definition.

use crate::error::TransferResult;
use crate::remote_file::{RemoteFile, RemoteFileDescriptor, RemoteFileKind};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Access to a repository on a remote store.
///
/// This trait abstracts the concrete remote (in-memory, local folder, or any
/// network protocol adapter). Implementations must be thread-safe.
///
/// # Contract
///
/// - Every operation connects on demand if the port is not connected
/// - `upload` is atomic from a reader's point of view: a listed file is
///   always complete
/// - `download` never leaves a partial file at `local`
/// - `list` reports only names that parse as the requested kind
///
/// # Implementors
///
/// - [`InMemoryTransfer`](crate::InMemoryTransfer)
/// - [`LocalTransfer`](crate::LocalTransfer)
/// - [`RetryingTransfer`](crate::RetryingTransfer)
pub trait TransferPort: Send + Sync {
    /// Opens a session with the remote.
    fn connect(&self) -> TransferResult<()>;

    /// Closes the session. Safe to call when not connected.
    fn disconnect(&self) -> TransferResult<()>;

    /// Verifies the repository layout exists, creating it when
    /// `create_if_missing` is set.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::RepositoryMissing`](crate::TransferError::RepositoryMissing)
    /// when the layout is absent and may not be created.
    fn init(&self, create_if_missing: bool) -> TransferResult<()>;

    /// Stores `data` as `remote`, replacing any existing object.
    fn upload(&self, data: &[u8], remote: &RemoteFile) -> TransferResult<()>;

    /// Fetches `remote` into the local file `local`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`](crate::TransferError::NotFound)
    /// if the object does not exist.
    fn download(&self, remote: &RemoteFile, local: &Path) -> TransferResult<()>;

    /// Removes `remote`. Returns false if it did not exist.
    fn delete(&self, remote: &RemoteFile) -> TransferResult<bool>;

    /// Lists all objects of `kind`, keyed by file name.
    fn list(&self, kind: RemoteFileKind) -> TransferResult<BTreeMap<String, RemoteFileDescriptor>>;
}

impl<T: TransferPort + ?Sized> TransferPort for Arc<T> {
    fn connect(&self) -> TransferResult<()> {
        (**self).connect()
    }

    fn disconnect(&self) -> TransferResult<()> {
        (**self).disconnect()
    }

    fn init(&self, create_if_missing: bool) -> TransferResult<()> {
        (**self).init(create_if_missing)
    }

    fn upload(&self, data: &[u8], remote: &RemoteFile) -> TransferResult<()> {
        (**self).upload(data, remote)
    }

    fn download(&self, remote: &RemoteFile, local: &Path) -> TransferResult<()> {
        (**self).download(remote, local)
    }

    fn delete(&self, remote: &RemoteFile) -> TransferResult<bool> {
        (**self).delete(remote)
    }

    fn list(&self, kind: RemoteFileKind) -> TransferResult<BTreeMap<String, RemoteFileDescriptor>> {
        (**self).list(kind)
    }
}
