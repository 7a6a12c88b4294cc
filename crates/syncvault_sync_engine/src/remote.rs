//! Repository access on top of a transfer port.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use syncvault_core::{
    generate_salt, CoreError, CoreResult, CryptoManager, EncryptionKey, MultiChunkSource,
};
use syncvault_protocol::{MultiChunkId, RepoManifest};
use syncvault_storage::{RemoteFile, RemoteFileKind, TransferError, TransferPort, REPO_FILE_NAME};
use tracing::{debug, info};

/// Downloads `remote` through a scratch file under `tmp` and returns its bytes.
///
/// # Errors
///
/// Returns the transfer error or a local I/O error.
pub(crate) fn download_bytes<T: TransferPort + ?Sized>(
    transfer: &T,
    remote: &RemoteFile,
    tmp: &Path,
) -> SyncResult<Vec<u8>> {
    let scratch = tempfile::Builder::new().prefix("download-").tempdir_in(tmp)?;
    let local = scratch.path().join("object");
    transfer.download(remote, &local)?;
    let bytes = fs::read(&local)?;
    debug!(remote = %remote, bytes = bytes.len(), "downloaded");
    Ok(bytes)
}

/// Reads the repository marker, creating the repository's marker first when
/// allowed.
///
/// After creating a marker it is read back, so replicas racing to create
/// the same repository settle on whichever marker landed last.
///
/// # Errors
///
/// Returns [`TransferError::RepositoryMissing`] if there is no marker and
/// creation is disabled.
pub(crate) fn open_repository<T: TransferPort + ?Sized>(
    transfer: &T,
    tmp: &Path,
    config: &SyncConfig,
) -> SyncResult<RepoManifest> {
    let listed = transfer.list(RemoteFileKind::Repo)?;
    if !listed.contains_key(REPO_FILE_NAME) {
        if !config.create_repository {
            return Err(TransferError::RepositoryMissing {
                location: RemoteFile::repo().path(),
            }
            .into());
        }
        let manifest = match config.password {
            Some(_) => RepoManifest::encrypted(generate_salt()),
            None => RepoManifest::plaintext(),
        };
        transfer.upload(&manifest.encode()?, &RemoteFile::repo())?;
        info!(
            replica = %config.replica,
            encrypted = manifest.is_encrypted(),
            "created repository"
        );
    }
    let bytes = download_bytes(transfer, &RemoteFile::repo(), tmp)?;
    Ok(RepoManifest::decode(&bytes)?)
}

/// Derives the repository key from the configured password.
///
/// # Errors
///
/// Returns [`SyncError::RepositoryMismatch`] if the password setting does not
/// match the repository.
pub(crate) fn repository_crypto(
    manifest: &RepoManifest,
    password: Option<&str>,
) -> SyncResult<Option<Arc<CryptoManager>>> {
    match (&manifest.encryption, password) {
        (Some(info), Some(password)) => {
            let key = EncryptionKey::derive_from_password(password.as_bytes(), &info.salt)?;
            Ok(Some(Arc::new(CryptoManager::new(key))))
        }
        (None, None) => Ok(None),
        (Some(_), None) => Err(SyncError::RepositoryMismatch {
            message: "repository is encrypted but no password is configured".into(),
        }),
        (None, Some(_)) => Err(SyncError::RepositoryMismatch {
            message: "repository is not encrypted but a password is configured".into(),
        }),
    }
}

/// Multichunks downloaded on demand from the repository.
pub(crate) struct RemoteMultiChunks<'a, T: ?Sized> {
    transfer: &'a T,
    tmp: PathBuf,
}

impl<'a, T: TransferPort + ?Sized> RemoteMultiChunks<'a, T> {
    pub(crate) fn new(transfer: &'a T, tmp: PathBuf) -> Self {
        Self { transfer, tmp }
    }
}

impl<T: TransferPort + ?Sized> MultiChunkSource for RemoteMultiChunks<'_, T> {
    fn fetch(&self, id: &MultiChunkId) -> CoreResult<Vec<u8>> {
        let fetch = || -> SyncResult<Vec<u8>> {
            let remote = RemoteFile::multichunk(&id.to_hex())?;
            download_bytes(self.transfer, &remote, &self.tmp)
        };
        fetch().map_err(|err| CoreError::MultiChunkFetch {
            multichunk: *id,
            source: Box::new(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncvault_protocol::ReplicaId;
    use syncvault_storage::InMemoryTransfer;
    use tempfile::tempdir;

    fn config(password: Option<&str>) -> SyncConfig {
        let mut config = SyncConfig::new(ReplicaId::new("a").unwrap(), "/unused");
        config.password = password.map(String::from);
        config
    }

    #[test]
    fn creates_then_reads_marker() {
        let tmp = tempdir().unwrap();
        let remote = InMemoryTransfer::new();
        remote.init(true).unwrap();

        let created = open_repository(&remote, tmp.path(), &config(Some("pw"))).unwrap();
        assert!(created.is_encrypted());
        assert!(remote.contains(&RemoteFile::repo()));

        let again = open_repository(&remote, tmp.path(), &config(Some("pw"))).unwrap();
        assert_eq!(again, created);
    }

    #[test]
    fn missing_marker_without_create() {
        let tmp = tempdir().unwrap();
        let remote = InMemoryTransfer::new();
        remote.init(true).unwrap();
        let cfg = config(None).with_create_repository(false);
        assert!(matches!(
            open_repository(&remote, tmp.path(), &cfg),
            Err(SyncError::Transfer(TransferError::RepositoryMissing { .. }))
        ));
    }

    #[test]
    fn password_must_match_repository() {
        let encrypted = RepoManifest::encrypted(generate_salt());
        assert!(repository_crypto(&encrypted, Some("pw")).unwrap().is_some());
        assert!(matches!(
            repository_crypto(&encrypted, None),
            Err(SyncError::RepositoryMismatch { .. })
        ));
        assert!(matches!(
            repository_crypto(&RepoManifest::plaintext(), Some("pw")),
            Err(SyncError::RepositoryMismatch { .. })
        ));
        assert!(repository_crypto(&RepoManifest::plaintext(), None).unwrap().is_none());
    }

    #[test]
    fn missing_multichunk_is_a_fetch_error() {
        let tmp = tempdir().unwrap();
        let remote = InMemoryTransfer::new();
        remote.init(true).unwrap();
        let source = RemoteMultiChunks::new(&remote, tmp.path().to_path_buf());

        let id = MultiChunkId::digest(b"nothing");
        let err = source.fetch(&id).unwrap_err();
        assert!(matches!(err, CoreError::MultiChunkFetch { multichunk, .. } if multichunk == id));
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
