//! Local folder transfer port.

use crate::error::{TransferError, TransferResult};
use crate::port::TransferPort;
use crate::remote_file::{RemoteFile, RemoteFileDescriptor, RemoteFileKind, TEMP_PREFIX};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// A repository stored in a directory.
///
/// Suitable for mounted network shares, removable drives and tests. Each
/// kind lives in its own subfolder; the repository marker sits at the root.
#[derive(Debug)]
pub struct LocalTransfer {
    root: PathBuf,
    connected: AtomicBool,
}

impl LocalTransfer {
    /// Creates a port for the repository at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            connected: AtomicBool::new(false),
        }
    }

    /// Repository root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(&self, kind: RemoteFileKind) -> PathBuf {
        match kind.subfolder() {
            Some(sub) => self.root.join(sub),
            None => self.root.clone(),
        }
    }

    fn path_of(&self, remote: &RemoteFile) -> PathBuf {
        self.folder(remote.kind()).join(remote.name())
    }

    fn is_repository(&self) -> bool {
        RemoteFileKind::ALL
            .iter()
            .all(|kind| self.folder(*kind).is_dir())
    }
}

impl TransferPort for LocalTransfer {
    fn connect(&self) -> TransferResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let reachable = match self.root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.is_dir(),
            _ => true,
        };
        if !reachable {
            return Err(TransferError::connection_fatal(format!(
                "parent of {} does not exist",
                self.root.display()
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect(&self) -> TransferResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn init(&self, create_if_missing: bool) -> TransferResult<()> {
        self.connect()?;
        if self.is_repository() {
            return Ok(());
        }
        if !create_if_missing {
            return Err(TransferError::RepositoryMissing {
                location: self.root.display().to_string(),
            });
        }
        for kind in RemoteFileKind::ALL {
            fs::create_dir_all(self.folder(kind))?;
        }
        debug!(root = %self.root.display(), "created local repository");
        Ok(())
    }

    fn upload(&self, data: &[u8], remote: &RemoteFile) -> TransferResult<()> {
        self.connect()?;
        let folder = self.folder(remote.kind());
        let temp = folder.join(remote.temp_name());
        let target = self.path_of(remote);

        let mut file = fs::File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        if let Err(err) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }
        Ok(())
    }

    fn download(&self, remote: &RemoteFile, local: &Path) -> TransferResult<()> {
        self.connect()?;
        let data = match fs::read(self.path_of(remote)) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(TransferError::not_found(remote.path()))
            }
            Err(err) => return Err(err.into()),
        };
        persist_atomically(local, &data)
    }

    fn delete(&self, remote: &RemoteFile) -> TransferResult<bool> {
        self.connect()?;
        match fs::remove_file(self.path_of(remote)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, kind: RemoteFileKind) -> TransferResult<BTreeMap<String, RemoteFileDescriptor>> {
        self.connect()?;
        let folder = self.folder(kind);
        if !folder.is_dir() {
            return Err(TransferError::RepositoryMissing {
                location: folder.display().to_string(),
            });
        }

        let mut listed = BTreeMap::new();
        for entry in fs::read_dir(&folder)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            match RemoteFile::parse(kind, &name) {
                Ok(file) => {
                    listed.insert(
                        name,
                        RemoteFileDescriptor {
                            file,
                            size: metadata.len(),
                        },
                    );
                }
                Err(_) => debug!(%kind, name, "ignoring unrecognized remote file"),
            }
        }
        Ok(listed)
    }
}

/// Writes `data` to a temporary file beside `local` and renames it into place.
pub(crate) fn persist_atomically(local: &Path, data: &[u8]) -> TransferResult<()> {
    let parent = local
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(local).map_err(|err| TransferError::Io(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_layout() {
        let dir = tempdir().unwrap();
        let port = LocalTransfer::new(dir.path().join("repo"));

        assert!(matches!(
            port.init(false),
            Err(TransferError::RepositoryMissing { .. })
        ));
        port.init(true).unwrap();
        assert!(dir.path().join("repo/databases").is_dir());
        assert!(dir.path().join("repo/multichunks").is_dir());
        assert!(dir.path().join("repo/actions").is_dir());
        port.init(false).unwrap();
    }

    #[test]
    fn upload_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let port = LocalTransfer::new(dir.path());
        port.init(true).unwrap();

        let file = RemoteFile::database("a", 2).unwrap();
        port.upload(b"delta", &file).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("databases"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["db-a-0000000002".to_string()]);
    }

    #[test]
    fn list_skips_temp_and_foreign_files() {
        let dir = tempdir().unwrap();
        let port = LocalTransfer::new(dir.path());
        port.init(true).unwrap();

        port.upload(b"x", &RemoteFile::database("a", 1).unwrap()).unwrap();
        fs::write(dir.path().join("databases/temp-db-a-0000000002"), b"half").unwrap();
        fs::write(dir.path().join("databases/notes.txt"), b"?").unwrap();

        let listed = port.list(RemoteFileKind::Database).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key("db-a-0000000001"));
    }

    #[test]
    fn download_and_delete() {
        let dir = tempdir().unwrap();
        let port = LocalTransfer::new(dir.path().join("remote"));
        port.init(true).unwrap();

        let file = RemoteFile::multichunk(&"f".repeat(64)).unwrap();
        port.upload(b"chunks", &file).unwrap();

        let local = dir.path().join("fetched");
        port.download(&file, &local).unwrap();
        assert_eq!(fs::read(&local).unwrap(), b"chunks");

        assert!(port.delete(&file).unwrap());
        assert!(!port.delete(&file).unwrap());
        assert!(matches!(
            port.download(&file, &local),
            Err(TransferError::NotFound { .. })
        ));
    }

    #[test]
    fn connect_fails_without_parent() {
        let dir = tempdir().unwrap();
        let port = LocalTransfer::new(dir.path().join("missing/deeper/repo"));
        let err = port.connect().unwrap_err();
        assert!(!err.is_retryable());
    }
}
