//! Sync folder management.
//!
//! Engine metadata lives in a hidden folder inside the sync folder:
//!
//! ```text
//! <sync folder>/
//! └─ .syncvault/
//!    ├─ LOCK       # Advisory lock, one engine per sync folder
//!    ├─ state      # Known database versions and the local index
//!    └─ tmp/       # Downloads in progress
//! ```
//!
//! The indexer never looks inside `.syncvault/`.

use crate::error::{SyncError, SyncResult};
use crate::local_state::LocalState;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the metadata folder inside the sync folder.
pub const META_DIR: &str = ".syncvault";

const LOCK_FILE: &str = "LOCK";
const STATE_FILE: &str = "state";
const TMP_DIR: &str = "tmp";

/// Holds the exclusive lock on a sync folder.
///
/// Only one `SyncDir` can exist per folder at a time; the lock is released
/// when the value is dropped.
#[derive(Debug)]
pub struct SyncDir {
    root: PathBuf,
    meta: PathBuf,
    _lock_file: File,
}

impl SyncDir {
    /// Opens the sync folder at `root`, creating it and its metadata folder
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Locked`] if another engine holds the folder and
    /// [`SyncError::InvalidConfig`] if `root` is not a directory.
    pub fn open(root: &Path) -> SyncResult<Self> {
        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        if !root.is_dir() {
            return Err(SyncError::invalid_config(format!(
                "sync folder is not a directory: {}",
                root.display()
            )));
        }

        let meta = root.join(META_DIR);
        fs::create_dir_all(meta.join(TMP_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(meta.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(SyncError::Locked {
                path: root.display().to_string(),
            });
        }

        let dir = Self {
            root: root.to_path_buf(),
            meta,
            _lock_file: lock_file,
        };
        dir.clear_tmp()?;
        Ok(dir)
    }

    /// The sync folder.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch folder for downloads.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.meta.join(TMP_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.meta.join(STATE_FILE)
    }

    /// Loads the persisted state, `None` for a fresh folder.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::LocalState`] if the file exists but cannot be
    /// decoded.
    pub fn load_state(&self) -> SyncResult<Option<LocalState>> {
        let data = match fs::read(self.state_path()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if data.is_empty() {
            return Ok(None);
        }
        LocalState::decode(&data).map(Some)
    }

    /// Saves the state atomically: write to a temporary file, sync it, then
    /// rename over the previous state.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or any filesystem step fails.
    pub fn save_state(&self, state: &LocalState) -> SyncResult<()> {
        let data = state.encode()?;
        let mut temp = tempfile::NamedTempFile::new_in(&self.meta)?;
        temp.write_all(&data)?;
        temp.as_file().sync_all()?;
        temp.persist(self.state_path())
            .map_err(|err| SyncError::Io(err.error))?;
        self.sync_directory()?;
        debug!(bytes = data.len(), "saved local state");
        Ok(())
    }

    /// Removes leftovers of interrupted downloads.
    fn clear_tmp(&self) -> SyncResult<()> {
        for entry in fs::read_dir(self.tmp_dir())? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> SyncResult<()> {
        File::open(&self.meta)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SyncResult<()> {
        Ok(())
    }
}
