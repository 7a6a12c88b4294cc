//! Writing the merged history into the sync folder.
//!
//! Only entries the user has not touched since the last cycle are
//! replaced: an entry is overwritten or removed when its on-disk state
//! still equals the indexed state. Everything else is left for the next
//! upload to record.

use crate::error::SyncResult;
use crate::indexer::{inspect, is_safe_relative};
use crate::local_state::LocalEntry;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use syncvault_core::{restore_version_to, CancelFlag, MergedHistory, MultiChunkFetcher, MultiChunkSource};
use syncvault_protocol::{FileType, FileVersion};
use tracing::{debug, warn};

/// Counts of entries changed in the sync folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ApplyOutcome {
    pub(crate) written: usize,
    pub(crate) removed: usize,
}

/// Returns true if the indexed entry already holds `file`.
fn holds(entry: &LocalEntry, file: &FileVersion) -> bool {
    if entry.file_type != file.file_type {
        return false;
    }
    match file.file_type {
        FileType::File => {
            entry.size == file.size
                && match file.checksum {
                    Some(checksum) => entry.checksum == Some(checksum),
                    None => entry.modified == file.modified,
                }
        }
        FileType::Folder => true,
        FileType::Symlink => entry.link_target == file.link_target,
    }
}

fn inspect_existing(path: &Path) -> io::Result<Option<LocalEntry>> {
    match inspect(path) {
        Ok(entry) => Ok(Some(entry)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Clears whatever sits at `path` so an entry of type `wanted` can be
/// written. Returns false if the path must be left alone.
fn make_room(path: &Path, existing: &LocalEntry, wanted: FileType) -> io::Result<bool> {
    match (existing.file_type, wanted) {
        (FileType::Folder, FileType::Folder) | (FileType::File, FileType::File) => Ok(true),
        (FileType::Folder, _) => match fs::remove_dir(path) {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "folder not empty, keeping it");
                Ok(false)
            }
        },
        _ => {
            fs::remove_file(path)?;
            Ok(true)
        }
    }
}

/// Brings the sync folder in line with `snapshot` and updates `index`.
///
/// # Errors
///
/// Returns restore errors (integrity, fetch, cancellation) and I/O errors.
/// Entries written before the error stay in `index`.
pub(crate) fn apply_snapshot<S: MultiChunkSource>(
    root: &Path,
    snapshot: &MergedHistory,
    index: &mut BTreeMap<String, LocalEntry>,
    fetcher: &MultiChunkFetcher<S>,
    cancel: &CancelFlag,
) -> SyncResult<ApplyOutcome> {
    let mut outcome = ApplyOutcome::default();
    let live = snapshot.live_files();

    for (path, version) in &live {
        cancel.check()?;
        if !is_safe_relative(path) {
            warn!(path = %path, "ignoring remote path outside the sync folder");
            continue;
        }
        let indexed = index.get(*path);
        if indexed.is_some_and(|entry| holds(entry, &version.file)) {
            continue;
        }

        let target = root.join(path);
        let on_disk = inspect_existing(&target)?;
        let untouched = match (indexed, &on_disk) {
            (None, None) => true,
            (Some(indexed), Some(disk)) => indexed.unchanged(disk),
            _ => false,
        };
        if !untouched {
            debug!(path = %path, "local change pending, remote version not applied");
            continue;
        }
        if let Some(disk) = &on_disk {
            if !make_room(&target, disk, version.file.file_type)? {
                continue;
            }
        }

        restore_version_to(snapshot, version, &target, fetcher, cancel)?;
        let mut entry = inspect(&target)?;
        entry.checksum = version.file.checksum;
        index.insert((*path).to_string(), entry);
        debug!(path = %path, version = version.version(), "applied remote version");
        outcome.written += 1;
    }

    // Children sort after their parents, so walk backwards.
    let vanished: Vec<String> = index
        .keys()
        .rev()
        .filter(|path| !live.contains_key(path.as_str()))
        .cloned()
        .collect();
    for path in vanished {
        cancel.check()?;
        let target = root.join(&path);
        let Some(indexed) = index.get(&path) else {
            continue;
        };
        match inspect_existing(&target)? {
            None => {}
            Some(disk) if indexed.unchanged(&disk) => {
                let removed = match disk.file_type {
                    FileType::Folder => fs::remove_dir(&target).is_ok(),
                    FileType::File | FileType::Symlink => {
                        fs::remove_file(&target)?;
                        true
                    }
                };
                if removed {
                    debug!(path = %path, "removed entry deleted remotely");
                    outcome.removed += 1;
                }
            }
            Some(_) => {
                debug!(path = %path, "entry deleted remotely but changed locally, keeping it");
                continue;
            }
        }
        index.remove(&path);
    }
    Ok(outcome)
}
