//! Scanning the sync folder and chunking changed files.

use crate::dir::META_DIR;
use crate::error::SyncResult;
use crate::local_state::LocalEntry;
use rayon::prelude::*;
use rayon::ThreadPool;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path};
use syncvault_core::{CancelFlag, Chunk, ChunkRef, Chunker};
use syncvault_protocol::{FileChecksum, FileType, Timestamp};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Prefix of temporary files written by restores.
pub const RESTORE_TEMP_PREFIX: &str = ".syncvault-restore-";

/// A changed regular file with its content split into chunks.
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    /// Relative path.
    pub path: String,
    /// State observed while reading, with the checksum filled in.
    pub entry: LocalEntry,
    /// Content chunks in file order.
    pub chunks: Vec<Chunk>,
}

impl ChunkedFile {
    /// The chunk list to record.
    #[must_use]
    pub fn refs(&self) -> Vec<ChunkRef> {
        self.chunks.iter().map(Chunk::to_ref).collect()
    }
}

/// Differences between the sync folder and the last synced index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LocalChanges {
    /// New or modified entries.
    pub changed: BTreeMap<String, LocalEntry>,
    /// Indexed paths that no longer exist.
    pub deleted: Vec<String>,
}

impl LocalChanges {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    (entry.depth() == 1 && name == META_DIR) || name.starts_with(RESTORE_TEMP_PREFIX)
}

/// Relative `/`-separated form of `path` below `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Reads the state of one entry without following symlinks.
///
/// # Errors
///
/// Returns an I/O error if the entry cannot be inspected.
pub fn inspect(path: &Path) -> io::Result<LocalEntry> {
    let meta = fs::symlink_metadata(path)?;
    let modified = Timestamp::from_system_time(meta.modified()?);
    let file_type = if meta.file_type().is_symlink() {
        FileType::Symlink
    } else if meta.is_dir() {
        FileType::Folder
    } else {
        FileType::File
    };
    let link_target = match file_type {
        FileType::Symlink => Some(fs::read_link(path)?.to_string_lossy().into_owned()),
        _ => None,
    };
    Ok(LocalEntry {
        file_type,
        size: if file_type == FileType::File { meta.len() } else { 0 },
        modified,
        permissions: permissions(&meta),
        link_target,
        checksum: None,
    })
}

#[cfg(unix)]
fn permissions(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permissions(_meta: &fs::Metadata) -> Option<u32> {
    None
}

/// Walks the sync folder and returns every entry keyed by relative path.
///
/// The metadata folder and restore temp files are skipped, as are names
/// that are not valid UTF-8.
///
/// # Errors
///
/// Returns an I/O error if the folder cannot be walked.
pub fn scan(root: &Path, cancel: &CancelFlag) -> SyncResult<BTreeMap<String, LocalEntry>> {
    let mut entries = BTreeMap::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(e));

    for item in walker {
        cancel.check()?;
        let item = match item {
            Ok(item) => item,
            // Vanished between listing and inspection.
            Err(err) if err.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                continue
            }
            Err(err) => return Err(io::Error::from(err).into()),
        };
        let Some(rel) = relative_path(root, item.path()) else {
            warn!(path = %item.path().display(), "skipping entry with a non UTF-8 name");
            continue;
        };
        match inspect(item.path()) {
            Ok(entry) => {
                entries.insert(rel, entry);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }
    debug!(root = %root.display(), entries = entries.len(), "scanned sync folder");
    Ok(entries)
}

/// Compares a scan against the last synced index.
#[must_use]
pub fn diff(
    index: &BTreeMap<String, LocalEntry>,
    scanned: &BTreeMap<String, LocalEntry>,
) -> LocalChanges {
    let changed = scanned
        .iter()
        .filter(|(path, entry)| !index.get(*path).is_some_and(|old| old.unchanged(entry)))
        .map(|(path, entry)| (path.clone(), entry.clone()))
        .collect();
    let deleted = index
        .keys()
        .filter(|path| !scanned.contains_key(*path))
        .cloned()
        .collect();
    LocalChanges { changed, deleted }
}

/// Chunks `files` on `pool`, one file per task.
///
/// Results come back in input order. Files that vanished since the scan
/// are left out.
///
/// # Errors
///
/// Returns the first I/O error, or `SyncError::Cancelled` once `cancel`
/// is raised.
pub fn chunk_files(
    pool: &ThreadPool,
    chunker: &Chunker,
    root: &Path,
    files: Vec<(String, LocalEntry)>,
    cancel: &CancelFlag,
) -> SyncResult<Vec<ChunkedFile>> {
    let results: Vec<Option<ChunkedFile>> = pool.install(|| {
        files
            .into_par_iter()
            .map(|(path, entry)| chunk_file(chunker, root, path, entry, cancel))
            .collect::<SyncResult<Vec<Option<ChunkedFile>>>>()
    })?;
    Ok(results.into_iter().flatten().collect())
}

fn chunk_file(
    chunker: &Chunker,
    root: &Path,
    path: String,
    mut entry: LocalEntry,
    cancel: &CancelFlag,
) -> SyncResult<Option<ChunkedFile>> {
    cancel.check()?;
    let file = match File::open(root.join(&path)) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path, "file vanished before chunking");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let mut hasher = Sha256::new();
    let mut chunks = Vec::new();
    let mut size = 0u64;
    for chunk in chunker.chunks(BufReader::new(file)) {
        cancel.check()?;
        let chunk = chunk?;
        hasher.update(&chunk.data);
        size += chunk.len() as u64;
        chunks.push(chunk);
    }

    if size != entry.size {
        debug!(path = %path, scanned = entry.size, read = size, "file changed while chunking");
        entry.size = size;
    }
    entry.checksum = Some(FileChecksum::from_bytes(hasher.finalize().into()));
    Ok(Some(ChunkedFile {
        path,
        entry,
        chunks,
    }))
}

/// Returns true if `path` is a plain relative path that stays inside the
/// sync folder.
pub(crate) fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|p| !p.is_empty() && p != "." && p != "..")
}
