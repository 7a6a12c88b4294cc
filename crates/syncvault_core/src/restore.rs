//! Point-in-time restore of file versions.
//!
//! Restores read a [`MergedHistory`] snapshot, pull the multichunks holding
//! each chunk through a [`MultiChunkSource`], verify every chunk on the way
//! and write the result to a temporary file that only replaces the target
//! once it is complete.

use crate::cache::MultiChunkCache;
use crate::cancel::CancelFlag;
use crate::chunk_store::{extract_chunk, open_multichunk};
use crate::crypto::CryptoManager;
use crate::error::{CoreError, CoreResult};
use crate::history::merged::{MergedHistory, MergedVersion};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use syncvault_protocol::{FileChecksum, FileHistoryId, FileType, MultiChunkId, Timestamp};
use tracing::{debug, info};

/// What to restore and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// History to restore from.
    pub history_id: FileHistoryId,
    /// Exact merged version number.
    pub version: Option<u64>,
    /// Restore the latest version sealed strictly before this instant.
    pub before: Option<Timestamp>,
    /// Target path relative to the restore root.
    pub target: PathBuf,
}

impl RestoreRequest {
    /// Request for an exact version.
    pub fn version(history_id: FileHistoryId, version: u64, target: impl Into<PathBuf>) -> Self {
        Self {
            history_id,
            version: Some(version),
            before: None,
            target: target.into(),
        }
    }

    /// Request for the version current just before `before`.
    pub fn before(history_id: FileHistoryId, before: Timestamp, target: impl Into<PathBuf>) -> Self {
        Self {
            history_id,
            version: None,
            before: Some(before),
            target: target.into(),
        }
    }

    /// Checks that exactly one selector is set and the target is a plain
    /// relative path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRestoreRequest`] otherwise.
    pub fn validate(&self) -> CoreResult<()> {
        match (self.version, self.before) {
            (Some(_), Some(_)) => {
                return Err(CoreError::invalid_restore(
                    "both a version and a point in time were given",
                ))
            }
            (None, None) => {
                return Err(CoreError::invalid_restore(
                    "either a version or a point in time is required",
                ))
            }
            _ => {}
        }
        if self.target.as_os_str().is_empty() {
            return Err(CoreError::invalid_restore("empty target path"));
        }
        let plain = self
            .target
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !plain {
            return Err(CoreError::invalid_restore(format!(
                "target {} must be relative and must not leave the restore root",
                self.target.display()
            )));
        }
        Ok(())
    }
}

/// A successfully restored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredFile {
    /// Absolute path written.
    pub path: PathBuf,
    /// Restored history.
    pub history_id: FileHistoryId,
    /// Restored merged version number.
    pub version: u64,
    /// Bytes written.
    pub size: u64,
}

/// Supplies stored multichunks, typically by downloading them.
pub trait MultiChunkSource: Send + Sync {
    /// Returns the stored (enveloped, possibly encrypted) bytes of `id`.
    ///
    /// # Errors
    ///
    /// Implementations report failures as [`CoreError::MultiChunkFetch`].
    fn fetch(&self, id: &MultiChunkId) -> CoreResult<Vec<u8>>;
}

impl<T: MultiChunkSource + ?Sized> MultiChunkSource for Arc<T> {
    fn fetch(&self, id: &MultiChunkId) -> CoreResult<Vec<u8>> {
        (**self).fetch(id)
    }
}

/// Opens multichunks from a source and caches their verified bodies.
#[derive(Debug)]
pub struct MultiChunkFetcher<S> {
    source: S,
    cache: Arc<MultiChunkCache>,
    crypto: Option<Arc<CryptoManager>>,
}

impl<S: MultiChunkSource> MultiChunkFetcher<S> {
    /// Creates a fetcher.
    pub fn new(source: S, cache: Arc<MultiChunkCache>, crypto: Option<Arc<CryptoManager>>) -> Self {
        Self {
            source,
            cache,
            crypto,
        }
    }

    /// The shared body cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<MultiChunkCache> {
        &self.cache
    }

    /// Verified plaintext body of `id`.
    ///
    /// # Errors
    ///
    /// Returns the source's error or an integrity error from opening.
    pub fn body(&self, id: &MultiChunkId) -> CoreResult<Arc<Vec<u8>>> {
        if let Some(body) = self.cache.get(id) {
            return Ok(body);
        }
        let stored = self.source.fetch(id)?;
        let body = Arc::new(open_multichunk(&stored, id, self.crypto.as_deref())?);
        self.cache.insert(*id, Arc::clone(&body));
        Ok(body)
    }
}

/// Picks the version a request refers to.
///
/// # Errors
///
/// Returns [`CoreError::FileHistoryNotFound`], [`CoreError::VersionNotFound`],
/// [`CoreError::NoVersionBefore`] or [`CoreError::NothingToRestore`].
pub fn select_version<'a>(
    snapshot: &'a MergedHistory,
    request: &RestoreRequest,
) -> CoreResult<&'a MergedVersion> {
    request.validate()?;
    let history = snapshot
        .history(&request.history_id)
        .ok_or(CoreError::FileHistoryNotFound {
            history: request.history_id,
        })?;

    if let Some(number) = request.version {
        let version = history.version(number).ok_or(CoreError::VersionNotFound {
            history: request.history_id,
            version: number,
        })?;
        if version.file.is_deleted() {
            return Err(CoreError::NothingToRestore {
                history: request.history_id,
                version: number,
            });
        }
        return Ok(version);
    }

    let before = request.before.unwrap_or_default();
    history
        .versions()
        .iter()
        .rev()
        .find(|v| v.timestamp < before && !v.is_conflict_copy() && !v.file.is_deleted())
        .ok_or(CoreError::NoVersionBefore {
            history: request.history_id,
            before,
        })
}

/// Restores the version selected by `request` below `root`.
///
/// # Errors
///
/// Returns selection errors, integrity errors, I/O errors and
/// [`CoreError::Cancelled`]. The target is left untouched on failure.
pub fn restore<S: MultiChunkSource>(
    snapshot: &MergedHistory,
    request: &RestoreRequest,
    root: &Path,
    fetcher: &MultiChunkFetcher<S>,
    cancel: &CancelFlag,
) -> CoreResult<RestoredFile> {
    let version = select_version(snapshot, request)?;
    let path = root.join(&request.target);
    let size = restore_version_to(snapshot, version, &path, fetcher, cancel)?;
    info!(
        history = %request.history_id,
        version = version.version(),
        path = %path.display(),
        size,
        "restored file version"
    );
    Ok(RestoredFile {
        path,
        history_id: request.history_id,
        version: version.version(),
        size,
    })
}

/// Writes `version` to the absolute path `target`.
///
/// Returns the number of content bytes written.
///
/// # Errors
///
/// See [`restore`].
pub fn restore_version_to<S: MultiChunkSource>(
    snapshot: &MergedHistory,
    version: &MergedVersion,
    target: &Path,
    fetcher: &MultiChunkFetcher<S>,
    cancel: &CancelFlag,
) -> CoreResult<u64> {
    let file = &version.file;
    if file.is_deleted() {
        return Err(CoreError::NothingToRestore {
            history: file.history_id,
            version: file.version,
        });
    }
    cancel.check()?;

    match file.file_type {
        FileType::Folder => {
            fs::create_dir_all(target)?;
            Ok(0)
        }
        FileType::Symlink => {
            let link = file.link_target.as_deref().unwrap_or_default();
            restore_symlink(link, target)?;
            Ok(0)
        }
        FileType::File => restore_file(snapshot, version, target, fetcher, cancel),
    }
}

fn restore_file<S: MultiChunkSource>(
    snapshot: &MergedHistory,
    version: &MergedVersion,
    target: &Path,
    fetcher: &MultiChunkFetcher<S>,
    cancel: &CancelFlag,
) -> CoreResult<u64> {
    let file = &version.file;
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".syncvault-restore-")
        .tempfile_in(parent)?;
    let mut hasher = Sha256::new();
    let mut written = 0u64;

    for checksum in &file.chunks {
        cancel.check()?;
        let location = snapshot
            .resolve_chunk(checksum)
            .ok_or_else(|| CoreError::UnresolvedChunk {
                chunk: *checksum,
                path: file.path.clone(),
            })?;
        let body = fetcher.body(&location.multichunk)?;
        let data = extract_chunk(&body, checksum, &location)?;
        hasher.update(data);
        temp.write_all(data)?;
        written += data.len() as u64;
    }

    if written != file.size {
        return Err(CoreError::SizeMismatch {
            path: file.path.clone(),
            expected: file.size,
            actual: written,
        });
    }
    if let Some(expected) = &file.checksum {
        let actual = FileChecksum::from_bytes(hasher.finalize().into());
        if &actual != expected {
            return Err(CoreError::FileChecksumMismatch {
                path: file.path.clone(),
            });
        }
    }

    temp.flush()?;
    apply_permissions(temp.as_file(), file.permissions)?;
    temp.as_file().set_modified(file.modified.to_system_time())?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| CoreError::Io(e.error))?;
    debug!(path = %target.display(), chunks = file.chunks.len(), "wrote restored file");
    Ok(written)
}

#[cfg(unix)]
fn apply_permissions(file: &fs::File, mode: Option<u32>) -> CoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(_file: &fs::File, _mode: Option<u32>) -> CoreResult<()> {
    Ok(())
}

#[cfg(unix)]
fn restore_symlink(link: &str, target: &Path) -> CoreResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(target).is_ok() {
        fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn restore_symlink(_link: &str, target: &Path) -> CoreResult<()> {
    Err(CoreError::invalid_restore(format!(
        "cannot create symlink {} on this platform",
        target.display()
    )))
}
