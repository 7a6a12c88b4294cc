//! File versions.

use crate::ids::{ChunkChecksum, FileChecksum, FileHistoryId, Timestamp};
use serde::{Deserialize, Serialize};

/// Type of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file with content chunks.
    File,
    /// Directory.
    Folder,
    /// Symbolic link.
    Symlink,
}

/// What happened to a file in a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    /// First version of a history.
    New,
    /// Content or metadata changed.
    Changed,
    /// The file was removed. Carries no content.
    Deleted,
    /// The file moved to a new path.
    Renamed,
}

/// Observed properties of a filesystem entry, the input for recording a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Entry type.
    pub file_type: FileType,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Last modification time.
    pub modified: Timestamp,
    /// Unix permission bits, if known.
    pub permissions: Option<u32>,
    /// Target of a symbolic link.
    pub link_target: Option<String>,
    /// Whole-file checksum, if computed.
    pub checksum: Option<FileChecksum>,
}

impl FileMetadata {
    /// Metadata for a regular file.
    #[must_use]
    pub fn file(size: u64, modified: Timestamp) -> Self {
        Self {
            file_type: FileType::File,
            size,
            modified,
            permissions: None,
            link_target: None,
            checksum: None,
        }
    }

    /// Metadata for a folder.
    #[must_use]
    pub fn folder(modified: Timestamp) -> Self {
        Self {
            file_type: FileType::Folder,
            size: 0,
            modified,
            permissions: None,
            link_target: None,
            checksum: None,
        }
    }

    /// Metadata for a symbolic link pointing at `target`.
    #[must_use]
    pub fn symlink(target: impl Into<String>, modified: Timestamp) -> Self {
        Self {
            file_type: FileType::Symlink,
            size: 0,
            modified,
            permissions: None,
            link_target: Some(target.into()),
            checksum: None,
        }
    }

    /// Sets the whole-file checksum.
    #[must_use]
    pub fn with_checksum(mut self, checksum: FileChecksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Sets the permission bits.
    #[must_use]
    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }
}

/// One state of a file within its history.
///
/// Immutable once its database version is sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    /// History this version belongs to.
    pub history_id: FileHistoryId,
    /// Version number within the history, starting at 1.
    pub version: u64,
    /// Relative, `/`-separated path.
    pub path: String,
    /// Entry type.
    pub file_type: FileType,
    /// Change status.
    pub status: FileStatus,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: Timestamp,
    /// Unix permission bits.
    pub permissions: Option<u32>,
    /// Symlink target.
    pub link_target: Option<String>,
    /// Whole-file checksum.
    pub checksum: Option<FileChecksum>,
    /// Ordered content chunks. Empty for folders, symlinks and deletions.
    pub chunks: Vec<ChunkChecksum>,
}

impl FileVersion {
    /// Returns true if this version records a deletion.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == FileStatus::Deleted
    }

    /// Returns true if both versions describe the same resulting state,
    /// ignoring version numbers and modification times.
    #[must_use]
    pub fn same_content(&self, other: &FileVersion) -> bool {
        let deleted = self.is_deleted();
        if deleted || other.is_deleted() {
            return deleted == other.is_deleted();
        }
        self.path == other.path
            && self.file_type == other.file_type
            && self.size == other.size
            && self.checksum == other.checksum
            && self.chunks == other.chunks
            && self.link_target == other.link_target
    }

    /// File name component of the path.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(path: &str, chunks: &[&[u8]]) -> FileVersion {
        FileVersion {
            history_id: FileHistoryId::from_bytes([1; 16]),
            version: 1,
            path: path.to_string(),
            file_type: FileType::File,
            status: FileStatus::New,
            size: chunks.iter().map(|c| c.len() as u64).sum(),
            modified: Timestamp::from_millis(1),
            permissions: None,
            link_target: None,
            checksum: None,
            chunks: chunks.iter().map(|c| ChunkChecksum::digest(c)).collect(),
        }
    }

    #[test]
    fn same_content_ignores_number_and_mtime() {
        let a = version("docs/a.txt", &[b"one"]);
        let mut b = a.clone();
        b.version = 5;
        b.modified = Timestamp::from_millis(99);
        b.status = FileStatus::Changed;
        assert!(a.same_content(&b));

        let c = version("docs/a.txt", &[b"two"]);
        assert!(!a.same_content(&c));
        let d = version("docs/b.txt", &[b"one"]);
        assert!(!a.same_content(&d));
    }

    #[test]
    fn deletions_compare_equal() {
        let mut a = version("x", &[b"1"]);
        let mut b = version("y", &[b"2"]);
        a.status = FileStatus::Deleted;
        assert!(!a.same_content(&b));
        b.status = FileStatus::Deleted;
        assert!(a.same_content(&b));
    }

    #[test]
    fn file_name() {
        assert_eq!(version("a/b/c.txt", &[]).file_name(), "c.txt");
        assert_eq!(version("top", &[]).file_name(), "top");
    }
}
