//! Remote file naming.
//!
//! Every object in a repository belongs to one of four kinds. The kind
//! determines the subfolder and the naming pattern:
//!
//! ```text
//! <repository>/
//! ├─ repo                                   # Repository marker
//! ├─ databases/db-<replica>-<seq:010>       # Database version deltas
//! ├─ multichunks/multichunk-<hex id>        # Sealed multichunks
//! └─ actions/action-<kind>-<replica>-<ts>   # In-progress action markers
//! ```

use crate::error::{TransferError, TransferResult};
use std::fmt;

/// Name of the repository marker file.
pub const REPO_FILE_NAME: &str = "repo";

/// Prefix of staged uploads. Listings never report these.
pub const TEMP_PREFIX: &str = "temp-";

const DATABASE_PREFIX: &str = "db-";
const MULTICHUNK_PREFIX: &str = "multichunk-";
const ACTION_PREFIX: &str = "action-";
const MULTICHUNK_ID_HEX_LEN: usize = 64;

/// Kind of object stored in a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteFileKind {
    /// The repository marker.
    Repo,
    /// A database version delta.
    Database,
    /// A sealed multichunk.
    MultiChunk,
    /// An action marker used as a cooperative repository lock.
    Action,
}

impl RemoteFileKind {
    /// All kinds, in initialization order.
    pub const ALL: [RemoteFileKind; 4] = [
        RemoteFileKind::Repo,
        RemoteFileKind::Database,
        RemoteFileKind::MultiChunk,
        RemoteFileKind::Action,
    ];

    /// Subfolder holding objects of this kind, `None` for the repository root.
    #[must_use]
    pub const fn subfolder(self) -> Option<&'static str> {
        match self {
            RemoteFileKind::Repo => None,
            RemoteFileKind::Database => Some("databases"),
            RemoteFileKind::MultiChunk => Some("multichunks"),
            RemoteFileKind::Action => Some("actions"),
        }
    }

    /// Short lowercase label used in logs and errors.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            RemoteFileKind::Repo => "repo",
            RemoteFileKind::Database => "database",
            RemoteFileKind::MultiChunk => "multichunk",
            RemoteFileKind::Action => "action",
        }
    }
}

impl fmt::Display for RemoteFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of long-running action announced by an action marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// An up cycle is publishing new content.
    Up,
    /// A cleanup pass is deleting unreferenced multichunks.
    Cleanup,
}

impl ActionKind {
    fn as_str(self) -> &'static str {
        match self {
            ActionKind::Up => "up",
            ActionKind::Cleanup => "cleanup",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(ActionKind::Up),
            "cleanup" => Some(ActionKind::Cleanup),
            _ => None,
        }
    }
}

/// A named object in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteFile {
    kind: RemoteFileKind,
    name: String,
}

impl RemoteFile {
    /// Parses a name as a file of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidName`] if the name does not match the
    /// kind's pattern.
    pub fn parse(kind: RemoteFileKind, name: &str) -> TransferResult<Self> {
        let valid = match kind {
            RemoteFileKind::Repo => name == REPO_FILE_NAME,
            RemoteFileKind::Database => parse_database_name(name).is_some(),
            RemoteFileKind::MultiChunk => parse_multichunk_name(name).is_some(),
            RemoteFileKind::Action => parse_action_name(name).is_some(),
        };
        if !valid {
            return Err(TransferError::InvalidName {
                kind: kind.label(),
                name: name.to_string(),
            });
        }
        Ok(Self {
            kind,
            name: name.to_string(),
        })
    }

    /// The repository marker.
    #[must_use]
    pub fn repo() -> Self {
        Self {
            kind: RemoteFileKind::Repo,
            name: REPO_FILE_NAME.to_string(),
        }
    }

    /// The delta file for database version `seq` of `replica`.
    ///
    /// # Errors
    ///
    /// Returns an error if `replica` is not a valid replica name or `seq` is 0.
    pub fn database(replica: &str, seq: u64) -> TransferResult<Self> {
        Self::parse(
            RemoteFileKind::Database,
            &format!("{DATABASE_PREFIX}{replica}-{seq:010}"),
        )
    }

    /// The file for the multichunk with the given hex-encoded id.
    ///
    /// # Errors
    ///
    /// Returns an error if `hex_id` is not 64 lowercase hex digits.
    pub fn multichunk(hex_id: &str) -> TransferResult<Self> {
        Self::parse(
            RemoteFileKind::MultiChunk,
            &format!("{MULTICHUNK_PREFIX}{hex_id}"),
        )
    }

    /// An action marker for `replica` created at `timestamp` millis.
    ///
    /// # Errors
    ///
    /// Returns an error if `replica` is not a valid replica name.
    pub fn action(kind: ActionKind, replica: &str, timestamp: u64) -> TransferResult<Self> {
        Self::parse(
            RemoteFileKind::Action,
            &format!("{ACTION_PREFIX}{}-{replica}-{timestamp}", kind.as_str()),
        )
    }

    /// Kind of this file.
    #[must_use]
    pub fn kind(&self) -> RemoteFileKind {
        self.kind
    }

    /// Bare file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path relative to the repository root, `/`-separated.
    #[must_use]
    pub fn path(&self) -> String {
        match self.kind.subfolder() {
            Some(folder) => format!("{folder}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Name used while an upload of this file is in flight.
    #[must_use]
    pub fn temp_name(&self) -> String {
        format!("{TEMP_PREFIX}{}", self.name)
    }

    /// `(replica, sequence)` for database files.
    #[must_use]
    pub fn database_key(&self) -> Option<(&str, u64)> {
        match self.kind {
            RemoteFileKind::Database => parse_database_name(&self.name),
            _ => None,
        }
    }

    /// Hex-encoded multichunk id for multichunk files.
    #[must_use]
    pub fn multichunk_id(&self) -> Option<&str> {
        match self.kind {
            RemoteFileKind::MultiChunk => parse_multichunk_name(&self.name),
            _ => None,
        }
    }

    /// `(kind, replica, timestamp)` for action markers.
    #[must_use]
    pub fn action_info(&self) -> Option<(ActionKind, &str, u64)> {
        match self.kind {
            RemoteFileKind::Action => parse_action_name(&self.name),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A listed remote file with its stored size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileDescriptor {
    /// The file.
    pub file: RemoteFile,
    /// Stored size in bytes.
    pub size: u64,
}

fn valid_replica(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn parse_database_name(name: &str) -> Option<(&str, u64)> {
    let rest = name.strip_prefix(DATABASE_PREFIX)?;
    let (replica, seq) = rest.rsplit_once('-')?;
    if !valid_replica(replica) || seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let seq: u64 = seq.parse().ok()?;
    (seq > 0).then_some((replica, seq))
}

fn parse_multichunk_name(name: &str) -> Option<&str> {
    let id = name.strip_prefix(MULTICHUNK_PREFIX)?;
    let valid = id.len() == MULTICHUNK_ID_HEX_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    valid.then_some(id)
}

fn parse_action_name(name: &str) -> Option<(ActionKind, &str, u64)> {
    let rest = name.strip_prefix(ACTION_PREFIX)?;
    let (kind, rest) = rest.split_once('-')?;
    let kind = ActionKind::parse(kind)?;
    let (replica, ts) = rest.rsplit_once('-')?;
    if !valid_replica(replica) || ts.is_empty() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((kind, replica, ts.parse().ok()?))
}
