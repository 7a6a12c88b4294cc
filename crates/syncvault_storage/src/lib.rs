//! # SyncVault Storage
//!
//! The transfer port: the contract between the sync engine and an
//! untrusted remote store.
//!
//! Remote stores are **opaque object stores** - they never interpret the
//! bytes they hold. Every object is addressed by a [`RemoteFile`], a name
//! plus one of four [`RemoteFileKind`]s. All merge decisions are made by
//! replicas; the store only uploads, downloads, lists and deletes.
//!
//! ## Design Principles
//!
//! - Ports take `&self` and must be `Send + Sync`
//! - Operations connect on demand
//! - Uploads are staged under a `temp-` name and renamed into place
//! - Downloads land in a temporary file next to the destination first
//!
//! ## Available Adapters
//!
//! - [`InMemoryTransfer`] - shared in-process store with fault injection
//! - [`LocalTransfer`] - a folder on a local or mounted filesystem
//! - [`RetryingTransfer`] - wraps any port with a [`RetryPolicy`]
//!
//! ## Example
//!
//! ```rust
//! use syncvault_storage::{InMemoryTransfer, RemoteFile, RemoteFileKind, TransferPort};
//!
//! let remote = InMemoryTransfer::new();
//! remote.init(true).unwrap();
//!
//! let file = RemoteFile::database("laptop", 1).unwrap();
//! remote.upload(b"delta", &file).unwrap();
//!
//! let listed = remote.list(RemoteFileKind::Database).unwrap();
//! assert!(listed.contains_key("db-laptop-0000000001"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod local;
mod memory;
mod port;
mod remote_file;
mod retry;

pub use error::{TransferError, TransferResult};
pub use local::LocalTransfer;
pub use memory::InMemoryTransfer;
pub use port::TransferPort;
pub use remote_file::{
    ActionKind, RemoteFile, RemoteFileDescriptor, RemoteFileKind, REPO_FILE_NAME, TEMP_PREFIX,
};
pub use retry::{RetryPolicy, RetryingTransfer};
