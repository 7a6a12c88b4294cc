//! # SyncVault Testkit
//!
//! Test utilities for SyncVault.
//!
//! This crate provides:
//! - Replicas in temporary sync folders sharing one in-memory repository
//! - Small chunking parameters so tests exercise many chunks and multichunks
//! - Property-based generators for file contents and folder trees
//! - Tracing setup for test binaries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use syncvault_testkit::prelude::*;
//!
//! #[test]
//! fn file_reaches_the_other_replica() {
//!     let cluster = TestCluster::new();
//!     let alpha = cluster.replica("alpha");
//!     let beta = cluster.replica("beta");
//!     alpha.write("a.txt", b"hello");
//!     alpha.sync().unwrap();
//!     beta.sync().unwrap();
//!     assert_eq!(beta.read("a.txt"), b"hello");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
