//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::path::PathBuf;
use std::time::Duration;
use syncvault_core::{ChunkStoreConfig, ChunkerConfig};
use syncvault_protocol::ReplicaId;
use syncvault_storage::RetryPolicy;

/// Configuration for one replica.
#[derive(Clone)]
pub struct SyncConfig {
    /// Replica id, unique per device.
    pub replica: ReplicaId,
    /// Sync folder.
    pub root: PathBuf,
    /// Threads used to chunk and hash files.
    pub workers: usize,
    /// Chunking parameters.
    pub chunker: ChunkerConfig,
    /// Multichunk packing parameters.
    pub chunk_store: ChunkStoreConfig,
    /// Retry policy for every remote operation.
    pub retry: RetryPolicy,
    /// Repository password. `None` for a plaintext repository.
    pub password: Option<String>,
    /// Number of multichunk bodies kept in memory during restores.
    pub cache_capacity: usize,
    /// Whether `down` writes merged remote changes into the sync folder.
    pub apply_remote_changes: bool,
    /// Whether `open` may create a missing repository.
    pub create_repository: bool,
    /// Age after which another replica's action marker is ignored.
    pub action_timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration with defaults.
    pub fn new(replica: ReplicaId, root: impl Into<PathBuf>) -> Self {
        Self {
            replica,
            root: root.into(),
            workers: 4,
            chunker: ChunkerConfig::default(),
            chunk_store: ChunkStoreConfig::default(),
            retry: RetryPolicy::default(),
            password: None,
            cache_capacity: 16,
            apply_remote_changes: true,
            create_repository: true,
            action_timeout: Duration::from_secs(60 * 60),
        }
    }

    /// Sets the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the chunking parameters.
    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    /// Sets the multichunk packing parameters.
    pub fn with_chunk_store(mut self, chunk_store: ChunkStoreConfig) -> Self {
        self.chunk_store = chunk_store;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables repository encryption with `password`.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the multichunk cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets whether `down` updates the sync folder.
    pub fn with_apply_remote_changes(mut self, apply: bool) -> Self {
        self.apply_remote_changes = apply;
        self
    }

    /// Sets whether a missing repository may be created.
    pub fn with_create_repository(mut self, create: bool) -> Self {
        self.create_repository = create;
        self
    }

    /// Sets the action marker timeout.
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Core`] for invalid chunking parameters and
    /// [`SyncError::InvalidConfig`] for everything else.
    pub fn validate(&self) -> SyncResult<()> {
        self.chunker.validate()?;
        self.chunk_store.validate(&self.chunker)?;
        if self.workers == 0 {
            return Err(SyncError::invalid_config("workers must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::invalid_config("retry policy needs at least one attempt"));
        }
        if matches!(&self.password, Some(p) if p.is_empty()) {
            return Err(SyncError::invalid_config("password must not be empty"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("replica", &self.replica)
            .field("root", &self.root)
            .field("workers", &self.workers)
            .field("chunker", &self.chunker)
            .field("chunk_store", &self.chunk_store)
            .field("retry", &self.retry)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("cache_capacity", &self.cache_capacity)
            .field("apply_remote_changes", &self.apply_remote_changes)
            .field("create_repository", &self.create_repository)
            .field("action_timeout", &self.action_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica() -> ReplicaId {
        ReplicaId::new("laptop").unwrap()
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new(replica(), "/tmp/sync")
            .with_workers(2)
            .with_cache_capacity(3)
            .with_password("secret")
            .with_apply_remote_changes(false);

        assert_eq!(config.workers, 2);
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert!(!config.apply_remote_changes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_configs() {
        assert!(SyncConfig::new(replica(), "/x").with_workers(0).validate().is_err());
        assert!(SyncConfig::new(replica(), "/x").with_password("").validate().is_err());
        let tiny = ChunkStoreConfig::default().with_multichunk_size(1024);
        assert!(SyncConfig::new(replica(), "/x").with_chunk_store(tiny).validate().is_err());
    }

    #[test]
    fn debug_hides_password() {
        let config = SyncConfig::new(replica(), "/x").with_password("hunter2");
        let shown = format!("{config:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("REDACTED"));
    }
}
