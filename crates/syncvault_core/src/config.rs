//! Chunking and packing configuration.

use crate::error::{CoreError, CoreResult};

/// Boundaries for content-defined chunking.
///
/// # Example
///
/// ```rust
/// use syncvault_core::ChunkerConfig;
///
/// let config = ChunkerConfig::default()
///     .with_min_size(1024)
///     .with_avg_size(4096)
///     .with_max_size(16 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// No boundary is placed before this many bytes.
    pub min_size: usize,
    /// Target average chunk size. Must be a power of two.
    pub avg_size: usize,
    /// A boundary is forced at this many bytes.
    pub max_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: 2 * 1024,
            avg_size: 8 * 1024,
            max_size: 64 * 1024,
        }
    }
}

impl ChunkerConfig {
    /// Sets the minimum chunk size.
    #[must_use]
    pub const fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Sets the average chunk size.
    #[must_use]
    pub const fn with_avg_size(mut self, size: usize) -> Self {
        self.avg_size = size;
        self
    }

    /// Sets the maximum chunk size.
    #[must_use]
    pub const fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Checks `0 < min <= avg <= max`, `avg` a power of two, `max` within `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the violation.
    pub fn validate(&self) -> CoreResult<()> {
        if self.min_size == 0 {
            return Err(CoreError::invalid_config("min_size must be positive"));
        }
        if self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(CoreError::invalid_config(format!(
                "chunk sizes must satisfy min <= avg <= max (got {} / {} / {})",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        if !self.avg_size.is_power_of_two() || self.avg_size < 4 {
            return Err(CoreError::invalid_config(format!(
                "avg_size must be a power of two of at least 4 (got {})",
                self.avg_size
            )));
        }
        if u32::try_from(self.max_size).is_err() {
            return Err(CoreError::invalid_config("max_size must fit in 32 bits"));
        }
        Ok(())
    }
}

/// Multichunk packing limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkStoreConfig {
    /// Upper bound for the chunk data packed into one multichunk.
    pub multichunk_size: usize,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        Self {
            multichunk_size: 4 * 1024 * 1024,
        }
    }
}

impl ChunkStoreConfig {
    /// Sets the multichunk budget.
    #[must_use]
    pub const fn with_multichunk_size(mut self, size: usize) -> Self {
        self.multichunk_size = size;
        self
    }

    /// Checks that a maximal chunk fits into one multichunk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `multichunk_size` is below the
    /// chunker's `max_size`.
    pub fn validate(&self, chunker: &ChunkerConfig) -> CoreResult<()> {
        if self.multichunk_size < chunker.max_size {
            return Err(CoreError::invalid_config(format!(
                "multichunk_size {} is smaller than the maximum chunk size {}",
                self.multichunk_size, chunker.max_size
            )));
        }
        Ok(())
    }
}
