// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Limits for the caches a [`Graph`](crate::Graph) keeps.
///
/// ```
/// use trellis_graph::{CacheConfig, Graph};
///
/// let config = CacheConfig::new()
///     .with_compute_memory_limit(64 << 20)
///     .with_hash_cache_size_limit(1024);
/// let graph = Graph::with_config(config);
/// assert_eq!(graph.cache_config().compute_memory_limit(), 64 << 20);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    compute_memory_limit: usize,
    hash_cache_size_limit: usize,
}

impl CacheConfig {
    /// Default compute cache budget: 1 GiB.
    pub const DEFAULT_COMPUTE_MEMORY_LIMIT: usize = 1 << 30;
    /// Default number of remembered hashes.
    pub const DEFAULT_HASH_CACHE_SIZE_LIMIT: usize = 128_000;

    /// The defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            compute_memory_limit: Self::DEFAULT_COMPUTE_MEMORY_LIMIT,
            hash_cache_size_limit: Self::DEFAULT_HASH_CACHE_SIZE_LIMIT,
        }
    }

    /// Total [`Value::memory_usage`](trellis_context::Value::memory_usage)
    /// of computed values the compute cache may hold.
    #[must_use]
    pub const fn with_compute_memory_limit(mut self, bytes: usize) -> Self {
        self.compute_memory_limit = bytes;
        self
    }

    /// Number of hashes the hash cache may hold. Clamped to at least one.
    #[must_use]
    pub const fn with_hash_cache_size_limit(mut self, entries: usize) -> Self {
        self.hash_cache_size_limit = entries;
        self
    }

    /// Compute cache budget in bytes.
    #[must_use]
    pub const fn compute_memory_limit(&self) -> usize {
        self.compute_memory_limit
    }

    /// Hash cache capacity.
    #[must_use]
    pub const fn hash_cache_size_limit(&self) -> usize {
        self.hash_cache_size_limit
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}
