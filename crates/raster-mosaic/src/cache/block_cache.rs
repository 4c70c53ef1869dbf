//! LRU cache for decoded source blocks.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;

/// Cache key for blocks: (source_path_hash, block_x, block_y).
pub type BlockKey = (u64, usize, usize);

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache for decoded blocks with memory-bounded eviction.
///
/// Blocks hold every band of a source, band-major, widened to `f64`.
pub struct BlockCache {
    cache: LruCache<BlockKey, Arc<Vec<f64>>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl BlockCache {
    /// Create a cache bounded to `memory_limit` bytes.
    pub fn new(memory_limit: usize) -> Self {
        // Entry count is a ceiling only; memory is what actually bounds it.
        let block_size_estimate = 256 * 256 * std::mem::size_of::<f64>();
        let max_entries = (memory_limit / block_size_estimate).max(16);

        Self {
            cache: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a block, refreshing its LRU position on a hit.
    pub fn get(&mut self, key: &BlockKey) -> Option<Arc<Vec<f64>>> {
        if let Some(data) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(data))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.cache.contains(key)
    }

    /// Insert a block, evicting least recently used entries to make room.
    ///
    /// Blocks larger than the whole budget are not cached.
    pub fn insert(&mut self, key: BlockKey, data: Arc<Vec<f64>>) {
        let data_size = Self::size_of(&data);

        while self.current_memory + data_size > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                self.current_memory = self.current_memory.saturating_sub(Self::size_of(&evicted));
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if data_size <= self.memory_limit {
            if let Some((_, replaced)) = self.cache.push(key, data) {
                self.current_memory = self.current_memory.saturating_sub(Self::size_of(&replaced));
            }
            self.current_memory += data_size;
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn size_of(data: &[f64]) -> usize {
        std::mem::size_of_val(data)
    }
}

/// Hash a source path for use in a [`BlockKey`].
pub fn hash_path(path: &Path) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}
