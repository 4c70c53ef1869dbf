//! Cache implementations for source block reads.

mod block_cache;

pub use block_cache::{hash_path, BlockCache, BlockKey, CacheStats};
