//! Buffer pooling and node caching for tally.
//!
//! This crate provides:
//! - A bounded free list of byte buffers reused across stage flushes
//! - A bounded node cache with pin counting and LRU eviction
//! - The replacement policy the cache evicts with

mod cache;
mod pool;
mod replacer;
mod slot;

pub use cache::{CacheStats, NodeCache};
pub use pool::{BufferPool, BufferPoolConfig, PoolStats};
pub use replacer::{LruReplacer, Replacer};
pub use slot::{CacheSlot, SlotId};
