//! Byte buffer pool.
//!
//! Stage trees and flush arrays live in in-memory buffers that are the same
//! size for every stage of a bucket. Returning them to a pool after a flush
//! lets the next stage reuse the allocation instead of growing a fresh one.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Configuration for a buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Maximum number of idle buffers retained.
    pub max_buffers: usize,
    /// Capacity reserved for newly allocated buffers.
    pub buffer_capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_buffers: 2,
            buffer_capacity: 0,
        }
    }
}

/// Allocation counters for a buffer pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated because the pool was empty.
    pub allocated: u64,
    /// Buffers handed out from the free list.
    pub reused: u64,
    /// Released buffers dropped because the free list was full.
    pub dropped: u64,
}

/// Bounded free list of byte buffers.
///
/// Buffers handed out by [`BufferPool::acquire`] are always empty; their
/// capacity is whatever they grew to during earlier use.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Idle buffers.
    free_list: Mutex<Vec<BytesMut>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    dropped: AtomicU64,
}

impl BufferPool {
    /// Creates an empty pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let max_buffers = config.max_buffers;
        Self {
            config,
            free_list: Mutex::new(Vec::with_capacity(max_buffers)),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the maximum number of idle buffers retained.
    pub fn max_buffers(&self) -> usize {
        self.config.max_buffers
    }

    /// Returns the capacity reserved for new buffers.
    pub fn buffer_capacity(&self) -> usize {
        self.config.buffer_capacity
    }

    /// Returns the number of idle buffers.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the allocation counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Takes an idle buffer, or allocates one if none is available.
    pub fn acquire(&self) -> BytesMut {
        if let Some(buf) = self.free_list.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return buf;
        }

        self.allocated.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(self.config.buffer_capacity)
    }

    /// Returns a buffer to the pool.
    ///
    /// The buffer is cleared. It is dropped if the pool already holds
    /// `max_buffers` idle buffers.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();

        let mut free_list = self.free_list.lock();
        if free_list.len() < self.config.max_buffers {
            free_list.push(buf);
            return;
        }
        drop(free_list);

        self.dropped.fetch_add(1, Ordering::Relaxed);
        trace!(capacity = buf.capacity(), "buffer pool full, dropping buffer");
    }
}
