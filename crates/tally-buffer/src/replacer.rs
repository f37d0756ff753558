//! Replacement policies for the node cache.

use crate::slot::SlotId;
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Trait for cache replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given slot was accessed.
    fn record_access(&self, slot_id: SlotId);

    /// Marks a slot as evictable (unpinned).
    fn set_evictable(&self, slot_id: SlotId, evictable: bool);

    /// Selects a victim slot for eviction.
    ///
    /// Returns None if no slots are evictable.
    fn evict(&self) -> Option<SlotId>;

    /// Removes a slot from the replacer.
    fn remove(&self, slot_id: SlotId);

    /// Returns the number of evictable slots.
    fn size(&self) -> usize;
}

/// Least-recently-used replacement.
///
/// Each access stamps the slot with a monotonically increasing tick.
/// Evictable slots are kept ordered by their last stamp, so the victim is
/// always the evictable slot touched longest ago. Pinned slots are simply
/// absent from the ordering.
pub struct LruReplacer {
    /// Internal state protected by mutex.
    inner: Mutex<LruReplacerInner>,
}

struct LruReplacerInner {
    /// Total number of slots.
    num_slots: usize,
    /// Last access tick for each slot.
    last_access: Vec<u64>,
    /// Whether each slot is currently evictable.
    is_evictable: Vec<bool>,
    /// Evictable slots ordered by last access.
    order: BTreeSet<(u64, SlotId)>,
    /// Access counter.
    tick: u64,
}

impl LruReplacer {
    /// Creates a new LRU replacer with the given number of slots.
    pub fn new(num_slots: usize) -> Self {
        Self {
            inner: Mutex::new(LruReplacerInner {
                num_slots,
                last_access: vec![0; num_slots],
                is_evictable: vec![false; num_slots],
                order: BTreeSet::new(),
                tick: 0,
            }),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().num_slots
    }
}

impl Replacer for LruReplacer {
    fn record_access(&self, slot_id: SlotId) {
        let mut inner = self.inner.lock();
        let idx = slot_id.0 as usize;
        if idx >= inner.num_slots {
            return;
        }

        inner.tick += 1;
        let tick = inner.tick;
        if inner.is_evictable[idx] {
            let prev = inner.last_access[idx];
            inner.order.remove(&(prev, slot_id));
            inner.order.insert((tick, slot_id));
        }
        inner.last_access[idx] = tick;
    }

    fn set_evictable(&self, slot_id: SlotId, evictable: bool) {
        let mut inner = self.inner.lock();
        let idx = slot_id.0 as usize;
        if idx >= inner.num_slots || inner.is_evictable[idx] == evictable {
            return;
        }

        let stamp = inner.last_access[idx];
        if evictable {
            inner.order.insert((stamp, slot_id));
        } else {
            inner.order.remove(&(stamp, slot_id));
        }
        inner.is_evictable[idx] = evictable;
    }

    fn evict(&self) -> Option<SlotId> {
        let mut inner = self.inner.lock();
        let (_, slot_id) = inner.order.pop_first()?;
        inner.is_evictable[slot_id.0 as usize] = false;
        Some(slot_id)
    }

    fn remove(&self, slot_id: SlotId) {
        let mut inner = self.inner.lock();
        let idx = slot_id.0 as usize;
        if idx >= inner.num_slots {
            return;
        }

        if inner.is_evictable[idx] {
            let stamp = inner.last_access[idx];
            inner.order.remove(&(stamp, slot_id));
            inner.is_evictable[idx] = false;
        }
        inner.last_access[idx] = 0;
    }

    fn size(&self) -> usize {
        self.inner.lock().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_set_evictable() {
        let replacer = LruReplacer::new(10);

        replacer.set_evictable(SlotId(0), true);
        replacer.set_evictable(SlotId(1), true);
        replacer.set_evictable(SlotId(2), true);
        assert_eq!(replacer.size(), 3);

        replacer.set_evictable(SlotId(1), false);
        assert_eq!(replacer.size(), 2);

        // Repeated calls are idempotent
        replacer.set_evictable(SlotId(0), true);
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_lru_replacer_evict_empty() {
        let replacer = LruReplacer::new(10);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_replacer_evicts_least_recent() {
        let replacer = LruReplacer::new(4);

        for i in 0..4 {
            replacer.record_access(SlotId(i));
            replacer.set_evictable(SlotId(i), true);
        }

        // Touch 0 and 1 again; 2 is now the oldest
        replacer.record_access(SlotId(0));
        replacer.record_access(SlotId(1));

        assert_eq!(replacer.evict(), Some(SlotId(2)));
        assert_eq!(replacer.evict(), Some(SlotId(3)));
        assert_eq!(replacer.evict(), Some(SlotId(0)));
        assert_eq!(replacer.evict(), Some(SlotId(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_replacer_skips_pinned() {
        let replacer = LruReplacer::new(3);

        for i in 0..3 {
            replacer.record_access(SlotId(i));
            replacer.set_evictable(SlotId(i), true);
        }

        // Pin the oldest slot
        replacer.set_evictable(SlotId(0), false);
        assert_eq!(replacer.evict(), Some(SlotId(1)));

        // Unpinning restores its original position
        replacer.set_evictable(SlotId(0), true);
        assert_eq!(replacer.evict(), Some(SlotId(0)));
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_lru_replacer_remove() {
        let replacer = LruReplacer::new(10);

        replacer.set_evictable(SlotId(0), true);
        replacer.set_evictable(SlotId(1), true);
        assert_eq!(replacer.size(), 2);

        replacer.remove(SlotId(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(SlotId(1)));
    }

    #[test]
    fn test_lru_replacer_out_of_bounds() {
        let replacer = LruReplacer::new(5);

        // These should not panic
        replacer.set_evictable(SlotId(100), true);
        replacer.record_access(SlotId(100));
        replacer.remove(SlotId(100));

        assert_eq!(replacer.size(), 0);
    }
}
