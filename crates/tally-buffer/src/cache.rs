//! Bounded node cache with pinning.
//!
//! Tree scans look nodes up by their array index. The cache keeps recently
//! used handles so a node is not decoded from storage again while it is hot.
//! Entries on the scan's current path are pinned and never evicted; once
//! unpinned they become eligible for LRU eviction.

use crate::replacer::{LruReplacer, Replacer};
use crate::slot::{CacheSlot, SlotId};
use std::collections::HashMap;
use std::hash::Hash;

/// Hit and eviction counters for a node cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Entries evicted to make room.
    pub evictions: u64,
}

/// Fixed-capacity cache from keys to cloneable handles.
pub struct NodeCache<K, V> {
    /// Key to slot mapping.
    index: HashMap<K, SlotId>,
    /// Slot storage; `None` marks a free slot.
    slots: Vec<Option<CacheSlot<K, V>>>,
    /// List of free slot IDs.
    free_list: Vec<SlotId>,
    /// Eviction policy.
    replacer: LruReplacer,
    /// Counters.
    stats: CacheStats,
}

impl<K, V> NodeCache<K, V>
where
    K: Copy + Eq + Hash,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// A zero-capacity cache never stores anything.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        // Pop from the back hands out slot 0 first
        let free_list = (0..capacity as u32).rev().map(SlotId).collect();

        Self {
            index: HashMap::with_capacity(capacity),
            slots,
            free_list,
            replacer: LruReplacer::new(capacity),
            stats: CacheStats::default(),
        }
    }

    /// Returns the maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the hit and eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Checks if a key is cached.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns true if the key is cached and pinned.
    pub fn is_pinned(&self, key: &K) -> bool {
        self.slot(key).map(|s| s.is_pinned()).unwrap_or(false)
    }

    /// Looks up a key, recording the access on a hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        match self.index.get(key).copied() {
            Some(slot_id) => {
                self.stats.hits += 1;
                self.replacer.record_access(slot_id);
                self.slots[slot_id.0 as usize]
                    .as_ref()
                    .map(|s| s.value().clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces an entry.
    ///
    /// Evicts the least recently used unpinned entry when full. Returns false
    /// if there was no room because every entry is pinned.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if let Some(slot_id) = self.index.get(&key).copied() {
            if let Some(slot) = self.slots[slot_id.0 as usize].as_mut() {
                slot.set_value(value);
            }
            self.replacer.record_access(slot_id);
            return true;
        }

        let slot_id = match self.allocate_slot() {
            Some(slot_id) => slot_id,
            None => return false,
        };

        self.slots[slot_id.0 as usize] = Some(CacheSlot::new(key, value));
        self.index.insert(key, slot_id);
        self.replacer.record_access(slot_id);
        self.replacer.set_evictable(slot_id, true);
        true
    }

    /// Pins a cached entry so it cannot be evicted.
    ///
    /// Returns the entry's value, or None if the key is not cached.
    pub fn pin(&mut self, key: &K) -> Option<V> {
        let slot_id = self.index.get(key).copied()?;
        let slot = self.slots[slot_id.0 as usize].as_mut()?;
        if slot.pin() == 0 {
            self.replacer.set_evictable(slot_id, false);
        }
        self.replacer.record_access(slot_id);
        Some(slot.value().clone())
    }

    /// Releases one pin. The entry becomes evictable when its last pin is
    /// released. Returns false if the key is not cached.
    pub fn unpin(&mut self, key: &K) -> bool {
        let Some(slot_id) = self.index.get(key).copied() else {
            return false;
        };
        let Some(slot) = self.slots[slot_id.0 as usize].as_mut() else {
            return false;
        };
        if slot.unpin() == 0 {
            self.replacer.set_evictable(slot_id, true);
        }
        true
    }

    /// Removes an unpinned entry. Pinned entries stay put.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot_id = self.index.get(key).copied()?;
        if self.slots[slot_id.0 as usize]
            .as_ref()
            .map(|s| s.is_pinned())
            .unwrap_or(false)
        {
            return None;
        }

        self.index.remove(key);
        self.replacer.remove(slot_id);
        self.free_list.push(slot_id);
        self.slots[slot_id.0 as usize]
            .take()
            .map(|s| s.into_parts().1)
    }

    /// Drops every entry, pinned or not.
    pub fn clear(&mut self) {
        for (_, slot_id) in self.index.drain() {
            self.replacer.remove(slot_id);
            self.slots[slot_id.0 as usize] = None;
            self.free_list.push(slot_id);
        }
    }

    fn slot(&self, key: &K) -> Option<&CacheSlot<K, V>> {
        let slot_id = self.index.get(key)?;
        self.slots[slot_id.0 as usize].as_ref()
    }

    /// Takes a free slot, evicting if necessary.
    fn allocate_slot(&mut self) -> Option<SlotId> {
        if let Some(slot_id) = self.free_list.pop() {
            return Some(slot_id);
        }

        let victim = self.replacer.evict()?;
        if let Some(slot) = self.slots[victim.0 as usize].take() {
            let (key, _) = slot.into_parts();
            self.index.remove(&key);
            self.stats.evictions += 1;
        }
        Some(victim)
    }
}
