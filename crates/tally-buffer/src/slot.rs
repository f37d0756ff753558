//! Cache slot management.

/// Unique identifier for a slot in the node cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// A cached entry and the number of users currently holding it.
#[derive(Debug)]
pub struct CacheSlot<K, V> {
    /// Key the entry is cached under.
    key: K,
    /// Cached handle.
    value: V,
    /// Number of active pins.
    pin_count: u32,
}

impl<K, V> CacheSlot<K, V> {
    /// Creates an unpinned slot.
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            pin_count: 0,
        }
    }

    /// Returns the cached value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Replaces the cached value.
    pub fn set_value(&mut self, value: V) {
        self.value = value;
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    /// Increments the pin count and returns the previous pin count.
    #[inline]
    pub fn pin(&mut self) -> u32 {
        let prev = self.pin_count;
        self.pin_count += 1;
        prev
    }

    /// Decrements the pin count, saturating at zero.
    ///
    /// Returns the new pin count.
    #[inline]
    pub fn unpin(&mut self) -> u32 {
        self.pin_count = self.pin_count.saturating_sub(1);
        self.pin_count
    }

    /// Returns true if this slot is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Consumes the slot, returning its key and value.
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_display() {
        assert_eq!(SlotId(7).to_string(), "slot:7");
    }

    #[test]
    fn test_pin_unpin() {
        let mut slot = CacheSlot::new(3u32, "node");
        assert!(!slot.is_pinned());

        assert_eq!(slot.pin(), 0);
        assert_eq!(slot.pin(), 1);
        assert_eq!(slot.pin_count(), 2);

        assert_eq!(slot.unpin(), 1);
        assert_eq!(slot.unpin(), 0);
        assert!(!slot.is_pinned());
    }

    #[test]
    fn test_unpin_underflow() {
        let mut slot = CacheSlot::new(1u32, ());
        assert_eq!(slot.unpin(), 0);
        assert_eq!(slot.pin_count(), 0);
    }

    #[test]
    fn test_set_value_and_into_parts() {
        let mut slot = CacheSlot::new(9u32, 1u64);
        slot.set_value(2);
        assert_eq!(*slot.value(), 2);
        assert_eq!(slot.into_parts(), (9, 2));
    }
}
