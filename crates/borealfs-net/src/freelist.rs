//! Fixed-capacity descriptor pools.
//!
//! Every descriptor kind (message, memory descriptor, event queue, match
//! entry) draws from its own pool: all objects are allocated up front and
//! recycled through a free list, so the steady-state data path never hits
//! the allocator. Exhaustion is an expected outcome under load, not an
//! error; callers apply backpressure. A leak discovered at teardown, on
//! the other hand, is an unrecoverable earlier bug.

/// A fixed-capacity object pool with an intrusive-free-list discipline.
pub struct Pool<T: Default> {
    name: &'static str,
    slots: Vec<T>,
    busy: Vec<bool>,
    free: Vec<usize>,
}

impl<T: Default> Pool<T> {
    /// Creates a pool holding `capacity` default-initialized objects, all
    /// initially free.
    pub fn new(name: &'static str, capacity: usize) -> Pool<T> {
        assert!(capacity > 0, "{} pool created empty", name);
        let mut slots = Vec::new();
        slots.resize_with(capacity, T::default);
        Pool {
            name,
            slots,
            busy: vec![false; capacity],
            free: (0..capacity).rev().collect(),
        }
    }

    /// Pops a free slot, or `None` when the pool is exhausted.
    pub fn alloc(&mut self) -> Option<usize> {
        let slot = self.free.pop()?;
        self.busy[slot] = true;
        Some(slot)
    }

    /// Returns a slot to the free list, resetting the object. Freeing a
    /// slot that is not allocated is a caller bug.
    pub fn free(&mut self, slot: usize) {
        assert!(
            self.busy[slot],
            "{} pool: freeing slot {} twice",
            self.name, slot
        );
        self.slots[slot] = T::default();
        self.busy[slot] = false;
        self.free.push(slot);
    }

    /// Shared access to an allocated slot.
    pub fn get(&self, slot: usize) -> Option<&T> {
        if *self.busy.get(slot)? {
            Some(&self.slots[slot])
        } else {
            None
        }
    }

    /// Exclusive access to an allocated slot.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        if *self.busy.get(slot)? {
            Some(&mut self.slots[slot])
        } else {
            None
        }
    }

    /// Number of objects currently allocated.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total pool capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot indices currently allocated, for teardown diagnostics.
    pub fn busy_slots(&self) -> Vec<usize> {
        self.busy
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
            .collect()
    }

    /// Verifies every object has been returned before the pool is
    /// released. A missing object means some earlier path leaked it.
    pub fn fini(&mut self) {
        assert!(
            self.in_use() == 0,
            "{} pool torn down with {} objects leaked",
            self.name,
            self.in_use()
        );
        self.slots.clear();
        self.busy.clear();
        self.free.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_and_reuse() {
        let mut pool: Pool<u64> = Pool::new("test", 3);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_eq!(pool.alloc(), None);

        pool.free(b);
        assert!(pool.alloc().is_some());
        assert_eq!(pool.alloc(), None);

        pool.free(a);
        pool.free(c);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_free_resets_object() {
        let mut pool: Pool<u64> = Pool::new("test", 1);
        let slot = pool.alloc().unwrap();
        *pool.get_mut(slot).unwrap() = 99;
        pool.free(slot);

        let slot = pool.alloc().unwrap();
        assert_eq!(*pool.get(slot).unwrap(), 0);
    }

    #[test]
    fn test_get_vacant_slot_is_none() {
        let mut pool: Pool<u64> = Pool::new("test", 2);
        let slot = pool.alloc().unwrap();
        assert!(pool.get(slot).is_some());
        pool.free(slot);
        assert!(pool.get(slot).is_none());
        assert!(pool.get(17).is_none());
    }

    #[test]
    #[should_panic(expected = "twice")]
    fn test_double_free_panics() {
        let mut pool: Pool<u64> = Pool::new("test", 2);
        let slot = pool.alloc().unwrap();
        pool.free(slot);
        pool.free(slot);
    }

    #[test]
    #[should_panic(expected = "leaked")]
    fn test_fini_with_leak_panics() {
        let mut pool: Pool<u64> = Pool::new("test", 2);
        pool.alloc().unwrap();
        pool.fini();
    }

    #[test]
    fn test_fini_clean() {
        let mut pool: Pool<u64> = Pool::new("test", 2);
        let slot = pool.alloc().unwrap();
        pool.free(slot);
        pool.fini();
    }
}
