//! The client cache aggregate shared by all objects under one mount.
//!
//! Tracks the LRU page budget and the eviction queue linkage. Victim
//! selection and the actual write-back belong to the external transfer
//! engine; this aggregate only accounts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

/// Shared page-budget and LRU accounting for one mount.
///
/// Shared ownership across the mount and every layered object store
/// using it is expressed with `Arc`; the aggregate is destroyed when the
/// last clone drops, from whichever subsystem that happens to be.
pub struct ClientCache {
    lru_max: usize,
    lru_left: AtomicI64,
    lru: Mutex<VecDeque<(u64, u64)>>,
}

impl ClientCache {
    /// Creates an aggregate with a budget of `max_lru_pages` cached
    /// pages.
    pub fn new(max_lru_pages: usize) -> Arc<ClientCache> {
        Arc::new(ClientCache {
            lru_max: max_lru_pages,
            lru_left: AtomicI64::new(max_lru_pages as i64),
            lru: Mutex::new(VecDeque::new()),
        })
    }

    /// The configured budget.
    pub fn max_pages(&self) -> usize {
        self.lru_max
    }

    /// Remaining budget.
    pub fn remaining(&self) -> i64 {
        self.lru_left.load(Ordering::Acquire)
    }

    /// Takes `n` units of budget if available. On refusal the caller
    /// must have the transfer engine evict least-recently-used unpinned
    /// pages before admission can proceed.
    pub fn try_reserve(&self, n: usize) -> bool {
        let n = n as i64;
        let mut cur = self.lru_left.load(Ordering::Acquire);
        loop {
            if cur < n {
                warn!(
                    "lru budget exhausted ({} of {} left, {} wanted)",
                    cur, self.lru_max, n
                );
                return false;
            }
            match self.lru_left.compare_exchange_weak(
                cur,
                cur - n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Returns `n` units of budget.
    pub fn unreserve(&self, n: usize) {
        let prev = self.lru_left.fetch_add(n as i64, Ordering::AcqRel);
        debug_assert!(prev + n as i64 <= self.lru_max as i64, "budget overflow");
    }

    /// Appends a page to the eviction queue (most recently used end).
    pub fn lru_add(&self, object: u64, index: u64) {
        self.lru.lock().unwrap().push_back((object, index));
    }

    /// Removes a page from the eviction queue.
    pub fn lru_del(&self, object: u64, index: u64) {
        let mut lru = self.lru.lock().unwrap();
        if let Some(pos) = lru.iter().position(|&e| e == (object, index)) {
            lru.remove(pos);
        }
    }

    /// Moves a page to the most recently used end.
    pub fn lru_touch(&self, object: u64, index: u64) {
        let mut lru = self.lru.lock().unwrap();
        if let Some(pos) = lru.iter().position(|&e| e == (object, index)) {
            lru.remove(pos);
            lru.push_back((object, index));
        }
    }

    /// The least recently used page, for the eviction engine.
    pub fn lru_oldest(&self) -> Option<(u64, u64)> {
        self.lru.lock().unwrap().front().copied()
    }

    /// Pages currently on the eviction queue.
    pub fn lru_len(&self) -> usize {
        self.lru.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_reserve_unreserve() {
        let cache = ClientCache::new(2);
        assert_eq!(cache.remaining(), 2);
        assert!(cache.try_reserve(1));
        assert!(cache.try_reserve(1));
        assert!(!cache.try_reserve(1));
        cache.unreserve(1);
        assert!(cache.try_reserve(1));
        assert_eq!(cache.remaining(), 0);
    }

    #[test]
    fn test_reserve_more_than_budget() {
        let cache = ClientCache::new(4);
        assert!(!cache.try_reserve(5));
        assert!(cache.try_reserve(4));
    }

    #[test]
    fn test_lru_order_and_touch() {
        let cache = ClientCache::new(8);
        cache.lru_add(1, 10);
        cache.lru_add(1, 11);
        cache.lru_add(2, 10);
        assert_eq!(cache.lru_oldest(), Some((1, 10)));

        cache.lru_touch(1, 10);
        assert_eq!(cache.lru_oldest(), Some((1, 11)));

        cache.lru_del(1, 11);
        assert_eq!(cache.lru_oldest(), Some((2, 10)));
        assert_eq!(cache.lru_len(), 2);
    }

    #[test]
    fn test_shared_across_subsystems() {
        let cache = ClientCache::new(1);
        let mount_ref = Arc::clone(&cache);
        let store_ref = Arc::clone(&cache);
        drop(mount_ref);
        assert!(store_ref.try_reserve(1));
        assert!(!cache.try_reserve(1));
    }
}
