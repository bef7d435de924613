//! Property-based tests for the page cache using proptest.
//!
//! These drive randomized own/disown/delete/get/release sequences against
//! a small model to verify the destruction invariants: a page is
//! destroyed exactly once, only after delete, and layer finalizers run
//! once per slice.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use borealfs_cache::{
    BackingPage, CacheObject, CacheResult, ClientCache, IoContext, ObjectLayer, PageSlice,
    PageState, PageType,
};

struct CountingLayer {
    finis: Arc<AtomicU32>,
}

struct CountingSlice {
    finis: Arc<AtomicU32>,
}

impl ObjectLayer for CountingLayer {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn init_page(&self, _index: u64) -> CacheResult<Box<dyn PageSlice>> {
        Ok(Box::new(CountingSlice {
            finis: Arc::clone(&self.finis),
        }))
    }
}

impl PageSlice for CountingSlice {
    fn layer_name(&self) -> &'static str {
        "counting"
    }

    fn fini(&self) {
        self.finis.fetch_add(1, Ordering::SeqCst);
    }
}

/// Operations the random walk may attempt.
#[derive(Debug, Clone, Copy)]
enum Op {
    Get,
    Release,
    Own,
    Disown,
    Delete,
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Get),
        Just(Op::Release),
        Just(Op::Own),
        Just(Op::Disown),
        Just(Op::Delete),
    ]
}

proptest! {
    /// Any interleaving of get/release/own/disown/delete, followed by a
    /// full drain of remaining references, destroys the page exactly
    /// once and runs each slice finalizer exactly once.
    #[test]
    fn test_random_lifecycle_destroys_exactly_once(
        ops in proptest::collection::vec(any_op(), 1..60),
    ) {
        let finis = Arc::new(AtomicU32::new(0));
        let layers: Vec<Arc<dyn ObjectLayer>> = vec![
            Arc::new(CountingLayer { finis: Arc::clone(&finis) }),
            Arc::new(CountingLayer { finis: Arc::clone(&finis) }),
        ];
        let object = CacheObject::new(1, layers, ClientCache::new(16));

        let backing = BackingPage::new();
        let page = {
            let mut guard = backing.lock();
            object
                .find_or_create(0, &backing, &mut guard, PageType::Cacheable)
                .unwrap()
        };
        let io = IoContext::new();

        // Model: references the walk owns beyond the creation reference.
        let mut extra_refs = 0u32;
        let mut owned = false;
        let mut deleted = false;

        for op in ops {
            match op {
                Op::Get => {
                    page.get();
                    extra_refs += 1;
                }
                Op::Release => {
                    if extra_refs > 0 {
                        page.release();
                        extra_refs -= 1;
                    }
                }
                Op::Own => {
                    if !owned {
                        match page.own(&io, false) {
                            Ok(()) => {
                                prop_assert!(!deleted);
                                owned = true;
                            }
                            Err(e) => {
                                prop_assert!(deleted, "unexpected {}", e);
                            }
                        }
                    }
                }
                Op::Disown => {
                    if owned {
                        page.disown(&io);
                        owned = false;
                    }
                }
                Op::Delete => {
                    if !deleted {
                        page.delete();
                        deleted = true;
                        // Delete clears ownership as part of freeing.
                        owned = false;
                    }
                }
            }

            prop_assert_eq!(
                page.state() == PageState::Owned,
                owned,
                "ownership invariant violated"
            );
            prop_assert_eq!(io.owned_pages(), owned as u32);
            prop_assert_eq!(object.destroyed(), 0);
        }

        // Drain: delete if the walk never did, then drop every
        // remaining reference.
        if !deleted {
            page.delete();
        }
        for _ in 0..extra_refs {
            page.release();
        }
        prop_assert_eq!(object.destroyed(), 0);
        page.release();

        prop_assert_eq!(object.destroyed(), 1);
        prop_assert_eq!(finis.load(Ordering::SeqCst), 2);
        prop_assert_eq!(object.created(), 1);
    }

    /// The cache-hit fast path returns the same page for as long as the
    /// backing page stays locked, adding one reference per lookup.
    #[test]
    fn test_repeated_lookup_hit_counts(hits in 1usize..20) {
        let layers: Vec<Arc<dyn ObjectLayer>> = vec![Arc::new(CountingLayer {
            finis: Arc::new(AtomicU32::new(0)),
        })];
        let object = CacheObject::new(2, layers, ClientCache::new(4));
        let backing = BackingPage::new();
        let mut guard = backing.lock();

        let first = object
            .find_or_create(0, &backing, &mut guard, PageType::Cacheable)
            .unwrap();
        let mut pages = Vec::new();
        for _ in 0..hits {
            pages.push(
                object
                    .find_or_create(0, &backing, &mut guard, PageType::Cacheable)
                    .unwrap(),
            );
        }

        prop_assert!(pages.iter().all(|p| Arc::ptr_eq(p, &first)));
        prop_assert_eq!(first.ref_count() as usize, 2 + hits);
        prop_assert_eq!(object.hits() as usize, hits);
        prop_assert_eq!(object.created(), 1);

        drop(guard);
        for page in pages {
            page.release();
        }
        first.release();
        // Still indexed: the index reference keeps it alive and cached.
        prop_assert_eq!(first.ref_count(), 1);
        prop_assert_eq!(object.destroyed(), 0);
    }
}
