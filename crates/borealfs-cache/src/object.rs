//! Cached objects: the per-file page index and layer stack.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::backing::{BackingGuard, BackingPage};
use crate::client_cache::ClientCache;
use crate::error::{CacheError, CacheResult};
use crate::page::{Page, PageType};
use crate::slice::ObjectLayer;

/// Cache statistics for one object.
#[derive(Debug, Default)]
pub struct ObjectStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
}

/// One cached object (a file's data) with its vertically composed layer
/// stack and page index.
pub struct CacheObject {
    id: u64,
    layers: Vec<Arc<dyn ObjectLayer>>,
    pages: DashMap<u64, Arc<Page>>,
    cache: Arc<ClientCache>,
    stats: ObjectStats,
}

impl CacheObject {
    /// Creates an object with the given layer stack, top layer first.
    /// The composition order is fixed for the object's lifetime.
    pub fn new(
        id: u64,
        layers: Vec<Arc<dyn ObjectLayer>>,
        cache: Arc<ClientCache>,
    ) -> Arc<CacheObject> {
        Arc::new(CacheObject {
            id,
            layers,
            pages: DashMap::new(),
            cache,
            stats: ObjectStats::default(),
        })
    }

    /// Object identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The shared client cache this object draws its page budget from.
    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Returns the page at `index` linked to `backing`, creating it if
    /// absent. The returned page carries a reference owned by the caller.
    ///
    /// The fast path reads the backing page's private link, which is
    /// valid only while the backing page is locked — hence the `guard`
    /// parameter. On a miss, a new page is built by running every
    /// layer's initializer top-to-bottom; if one fails, the layers
    /// already built are torn down in reverse and the error propagates,
    /// so a partially-initialized page is never exposed.
    ///
    /// Admission of a cacheable page consumes one unit of the client
    /// cache budget; `NoBudget` means the caller must trigger eviction
    /// and retry.
    pub fn find_or_create(
        self: &Arc<Self>,
        index: u64,
        backing: &Arc<BackingPage>,
        guard: &mut BackingGuard<'_>,
        ptype: PageType,
    ) -> CacheResult<Arc<Page>> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);

        if ptype == PageType::Cacheable {
            if let Some(page) = guard.linked() {
                debug_assert_eq!(page.page_type(), PageType::Cacheable);
                page.get_trust();
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(page);
            }
        }

        if ptype == PageType::Cacheable && !self.cache.try_reserve(1) {
            return Err(CacheError::NoBudget);
        }

        let mut slices = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            match layer.init_page(index) {
                Ok(slice) => slices.push(slice),
                Err(e) => {
                    debug!(
                        "layer {} failed to init page {} of object {}: {}",
                        layer.name(),
                        index,
                        self.id,
                        e
                    );
                    for slice in slices.iter().rev() {
                        slice.delete();
                    }
                    for slice in slices.iter() {
                        slice.fini();
                    }
                    if ptype == PageType::Cacheable {
                        self.cache.unreserve(1);
                    }
                    return Err(e);
                }
            }
        }

        let page = Arc::new(Page::new(
            Arc::clone(self),
            index,
            ptype,
            Arc::clone(backing),
            slices,
        ));
        self.stats.created.fetch_add(1, Ordering::Relaxed);

        if ptype == PageType::Cacheable {
            // The index holds its own reference, dropped by delete.
            page.get_trust();
            guard.link(&page);
            self.pages.insert(index, Arc::clone(&page));
            self.cache.lru_add(self.id, index);
        }

        Ok(page)
    }

    /// Looks up a live page by index, taking a reference for the caller.
    /// A page already in the freeing state may still be returned briefly;
    /// callers observe `Gone` when they try to own it.
    pub fn find_page(&self, index: u64) -> Option<Arc<Page>> {
        let page = self.pages.get(&index).map(|p| Arc::clone(p.value()))?;
        page.get_trust();
        Some(page)
    }

    /// Number of pages currently indexed.
    pub fn pages_len(&self) -> usize {
        self.pages.len()
    }

    /// Unlinks `page` from the index if it is still the indexed entry.
    pub(crate) fn unlink_page(&self, index: u64, page: &Arc<Page>) -> bool {
        self.pages
            .remove_if(&index, |_, indexed| Arc::ptr_eq(indexed, page))
            .is_some()
    }

    pub(crate) fn note_page_destroyed(&self) {
        self.stats.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Total index lookups.
    pub fn lookups(&self) -> u64 {
        self.stats.lookups.load(Ordering::Relaxed)
    }

    /// Lookups satisfied by the backing-page fast path.
    pub fn hits(&self) -> u64 {
        self.stats.hits.load(Ordering::Relaxed)
    }

    /// Pages created for this object.
    pub fn created(&self) -> u64 {
        self.stats.created.load(Ordering::Relaxed)
    }

    /// Pages destroyed after their last reference dropped.
    pub fn destroyed(&self) -> u64 {
        self.stats.destroyed.load(Ordering::Relaxed)
    }
}
