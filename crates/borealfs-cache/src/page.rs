//! Cached pages and their ownership/transfer protocol.
//!
//! Ownership discipline: `state == Owned` if and only if the page has an
//! owning I/O context. State changes go exclusively through the
//! transition matrix in [`crate::state`]; an attempt at a transition
//! absent from the matrix is a caller bug and panics, leaving the state
//! unchanged.
//!
//! Reference discipline: a page is reachable for new references only
//! while not `Freeing`. [`Page::delete`] severs every external lookup
//! path, so once a page is freeing its reference count strictly
//! decreases; the last release destroys it exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::backing::BackingPage;
use crate::error::{CacheError, CacheResult};
use crate::io::IoContext;
use crate::object::CacheObject;
use crate::slice::{PageSlice, TransferDisposition};
use crate::state::{PageState, TransferKind};
use crate::sync::SyncAnchor;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;
const PAGE_SHIFT: u32 = 12;

/// Byte offset of the page at `index` within its object.
pub fn offset_of(index: u64) -> u64 {
    index << PAGE_SHIFT
}

/// Page index covering byte `offset` within an object.
pub fn index_of(offset: u64) -> u64 {
    offset >> PAGE_SHIFT
}

/// How a page participates in the cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageType {
    /// Indexed by the object and subject to the LRU budget.
    Cacheable,
    /// Short-lived transfer page, never indexed.
    Transient,
}

struct PageInner {
    state: PageState,
    owner: Option<Arc<IoContext>>,
    anchor: Option<Arc<SyncAnchor>>,
}

/// One fixed-size unit of object data cached in memory.
pub struct Page {
    object: Arc<CacheObject>,
    index: u64,
    ptype: PageType,
    backing: Arc<BackingPage>,
    refs: AtomicU32,
    // Top-to-bottom composition order; teardown paths iterate in reverse.
    slices: Vec<Box<dyn PageSlice>>,
    inner: Mutex<PageInner>,
}

impl Page {
    pub(crate) fn new(
        object: Arc<CacheObject>,
        index: u64,
        ptype: PageType,
        backing: Arc<BackingPage>,
        slices: Vec<Box<dyn PageSlice>>,
    ) -> Page {
        Page {
            object,
            index,
            ptype,
            backing,
            refs: AtomicU32::new(1),
            slices,
            inner: Mutex::new(PageInner {
                state: PageState::Cached,
                owner: None,
                anchor: None,
            }),
        }
    }

    /// The owning object.
    pub fn object(&self) -> &Arc<CacheObject> {
        &self.object
    }

    /// Index of this page within its object.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Cacheable or transient.
    pub fn page_type(&self) -> PageType {
        self.ptype
    }

    /// The backing physical page.
    pub fn backing(&self) -> &Arc<BackingPage> {
        &self.backing
    }

    /// Current state.
    pub fn state(&self) -> PageState {
        self.inner.lock().unwrap().state
    }

    /// Current logical reference count.
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// True if `io` currently owns this page.
    pub fn is_owned_by(&self, io: &IoContext) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.state == PageState::Owned
            && inner.owner.as_deref().map(|o| o.id()) == Some(io.id())
    }

    /// Takes an additional reference. Only a caller already holding a
    /// reference may call this.
    pub fn get(&self) {
        self.get_trust();
    }

    /// Reference acquisition for trusted paths (existing reference, or
    /// the backing-page lock pinning the page).
    pub(crate) fn get_trust(&self) {
        let prev = self.refs.fetch_add(1, Ordering::AcqRel);
        assert!(prev > 0, "resurrecting unreferenced page {}", self.index);
    }

    /// Drops a reference. When the last reference of a freeing page
    /// goes, the page is destroyed; otherwise it simply stays cached,
    /// reachable by others.
    pub fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "page {} reference count underflow", self.index);
        if prev == 1 {
            self.free();
        }
    }

    /// Moves `guard` to `next` per the transition matrix; the single
    /// place page state is mutated.
    fn transition<'a>(
        &self,
        mut guard: MutexGuard<'a, PageInner>,
        next: PageState,
    ) -> MutexGuard<'a, PageInner> {
        let old = guard.state;
        if !old.can_transition(next) {
            drop(guard);
            panic!(
                "illegal page state transition {:?} -> {:?} (page {})",
                old, next, self.index
            );
        }
        if (next == PageState::Owned) != guard.owner.is_some() {
            let owned = guard.owner.is_some();
            drop(guard);
            panic!(
                "page {} ownership out of sync entering {:?} (owner set: {})",
                self.index, next, owned
            );
        }
        trace!("page {}: {:?} -> {:?}", self.index, old, next);
        guard.state = next;
        guard
    }

    fn owner_set(&self, guard: &mut PageInner, io: &Arc<IoContext>) {
        assert!(
            guard.owner.is_none(),
            "page {} already owned",
            self.index
        );
        guard.owner = Some(Arc::clone(io));
        io.note_owned();
    }

    fn owner_clear(&self, guard: &mut PageInner) {
        if let Some(io) = guard.owner.take() {
            io.note_disowned();
        }
    }

    /// Claims the page for `io`: `Cached -> Owned`.
    ///
    /// Each layer's `try_own` runs top-to-bottom; the first failure
    /// aborts the attempt (`Busy` under nonblocking contention). A page
    /// concurrently moved to freeing yields `Gone` — nothing to do, not
    /// an error. Exclusivity against concurrent claimants is the
    /// caller's responsibility via the backing-page lock.
    pub fn own(&self, io: &Arc<IoContext>, nonblock: bool) -> CacheResult<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state == PageState::Freeing {
                return Err(CacheError::Gone);
            }
        }

        for (built, slice) in self.slices.iter().enumerate() {
            if let Err(e) = slice.try_own(io, nonblock) {
                // Undo the layers that did acquire, innermost first.
                for slice in self.slices[..built].iter().rev() {
                    slice.disown(io);
                }
                return Err(e);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        self.owner_set(&mut inner, io);
        if inner.state != PageState::Freeing {
            let inner = self.transition(inner, PageState::Owned);
            drop(inner);
            Ok(())
        } else {
            // Raced with delete between the layer pass and here.
            self.disown_locked(inner, io);
            Err(CacheError::Gone)
        }
    }

    /// Takes ownership unconditionally; the caller already holds the
    /// equivalent of the backing-page lock, so exclusivity is externally
    /// guaranteed and there is no failure path.
    pub fn assume(&self, io: &Arc<IoContext>) {
        for slice in &self.slices {
            slice.assume(io);
        }

        let mut inner = self.inner.lock().unwrap();
        self.owner_set(&mut inner, io);
        let inner = self.transition(inner, PageState::Owned);
        drop(inner);
    }

    /// Releases ownership without touching the backing-page lock:
    /// `Owned -> Cached`, layer callbacks bottom-to-top.
    pub fn unassume(&self, io: &Arc<IoContext>) {
        let mut inner = self.inner.lock().unwrap();
        self.assert_owned_by(&inner, io, "unassume");
        self.owner_clear(&mut inner);
        let inner = self.transition(inner, PageState::Cached);
        drop(inner);

        for slice in self.slices.iter().rev() {
            slice.unassume(io);
        }
    }

    /// Releases ownership: `Owned -> Cached` (a freeing page stays
    /// freeing). Layer callbacks run bottom-to-top so the VM-facing
    /// layer releases the backing-page lock last.
    pub fn disown(&self, io: &Arc<IoContext>) {
        let inner = self.inner.lock().unwrap();
        if inner.state != PageState::Freeing {
            self.assert_owned_by(&inner, io, "disown");
        }
        self.disown_locked(inner, io);
    }

    fn disown_locked(&self, mut guard: MutexGuard<'_, PageInner>, io: &IoContext) {
        self.owner_clear(&mut guard);
        if guard.state == PageState::Owned {
            guard = self.transition(guard, PageState::Cached);
        }
        drop(guard);

        for slice in self.slices.iter().rev() {
            slice.disown(io);
        }
    }

    /// Notifies the layers, top-to-bottom, that page content is to be
    /// dropped. The page must be owned by `io`.
    pub fn discard(&self, io: &Arc<IoContext>) {
        {
            let inner = self.inner.lock().unwrap();
            self.assert_owned_by(&inner, io, "discard");
        }
        for slice in &self.slices {
            slice.discard(io);
        }
    }

    /// Removes the page from service: `Owned|Cached -> Freeing`.
    ///
    /// Clears ownership, notifies the layers bottom-to-top, and severs
    /// every external lookup path (object index, backing-page link, LRU)
    /// so no new references can appear; existing holders drain the count
    /// to zero, at which point the page is destroyed. Deleting an
    /// already-freeing page is a caller bug. The caller must not hold
    /// the backing-page guard.
    pub fn delete(self: &Arc<Self>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == PageState::Freeing {
            drop(inner);
            panic!("page {} deleted twice", self.index);
        }
        self.owner_clear(&mut inner);
        let inner = self.transition(inner, PageState::Freeing);
        drop(inner);

        for slice in self.slices.iter().rev() {
            slice.delete();
        }

        if self.ptype == PageType::Cacheable {
            self.backing.clear_link();
            if self.object.unlink_page(self.index, self) {
                let cache = self.object.cache();
                cache.lru_del(self.object.id(), self.index);
                cache.unreserve(1);
                // The index held one reference.
                self.release();
            }
        }
    }

    /// Prepares an owned page for immediate transfer, layer preparation
    /// top-to-bottom. A layer may ask for the page to be left out of the
    /// batch (`Skip`); otherwise the page enters the in-flight state for
    /// `kind` and loses its owner.
    pub fn prepare_transfer(
        &self,
        io: &Arc<IoContext>,
        kind: TransferKind,
    ) -> CacheResult<TransferDisposition> {
        {
            let inner = self.inner.lock().unwrap();
            self.assert_owned_by(&inner, io, "prepare_transfer");
        }

        for slice in &self.slices {
            if slice.prepare(io, kind)? == TransferDisposition::Skip {
                return Ok(TransferDisposition::Skip);
            }
        }

        let mut inner = self.inner.lock().unwrap();
        self.owner_clear(&mut inner);
        let inner = self.transition(inner, kind.transfer_state());
        drop(inner);
        Ok(TransferDisposition::Submit)
    }

    /// Entry for the transfer formation engine pulling a cached page
    /// directly into a transfer without prior explicit ownership.
    pub fn make_ready(&self, kind: TransferKind) -> CacheResult<()> {
        for slice in &self.slices {
            slice.make_ready(kind)?;
        }

        let inner = self.inner.lock().unwrap();
        if inner.state != PageState::Cached {
            let state = inner.state;
            drop(inner);
            panic!(
                "make_ready on page {} in state {:?}",
                self.index, state
            );
        }
        let inner = self.transition(inner, kind.transfer_state());
        drop(inner);
        Ok(())
    }

    /// Transfer completion: back to `Cached`, layer completion callbacks
    /// bottom-to-top regardless of `result` so every layer observes the
    /// completion, and the attached anchor (if any) signalled exactly
    /// once.
    pub fn complete_transfer(&self, kind: TransferKind, result: i32) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != kind.transfer_state() {
            let state = inner.state;
            drop(inner);
            panic!(
                "completing {} transfer on page {} in state {:?}",
                kind, self.index, state
            );
        }
        let anchor = inner.anchor.take();
        let inner = self.transition(inner, PageState::Cached);
        drop(inner);

        for slice in self.slices.iter().rev() {
            slice.completion(kind, result);
        }

        if let Some(anchor) = anchor {
            anchor.note(result);
        }
    }

    /// Attaches a synchronization anchor to be signalled at transfer
    /// completion.
    pub fn attach_anchor(&self, anchor: Arc<SyncAnchor>) {
        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.anchor.is_none(),
            "page {} already has a sync anchor",
            self.index
        );
        inner.anchor = Some(anchor);
    }

    /// Propagates the up-to-date bit through the layers, top-to-bottom.
    pub fn export(&self, uptodate: bool) {
        for slice in &self.slices {
            slice.export(uptodate);
        }
    }

    /// Whether the top layer holds the page VM-locked; `None` if no
    /// layer has an opinion.
    pub fn is_locked(&self) -> Option<bool> {
        self.slices.iter().find_map(|slice| slice.is_locked())
    }

    /// Write-back by host intention; layer flush top-to-bottom, first
    /// failure aborts. The page must be owned by `io`.
    pub fn flush(&self, io: &Arc<IoContext>) -> CacheResult<()> {
        {
            let inner = self.inner.lock().unwrap();
            self.assert_owned_by(&inner, io, "flush");
        }
        for slice in &self.slices {
            slice.flush(io)?;
        }
        Ok(())
    }

    /// Restricts the transfer to bytes `from..to` of the page.
    pub fn clip(&self, from: usize, to: usize) {
        for slice in &self.slices {
            slice.clip(from, to);
        }
    }

    fn assert_owned_by(&self, guard: &PageInner, io: &IoContext, what: &str) {
        let ok = guard.state == PageState::Owned
            && guard.owner.as_deref().map(|o| o.id()) == Some(io.id());
        assert!(
            ok,
            "{} of page {} not owned by this context (state {:?})",
            what, self.index, guard.state
        );
    }

    /// Last-reference destruction: layer finalizers, then the object
    /// reference drops with the page itself.
    fn free(&self) {
        {
            let inner = self.inner.lock().unwrap();
            assert!(
                inner.state == PageState::Freeing,
                "page {} freed in state {:?}",
                self.index,
                inner.state
            );
            assert!(
                inner.owner.is_none(),
                "page {} freed while owned",
                self.index
            );
        }
        for slice in &self.slices {
            slice.fini();
        }
        self.object.note_page_destroyed();
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (state, owned) = {
            let inner = self.inner.lock().unwrap();
            (inner.state, inner.owner.is_some())
        };
        write!(
            f,
            "page@{}[{} {:?} {:?} owned:{}",
            self.index,
            self.ref_count(),
            state,
            self.ptype,
            owned
        )?;
        for slice in &self.slices {
            write!(f, " {}:", slice.layer_name())?;
            slice.print(f)?;
        }
        write!(f, "]")
    }
}
