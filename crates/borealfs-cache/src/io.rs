//! I/O contexts: the owners in the page ownership protocol.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_IO_ID: AtomicU64 = AtomicU64::new(1);

/// One I/O context (a read, write, truncate, or fault in progress).
///
/// A page in the owned state points at exactly one of these; the context
/// tracks how many pages it currently owns so leaks surface at the
/// context boundary.
#[derive(Debug)]
pub struct IoContext {
    id: u64,
    owned: AtomicU32,
}

impl IoContext {
    /// Creates a context with a process-unique identity.
    pub fn new() -> Arc<IoContext> {
        Arc::new(IoContext {
            id: NEXT_IO_ID.fetch_add(1, Ordering::Relaxed),
            owned: AtomicU32::new(0),
        })
    }

    /// Process-unique identity of this context.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of pages currently owned by this context.
    pub fn owned_pages(&self) -> u32 {
        self.owned.load(Ordering::Acquire)
    }

    pub(crate) fn note_owned(&self) {
        self.owned.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_disowned(&self) {
        let prev = self.owned.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "io context owned-page count underflow");
    }
}

impl PartialEq for IoContext {
    fn eq(&self, other: &IoContext) -> bool {
        self.id == other.id
    }
}

impl Eq for IoContext {}
