//! Backing physical pages and their private cache link.
//!
//! The host VM owns the physical page; this module models only the piece
//! the cache relies on: a private link from the physical page to the
//! logical cached page, valid to read on the fast path only while the
//! physical page is locked. The lock is expressed as a guard object, so
//! "caller holds the backing-page lock" is a type-checked precondition
//! rather than a comment.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::page::Page;

/// One backing physical page.
pub struct BackingPage {
    link: Mutex<Weak<Page>>,
}

/// Proof that the backing page is locked by the current caller; grants
/// access to the private link.
pub struct BackingGuard<'a> {
    link: MutexGuard<'a, Weak<Page>>,
}

impl BackingPage {
    /// Creates an unlinked backing page.
    pub fn new() -> Arc<BackingPage> {
        Arc::new(BackingPage {
            link: Mutex::new(Weak::new()),
        })
    }

    /// Locks the backing page.
    pub fn lock(&self) -> BackingGuard<'_> {
        BackingGuard {
            link: self.link.lock().unwrap(),
        }
    }

    /// Severs the private link; used when the page leaves all lookup
    /// structures. The caller must not be holding the guard.
    pub(crate) fn clear_link(&self) {
        *self.link.lock().unwrap() = Weak::new();
    }
}

impl BackingGuard<'_> {
    /// The cached page linked to this backing page, if still alive.
    pub fn linked(&self) -> Option<Arc<Page>> {
        self.link.upgrade()
    }

    pub(crate) fn link(&mut self, page: &Arc<Page>) {
        *self.link = Arc::downgrade(page);
    }
}
