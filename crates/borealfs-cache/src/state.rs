//! Page states and the transition matrix.
//!
//! The matrix below is the single authority for page state mutation; no
//! code path changes a page's state except through it. Note the
//! asymmetry: a cached page may go straight to `PageOut` (write-out from
//! the cache) but never straight to `PageIn`; reads must pass through
//! ownership first.

use std::fmt;

/// Lifecycle state of a cached page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageState {
    /// Resident in the cache, not attached to any I/O context.
    Cached = 0,
    /// Claimed by exactly one I/O context.
    Owned = 1,
    /// Read transfer in flight.
    PageIn = 2,
    /// Write transfer in flight.
    PageOut = 3,
    /// Terminal: unlinked from all lookup paths, awaiting last reference.
    Freeing = 4,
}

/// Number of page states.
pub const PAGE_STATES: usize = 5;

/// Matrix of allowed state transitions `[old][new]`.
const ALLOWED: [[bool; PAGE_STATES]; PAGE_STATES] = [
    // from Cached:
    [
        false, // Cached
        true,  // Owned:   io finds existing cached page
        false, // PageIn
        true,  // PageOut: write-out from the cache
        true,  // Freeing: eviction on memory pressure
    ],
    // from Owned:
    [
        true,  // Cached:  release to the cache
        false, // Owned
        true,  // PageIn:  start read immediately
        true,  // PageOut: start write immediately
        true,  // Freeing: invalidation or truncate
    ],
    // from PageIn:
    [
        true,  // Cached: transfer completion
        false, false, false, false,
    ],
    // from PageOut:
    [
        true,  // Cached: transfer completion
        false, false, false, false,
    ],
    // from Freeing: terminal.
    [false, false, false, false, false],
];

impl PageState {
    /// True if the matrix permits `self -> next`.
    pub fn can_transition(self, next: PageState) -> bool {
        ALLOWED[self as usize][next as usize]
    }
}

/// Direction of a page transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferKind {
    /// Page-in (read from backing store).
    Read,
    /// Page-out (write to backing store).
    Write,
}

impl TransferKind {
    /// The in-flight page state for this direction.
    pub fn transfer_state(self) -> PageState {
        match self {
            TransferKind::Read => PageState::PageIn,
            TransferKind::Write => PageState::PageOut,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Read => write!(f, "read"),
            TransferKind::Write => write!(f, "write"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PageState::*;

    #[test]
    fn test_allowed_transitions() {
        assert!(Cached.can_transition(Owned));
        assert!(Cached.can_transition(PageOut));
        assert!(Cached.can_transition(Freeing));
        assert!(Owned.can_transition(Cached));
        assert!(Owned.can_transition(PageIn));
        assert!(Owned.can_transition(PageOut));
        assert!(Owned.can_transition(Freeing));
        assert!(PageIn.can_transition(Cached));
        assert!(PageOut.can_transition(Cached));
    }

    #[test]
    fn test_cached_pagein_asymmetry() {
        // Direct write-out from the cache is allowed; direct read-in is
        // not. Reads must own the page first.
        assert!(Cached.can_transition(PageOut));
        assert!(!Cached.can_transition(PageIn));
    }

    #[test]
    fn test_freeing_is_terminal() {
        for next in [Cached, Owned, PageIn, PageOut, Freeing] {
            assert!(!Freeing.can_transition(next));
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in [Cached, Owned, PageIn, PageOut, Freeing] {
            assert!(!state.can_transition(state));
        }
    }

    #[test]
    fn test_transfer_states() {
        assert_eq!(TransferKind::Read.transfer_state(), PageIn);
        assert_eq!(TransferKind::Write.transfer_state(), PageOut);
    }
}
