//! Per-layer page extensions ("slices").
//!
//! A page is composed vertically: each layer of the object stack
//! contributes one slice of per-page state plus callbacks. Slices are
//! built top-to-bottom in the object's composition order; teardown and
//! completion paths run bottom-to-top so the layer facing the VM releases
//! its externally-visible lock last. Both orders are invariants of the
//! composition, not accidents of traversal.

use std::fmt;

use crate::error::CacheResult;
use crate::io::IoContext;
use crate::state::TransferKind;

/// What a layer wants done with a page during transfer preparation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferDisposition {
    /// Include the page in the transfer.
    Submit,
    /// Leave this page out of the batch; not an error.
    Skip,
}

/// One layer's per-page state and callbacks.
///
/// Every callback is optional; the default is a no-op for this layer.
pub trait PageSlice: Send + Sync {
    /// Name of the owning layer, for diagnostics.
    fn layer_name(&self) -> &'static str;

    /// Attempt to acquire this layer's share of page ownership. With
    /// `nonblock`, a contended sub-lock fails fast with `Busy` instead
    /// of waiting.
    fn try_own(&self, _io: &IoContext, _nonblock: bool) -> CacheResult<()> {
        Ok(())
    }

    /// Ownership is being taken unconditionally; exclusivity is
    /// externally guaranteed by the backing-page lock.
    fn assume(&self, _io: &IoContext) {}

    /// Ownership is being released without touching the backing lock.
    fn unassume(&self, _io: &IoContext) {}

    /// Ownership is being released.
    fn disown(&self, _io: &IoContext) {}

    /// Page content is about to be dropped (truncate path).
    fn discard(&self, _io: &IoContext) {}

    /// The page is leaving all lookup structures.
    fn delete(&self) {}

    /// Last-reference teardown of the slice.
    fn fini(&self) {}

    /// Propagate the up-to-date bit toward the VM-facing layer.
    fn export(&self, _uptodate: bool) {}

    /// Whether this layer holds the page locked in the VM sense; `None`
    /// if the layer has no opinion.
    fn is_locked(&self) -> Option<bool> {
        None
    }

    /// Prepare the page for an immediate transfer.
    fn prepare(&self, _io: &IoContext, _kind: TransferKind) -> CacheResult<TransferDisposition> {
        Ok(TransferDisposition::Submit)
    }

    /// The transfer formation engine is pulling this cached page into a
    /// transfer without prior explicit ownership.
    fn make_ready(&self, _kind: TransferKind) -> CacheResult<()> {
        Ok(())
    }

    /// A transfer this page was part of has completed with `result`.
    fn completion(&self, _kind: TransferKind, _result: i32) {}

    /// The page is being written back by the host's intention.
    fn flush(&self, _io: &IoContext) -> CacheResult<()> {
        Ok(())
    }

    /// Only bytes `from..to` of the page take part in the transfer.
    fn clip(&self, _from: usize, _to: usize) {}

    /// Append a human-readable representation of the slice.
    fn print(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Ok(())
    }
}

/// One layer of an object stack; contributes a slice to every page of
/// the object.
pub trait ObjectLayer: Send + Sync {
    /// Name of the layer, for diagnostics.
    fn name(&self) -> &'static str;

    /// Builds this layer's slice for a new page at `index`. Failure
    /// aborts page construction; the layers already initialized are torn
    /// down in reverse order and the error propagates.
    fn init_page(&self, index: u64) -> CacheResult<Box<dyn PageSlice>>;
}
