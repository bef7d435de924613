//! Network interface instances and their lifecycle state.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;

use crate::nal::NalDriver;
use crate::nid::{NetId, Nid};

/// Lifecycle of one interface.
///
/// `Unstarted -> Active -> ShuttingDown -> Zombie -> Destroyed`, strictly
/// in that order. A zombie has lost its last reference and waits for the
/// driver's (possibly blocking) shutdown callback to run in a
/// blocking-safe context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NiState {
    /// Candidate parsed from the network spec, not yet started.
    Unstarted,
    /// Started and present on the active list.
    Active,
    /// Removed from the active list; references may still exist.
    ShuttingDown,
    /// Last reference dropped; queued for deferred driver teardown.
    Zombie,
    /// Driver shutdown has completed.
    Destroyed,
}

/// One active network endpoint bound to a transport driver.
pub struct NetInterface {
    nid: AtomicU64,
    driver: OnceLock<Arc<dyn NalDriver>>,
    state: Mutex<NiState>,
    // Logical reference count; mutated only under the owning context's
    // interface-table lock.
    refs: AtomicU32,
    shutting_down: AtomicBool,
    driver_data: Mutex<Option<Box<dyn Any + Send>>>,
}

impl NetInterface {
    /// Creates an unstarted candidate for the given address.
    pub fn new(nid: Nid) -> NetInterface {
        NetInterface {
            nid: AtomicU64::new(nid.raw()),
            driver: OnceLock::new(),
            state: Mutex::new(NiState::Unstarted),
            refs: AtomicU32::new(0),
            shutting_down: AtomicBool::new(false),
            driver_data: Mutex::new(None),
        }
    }

    /// The interface address.
    pub fn nid(&self) -> Nid {
        Nid::from_raw(self.nid.load(Ordering::Acquire))
    }

    /// The network this interface serves.
    pub fn net(&self) -> NetId {
        self.nid().net()
    }

    /// Sets the host-address part of the NID; called by the driver during
    /// startup once it knows the local address.
    pub fn set_addr(&self, addr: u32) {
        let net = self.nid().net();
        self.nid.store(Nid::new(net, addr).raw(), Ordering::Release);
    }

    /// The bound transport driver. Panics if called before binding.
    pub fn driver(&self) -> &Arc<dyn NalDriver> {
        self.driver.get().expect("interface has no bound driver")
    }

    pub(crate) fn bind_driver(&self, driver: Arc<dyn NalDriver>) {
        if self.driver.set(driver).is_err() {
            panic!("interface driver bound twice");
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NiState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: NiState) {
        *self.state.lock().unwrap() = state;
    }

    /// True once shutdown has been requested for this interface.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn ref_add(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn ref_sub(&self) -> u32 {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "interface reference count underflow");
        prev - 1
    }

    /// Stores per-interface driver context.
    pub fn set_driver_data(&self, data: Box<dyn Any + Send>) {
        *self.driver_data.lock().unwrap() = Some(data);
    }

    /// Removes and returns the per-interface driver context, if any.
    pub fn take_driver_data(&self) -> Option<Box<dyn Any + Send>> {
        self.driver_data.lock().unwrap().take()
    }
}

impl fmt::Debug for NetInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetInterface")
            .field("nid", &self.nid().to_string())
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}
