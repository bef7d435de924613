//! Transport driver ("NAL") registration.
//!
//! Drivers are external collaborators: the registry tracks which transport
//! types are available and how many interfaces are bound to each, but it
//! never implements transport logic itself. Startup and shutdown callbacks
//! may block, so they are only ever invoked with no registry lock held.

use std::sync::Arc;

use tracing::info;

use crate::error::{NetError, NetResult};
use crate::nid::NalType;
use crate::ni::NetInterface;

/// Contract implemented by a transport driver module.
pub trait NalDriver: Send + Sync {
    /// The transport type this driver implements.
    fn nal_type(&self) -> NalType;

    /// Brings up one interface. The driver assigns the host address via
    /// [`NetInterface::set_addr`] and may stash per-interface context via
    /// [`NetInterface::set_driver_data`]. Runs without any registry lock
    /// held and may block.
    fn startup(&self, ni: &Arc<NetInterface>) -> NetResult<()>;

    /// Tears down one interface. Runs in a blocking-safe context with no
    /// registry lock held; may sleep.
    fn shutdown(&self, ni: &Arc<NetInterface>);

    /// Driver-specific control operation.
    fn control(&self, _ni: &Arc<NetInterface>, _cmd: u32, _arg: u64) -> NetResult<u64> {
        Err(NetError::NotSupported)
    }

    /// True if interfaces of this driver need the shared accept service.
    fn uses_acceptor(&self) -> bool {
        false
    }
}

struct DriverEntry {
    driver: Arc<dyn NalDriver>,
    bound: u32,
}

/// Process-wide list of registered drivers, guarded by its own lock in the
/// owning [`Net`](crate::net::Net) context.
pub(crate) struct DriverRegistry {
    entries: Vec<DriverEntry>,
}

impl DriverRegistry {
    pub(crate) fn new() -> DriverRegistry {
        DriverRegistry {
            entries: Vec::new(),
        }
    }

    pub(crate) fn register(&mut self, driver: Arc<dyn NalDriver>) -> NetResult<()> {
        let nal = driver.nal_type();
        if !nal.is_known() {
            return Err(NetError::UnknownTransport(nal.to_string()));
        }
        if self.entries.iter().any(|e| e.driver.nal_type() == nal) {
            return Err(NetError::AlreadyRegistered(nal));
        }

        self.entries.push(DriverEntry { driver, bound: 0 });
        if nal != NalType::LO {
            info!("{} driver registered", nal);
        }
        Ok(())
    }

    pub(crate) fn unregister(&mut self, nal: NalType) -> NetResult<()> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.driver.nal_type() == nal)
            .ok_or(NetError::NotFound)?;
        assert!(
            self.entries[pos].bound == 0,
            "unregistering {} driver with {} bound interfaces",
            nal,
            self.entries[pos].bound
        );

        self.entries.remove(pos);
        if nal != NalType::LO {
            info!("{} driver unregistered", nal);
        }
        Ok(())
    }

    pub(crate) fn find(&self, nal: NalType) -> Option<Arc<dyn NalDriver>> {
        self.entries
            .iter()
            .find(|e| e.driver.nal_type() == nal)
            .map(|e| Arc::clone(&e.driver))
    }

    /// Takes a binding reference: one per interface bound to the driver.
    pub(crate) fn bind(&mut self, nal: NalType) {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.driver.nal_type() == nal)
            .expect("binding unregistered driver");
        entry.bound += 1;
    }

    pub(crate) fn unbind(&mut self, nal: NalType) {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.driver.nal_type() == nal)
            .expect("unbinding unregistered driver");
        assert!(entry.bound > 0, "unbinding {} driver with no bindings", nal);
        entry.bound -= 1;
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Built-in loopback driver; every node carries one interface of it.
pub struct LoopbackDriver;

impl NalDriver for LoopbackDriver {
    fn nal_type(&self) -> NalType {
        NalType::LO
    }

    fn startup(&self, ni: &Arc<NetInterface>) -> NetResult<()> {
        ni.set_addr(0);
        Ok(())
    }

    fn shutdown(&self, _ni: &Arc<NetInterface>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nid::NetId;

    struct StubDriver(NalType);

    impl NalDriver for StubDriver {
        fn nal_type(&self) -> NalType {
            self.0
        }
        fn startup(&self, _ni: &Arc<NetInterface>) -> NetResult<()> {
            Ok(())
        }
        fn shutdown(&self, _ni: &Arc<NetInterface>) {}
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let mut reg = DriverRegistry::new();
        reg.register(Arc::new(StubDriver(NalType::TCP))).unwrap();
        let err = reg
            .register(Arc::new(StubDriver(NalType::TCP)))
            .unwrap_err();
        assert!(matches!(err, NetError::AlreadyRegistered(t) if t == NalType::TCP));
    }

    #[test]
    fn test_register_unknown_type_rejected() {
        let mut reg = DriverRegistry::new();
        let err = reg.register(Arc::new(StubDriver(NalType(77)))).unwrap_err();
        assert!(matches!(err, NetError::UnknownTransport(_)));
    }

    #[test]
    fn test_unregister_missing() {
        let mut reg = DriverRegistry::new();
        assert!(matches!(
            reg.unregister(NalType::IB),
            Err(NetError::NotFound)
        ));
    }

    #[test]
    #[should_panic(expected = "bound interfaces")]
    fn test_unregister_bound_driver_panics() {
        let mut reg = DriverRegistry::new();
        reg.register(Arc::new(StubDriver(NalType::TCP))).unwrap();
        reg.bind(NalType::TCP);
        let _ = reg.unregister(NalType::TCP);
    }

    #[test]
    fn test_bind_unbind_then_unregister() {
        let mut reg = DriverRegistry::new();
        reg.register(Arc::new(StubDriver(NalType::TCP))).unwrap();
        reg.bind(NalType::TCP);
        reg.unbind(NalType::TCP);
        reg.unregister(NalType::TCP).unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_loopback_sets_addr() {
        let ni = Arc::new(NetInterface::new(crate::nid::Nid::new(NetId::LOOPBACK, 9)));
        LoopbackDriver.startup(&ni).unwrap();
        assert_eq!(ni.nid().addr(), 0);
    }
}
