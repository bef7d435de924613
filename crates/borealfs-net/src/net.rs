//! The interface-table context.
//!
//! [`Net`] owns all writable state of the network layer: the active
//! interface list, the zombie queue, the handle table, and the descriptor
//! pools, all behind one interface-table lock; the driver registry behind
//! its own lock. Driver callbacks may block, so they are never invoked
//! with either lock held.
//!
//! There is deliberately no ambient singleton: every operation goes
//! through an explicitly constructed `Net`, which also makes concurrent
//! multi-instance testing possible.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::error::{NetError, NetResult};
use crate::freelist::Pool;
use crate::handle::{CookieType, HandleTable};
use crate::nal::{DriverRegistry, LoopbackDriver, NalDriver};
use crate::ni::{NetInterface, NiState};
use crate::nid::{parse_networks, NalType, NetId, Nid};
use crate::types::{EventQueue, MatchEntry, MemDesc, Msg};
use crate::wire::WireHandle;

/// Configuration for an interface-table context.
#[derive(Debug, Clone)]
pub struct NetConfig {
    /// Textual network specification, e.g. `"tcp"` or `"tcp0, ib1"`.
    pub networks: String,
    /// Capacity of the message descriptor pool.
    pub max_msgs: usize,
    /// Capacity of the memory descriptor pool.
    pub max_mds: usize,
    /// Capacity of the event queue pool.
    pub max_eqs: usize,
    /// Capacity of the match entry pool.
    pub max_mes: usize,
    /// Handle hash table size; sized to the expected concurrent
    /// descriptor population.
    pub handle_hash_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            networks: "tcp".to_string(),
            max_msgs: 2048,
            max_mds: 1024,
            max_eqs: 512,
            max_mes: 2048,
            handle_hash_size: (2048 + 1024 + 512 + 2048) / 4,
        }
    }
}

struct TestPeer {
    nid: Nid,
    threshold: u32,
}

struct NetState {
    nis: Vec<Arc<NetInterface>>,
    zombies: VecDeque<Arc<NetInterface>>,
    nzombies: usize,
    handles: HandleTable,
    msgs: Pool<Msg>,
    mds: Pool<MemDesc>,
    eqs: Pool<EventQueue>,
    mes: Pool<MatchEntry>,
    test_peers: Vec<TestPeer>,
    started: bool,
}

struct NetShared {
    interface_cookie: u64,
    drivers: Mutex<DriverRegistry>,
    state: Mutex<NetState>,
    zombie_cv: Condvar,
    router: Mutex<Option<Arc<dyn crate::ctl::Router>>>,
}

/// The network interface table and object lifecycle context.
pub struct Net {
    shared: Arc<NetShared>,
    config: NetConfig,
}

/// A counted reference to an active interface, released on drop.
pub struct NiRef {
    shared: Arc<NetShared>,
    ni: Arc<NetInterface>,
}

impl NiRef {
    /// The referenced interface.
    pub fn interface(&self) -> &Arc<NetInterface> {
        &self.ni
    }
}

impl Deref for NiRef {
    type Target = NetInterface;

    fn deref(&self) -> &NetInterface {
        &self.ni
    }
}

impl Drop for NiRef {
    fn drop(&mut self) {
        let mut st = self.shared.state.lock().unwrap();
        ni_decref_locked(&self.shared, &mut st, &self.ni);
    }
}

/// Drops one interface reference; the last drop of a shutting-down
/// interface queues it for deferred driver teardown.
fn ni_decref_locked(shared: &NetShared, st: &mut NetState, ni: &Arc<NetInterface>) {
    if ni.ref_sub() == 0 {
        assert!(
            ni.is_shutting_down(),
            "interface {} lost all references while active",
            ni.nid()
        );
        ni.set_state(NiState::Zombie);
        st.zombies.push_back(Arc::clone(ni));
        shared.zombie_cv.notify_all();
    }
}

impl Net {
    /// Builds the context: handle table, descriptor pools, interface
    /// cookie, and the built-in loopback driver. Interfaces are started
    /// separately with [`Net::startup`], after transport drivers have
    /// registered.
    pub fn new(config: NetConfig) -> NetResult<Net> {
        let handles = HandleTable::new(config.handle_hash_size)?;

        // The interface cookie guards wire handles against delayed replies
        // arriving valid after a restart; wall-clock microseconds at
        // creation time, salted with an in-process sequence so two tables
        // created in the same tick still differ.
        static INSTANCE_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        let seq = INSTANCE_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let interface_cookie = (micros << 16) | (seq & 0xffff);

        let mut drivers = DriverRegistry::new();
        drivers.register(Arc::new(LoopbackDriver))?;

        let state = NetState {
            nis: Vec::new(),
            zombies: VecDeque::new(),
            nzombies: 0,
            handles,
            msgs: Pool::new("msg", config.max_msgs),
            mds: Pool::new("md", config.max_mds),
            eqs: Pool::new("eq", config.max_eqs),
            mes: Pool::new("me", config.max_mes),
            test_peers: Vec::new(),
            started: false,
        };

        debug!("interface table created, cookie {:#x}", interface_cookie);

        Ok(Net {
            shared: Arc::new(NetShared {
                interface_cookie,
                drivers: Mutex::new(drivers),
                state: Mutex::new(state),
                zombie_cv: Condvar::new(),
                router: Mutex::new(None),
            }),
            config,
        })
    }

    /// The interface-instance cookie stamped into outgoing wire handles.
    pub fn interface_cookie(&self) -> u64 {
        self.shared.interface_cookie
    }

    /// Registers a transport driver.
    pub fn register_driver(&self, driver: Arc<dyn NalDriver>) -> NetResult<()> {
        self.shared.drivers.lock().unwrap().register(driver)
    }

    /// Unregisters a transport driver. Panics if interfaces are still
    /// bound to it.
    pub fn unregister_driver(&self, nal: NalType) -> NetResult<()> {
        self.shared.drivers.lock().unwrap().unregister(nal)
    }

    /// Installs the routing collaborator the control plane delegates
    /// route commands to.
    pub fn set_router(&self, router: Arc<dyn crate::ctl::Router>) {
        *self.shared.router.lock().unwrap() = Some(router);
    }

    /// Parses the configured network specification and starts one
    /// interface per network, in order. A loopback interface is always
    /// included.
    ///
    /// All-or-nothing: failure to resolve a driver or to start any
    /// interface shuts down every interface already started by this call,
    /// in reverse start order, releases the driver bindings, and drops
    /// the unconsumed candidates. Routing and peer discovery assume the
    /// configured interface set is complete or absent entirely.
    pub fn startup(&self) -> NetResult<()> {
        let mut nets = parse_networks(&self.config.networks)?;
        if !nets.contains(&NetId::LOOPBACK) {
            nets.insert(0, NetId::LOOPBACK);
        }

        {
            let st = self.shared.state.lock().unwrap();
            assert!(!st.started, "interface table started twice");
        }

        let mut candidates: VecDeque<Arc<NetInterface>> = nets
            .into_iter()
            .map(|net| Arc::new(NetInterface::new(Nid::new(net, 0))))
            .collect();

        while let Some(ni) = candidates.pop_front() {
            let nal = ni.net().nal_type();

            let driver = {
                let mut drivers = self.shared.drivers.lock().unwrap();
                drivers.find(nal).map(|driver| {
                    drivers.bind(nal);
                    driver
                })
            };
            let driver = match driver {
                Some(driver) => driver,
                None => {
                    error!("no driver for transport {}", nal);
                    self.drain_interfaces();
                    return Err(NetError::UnknownTransport(nal.to_string()));
                }
            };

            ni.bind_driver(Arc::clone(&driver));
            ni.ref_add();

            // Startup may block; no locks held here.
            if let Err(e) = driver.startup(&ni) {
                error!("error starting interface on {}: {}", ni.net(), e);
                self.shared.drivers.lock().unwrap().unbind(nal);
                ni.ref_sub();
                let nid = ni.nid();
                self.drain_interfaces();
                return Err(NetError::StartupFailed {
                    nid,
                    reason: e.to_string(),
                });
            }

            ni.set_state(NiState::Active);
            if nal != NalType::LO {
                info!("added interface {}", ni.nid());
            }
            self.shared.state.lock().unwrap().nis.push(ni);
        }

        self.shared.state.lock().unwrap().started = true;
        Ok(())
    }

    /// Shuts down every active interface and blocks until all deferred
    /// driver teardown has finished. Must run in a context that may
    /// block. Calling it without a matching successful [`Net::startup`]
    /// is a contract violation.
    pub fn shutdown_all(&self) {
        {
            let mut st = self.shared.state.lock().unwrap();
            assert!(st.started, "shutdown without matching startup");
            st.started = false;
        }
        self.drain_interfaces();
    }

    /// Removes every interface from the active list (in reverse start
    /// order), then reaps zombies until none remain. The driver shutdown
    /// callback runs with no lock held, in this blocking-safe context.
    fn drain_interfaces(&self) {
        let mut st = self.shared.state.lock().unwrap();

        while let Some(ni) = st.nis.pop() {
            ni.mark_shutting_down();
            ni.set_state(NiState::ShuttingDown);
            st.nzombies += 1;
            ni_decref_locked(&self.shared, &mut st, &ni);
        }

        let mut iterations: u64 = 0;
        while st.nzombies > 0 {
            while st.zombies.is_empty() {
                iterations += 1;
                if iterations & (iterations - 1) == 0 {
                    warn!("waiting for {} zombie interfaces", st.nzombies);
                }
                let (guard, _timed_out) = self
                    .shared
                    .zombie_cv
                    .wait_timeout(st, Duration::from_secs(1))
                    .unwrap();
                st = guard;
            }

            let ni = st.zombies.pop_front().unwrap();
            drop(st);

            let nal = ni.net().nal_type();
            self.shared.drivers.lock().unwrap().unbind(nal);
            ni.driver().shutdown(&ni);
            ni.take_driver_data();
            ni.set_state(NiState::Destroyed);
            if nal != NalType::LO {
                info!("removed interface {}", ni.nid());
            }

            st = self.shared.state.lock().unwrap();
            st.nzombies -= 1;
        }
    }

    /// Full teardown. Shuts down interfaces if still up, clears the
    /// fault-injection table, reclaims any descriptors leaked by earlier
    /// bugs (loudly), and verifies the pools and handle table are clean.
    pub fn shutdown(self) {
        let started = self.shared.state.lock().unwrap().started;
        if started {
            self.shutdown_all();
        }

        self.fail_nid(Nid::ANY, 0);

        let mut st = self.shared.state.lock().unwrap();
        assert!(st.zombies.is_empty(), "zombie interfaces at shutdown");
        assert!(st.nzombies == 0, "unreaped zombie interfaces at shutdown");

        for slot in st.msgs.busy_slots() {
            let cookie = st.msgs.get(slot).unwrap().cookie;
            error!("active msg {:#x} at shutdown", cookie);
            st.handles.invalidate(cookie);
            st.msgs.free(slot);
        }
        for slot in st.mds.busy_slots() {
            let cookie = st.mds.get(slot).unwrap().cookie;
            error!("active md {:#x} at shutdown", cookie);
            st.handles.invalidate(cookie);
            st.mds.free(slot);
        }
        for slot in st.eqs.busy_slots() {
            let cookie = st.eqs.get(slot).unwrap().cookie;
            error!("active eq {:#x} at shutdown", cookie);
            st.handles.invalidate(cookie);
            st.eqs.free(slot);
        }
        for slot in st.mes.busy_slots() {
            let cookie = st.mes.get(slot).unwrap().cookie;
            error!("active me {:#x} at shutdown", cookie);
            st.handles.invalidate(cookie);
            st.mes.free(slot);
        }

        st.handles.fini();
        st.msgs.fini();
        st.mds.fini();
        st.eqs.fini();
        st.mes.fini();
        drop(st);

        let mut drivers = self.shared.drivers.lock().unwrap();
        drivers
            .unregister(NalType::LO)
            .expect("loopback driver missing at shutdown");
        assert!(
            drivers.is_empty(),
            "transport drivers still registered at shutdown"
        );
    }

    /// Finds the active interface serving `net`, taking a reference the
    /// caller releases by dropping the returned guard.
    pub fn lookup_by_network(&self, net: NetId) -> Option<NiRef> {
        let st = self.shared.state.lock().unwrap();
        for ni in &st.nis {
            if ni.net() == net {
                ni.ref_add();
                return Some(NiRef {
                    shared: Arc::clone(&self.shared),
                    ni: Arc::clone(ni),
                });
            }
        }
        None
    }

    /// True if `nid` names one of this node's interfaces.
    pub fn is_local(&self, nid: Nid) -> bool {
        let st = self.shared.state.lock().unwrap();
        st.nis.iter().any(|ni| ni.nid() == nid)
    }

    /// The NID of the first non-loopback interface, if any; the loopback
    /// NID is the same on every node and useless as an identity.
    pub fn primary_nid(&self) -> Option<Nid> {
        let st = self.shared.state.lock().unwrap();
        st.nis
            .iter()
            .find(|ni| ni.net().nal_type() != NalType::LO)
            .map(|ni| ni.nid())
    }

    /// Number of active interfaces.
    pub fn interface_count(&self) -> usize {
        self.shared.state.lock().unwrap().nis.len()
    }

    /// The NID of the `index`-th active interface, in start order.
    pub fn interface_at(&self, index: usize) -> Option<Nid> {
        let st = self.shared.state.lock().unwrap();
        st.nis.get(index).map(|ni| ni.nid())
    }

    /// Counts interfaces whose driver wants the shared accept service,
    /// returning the first such interface with a reference so the accept
    /// service can hand it connections blind.
    pub fn count_acceptor_interfaces(&self) -> (usize, Option<NiRef>) {
        let st = self.shared.state.lock().unwrap();
        let mut count = 0;
        let mut first = None;
        for ni in &st.nis {
            if ni.driver().uses_acceptor() {
                if count == 0 {
                    ni.ref_add();
                    first = Some(NiRef {
                        shared: Arc::clone(&self.shared),
                        ni: Arc::clone(ni),
                    });
                }
                count += 1;
            }
        }
        (count, first)
    }

    /// Arms (or with `threshold` 0 clears) fault injection for a peer:
    /// traffic to `nid` is reported as failed for the next `threshold`
    /// checks. `Nid::ANY` with threshold 0 clears the whole table.
    pub fn fail_nid(&self, nid: Nid, threshold: u32) {
        let mut st = self.shared.state.lock().unwrap();
        if threshold > 0 {
            match st.test_peers.iter_mut().find(|p| p.nid == nid) {
                Some(peer) => peer.threshold = threshold,
                None => st.test_peers.push(TestPeer { nid, threshold }),
            }
        } else if nid == Nid::ANY {
            st.test_peers.clear();
        } else {
            st.test_peers.retain(|p| p.nid != nid);
        }
    }

    /// Consumes one failure credit for `nid`; true means the caller must
    /// treat traffic to that peer as failed.
    pub fn fail_check(&self, nid: Nid) -> bool {
        let mut st = self.shared.state.lock().unwrap();
        if let Some(pos) = st
            .test_peers
            .iter()
            .position(|p| p.nid == Nid::ANY || p.nid == nid)
        {
            st.test_peers[pos].threshold -= 1;
            if st.test_peers[pos].threshold == 0 {
                st.test_peers.remove(pos);
            }
            return true;
        }
        false
    }

    pub(crate) fn router(&self) -> NetResult<Arc<dyn crate::ctl::Router>> {
        self.shared
            .router
            .lock()
            .unwrap()
            .clone()
            .ok_or(NetError::NotFound)
    }

    fn wire_handle(&self, cookie: u64) -> WireHandle {
        WireHandle {
            interface_cookie: self.shared.interface_cookie,
            object_cookie: cookie,
        }
    }

    fn lookup_slot(&self, st: &NetState, handle: WireHandle, kind: CookieType) -> NetResult<usize> {
        if !handle.matches_interface(self.shared.interface_cookie) {
            // A stale handle from a previous incarnation, or a forgery.
            return Err(NetError::NotFound);
        }
        st.handles
            .lookup(handle.object_cookie, kind)
            .ok_or(NetError::NotFound)
    }

    /// Allocates a message descriptor.
    pub fn msg_alloc(&self) -> NetResult<WireHandle> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = st.msgs.alloc().ok_or(NetError::Exhausted { kind: "msg" })?;
        let cookie = st.handles.allocate(CookieType::Message, slot);
        st.msgs.get_mut(slot).unwrap().cookie = cookie;
        Ok(self.wire_handle(cookie))
    }

    /// Releases a message descriptor.
    pub fn msg_free(&self, handle: WireHandle) -> NetResult<()> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::Message)?;
        st.handles.invalidate(handle.object_cookie);
        st.msgs.free(slot);
        Ok(())
    }

    /// Looks up a message descriptor by wire handle.
    pub fn msg_get(&self, handle: WireHandle) -> NetResult<Msg> {
        let st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::Message)?;
        Ok(st.msgs.get(slot).unwrap().clone())
    }

    /// Binds a memory descriptor over a buffer region.
    pub fn md_bind(&self, length: u32, threshold: i32) -> NetResult<WireHandle> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = st.mds.alloc().ok_or(NetError::Exhausted { kind: "md" })?;
        let cookie = st.handles.allocate(CookieType::MemDesc, slot);
        let md = st.mds.get_mut(slot).unwrap();
        md.cookie = cookie;
        md.length = length;
        md.threshold = threshold;
        Ok(self.wire_handle(cookie))
    }

    /// Releases a memory descriptor.
    pub fn md_unlink(&self, handle: WireHandle) -> NetResult<()> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::MemDesc)?;
        st.handles.invalidate(handle.object_cookie);
        st.mds.free(slot);
        Ok(())
    }

    /// Looks up a memory descriptor by wire handle.
    pub fn md_get(&self, handle: WireHandle) -> NetResult<MemDesc> {
        let st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::MemDesc)?;
        Ok(st.mds.get(slot).unwrap().clone())
    }

    /// Creates an event queue.
    pub fn eq_alloc(&self, size: u32) -> NetResult<WireHandle> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = st.eqs.alloc().ok_or(NetError::Exhausted { kind: "eq" })?;
        let cookie = st.handles.allocate(CookieType::EventQueue, slot);
        let eq = st.eqs.get_mut(slot).unwrap();
        eq.cookie = cookie;
        eq.size = size;
        Ok(self.wire_handle(cookie))
    }

    /// Releases an event queue.
    pub fn eq_free(&self, handle: WireHandle) -> NetResult<()> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::EventQueue)?;
        st.handles.invalidate(handle.object_cookie);
        st.eqs.free(slot);
        Ok(())
    }

    /// Looks up an event queue by wire handle.
    pub fn eq_get(&self, handle: WireHandle) -> NetResult<EventQueue> {
        let st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::EventQueue)?;
        Ok(st.eqs.get(slot).unwrap().clone())
    }

    /// Attaches a match entry.
    pub fn me_attach(&self, match_bits: u64, ignore_bits: u64) -> NetResult<WireHandle> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = st.mes.alloc().ok_or(NetError::Exhausted { kind: "me" })?;
        let cookie = st.handles.allocate(CookieType::MatchEntry, slot);
        let me = st.mes.get_mut(slot).unwrap();
        me.cookie = cookie;
        me.match_bits = match_bits;
        me.ignore_bits = ignore_bits;
        Ok(self.wire_handle(cookie))
    }

    /// Releases a match entry.
    pub fn me_unlink(&self, handle: WireHandle) -> NetResult<()> {
        let mut st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::MatchEntry)?;
        st.handles.invalidate(handle.object_cookie);
        st.mes.free(slot);
        Ok(())
    }

    /// Looks up a match entry by wire handle.
    pub fn me_get(&self, handle: WireHandle) -> NetResult<MatchEntry> {
        let st = self.shared.state.lock().unwrap();
        let slot = self.lookup_slot(&st, handle, CookieType::MatchEntry)?;
        Ok(st.mes.get(slot).unwrap().clone())
    }
}
