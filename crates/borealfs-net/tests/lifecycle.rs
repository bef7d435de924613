//! Integration tests for interface startup, shutdown, and the control
//! plane, driven through a scripted test driver.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use borealfs_net::{
    CtlCommand, CtlReply, NalDriver, NalType, Net, NetConfig, NetError, NetId, NetInterface,
    NetResult, Nid, NiState, Router,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Scripted transport driver recording startup/shutdown order and
/// optionally failing the n-th startup.
struct TestDriver {
    nal: NalType,
    fail_at: Option<u32>,
    startups: AtomicU32,
    next_addr: AtomicU32,
    acceptor: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl TestDriver {
    fn new(nal: NalType, log: Arc<Mutex<Vec<String>>>) -> TestDriver {
        TestDriver {
            nal,
            fail_at: None,
            startups: AtomicU32::new(0),
            next_addr: AtomicU32::new(1),
            acceptor: false,
            log,
        }
    }

    fn failing_at(mut self, n: u32) -> TestDriver {
        self.fail_at = Some(n);
        self
    }

    fn with_acceptor(mut self) -> TestDriver {
        self.acceptor = true;
        self
    }
}

impl NalDriver for TestDriver {
    fn nal_type(&self) -> NalType {
        self.nal
    }

    fn startup(&self, ni: &Arc<NetInterface>) -> NetResult<()> {
        let n = self.startups.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            self.log.lock().unwrap().push(format!("fail {}", ni.net()));
            return Err(NetError::NoSpace {
                what: "driver context",
            });
        }
        ni.set_addr(self.next_addr.fetch_add(1, Ordering::SeqCst));
        ni.set_driver_data(Box::new(n));
        self.log
            .lock()
            .unwrap()
            .push(format!("startup {}", ni.nid()));
        Ok(())
    }

    fn shutdown(&self, ni: &Arc<NetInterface>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("shutdown {}", ni.nid()));
    }

    fn control(&self, _ni: &Arc<NetInterface>, cmd: u32, arg: u64) -> NetResult<u64> {
        Ok(arg + cmd as u64)
    }

    fn uses_acceptor(&self) -> bool {
        self.acceptor
    }
}

fn config(networks: &str) -> NetConfig {
    NetConfig {
        networks: networks.to_string(),
        ..NetConfig::default()
    }
}

#[test]
fn test_full_interface_lifecycle() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Net::new(config("tcp")).unwrap();
    net.register_driver(Arc::new(TestDriver::new(NalType::TCP, Arc::clone(&log))))
        .unwrap();

    net.startup().unwrap();
    // Loopback plus the configured tcp network.
    assert_eq!(net.interface_count(), 2);

    let tcp0 = NetId::new(NalType::TCP, 0);
    let niref = net.lookup_by_network(tcp0).expect("tcp0 is up");
    let nid = niref.nid();
    assert_eq!(niref.state(), NiState::Active);
    assert!(net.is_local(nid));
    assert_eq!(net.primary_nid(), Some(nid));

    let ni = Arc::clone(niref.interface());
    drop(niref);

    net.shutdown_all();
    assert_eq!(ni.state(), NiState::Destroyed);
    assert!(!net.is_local(nid));
    assert_eq!(net.lookup_by_network(tcp0).map(|r| r.nid()), None);

    net.unregister_driver(NalType::TCP).unwrap();
    net.shutdown();

    let log = log.lock().unwrap();
    assert_eq!(
        *log,
        vec![format!("startup {}", nid), format!("shutdown {}", nid)]
    );
}

#[test]
fn test_startup_rollback_on_driver_failure() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Net::new(config("tcp0, tcp1, tcp2")).unwrap();
    net.register_driver(Arc::new(
        TestDriver::new(NalType::TCP, Arc::clone(&log)).failing_at(2),
    ))
    .unwrap();

    let err = net.startup().unwrap_err();
    assert!(matches!(err, NetError::StartupFailed { .. }));

    // Nothing from the batch survives, and every binding was released:
    // the driver can unregister without tripping the bound-count check.
    assert_eq!(net.interface_count(), 0);
    assert!(net.primary_nid().is_none());
    net.unregister_driver(NalType::TCP).unwrap();
    net.shutdown();

    let log = log.lock().unwrap();
    // tcp0 started, tcp1 failed, tcp0 rolled back; tcp2 never consumed.
    assert_eq!(log.len(), 3);
    assert!(log[0].starts_with("startup"));
    assert!(log[1].starts_with("fail"));
    assert!(log[2].starts_with("shutdown"));
}

#[test]
fn test_startup_unknown_transport_rolls_back() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Net::new(config("tcp0, ib0")).unwrap();
    net.register_driver(Arc::new(TestDriver::new(NalType::TCP, Arc::clone(&log))))
        .unwrap();

    let err = net.startup().unwrap_err();
    assert!(matches!(err, NetError::UnknownTransport(_)));
    assert_eq!(net.interface_count(), 0);

    net.unregister_driver(NalType::TCP).unwrap();
    net.shutdown();
}

#[test]
fn test_zombie_teardown_waits_for_references() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Arc::new(Net::new(config("tcp")).unwrap());
    net.register_driver(Arc::new(TestDriver::new(NalType::TCP, log)))
        .unwrap();
    net.startup().unwrap();

    let niref = net.lookup_by_network(NetId::new(NalType::TCP, 0)).unwrap();
    let ni = Arc::clone(niref.interface());

    let net2 = Arc::clone(&net);
    let reaper = thread::spawn(move || net2.shutdown_all());

    // The interface we still reference cannot be torn down yet.
    thread::sleep(Duration::from_millis(200));
    assert!(!reaper.is_finished());
    assert_eq!(ni.state(), NiState::ShuttingDown);

    drop(niref);
    reaper.join().unwrap();
    assert_eq!(ni.state(), NiState::Destroyed);

    net.unregister_driver(NalType::TCP).unwrap();
    match Arc::try_unwrap(net) {
        Ok(net) => net.shutdown(),
        Err(_) => panic!("outstanding context references"),
    }
}

#[test]
#[should_panic(expected = "started twice")]
fn test_double_startup_is_contract_violation() {
    let net = Net::new(config("lo")).unwrap();
    net.startup().unwrap();
    net.startup().unwrap();
}

#[test]
fn test_descriptor_pools_exhaust_and_recover() {
    let net = Net::new(NetConfig {
        max_mds: 2,
        ..config("lo")
    })
    .unwrap();

    let a = net.md_bind(4096, 1).unwrap();
    let b = net.md_bind(8192, -1).unwrap();
    assert!(matches!(
        net.md_bind(1, 0),
        Err(NetError::Exhausted { kind: "md" })
    ));

    assert_eq!(net.md_get(a).unwrap().length, 4096);
    assert_eq!(net.md_get(b).unwrap().threshold, -1);

    net.md_unlink(a).unwrap();
    let c = net.md_bind(16, 0).unwrap();
    assert_ne!(c.object_cookie, a.object_cookie);

    net.md_unlink(b).unwrap();
    net.md_unlink(c).unwrap();
    net.shutdown();
}

#[test]
fn test_stale_handle_from_other_incarnation_rejected() {
    let net_a = Net::new(config("lo")).unwrap();
    let net_b = Net::new(config("lo")).unwrap();
    assert_ne!(net_a.interface_cookie(), net_b.interface_cookie());

    let handle = net_a.eq_alloc(64).unwrap();
    assert!(matches!(net_b.eq_get(handle), Err(NetError::NotFound)));
    assert!(matches!(net_b.eq_free(handle), Err(NetError::NotFound)));

    net_a.eq_free(handle).unwrap();
    net_a.shutdown();
    net_b.shutdown();
}

#[test]
fn test_leaked_descriptors_reclaimed_at_shutdown() {
    let net = Net::new(config("lo")).unwrap();
    net.msg_alloc().unwrap();
    net.me_attach(0xff, 0x0f).unwrap();
    // Leaks are reported and reclaimed; teardown still verifies clean
    // pools afterwards.
    net.shutdown();
}

#[test]
fn test_ctl_interface_enumeration() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Net::new(config("tcp")).unwrap();
    net.register_driver(Arc::new(TestDriver::new(NalType::TCP, log)))
        .unwrap();
    net.startup().unwrap();

    let mut nids = Vec::new();
    let mut index = 0;
    loop {
        match net.ctl(CtlCommand::GetInterface(index)) {
            Ok(CtlReply::Interface(nid)) => nids.push(nid),
            Ok(reply) => panic!("unexpected reply {:?}", reply),
            Err(NetError::NotFound) => break,
            Err(e) => panic!("unexpected error {}", e),
        }
        index += 1;
    }
    assert_eq!(nids.len(), 2);

    net.shutdown_all();
    net.unregister_driver(NalType::TCP).unwrap();
    net.shutdown();
}

#[test]
fn test_ctl_fail_nid_credits() {
    let net = Net::new(config("lo")).unwrap();
    let peer = Nid::new(NetId::new(NalType::TCP, 0), 42);

    net.ctl(CtlCommand::FailNid {
        nid: peer,
        threshold: 2,
    })
    .unwrap();

    assert!(net.fail_check(peer));
    assert!(net.fail_check(peer));
    assert!(!net.fail_check(peer));

    // ANY matches every peer until cleared.
    net.fail_nid(Nid::ANY, 1);
    assert!(net.fail_check(peer));
    assert!(!net.fail_check(peer));

    net.shutdown();
}

#[test]
fn test_ctl_driver_passthrough() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Net::new(config("tcp")).unwrap();
    net.register_driver(Arc::new(TestDriver::new(NalType::TCP, log)))
        .unwrap();
    net.startup().unwrap();

    let reply = net
        .ctl(CtlCommand::Driver {
            net: NetId::new(NalType::TCP, 0),
            cmd: 7,
            arg: 100,
        })
        .unwrap();
    assert_eq!(reply, CtlReply::Driver(107));

    // Loopback has no control callback.
    assert!(matches!(
        net.ctl(CtlCommand::Driver {
            net: NetId::LOOPBACK,
            cmd: 0,
            arg: 0,
        }),
        Err(NetError::NotSupported)
    ));

    net.shutdown_all();
    net.unregister_driver(NalType::TCP).unwrap();
    net.shutdown();
}

struct TestRouter {
    routes: Mutex<Vec<(NetId, Nid, bool)>>,
}

impl Router for TestRouter {
    fn add_route(&self, net: NetId, gateway: Nid) -> NetResult<()> {
        self.routes.lock().unwrap().push((net, gateway, true));
        Ok(())
    }

    fn del_route(&self, gateway: Nid) -> NetResult<()> {
        self.routes.lock().unwrap().retain(|r| r.1 != gateway);
        Ok(())
    }

    fn get_route(&self, index: usize) -> NetResult<(NetId, Nid, bool)> {
        self.routes
            .lock()
            .unwrap()
            .get(index)
            .copied()
            .ok_or(NetError::NotFound)
    }

    fn notify(&self, gateway: Nid, alive: bool) -> NetResult<()> {
        for route in self.routes.lock().unwrap().iter_mut() {
            if route.1 == gateway {
                route.2 = alive;
            }
        }
        Ok(())
    }
}

#[test]
fn test_ctl_routes_delegate_to_router() {
    let net = Net::new(config("lo")).unwrap();

    // Without a collaborator, route commands miss.
    assert!(matches!(
        net.ctl(CtlCommand::GetRoute(0)),
        Err(NetError::NotFound)
    ));

    net.set_router(Arc::new(TestRouter {
        routes: Mutex::new(Vec::new()),
    }));

    let dest = NetId::new(NalType::IB, 1);
    let gw = Nid::new(NetId::new(NalType::TCP, 0), 9);
    net.ctl(CtlCommand::AddRoute { net: dest, gateway: gw })
        .unwrap();
    net.ctl(CtlCommand::NotifyRouter {
        gateway: gw,
        alive: false,
    })
    .unwrap();

    assert_eq!(
        net.ctl(CtlCommand::GetRoute(0)).unwrap(),
        CtlReply::Route {
            net: dest,
            gateway: gw,
            alive: false,
        }
    );
    assert!(matches!(
        net.ctl(CtlCommand::GetRoute(1)),
        Err(NetError::NotFound)
    ));

    net.ctl(CtlCommand::DelRoute { gateway: gw }).unwrap();
    assert!(matches!(
        net.ctl(CtlCommand::GetRoute(0)),
        Err(NetError::NotFound)
    ));

    net.shutdown();
}

#[test]
fn test_acceptor_interface_count() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let net = Net::new(config("tcp")).unwrap();
    net.register_driver(Arc::new(
        TestDriver::new(NalType::TCP, log).with_acceptor(),
    ))
    .unwrap();
    net.startup().unwrap();

    let (count, first) = net.count_acceptor_interfaces();
    assert_eq!(count, 1);
    let first = first.unwrap();
    assert_eq!(first.net().nal_type(), NalType::TCP);
    drop(first);

    net.shutdown_all();
    net.unregister_driver(NalType::TCP).unwrap();
    net.shutdown();
}
