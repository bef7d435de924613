//! Control-plane query operations.
//!
//! A typed rendition of the ioctl surface: interface enumeration, peer
//! fault injection, route management (delegated to a routing
//! collaborator), and a default per-interface passthrough to the bound
//! driver's control callback.

use crate::error::{NetError, NetResult};
use crate::net::Net;
use crate::nid::{NetId, Nid};

/// Routing collaborator the control plane delegates route commands to.
pub trait Router: Send + Sync {
    /// Adds a route to `net` through `gateway`.
    fn add_route(&self, net: NetId, gateway: Nid) -> NetResult<()>;

    /// Removes all routes through `gateway`.
    fn del_route(&self, gateway: Nid) -> NetResult<()>;

    /// Enumerates the `index`-th route; `NotFound` past the end.
    fn get_route(&self, index: usize) -> NetResult<(NetId, Nid, bool)>;

    /// Notifies the router that a gateway changed liveness.
    fn notify(&self, gateway: Nid, alive: bool) -> NetResult<()>;
}

/// A control-plane command.
#[derive(Debug, Clone)]
pub enum CtlCommand {
    /// Enumerate the `n`-th active interface.
    GetInterface(usize),
    /// Mark traffic to a peer as failed for the next `threshold` checks
    /// (0 clears).
    FailNid {
        /// The peer to fail, or [`Nid::ANY`].
        nid: Nid,
        /// Number of checks to fail; 0 clears.
        threshold: u32,
    },
    /// Add a route via the routing collaborator.
    AddRoute {
        /// Destination network.
        net: NetId,
        /// Gateway endpoint.
        gateway: Nid,
    },
    /// Delete routes through a gateway.
    DelRoute {
        /// Gateway endpoint.
        gateway: Nid,
    },
    /// Enumerate the `n`-th route.
    GetRoute(usize),
    /// Notify the router of a gateway liveness change.
    NotifyRouter {
        /// Gateway endpoint.
        gateway: Nid,
        /// New liveness.
        alive: bool,
    },
    /// Pass a driver-specific command to the interface serving `net`.
    Driver {
        /// Network whose interface receives the command.
        net: NetId,
        /// Driver-defined command code.
        cmd: u32,
        /// Driver-defined argument.
        arg: u64,
    },
}

/// Reply to a control-plane command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlReply {
    /// Command completed with nothing to report.
    None,
    /// An enumerated interface address.
    Interface(Nid),
    /// An enumerated route.
    Route {
        /// Destination network.
        net: NetId,
        /// Gateway endpoint.
        gateway: Nid,
        /// Whether the gateway is currently alive.
        alive: bool,
    },
    /// Driver-defined reply value.
    Driver(u64),
}

impl Net {
    /// Executes one control-plane command.
    pub fn ctl(&self, cmd: CtlCommand) -> NetResult<CtlReply> {
        match cmd {
            CtlCommand::GetInterface(index) => self
                .interface_at(index)
                .map(CtlReply::Interface)
                .ok_or(NetError::NotFound),

            CtlCommand::FailNid { nid, threshold } => {
                self.fail_nid(nid, threshold);
                Ok(CtlReply::None)
            }

            CtlCommand::AddRoute { net, gateway } => {
                self.router()?.add_route(net, gateway)?;
                Ok(CtlReply::None)
            }
            CtlCommand::DelRoute { gateway } => {
                self.router()?.del_route(gateway)?;
                Ok(CtlReply::None)
            }
            CtlCommand::GetRoute(index) => {
                let (net, gateway, alive) = self.router()?.get_route(index)?;
                Ok(CtlReply::Route {
                    net,
                    gateway,
                    alive,
                })
            }
            CtlCommand::NotifyRouter { gateway, alive } => {
                self.router()?.notify(gateway, alive)?;
                Ok(CtlReply::None)
            }

            CtlCommand::Driver { net, cmd, arg } => {
                let ni = self.lookup_by_network(net).ok_or(NetError::NotFound)?;
                let reply = ni.driver().control(ni.interface(), cmd, arg)?;
                Ok(CtlReply::Driver(reply))
            }
        }
    }
}
