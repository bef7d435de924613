//! Error types for the network interface subsystem.

use thiserror::Error;

use crate::nid::{NalType, Nid};

/// Result type alias for network operations.
pub type NetResult<T> = std::result::Result<T, NetError>;

/// Error variants for network interface operations.
///
/// Expected negative outcomes (pool exhaustion, lookup misses) are ordinary
/// variants. Contract violations (double invalidate, unregistering a bound
/// driver, leaked pool objects at teardown) are not represented here; they
/// panic at the violation site.
#[derive(Debug, Error)]
pub enum NetError {
    /// Allocation of a table or pool failed.
    #[error("no space for {what}")]
    NoSpace {
        /// What could not be allocated.
        what: &'static str,
    },

    /// A fixed-capacity descriptor pool has no free objects.
    ///
    /// This is a normal outcome under load; callers apply backpressure or
    /// fail the triggering request.
    #[error("{kind} pool exhausted")]
    Exhausted {
        /// The descriptor kind that ran out.
        kind: &'static str,
    },

    /// A driver of this transport type is already registered.
    #[error("driver for transport {0} already registered")]
    AlreadyRegistered(NalType),

    /// The transport type is not one this node recognizes.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    /// The textual network specification could not be parsed.
    #[error("invalid network spec {spec:?}: {reason}")]
    InvalidNetworkSpec {
        /// The offending specification string.
        spec: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The driver's startup callback failed for an interface.
    #[error("startup of interface {nid} failed: {reason}")]
    StartupFailed {
        /// The candidate interface address.
        nid: Nid,
        /// Driver-reported failure reason.
        reason: String,
    },

    /// The requested object does not exist (stale or foreign handle,
    /// unknown interface index, missing route collaborator).
    #[error("not found")]
    NotFound,

    /// The interface table is being torn down.
    #[error("interface table is shutting down")]
    ShuttingDown,

    /// The bound driver does not implement the requested control command.
    #[error("control command not supported by driver")]
    NotSupported,
}
