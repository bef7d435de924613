//! Wire encoding of object handles.
//!
//! A handle sent to a peer is a pair of cookies: the interface-instance
//! cookie (stamped at interface-table creation, so a handle minted before
//! a restart can never validate afterwards) and the object cookie from the
//! handle table. Both fields must match for the handle to be honored.

use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};

/// A two-cookie handle as carried in message headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireHandle {
    /// Cookie identifying the interface-table incarnation that minted
    /// this handle.
    pub interface_cookie: u64,
    /// Cookie identifying the object within that incarnation.
    pub object_cookie: u64,
}

impl WireHandle {
    /// The distinguished invalid handle.
    pub const NONE: WireHandle = WireHandle {
        interface_cookie: u64::MAX,
        object_cookie: u64::MAX,
    };

    /// Serializes the handle for a message header.
    pub fn to_bytes(&self) -> Vec<u8> {
        // A pair of fixed-width integers cannot fail to serialize.
        bincode::serialize(self).expect("wire handle serialization")
    }

    /// Deserializes a handle from a message header.
    pub fn from_bytes(bytes: &[u8]) -> NetResult<WireHandle> {
        bincode::deserialize(bytes).map_err(|_| NetError::NotFound)
    }

    /// True if this handle was minted by the interface-table incarnation
    /// identified by `interface_cookie`.
    pub fn matches_interface(&self, interface_cookie: u64) -> bool {
        self.interface_cookie == interface_cookie
    }
}
