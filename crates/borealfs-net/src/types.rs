//! Descriptor object types backed by the fixed-capacity pools.

use serde::{Deserialize, Serialize};

use crate::nid::Nid;

/// An in-flight message descriptor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Msg {
    /// Cookie linking this descriptor into the handle table.
    pub cookie: u64,
    /// Destination endpoint, if targeted.
    pub target: Option<Nid>,
    /// Payload length in bytes.
    pub length: u32,
}

/// A memory descriptor exposing a buffer region to peers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MemDesc {
    /// Cookie linking this descriptor into the handle table.
    pub cookie: u64,
    /// Region length in bytes.
    pub length: u32,
    /// Remaining number of operations before the descriptor is retired;
    /// negative means unlimited.
    pub threshold: i32,
}

/// An event queue descriptor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventQueue {
    /// Cookie linking this descriptor into the handle table.
    pub cookie: u64,
    /// Capacity of the queue in events.
    pub size: u32,
    /// Number of events posted so far.
    pub posted: u64,
}

/// A match entry gating incoming operations on match bits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MatchEntry {
    /// Cookie linking this descriptor into the handle table.
    pub cookie: u64,
    /// Bits an incoming operation must present.
    pub match_bits: u64,
    /// Bits ignored during matching.
    pub ignore_bits: u64,
}
