//! NID addressing and network specification parsing.
//!
//! A NID packs a network identifier (transport type plus network number)
//! and a host address into one opaque 64-bit value, so that a single
//! integer names an endpoint across the whole cluster.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};

/// A transport ("NAL") type code.
///
/// The value space is open so that a registration attempt with a code this
/// node does not know about can be rejected at runtime rather than made
/// unrepresentable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NalType(pub u16);

impl NalType {
    /// Loopback transport.
    pub const LO: NalType = NalType(1);
    /// TCP socket transport.
    pub const TCP: NalType = NalType(2);
    /// InfiniBand verbs transport.
    pub const IB: NalType = NalType(3);
    /// Gemini interconnect transport.
    pub const GNI: NalType = NalType(4);

    /// Returns true if this node recognizes the transport type.
    pub fn is_known(self) -> bool {
        self.name().is_some()
    }

    /// The canonical short name for a known transport type.
    pub fn name(self) -> Option<&'static str> {
        match self {
            NalType::LO => Some("lo"),
            NalType::TCP => Some("tcp"),
            NalType::IB => Some("ib"),
            NalType::GNI => Some("gni"),
            _ => None,
        }
    }

    /// Resolves a transport name from a network specification token.
    pub fn from_name(name: &str) -> Option<NalType> {
        match name {
            "lo" => Some(NalType::LO),
            "tcp" => Some(NalType::TCP),
            "ib" => Some(NalType::IB),
            "gni" => Some(NalType::GNI),
            _ => None,
        }
    }
}

impl fmt::Display for NalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "nal#{}", self.0),
        }
    }
}

/// A 32-bit network identifier: transport type in the upper 16 bits,
/// network number in the lower 16.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetId(u32);

impl NetId {
    /// The implicit loopback network, present on every node.
    pub const LOOPBACK: NetId = NetId((NalType::LO.0 as u32) << 16);

    /// Builds a network identifier from a transport type and network number.
    pub fn new(nal: NalType, num: u16) -> NetId {
        NetId(((nal.0 as u32) << 16) | num as u32)
    }

    /// The transport type of this network.
    pub fn nal_type(self) -> NalType {
        NalType((self.0 >> 16) as u16)
    }

    /// The network number within the transport type.
    pub fn num(self) -> u16 {
        self.0 as u16
    }

    /// Raw 32-bit encoding.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.nal_type(), self.num())
    }
}

/// An opaque 64-bit endpoint address: network identifier in the upper
/// 32 bits, host address in the lower 32.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nid(u64);

impl Nid {
    /// Wildcard address matching any endpoint.
    pub const ANY: Nid = Nid(u64::MAX);

    /// Builds a NID from a network identifier and a host address.
    pub fn new(net: NetId, addr: u32) -> Nid {
        Nid(((net.raw() as u64) << 32) | addr as u64)
    }

    /// The network this endpoint lives on.
    pub fn net(self) -> NetId {
        NetId((self.0 >> 32) as u32)
    }

    /// The host address within the network.
    pub fn addr(self) -> u32 {
        self.0 as u32
    }

    /// Raw 64-bit encoding, as carried on the wire.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Rebuilds a NID from its raw wire encoding.
    pub fn from_raw(raw: u64) -> Nid {
        Nid(raw)
    }
}

impl fmt::Display for Nid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Nid::ANY {
            return write!(f, "<any>");
        }
        write!(f, "{}@{}", self.addr(), self.net())
    }
}

/// Parses a textual network specification into the list of networks to
/// bring up, e.g. `"tcp"` or `"tcp0, ib1"`.
///
/// Tokens are separated by commas and/or whitespace; each token is a known
/// transport name with an optional network number (default 0). Any
/// malformed or unrecognized token fails the whole parse: a partially
/// configured network set is unsafe to operate on, so there is no
/// best-effort mode.
pub fn parse_networks(spec: &str) -> NetResult<Vec<NetId>> {
    let mut nets = Vec::new();

    for token in spec.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }

        let split = token.find(|c: char| c.is_ascii_digit()).unwrap_or(token.len());
        let (name, num_str) = token.split_at(split);

        let nal = NalType::from_name(name).ok_or_else(|| NetError::InvalidNetworkSpec {
            spec: spec.to_string(),
            reason: format!("unknown transport {:?}", token),
        })?;

        let num: u16 = if num_str.is_empty() {
            0
        } else {
            num_str.parse().map_err(|_| NetError::InvalidNetworkSpec {
                spec: spec.to_string(),
                reason: format!("bad network number in {:?}", token),
            })?
        };

        let net = NetId::new(nal, num);
        if nets.contains(&net) {
            return Err(NetError::InvalidNetworkSpec {
                spec: spec.to_string(),
                reason: format!("duplicate network {}", net),
            });
        }
        nets.push(net);
    }

    if nets.is_empty() {
        return Err(NetError::InvalidNetworkSpec {
            spec: spec.to_string(),
            reason: "no networks listed".to_string(),
        });
    }

    Ok(nets)
}
