//! Prefix and packet primitives

use crate::constants::V4_BITS;
use crate::errors::Error;
use crate::helpers::{canonical, get_bit};
use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Canonical IPv4 network prefix.
///
/// Bits of `value` at positions `>= length` are always zero, so derived
/// equality, ordering and hashing are well defined. Two prefixes of
/// different length never compare equal, even if their visible bits match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Prefix {
    value: u32,
    length: u8,
}

impl Prefix {
    /// Build a prefix, masking host bits. Lengths past 32 are clamped.
    pub fn new(value: u32, length: u8) -> Self {
        let length = length.min(V4_BITS);
        Self {
            value: canonical(value, length),
            length,
        }
    }

    /// A full /32 host address.
    pub fn host(addr: u32) -> Self {
        Self::new(addr, V4_BITS)
    }

    #[inline]
    pub fn value(&self) -> u32 {
        self.value
    }

    #[inline]
    pub fn len(&self) -> u8 {
        self.length
    }

    /// Keep the top `len` bits. Asking for a longer prefix than stored
    /// yields the prefix unchanged in value with the requested length.
    #[inline]
    pub fn truncate(&self, len: u8) -> Prefix {
        Prefix::new(self.value, len)
    }

    /// The parent prefix one bit shorter; the zero-length prefix is its own parent.
    pub fn parent(&self) -> Prefix {
        self.truncate(self.length.saturating_sub(1))
    }

    /// Bit at `index` (0 = MSB). With `index == self.len()` of a shorter
    /// prefix taken from the full address, this is the branch selector for
    /// the child at the next depth.
    #[inline]
    pub fn bit_at(&self, index: u8) -> bool {
        get_bit(self.value, index)
    }

    /// Whether `other` lies inside this prefix.
    pub fn contains(&self, other: &Prefix) -> bool {
        other.length >= self.length && canonical(other.value, self.length) == self.value
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.value)
    }

    pub fn to_net(&self) -> Ipv4Net {
        // length is clamped to 32 in every constructor
        Ipv4Net::new_assert(self.addr(), self.length)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.length)
    }
}

impl From<Ipv4Net> for Prefix {
    fn from(net: Ipv4Net) -> Self {
        Prefix::new(u32::from(net.network()), net.prefix_len())
    }
}

impl From<Ipv4Addr> for Prefix {
    fn from(addr: Ipv4Addr) -> Self {
        Prefix::host(u32::from(addr))
    }
}

impl FromStr for Prefix {
    type Err = Error;

    // Accept "addr/prefix" OR plain address
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(net) = s.parse::<Ipv4Net>() {
            // Ipv4Net keeps host bits; Prefix::from masks them.
            return Ok(Prefix::new(u32::from(net.addr()), net.prefix_len()));
        }
        s.parse::<Ipv4Addr>()
            .map(Prefix::from)
            .map_err(|_| Error::InvalidPrefix(s.to_string()))
    }
}

/// One input record as seen by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    /// Microseconds, non-decreasing across a stream.
    pub timestamp: u64,
    /// Bytes on the wire.
    pub length: u32,
    pub ip_version: u8,
    pub src: Prefix,
    pub dst: Prefix,
}

impl Packet {
    pub fn v4(timestamp: u64, length: u32, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            timestamp,
            length,
            ip_version: 4,
            src: src.into(),
            dst: dst.into(),
        }
    }

    #[inline]
    pub fn is_v4(&self) -> bool {
        self.ip_version == 4
    }
}

/// What a node accumulates per packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountMode {
    #[default]
    Bytes,
    Packets,
    /// Distinct (source prefix, destination) pairs.
    Flows,
}

impl CountMode {
    /// Raw increment before any flow deduplication.
    #[inline]
    pub fn increment(&self, pkt: &Packet) -> u64 {
        match self {
            CountMode::Bytes => pkt.length as u64,
            CountMode::Packets | CountMode::Flows => 1,
        }
    }
}

impl FromStr for CountMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bytes" => Ok(CountMode::Bytes),
            "packets" => Ok(CountMode::Packets),
            "flows" => Ok(CountMode::Flows),
            other => Err(Error::UnknownCountMode(other.to_string())),
        }
    }
}
