//! Address codec for raw address/mask pairs
//!
//! The engine stores addresses and masks in network byte order. Both decoders
//! work on the raw byte sequence, byte 0 being the first octet, so the result
//! never depends on the host's endianness. Masks are carried through unchanged:
//! a non-contiguous mask is valid engine data and is not canonicalized here.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::core::rule::Family;

/// An address paired with the bitmask selecting its matched portion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetPrefix {
    address: IpAddr,
    mask: IpAddr,
}

/// Decodes a raw IPv4 address and mask (4 bytes each, network order).
pub fn decode_ipv4(addr: [u8; 4], mask: [u8; 4]) -> NetPrefix {
    NetPrefix {
        address: IpAddr::V4(Ipv4Addr::from(addr)),
        mask: IpAddr::V4(Ipv4Addr::from(mask)),
    }
}

/// Decodes a raw IPv6 address and mask (16 bytes each), copied verbatim.
pub fn decode_ipv6(addr: [u8; 16], mask: [u8; 16]) -> NetPrefix {
    NetPrefix {
        address: IpAddr::V6(Ipv6Addr::from(addr)),
        mask: IpAddr::V6(Ipv6Addr::from(mask)),
    }
}

impl NetPrefix {
    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn mask(&self) -> IpAddr {
        self.mask
    }

    pub fn family(&self) -> Family {
        match self.address {
            IpAddr::V4(_) => Family::Ipv4,
            IpAddr::V6(_) => Family::Ipv6,
        }
    }

    /// True when the mask is all zeroes, i.e. the prefix matches any address.
    pub fn is_any(&self) -> bool {
        self.mask.is_unspecified()
    }

    /// Length of the prefix if the mask is contiguous leading ones.
    ///
    /// Returns `None` for arbitrary bitmasks such as `255.0.255.0`.
    pub fn prefix_len(&self) -> Option<u8> {
        match self.mask {
            IpAddr::V4(mask) => {
                let bits = u32::from(mask);
                let ones = bits.leading_ones();
                let len = u8::try_from(ones).ok()?;
                (bits.checked_shl(ones).unwrap_or(0) == 0).then_some(len)
            }
            IpAddr::V6(mask) => {
                let bits = u128::from(mask);
                let ones = bits.leading_ones();
                let len = u8::try_from(ones).ok()?;
                (bits.checked_shl(ones).unwrap_or(0) == 0).then_some(len)
            }
        }
    }

    /// CIDR view of this prefix, available for contiguous masks only.
    ///
    /// The address keeps any host bits the engine stored.
    pub fn to_network(&self) -> Option<IpNetwork> {
        let len = self.prefix_len()?;
        IpNetwork::new(self.address, len).ok()
    }
}

impl fmt::Display for NetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix_len() {
            Some(len) => write!(f, "{}/{}", self.address, len),
            None => write!(f, "{}/{}", self.address, self.mask),
        }
    }
}
