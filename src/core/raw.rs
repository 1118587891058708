//! Raw rule records as the packet filter engine hands them out
//!
//! These mirror `struct ipt_entry` (`<linux/netfilter_ipv4/ip_tables.h>`) and
//! `struct ip6t_entry` (`<linux/netfilter_ipv6/ip6_tables.h>`) field for field,
//! without the variable-length match/target area that follows them in memory.
//! Addresses and masks are kept as raw network-order bytes.
//!
//! Implicit padding of the C layouts is spelled out as `_pad` fields so the
//! records can be viewed as plain bytes in both directions.

use bitflags::bitflags;
use std::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of an interface name buffer, terminator included.
pub const IFNAMSIZ: usize = 16;

bitflags! {
    /// `invflags` bits. The values are identical for `IPT_INV_*` and `IP6T_INV_*`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InvFlags: u8 {
        const VIA_IN = 0x01;
        const VIA_OUT = 0x02;
        const TOS = 0x04;
        const SRCIP = 0x08;
        const DSTIP = 0x10;
        const FRAG = 0x20;
        const PROTO = 0x40;
    }
}

bitflags! {
    /// `ip6t_ip6.flags` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Ip6Flags: u8 {
        /// The `proto` field is significant.
        const PROTO = 0x01;
        const TOS = 0x02;
        const GOTO = 0x04;
    }
}

/// `struct xt_counters`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct XtCounters {
    pub pcnt: u64,
    pub bcnt: u64,
}

/// `struct ipt_ip`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct IptIp {
    pub src: [u8; 4],
    pub dst: [u8; 4],
    pub smsk: [u8; 4],
    pub dmsk: [u8; 4],
    pub iniface: [u8; IFNAMSIZ],
    pub outiface: [u8; IFNAMSIZ],
    pub iniface_mask: [u8; IFNAMSIZ],
    pub outiface_mask: [u8; IFNAMSIZ],
    pub proto: u16,
    pub flags: u8,
    pub invflags: u8,
}

/// `struct ipt_entry` without the trailing `elems[]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct IptEntry {
    pub ip: IptIp,
    pub nfcache: u32,
    pub target_offset: u16,
    pub next_offset: u16,
    pub comefrom: u32,
    pub counters: XtCounters,
}

/// `struct ip6t_ip6`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Ip6tIp6 {
    pub src: [u8; 16],
    pub dst: [u8; 16],
    pub smsk: [u8; 16],
    pub dmsk: [u8; 16],
    pub iniface: [u8; IFNAMSIZ],
    pub outiface: [u8; IFNAMSIZ],
    pub iniface_mask: [u8; IFNAMSIZ],
    pub outiface_mask: [u8; IFNAMSIZ],
    pub proto: u16,
    pub tos: u8,
    pub flags: u8,
    pub invflags: u8,
    pub _pad: [u8; 3],
}

/// `struct ip6t_entry` without the trailing `elems[]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Ip6tEntry {
    pub ipv6: Ip6tIp6,
    pub nfcache: u32,
    pub target_offset: u16,
    pub next_offset: u16,
    pub comefrom: u32,
    pub _pad: [u8; 4],
    pub counters: XtCounters,
}

// Offsets must match the kernel headers, the native engine hands out pointers
// to these structs directly.
const _: () = assert!(size_of::<IptIp>() == 84);
const _: () = assert!(size_of::<IptEntry>() == 112);
const _: () = assert!(size_of::<Ip6tIp6>() == 136);
const _: () = assert!(size_of::<Ip6tEntry>() == 168);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_ipt_entry_offsets() {
        assert_eq!(offset_of!(IptIp, iniface), 16);
        assert_eq!(offset_of!(IptIp, proto), 80);
        assert_eq!(offset_of!(IptIp, invflags), 83);
        assert_eq!(offset_of!(IptEntry, nfcache), 84);
        assert_eq!(offset_of!(IptEntry, counters), 96);
    }

    #[test]
    fn test_ip6t_entry_offsets() {
        assert_eq!(offset_of!(Ip6tIp6, iniface), 64);
        assert_eq!(offset_of!(Ip6tIp6, proto), 128);
        assert_eq!(offset_of!(Ip6tIp6, invflags), 132);
        assert_eq!(offset_of!(Ip6tEntry, nfcache), 136);
        assert_eq!(offset_of!(Ip6tEntry, counters), 152);
    }

    #[test]
    fn test_entry_read_from_bytes() {
        let mut bytes = [0u8; 112];
        bytes[0..4].copy_from_slice(&[192, 168, 1, 7]);
        bytes[83] = InvFlags::SRCIP.bits();
        bytes[96..104].copy_from_slice(&42u64.to_ne_bytes());

        let entry = IptEntry::read_from_bytes(&bytes).unwrap();
        assert_eq!(entry.ip.src, [192, 168, 1, 7]);
        assert_eq!(InvFlags::from_bits_retain(entry.ip.invflags), InvFlags::SRCIP);
        assert_eq!(entry.counters.pcnt, 42);
        assert_eq!(entry.as_bytes(), &bytes[..]);
    }
}
