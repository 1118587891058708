//! Decoded rule model and the record decoder
//!
//! A [`Rule`] is the family-agnostic view of one raw `ipt_entry` or
//! `ip6t_entry`. Decoding is a pure projection of the fixed-layout record:
//!
//! - interface names are cut at the first NUL of their 16-byte buffers
//! - each inversion bit maps to its own boolean
//! - addresses and masks go through the [address codec](crate::core::address)
//! - counters are copied verbatim
//!
//! The decoder never fails. It trusts the engine to hand out well-formed
//! records of the session's family.

use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use std::fmt;

use crate::core::address::{NetPrefix, decode_ipv4, decode_ipv6};
use crate::core::raw::{IFNAMSIZ, Ip6Flags, Ip6tEntry, InvFlags, IptEntry, XtCounters};

/// Address family of a table.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[default]
    #[strum(serialize = "ipv4")]
    Ipv4,
    #[strum(serialize = "ipv6")]
    Ipv6,
}

/// Packet and byte counters of a rule or of a chain's policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Counter {
    pub packets: u64,
    pub bytes: u64,
}

impl Counter {
    pub const ZERO: Counter = Counter {
        packets: 0,
        bytes: 0,
    };

    pub const fn new(packets: u64, bytes: u64) -> Self {
        Self { packets, bytes }
    }

    pub const fn is_zero(&self) -> bool {
        self.packets == 0 && self.bytes == 0
    }

    /// Sum of two counters, saturating at `u64::MAX`.
    pub const fn saturating_add(self, other: Counter) -> Counter {
        Counter {
            packets: self.packets.saturating_add(other.packets),
            bytes: self.bytes.saturating_add(other.bytes),
        }
    }
}

impl From<XtCounters> for Counter {
    fn from(c: XtCounters) -> Self {
        Counter {
            packets: c.pcnt,
            bytes: c.bcnt,
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} packets, {} bytes", self.packets, self.bytes)
    }
}

/// One decoded firewall rule: base predicate, target and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub source: NetPrefix,
    pub destination: NetPrefix,
    pub source_inverted: bool,
    pub destination_inverted: bool,
    /// Input interface, empty for any.
    pub in_interface: String,
    pub in_interface_inverted: bool,
    /// Output interface, empty for any.
    pub out_interface: String,
    pub out_interface_inverted: bool,
    /// IP protocol number, 0 for any.
    pub protocol: u16,
    pub protocol_inverted: bool,
    /// Jump target or verdict, empty when the rule falls through.
    pub target: String,
    pub counter: Counter,
}

impl Rule {
    pub fn family(&self) -> Family {
        self.source.family()
    }
}

fn not(inverted: bool) -> &'static str {
    if inverted { "!" } else { " " }
}

fn or_any(name: &str) -> &str {
    if name.is_empty() { "any" } else { name }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in: {}{}, out: {}{}, {}{} -> {}{} -> {}: {}",
            not(self.in_interface_inverted),
            or_any(&self.in_interface),
            not(self.out_interface_inverted),
            or_any(&self.out_interface),
            not(self.source_inverted),
            self.source,
            not(self.destination_inverted),
            self.destination,
            self.target,
            self.counter,
        )
    }
}

/// A raw rule record of one address family.
pub trait RawRule: Clone + fmt::Debug {
    const FAMILY: Family;

    /// Full predicate decode. `target` is what the engine's target accessor
    /// returned for this record.
    fn decode(&self, target: Option<&str>) -> Rule;

    /// Counter-only projection, skipping predicate decoding.
    fn counter(&self) -> Counter;
}

/// Decodes `record` into a [`Rule`] of the record's family.
pub fn decode<R: RawRule>(record: &R, target: Option<&str>) -> Rule {
    record.decode(target)
}

/// Reads an interface name out of a fixed, NUL-terminated buffer.
///
/// Bytes after the first NUL are ignored; an all-NUL buffer is the empty name.
pub fn interface_name(buf: &[u8; IFNAMSIZ]) -> String {
    match CStr::from_bytes_until_nul(buf) {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(_) => String::from_utf8_lossy(buf).into_owned(),
    }
}

impl RawRule for IptEntry {
    const FAMILY: Family = Family::Ipv4;

    fn decode(&self, target: Option<&str>) -> Rule {
        let ip = &self.ip;
        let inv = InvFlags::from_bits_retain(ip.invflags);

        Rule {
            source: decode_ipv4(ip.src, ip.smsk),
            destination: decode_ipv4(ip.dst, ip.dmsk),
            source_inverted: inv.contains(InvFlags::SRCIP),
            destination_inverted: inv.contains(InvFlags::DSTIP),
            in_interface: interface_name(&ip.iniface),
            in_interface_inverted: inv.contains(InvFlags::VIA_IN),
            out_interface: interface_name(&ip.outiface),
            out_interface_inverted: inv.contains(InvFlags::VIA_OUT),
            protocol: ip.proto,
            protocol_inverted: inv.contains(InvFlags::PROTO),
            target: target.unwrap_or_default().to_string(),
            counter: self.counter(),
        }
    }

    fn counter(&self) -> Counter {
        self.counters.into()
    }
}

impl RawRule for Ip6tEntry {
    const FAMILY: Family = Family::Ipv6;

    fn decode(&self, target: Option<&str>) -> Rule {
        let ip = &self.ipv6;
        let inv = InvFlags::from_bits_retain(ip.invflags);
        // ip6tables only matches on `proto` when told to
        let protocol = if Ip6Flags::from_bits_retain(ip.flags).contains(Ip6Flags::PROTO) {
            ip.proto
        } else {
            0
        };

        Rule {
            source: decode_ipv6(ip.src, ip.smsk),
            destination: decode_ipv6(ip.dst, ip.dmsk),
            source_inverted: inv.contains(InvFlags::SRCIP),
            destination_inverted: inv.contains(InvFlags::DSTIP),
            in_interface: interface_name(&ip.iniface),
            in_interface_inverted: inv.contains(InvFlags::VIA_IN),
            out_interface: interface_name(&ip.outiface),
            out_interface_inverted: inv.contains(InvFlags::VIA_OUT),
            protocol,
            protocol_inverted: inv.contains(InvFlags::PROTO),
            target: target.unwrap_or_default().to_string(),
            counter: self.counter(),
        }
    }

    fn counter(&self) -> Counter {
        self.counters.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::raw::XtCounters;
    use proptest::prelude::*;
    use std::net::IpAddr;

    fn name_buf(name: &str) -> [u8; IFNAMSIZ] {
        let mut buf = [0u8; IFNAMSIZ];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        buf
    }

    fn v4_entry(invflags: u8) -> IptEntry {
        let mut entry = IptEntry::default();
        entry.ip.src = [10, 0, 0, 1];
        entry.ip.smsk = [255, 255, 255, 0];
        entry.ip.dst = [192, 168, 0, 0];
        entry.ip.dmsk = [255, 255, 0, 0];
        entry.ip.invflags = invflags;
        entry
    }

    #[test]
    fn test_interface_name_truncates_at_nul() {
        assert_eq!(interface_name(&name_buf("eth0")), "eth0");
        assert_eq!(interface_name(&[0u8; IFNAMSIZ]), "");
    }

    #[test]
    fn test_interface_name_ignores_bytes_after_nul() {
        let mut buf = name_buf("lo");
        buf[5..9].copy_from_slice(b"junk");
        assert_eq!(interface_name(&buf), "lo");
    }

    #[test]
    fn test_interface_name_max_length() {
        assert_eq!(
            interface_name(&name_buf("abcdefghijklmno")),
            "abcdefghijklmno"
        );
        assert_eq!(interface_name(&[b'x'; IFNAMSIZ]), "x".repeat(IFNAMSIZ));
    }

    #[test]
    fn test_decode_ipv4_addresses() {
        let rule = decode(&v4_entry(0), Some("ACCEPT"));
        assert_eq!(rule.source.address(), "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(rule.source.prefix_len(), Some(24));
        assert_eq!(rule.destination.to_string(), "192.168.0.0/16");
        assert_eq!(rule.family(), Family::Ipv4);
        assert_eq!(rule.target, "ACCEPT");
    }

    #[test]
    fn test_only_source_inverted() {
        let rule = decode(&v4_entry(InvFlags::SRCIP.bits()), None);
        assert!(rule.source_inverted);
        assert!(!rule.destination_inverted);
        assert!(!rule.in_interface_inverted);
        assert!(!rule.out_interface_inverted);
    }

    #[test]
    fn test_all_inversions() {
        let flags = InvFlags::SRCIP | InvFlags::DSTIP | InvFlags::VIA_IN | InvFlags::VIA_OUT;
        let rule = decode(&v4_entry(flags.bits()), None);
        assert!(rule.source_inverted);
        assert!(rule.destination_inverted);
        assert!(rule.in_interface_inverted);
        assert!(rule.out_interface_inverted);
        assert!(!rule.protocol_inverted);
    }

    #[test]
    fn test_missing_target_is_empty() {
        let rule = decode(&v4_entry(0), None);
        assert_eq!(rule.target, "");
    }

    #[test]
    fn test_counters_verbatim() {
        let mut entry = v4_entry(0);
        entry.counters = XtCounters {
            pcnt: u64::MAX,
            bcnt: 1 << 40,
        };
        let rule = decode(&entry, None);
        assert_eq!(rule.counter, Counter::new(u64::MAX, 1 << 40));
        assert_eq!(entry.counter(), rule.counter);
    }

    #[test]
    fn test_decode_ipv6() {
        let mut entry = Ip6tEntry::default();
        entry.ipv6.dst = "2001:db8::".parse::<std::net::Ipv6Addr>().unwrap().octets();
        entry.ipv6.dmsk[..4].fill(0xff);
        entry.ipv6.iniface = name_buf("wg0");
        entry.ipv6.invflags = InvFlags::VIA_IN.bits();
        entry.ipv6.proto = 6;

        let rule = decode(&entry, Some("DROP"));
        assert_eq!(rule.family(), Family::Ipv6);
        assert_eq!(rule.source.to_string(), "::/0");
        assert_eq!(rule.destination.to_string(), "2001:db8::/32");
        assert_eq!(rule.in_interface, "wg0");
        assert!(rule.in_interface_inverted);
        // proto is only significant with IP6T_F_PROTO
        assert_eq!(rule.protocol, 0);

        entry.ipv6.flags = Ip6Flags::PROTO.bits();
        assert_eq!(decode(&entry, None).protocol, 6);
    }

    #[test]
    fn test_rule_display() {
        let mut entry = v4_entry(InvFlags::VIA_IN.bits());
        entry.ip.iniface = name_buf("eth0");
        entry.counters = XtCounters { pcnt: 3, bcnt: 180 };
        let rule = decode(&entry, Some("LOGDROP"));
        assert_eq!(
            rule.to_string(),
            "in: !eth0, out:  any,  10.0.0.1/24 ->  192.168.0.0/16 -> LOGDROP: 3 packets, 180 bytes"
        );
    }

    #[test]
    fn test_family_names() {
        assert_eq!(Family::Ipv4.to_string(), "ipv4");
        assert_eq!("ipv6".parse::<Family>().unwrap(), Family::Ipv6);
        assert_eq!(serde_json::to_string(&Family::Ipv6).unwrap(), "\"ipv6\"");
    }

    proptest! {
        #[test]
        fn prop_inversion_bits_are_independent(invflags in any::<u8>()) {
            let rule = decode(&v4_entry(invflags), None);
            prop_assert_eq!(rule.source_inverted, invflags & 0x08 != 0);
            prop_assert_eq!(rule.destination_inverted, invflags & 0x10 != 0);
            prop_assert_eq!(rule.in_interface_inverted, invflags & 0x01 != 0);
            prop_assert_eq!(rule.out_interface_inverted, invflags & 0x02 != 0);
            prop_assert_eq!(rule.protocol_inverted, invflags & 0x40 != 0);
        }

        #[test]
        fn prop_interface_name_round_trip(name in "[a-z0-9.+-]{0,15}", tail in any::<[u8; 16]>()) {
            let mut buf = name_buf(&name);
            // anything after the terminator is noise
            let start = name.len() + 1;
            buf[start..].copy_from_slice(&tail[start..]);
            prop_assert_eq!(interface_name(&buf), name);
        }
    }
}
