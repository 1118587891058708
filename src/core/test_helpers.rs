//! Shared test utilities for core module tests
//!
//! Builders for raw records and a canned `filter` table. This module is only
//! compiled in test mode.

use crate::core::memory::{Ip4Kernel, Ip6Kernel, MemoryTable};
use crate::core::raw::{IFNAMSIZ, Ip6Flags, Ip6tEntry, IptEntry, XtCounters};

pub fn name_buf(name: &str) -> [u8; IFNAMSIZ] {
    let mut buf = [0u8; IFNAMSIZ];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

/// Builder for `ipt_entry` records.
#[derive(Default)]
pub struct V4 {
    entry: IptEntry,
}

impl V4 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src(mut self, addr: [u8; 4], mask: [u8; 4]) -> Self {
        self.entry.ip.src = addr;
        self.entry.ip.smsk = mask;
        self
    }

    pub fn dst(mut self, addr: [u8; 4], mask: [u8; 4]) -> Self {
        self.entry.ip.dst = addr;
        self.entry.ip.dmsk = mask;
        self
    }

    pub fn in_iface(mut self, name: &str) -> Self {
        self.entry.ip.iniface = name_buf(name);
        self.entry.ip.iniface_mask = [0xff; IFNAMSIZ];
        self
    }

    pub fn out_iface(mut self, name: &str) -> Self {
        self.entry.ip.outiface = name_buf(name);
        self.entry.ip.outiface_mask = [0xff; IFNAMSIZ];
        self
    }

    pub fn inv(mut self, invflags: u8) -> Self {
        self.entry.ip.invflags = invflags;
        self
    }

    pub fn proto(mut self, proto: u16) -> Self {
        self.entry.ip.proto = proto;
        self
    }

    pub fn counters(mut self, pcnt: u64, bcnt: u64) -> Self {
        self.entry.counters = XtCounters { pcnt, bcnt };
        self
    }

    pub fn build(self) -> IptEntry {
        self.entry
    }
}

/// Builder for `ip6t_entry` records.
#[derive(Default)]
pub struct V6 {
    entry: Ip6tEntry,
}

impl V6 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src(mut self, addr: [u8; 16], mask: [u8; 16]) -> Self {
        self.entry.ipv6.src = addr;
        self.entry.ipv6.smsk = mask;
        self
    }

    pub fn in_iface(mut self, name: &str) -> Self {
        self.entry.ipv6.iniface = name_buf(name);
        self
    }

    pub fn proto(mut self, proto: u16) -> Self {
        self.entry.ipv6.proto = proto;
        self.entry.ipv6.flags |= Ip6Flags::PROTO.bits();
        self
    }

    pub fn counters(mut self, pcnt: u64, bcnt: u64) -> Self {
        self.entry.counters = XtCounters { pcnt, bcnt };
        self
    }

    pub fn build(self) -> Ip6tEntry {
        self.entry
    }
}

/// `filter` with the three built-in chains, a user chain and four rules:
///
/// - INPUT: `-i lo -j ACCEPT`, `-s 10.0.0.0/24 -j LOGDROP`, `! -s 192.168.1.0/24 -p tcp -j DROP`
/// - FORWARD: empty, policy DROP
/// - OUTPUT: empty
/// - LOGDROP: one rule without a target
pub fn filter_table_v4() -> MemoryTable<IptEntry> {
    MemoryTable::new()
        .builtin_chain("INPUT", "ACCEPT")
        .builtin_chain("FORWARD", "DROP")
        .builtin_chain("OUTPUT", "ACCEPT")
        .user_chain("LOGDROP")
        .rule("INPUT", V4::new().in_iface("lo").counters(120, 9600).build(), Some("ACCEPT"))
        .rule(
            "INPUT",
            V4::new()
                .src([10, 0, 0, 0], [255, 255, 255, 0])
                .counters(7, 420)
                .build(),
            Some("LOGDROP"),
        )
        .rule(
            "INPUT",
            V4::new()
                .src([192, 168, 1, 0], [255, 255, 255, 0])
                .inv(0x08)
                .proto(6)
                .counters(3, 180)
                .build(),
            Some("DROP"),
        )
        .rule("LOGDROP", V4::new().counters(7, 420).build(), None)
}

pub fn filter_kernel_v4() -> Ip4Kernel {
    let kernel = Ip4Kernel::new();
    kernel.insert_table("filter", filter_table_v4());
    kernel
}

pub fn filter_kernel_v6() -> Ip6Kernel {
    let kernel = Ip6Kernel::new();
    let mut lan = [0u8; 16];
    lan[..2].copy_from_slice(&[0xfd, 0x00]);
    let mut mask = [0u8; 16];
    mask[..1].fill(0xff);

    kernel.insert_table(
        "filter",
        MemoryTable::new()
            .builtin_chain("INPUT", "DROP")
            .builtin_chain("FORWARD", "DROP")
            .builtin_chain("OUTPUT", "ACCEPT")
            .rule("INPUT", V6::new().in_iface("lo").counters(4, 320).build(), Some("ACCEPT"))
            .rule(
                "INPUT",
                V6::new().src(lan, mask).proto(58).counters(9, 900).build(),
                Some("ACCEPT"),
            ),
    );
    kernel
}
