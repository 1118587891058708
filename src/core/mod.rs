//! Core snapshot and decode functionality
//!
//! This module turns the packet filter engine's opaque, cursor-based table
//! handles into safe sessions and decodes raw rule records. It provides:
//!
//! - [`session`]: Table sessions with an open / read / zero / close lifecycle
//! - [`snapshot`]: Counters-only sessions for throughput accounting
//! - [`rule`]: The family-agnostic rule model and the record decoder
//! - [`address`]: Address/mask codec
//! - [`raw`]: Fixed layouts of `ipt_entry` and `ip6t_entry`
//! - [`engine`]: The engine boundary trait
//! - [`memory`]: In-process engine for tests and dry runs
//! - [`libiptc`]: Native engine (feature `libiptc`)
//! - [`error`]: Error types for table operations

pub mod address;
pub mod engine;
pub mod error;
#[cfg(feature = "libiptc")]
pub mod libiptc;
pub mod memory;
pub mod raw;
pub mod rule;
pub mod session;
pub mod snapshot;

#[cfg(test)]
pub mod test_helpers;
