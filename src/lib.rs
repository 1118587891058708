//! nfsnap - netfilter table snapshots
//!
//! Typed, read-mostly access to the live iptables / ip6tables rule set: open a
//! table snapshot, list its chains, decode rules and counters, zero counters
//! and commit.
//!
//! # Architecture
//!
//! - [`core`] - Table sessions, record decoding, engine backends
//! - [`audit`] - Audit logging for counter resets and commits
//! - [`validators`] - Table and chain name validation
//! - [`config`] - Configuration persistence
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Safety Features
//!
//! - Sessions release their native handle exactly once, also on early returns
//! - Use of a closed session panics instead of touching freed memory
//! - Decoding never reorders address bytes, independent of host endianness

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use crate::core::engine::{Engine, Policy};
pub use crate::core::error::{Error, Result};
pub use crate::core::rule::{Counter, Family, Rule};
pub use crate::core::session::{TableSession, with_session};
pub use crate::core::snapshot::CounterSnapshot;
