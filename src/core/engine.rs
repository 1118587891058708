//! Boundary to the native packet filter engine
//!
//! An [`Engine`] is the narrow capability the sessions are built on: it opens a
//! table snapshot into a handle, walks chains and rules with the handle's
//! internal cursor, and accepts zero, commit and release requests. It is
//! stateful and non-reentrant; [`TableSession`](crate::core::session::TableSession)
//! is the only intended caller.

use crate::core::error::EngineError;
use crate::core::rule::{Counter, RawRule};

/// Policy of a built-in chain as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Policy {
    /// Verdict name, e.g. `ACCEPT` or `DROP`.
    pub verdict: String,
    pub counter: Counter,
}

/// One address family's view of the packet filter engine.
pub trait Engine {
    /// Raw rule layout of this engine's family.
    type Record: RawRule;
    /// An opened table snapshot.
    type Handle;
    /// Position of a rule inside a handle.
    type Cursor: Copy;

    /// Takes a snapshot of `table`.
    fn open(&self, table: &str) -> Result<Self::Handle, EngineError>;

    /// Restarts chain enumeration and returns the first chain.
    fn first_chain(&self, handle: &mut Self::Handle) -> Option<String>;

    fn next_chain(&self, handle: &mut Self::Handle) -> Option<String>;

    fn is_builtin(&self, handle: &Self::Handle, chain: &str) -> bool;

    fn policy(&self, handle: &mut Self::Handle, chain: &str) -> Result<Policy, EngineError>;

    fn first_rule(&self, handle: &mut Self::Handle, chain: &str) -> Option<Self::Cursor>;

    fn next_rule(&self, handle: &mut Self::Handle, prev: Self::Cursor) -> Option<Self::Cursor>;

    /// The raw record at `cursor`. Valid until the handle is released.
    fn record<'h>(&self, handle: &'h Self::Handle, cursor: Self::Cursor) -> &'h Self::Record;

    fn target_name(&self, handle: &Self::Handle, cursor: Self::Cursor) -> Option<String>;

    /// Zeroes the chain's counters in the snapshot; applied to the kernel on commit.
    fn zero_entries(&self, handle: &mut Self::Handle, chain: &str) -> Result<(), EngineError>;

    fn commit(&self, handle: &mut Self::Handle) -> Result<(), EngineError>;

    /// Frees the handle. Called exactly once per opened handle.
    fn release(&self, handle: Self::Handle);
}
