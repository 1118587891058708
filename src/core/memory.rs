//! In-process packet filter engine
//!
//! [`MemoryKernel`] holds tables of raw rule records and behaves like libiptc
//! towards a session: opening a table copies it into a private snapshot,
//! zeroing is visible in that snapshot right away and reaches the shared
//! kernel state only on commit. It counts open handles and commits, can add
//! traffic between sessions and fail selected requests once, which makes it
//! the backend for tests and dry runs.

use nix::errno::Errno;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::core::engine::{Engine, Policy};
use crate::core::error::EngineError;
use crate::core::raw::{Ip6tEntry, IptEntry, XtCounters};
use crate::core::rule::{Counter, RawRule};

const MSG_NO_TABLE: &str = "Table does not exist (do you need to insmod?)";
const MSG_NO_CHAIN: &str = "No chain/target/match by that name";
const MSG_NOT_ROOT: &str = "Permission denied (you must be root)";

/// Records whose counters the in-memory engine can rewrite.
pub trait CounterMut {
    fn set_counter(&mut self, counter: Counter);
}

impl CounterMut for IptEntry {
    fn set_counter(&mut self, counter: Counter) {
        self.counters = XtCounters {
            pcnt: counter.packets,
            bcnt: counter.bytes,
        };
    }
}

impl CounterMut for Ip6tEntry {
    fn set_counter(&mut self, counter: Counter) {
        self.counters = XtCounters {
            pcnt: counter.packets,
            bcnt: counter.bytes,
        };
    }
}

/// Engine request that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Policy,
    Zero,
    Commit,
}

#[derive(Debug, Clone)]
pub struct MemoryRule<R> {
    pub record: R,
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryChain<R> {
    pub name: String,
    /// Present for built-in chains only.
    pub policy: Option<Policy>,
    pub rules: Vec<MemoryRule<R>>,
}

impl<R: CounterMut> MemoryChain<R> {
    fn zero(&mut self) {
        if let Some(policy) = &mut self.policy {
            policy.counter = Counter::ZERO;
        }
        for rule in &mut self.rules {
            rule.record.set_counter(Counter::ZERO);
        }
    }
}

/// A table's chains in enumeration order.
#[derive(Debug, Clone)]
pub struct MemoryTable<R> {
    pub chains: Vec<MemoryChain<R>>,
}

impl<R> Default for MemoryTable<R> {
    fn default() -> Self {
        Self { chains: Vec::new() }
    }
}

impl<R: RawRule> MemoryTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a built-in chain with the given policy verdict.
    pub fn builtin_chain(mut self, name: &str, verdict: &str) -> Self {
        self.chains.push(MemoryChain {
            name: name.to_string(),
            policy: Some(Policy {
                verdict: verdict.to_string(),
                counter: Counter::ZERO,
            }),
            rules: Vec::new(),
        });
        self
    }

    /// Appends a user-defined chain.
    pub fn user_chain(mut self, name: &str) -> Self {
        self.chains.push(MemoryChain {
            name: name.to_string(),
            policy: None,
            rules: Vec::new(),
        });
        self
    }

    /// Appends a rule to `chain`, creating it as a user-defined chain if needed.
    pub fn rule(mut self, chain: &str, record: R, target: Option<&str>) -> Self {
        if self.chain(chain).is_none() {
            self = self.user_chain(chain);
        }
        if let Some(c) = self.chain_mut(chain) {
            c.rules.push(MemoryRule {
                record,
                target: target.map(str::to_string),
            });
        }
        self
    }

    pub fn chain(&self, name: &str) -> Option<&MemoryChain<R>> {
        self.chains.iter().find(|c| c.name == name)
    }

    fn chain_mut(&mut self, name: &str) -> Option<&mut MemoryChain<R>> {
        self.chains.iter_mut().find(|c| c.name == name)
    }

    fn chain_index(&self, name: &str) -> Option<usize> {
        self.chains.iter().position(|c| c.name == name)
    }
}

struct KernelState<R> {
    tables: BTreeMap<String, MemoryTable<R>>,
    open_handles: usize,
    commits: usize,
    /// Pending faults with the number of requests to let through first.
    faults: Vec<(Fault, usize)>,
    denied: bool,
}

impl<R> KernelState<R> {
    /// Counts down the first pending fault of this kind; fires when it reaches zero.
    fn take_fault(&mut self, fault: Fault) -> bool {
        let Some(i) = self.faults.iter().position(|(f, _)| *f == fault) else {
            return false;
        };
        if self.faults[i].1 == 0 {
            self.faults.remove(i);
            true
        } else {
            self.faults[i].1 -= 1;
            false
        }
    }
}

/// Shared in-memory kernel state. Clones refer to the same tables.
pub struct MemoryKernel<R> {
    state: Arc<Mutex<KernelState<R>>>,
}

pub type Ip4Kernel = MemoryKernel<IptEntry>;
pub type Ip6Kernel = MemoryKernel<Ip6tEntry>;

impl<R> Clone for MemoryKernel<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R> Default for MemoryKernel<R> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(KernelState {
                tables: BTreeMap::new(),
                open_handles: 0,
                commits: 0,
                faults: Vec::new(),
                denied: false,
            })),
        }
    }
}

impl<R: RawRule + CounterMut> MemoryKernel<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, KernelState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs or replaces a table.
    pub fn insert_table(&self, name: &str, table: MemoryTable<R>) {
        self.lock().tables.insert(name.to_string(), table);
    }

    /// Current kernel-side contents of a table.
    pub fn table(&self, name: &str) -> Option<MemoryTable<R>> {
        self.lock().tables.get(name).cloned()
    }

    /// Adds traffic to a rule (`Some(index)`) or to the chain policy (`None`).
    ///
    /// Returns `false` if the table, chain or rule does not exist.
    pub fn add_traffic(
        &self,
        table: &str,
        chain: &str,
        rule: Option<usize>,
        delta: Counter,
    ) -> bool {
        let mut state = self.lock();
        let Some(chain) = state.tables.get_mut(table).and_then(|t| t.chain_mut(chain)) else {
            return false;
        };
        match rule {
            Some(index) => match chain.rules.get_mut(index) {
                Some(r) => {
                    let counter = r.record.counter().saturating_add(delta);
                    r.record.set_counter(counter);
                    true
                }
                None => false,
            },
            None => match &mut chain.policy {
                Some(policy) => {
                    policy.counter = policy.counter.saturating_add(delta);
                    true
                }
                None => false,
            },
        }
    }

    /// Makes the next request of the given kind fail.
    pub fn inject_fault(&self, fault: Fault) {
        self.inject_fault_after(fault, 0);
    }

    /// Lets `skip` requests of the given kind succeed, then fails the next one.
    pub fn inject_fault_after(&self, fault: Fault, skip: usize) {
        self.lock().faults.push((fault, skip));
    }

    /// Refuses every open as an unprivileged caller would be refused.
    pub fn deny_access(&self, denied: bool) {
        self.lock().denied = denied;
    }

    /// Handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    /// Successful commits so far.
    pub fn commits(&self) -> usize {
        self.lock().commits
    }
}

/// An opened snapshot of one [`MemoryKernel`] table.
#[derive(Debug)]
pub struct MemoryHandle<R> {
    table_name: String,
    table: MemoryTable<R>,
    next_chain: usize,
    zeroed: Vec<String>,
}

impl<R: RawRule + CounterMut> Engine for MemoryKernel<R> {
    type Record = R;
    type Handle = MemoryHandle<R>;
    type Cursor = (usize, usize);

    fn open(&self, table: &str) -> Result<Self::Handle, EngineError> {
        let mut state = self.lock();
        if state.denied {
            return Err(EngineError::new(Errno::EPERM as i32, MSG_NOT_ROOT));
        }
        let snapshot = state
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| EngineError::new(Errno::ENOENT as i32, MSG_NO_TABLE))?;
        state.open_handles += 1;
        Ok(MemoryHandle {
            table_name: table.to_string(),
            table: snapshot,
            next_chain: 0,
            zeroed: Vec::new(),
        })
    }

    fn first_chain(&self, handle: &mut Self::Handle) -> Option<String> {
        handle.next_chain = 0;
        self.next_chain(handle)
    }

    fn next_chain(&self, handle: &mut Self::Handle) -> Option<String> {
        let name = handle.table.chains.get(handle.next_chain)?.name.clone();
        handle.next_chain += 1;
        Some(name)
    }

    fn is_builtin(&self, handle: &Self::Handle, chain: &str) -> bool {
        handle
            .table
            .chain(chain)
            .is_some_and(|c| c.policy.is_some())
    }

    fn policy(&self, handle: &mut Self::Handle, chain: &str) -> Result<Policy, EngineError> {
        if self.lock().take_fault(Fault::Policy) {
            return Err(Errno::EIO.into());
        }
        handle
            .table
            .chain(chain)
            .and_then(|c| c.policy.clone())
            .ok_or_else(|| EngineError::new(Errno::ENOENT as i32, MSG_NO_CHAIN))
    }

    fn first_rule(&self, handle: &mut Self::Handle, chain: &str) -> Option<Self::Cursor> {
        let index = handle.table.chain_index(chain)?;
        (!handle.table.chains[index].rules.is_empty()).then_some((index, 0))
    }

    fn next_rule(&self, handle: &mut Self::Handle, prev: Self::Cursor) -> Option<Self::Cursor> {
        let (chain, rule) = prev;
        let next = rule + 1;
        (next < handle.table.chains.get(chain)?.rules.len()).then_some((chain, next))
    }

    fn record<'h>(&self, handle: &'h Self::Handle, cursor: Self::Cursor) -> &'h Self::Record {
        &handle.table.chains[cursor.0].rules[cursor.1].record
    }

    fn target_name(&self, handle: &Self::Handle, cursor: Self::Cursor) -> Option<String> {
        handle.table.chains[cursor.0].rules[cursor.1].target.clone()
    }

    fn zero_entries(&self, handle: &mut Self::Handle, chain: &str) -> Result<(), EngineError> {
        if self.lock().take_fault(Fault::Zero) {
            return Err(Errno::EIO.into());
        }
        let c = handle
            .table
            .chain_mut(chain)
            .ok_or_else(|| EngineError::new(Errno::ENOENT as i32, MSG_NO_CHAIN))?;
        c.zero();
        if !handle.zeroed.iter().any(|z| z == chain) {
            handle.zeroed.push(chain.to_string());
        }
        Ok(())
    }

    fn commit(&self, handle: &mut Self::Handle) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.take_fault(Fault::Commit) {
            return Err(Errno::EAGAIN.into());
        }
        if let Some(table) = state.tables.get_mut(&handle.table_name) {
            for name in handle.zeroed.drain(..) {
                if let Some(chain) = table.chain_mut(&name) {
                    chain.zero();
                }
            }
        }
        state.commits += 1;
        debug!(table = %handle.table_name, "memory kernel commit");
        Ok(())
    }

    fn release(&self, handle: Self::Handle) {
        let mut state = self.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        drop(handle);
    }
}
