//! Table sessions over an [`Engine`]
//!
//! A [`TableSession`] owns exactly one opened engine handle for one table and
//! walks it through `open -> (read | zero)* -> close`. The handle's cursor
//! state is hidden behind lazy iterators that borrow the session mutably, so
//! only one enumeration can run at a time and a full decode pass can never
//! interleave with a counters-only pass.
//!
//! # Lifecycle
//!
//! [`TableSession::close`] commits pending zeroing and releases the handle. Any
//! call on a closed session, a second `close` included, panics: it would act
//! on a released resource. A session dropped while still open is closed by
//! `Drop`, so early returns never leak the handle.
//!
//! ```
//! use nfsnap::core::memory::{Ip4Kernel, MemoryTable};
//! use nfsnap::core::session::TableSession;
//!
//! let kernel = Ip4Kernel::new();
//! kernel.insert_table("filter", MemoryTable::new().builtin_chain("INPUT", "ACCEPT"));
//!
//! let mut session = TableSession::open(kernel, "filter")?;
//! let chains: Vec<String> = session.chains().collect();
//! assert_eq!(chains, ["INPUT"]);
//! assert!(session.policy_counter("INPUT")?.is_zero());
//! session.close()?;
//! # Ok::<(), nfsnap::Error>(())
//! ```

use std::iter::FusedIterator;
use tracing::{debug, info, warn};

use crate::core::engine::{Engine, Policy};
use crate::core::error::{Error, NameKind, Operation, Result};
use crate::core::rule::{Counter, Family, RawRule, Rule};
use crate::validators::{validate_chain_name, validate_table_name};

enum State<H> {
    Open(H),
    Closed,
}

/// An open snapshot of one table of one address family.
pub struct TableSession<E: Engine> {
    engine: E,
    table: String,
    state: State<E::Handle>,
}

#[track_caller]
fn misuse(table: &str) -> ! {
    panic!("table session for '{table}' used after close")
}

fn check_chain(chain: &str) -> Result<()> {
    validate_chain_name(chain).map_err(|reason| Error::InvalidName {
        kind: NameKind::Chain,
        name: chain.to_string(),
        reason,
    })
}

impl<E: Engine> TableSession<E> {
    /// Opens a snapshot of `table`.
    ///
    /// # Errors
    ///
    /// `InvalidName` for names the engine cannot represent,
    /// `EngineUnavailable` if the engine refuses the table.
    pub fn open(engine: E, table: &str) -> Result<Self> {
        let family = <E::Record as RawRule>::FAMILY;
        validate_table_name(table).map_err(|reason| Error::InvalidName {
            kind: NameKind::Table,
            name: table.to_string(),
            reason,
        })?;

        let handle = engine
            .open(table)
            .map_err(|source| Error::EngineUnavailable {
                table: table.to_string(),
                family,
                source,
            })?;
        info!(table, %family, "opened table snapshot");

        Ok(Self {
            engine,
            table: table.to_string(),
            state: State::Open(handle),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn family(&self) -> Family {
        <E::Record as RawRule>::FAMILY
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    #[track_caller]
    fn ensure_open(&self) {
        if !self.is_open() {
            misuse(&self.table);
        }
    }

    #[track_caller]
    fn handle(&self) -> &E::Handle {
        match &self.state {
            State::Open(handle) => handle,
            State::Closed => misuse(&self.table),
        }
    }

    #[track_caller]
    fn parts(&mut self) -> (&E, &mut E::Handle) {
        match &mut self.state {
            State::Open(handle) => (&self.engine, handle),
            State::Closed => misuse(&self.table),
        }
    }

    /// Chain names in the engine's enumeration order.
    ///
    /// Each call restarts the enumeration from the first chain.
    ///
    /// # Panics
    ///
    /// If the session is closed.
    #[track_caller]
    pub fn chains(&mut self) -> Chains<'_, E> {
        self.ensure_open();
        Chains {
            session: self,
            started: false,
            done: false,
        }
    }

    /// Whether `chain` is one of the table's built-in verdict chains.
    ///
    /// # Panics
    ///
    /// If the session is closed.
    #[track_caller]
    pub fn is_builtin(&self, chain: &str) -> bool {
        self.engine.is_builtin(self.handle(), chain)
    }

    /// Policy verdict and counters of a built-in chain.
    ///
    /// # Errors
    ///
    /// `NotBuiltinChain` for user-defined chains, `Engine` if the engine fails
    /// to report the policy.
    ///
    /// # Panics
    ///
    /// If the session is closed.
    #[track_caller]
    pub fn policy(&mut self, chain: &str) -> Result<Policy> {
        self.ensure_open();
        check_chain(chain)?;
        if !self.is_builtin(chain) {
            return Err(Error::NotBuiltinChain {
                table: self.table.clone(),
                chain: chain.to_string(),
            });
        }

        let (engine, handle) = self.parts();
        let policy = engine.policy(handle, chain);
        policy.map_err(|source| Error::Engine {
            operation: Operation::Policy,
            table: self.table.clone(),
            chain: Some(chain.to_string()),
            source,
        })
    }

    /// Counters of a built-in chain's default policy.
    ///
    /// # Errors
    ///
    /// Same as [`policy`](Self::policy).
    #[track_caller]
    pub fn policy_counter(&mut self, chain: &str) -> Result<Counter> {
        self.policy(chain).map(|p| p.counter)
    }

    /// Decoded rules of `chain`, empty if the chain has none or does not exist.
    ///
    /// # Panics
    ///
    /// If the session is closed.
    #[track_caller]
    pub fn rules(&mut self, chain: &str) -> RuleWalk<'_, E, Rule> {
        self.walk(chain, decode_full::<E>)
    }

    /// Counters of every rule in `chain`, without decoding the predicates.
    ///
    /// # Panics
    ///
    /// If the session is closed.
    #[track_caller]
    pub fn rule_counters(&mut self, chain: &str) -> RuleWalk<'_, E, Counter> {
        self.walk(chain, counter_only::<E>)
    }

    #[track_caller]
    fn walk<T>(&mut self, chain: &str, project: Project<E, T>) -> RuleWalk<'_, E, T> {
        self.ensure_open();
        debug!(table = %self.table, chain, "walking rules");
        RuleWalk {
            session: self,
            chain: chain.to_string(),
            position: Position::Start,
            project,
        }
    }

    /// Zeroes the counters of every rule in `chain` and of its policy.
    ///
    /// The change is visible to later reads in this session and reaches the
    /// kernel on [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// `Engine` if the engine reports the request unsuccessful.
    ///
    /// # Panics
    ///
    /// If the session is closed.
    #[track_caller]
    pub fn zero_counters(&mut self, chain: &str) -> Result<()> {
        self.ensure_open();
        check_chain(chain)?;
        let (engine, handle) = self.parts();
        let zeroed = engine.zero_entries(handle, chain);
        zeroed.map_err(|source| Error::Engine {
            operation: Operation::ZeroCounters,
            table: self.table.clone(),
            chain: Some(chain.to_string()),
            source,
        })?;
        debug!(table = %self.table, chain, "zeroed counters");
        Ok(())
    }

    /// Commits pending changes and releases the handle.
    ///
    /// The handle is released even when the commit fails.
    ///
    /// # Errors
    ///
    /// `Engine` if the commit fails. The kernel state is then undefined.
    ///
    /// # Panics
    ///
    /// If the session is already closed.
    #[track_caller]
    pub fn close(&mut self) -> Result<()> {
        let State::Open(mut handle) = std::mem::replace(&mut self.state, State::Closed) else {
            misuse(&self.table)
        };

        let committed = self.engine.commit(&mut handle);
        self.engine.release(handle);

        match committed {
            Ok(()) => {
                info!(table = %self.table, "committed and closed table snapshot");
                Ok(())
            }
            Err(source) => {
                warn!(table = %self.table, error = %source, "commit failed, handle released");
                Err(Error::Engine {
                    operation: Operation::Commit,
                    table: self.table.clone(),
                    chain: None,
                    source,
                })
            }
        }
    }
}

impl<E: Engine> Drop for TableSession<E> {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(table = %self.table, "table session dropped while open, closing");
            // close() already logs a failed commit
            let _ = self.close();
        }
    }
}

/// Opens `table`, runs `f` on the session and closes it on every path.
///
/// When both `f` and the commit fail, the error of `f` is returned.
///
/// # Errors
///
/// Errors from opening, from `f`, or from the final commit.
///
/// # Panics
///
/// If `f` closes the session itself.
pub fn with_session<E, T, F>(engine: E, table: &str, f: F) -> Result<T>
where
    E: Engine,
    F: FnOnce(&mut TableSession<E>) -> Result<T>,
{
    let mut session = TableSession::open(engine, table)?;
    let result = f(&mut session);
    let closed = session.close();
    let value = result?;
    closed?;
    Ok(value)
}

/// Per-record projection applied while walking a chain.
type Project<E, T> = fn(&E, &<E as Engine>::Handle, <E as Engine>::Cursor) -> T;

fn decode_full<E: Engine>(engine: &E, handle: &E::Handle, cursor: E::Cursor) -> Rule {
    let target = engine.target_name(handle, cursor);
    engine.record(handle, cursor).decode(target.as_deref())
}

fn counter_only<E: Engine>(engine: &E, handle: &E::Handle, cursor: E::Cursor) -> Counter {
    engine.record(handle, cursor).counter()
}

/// Iterator over a table's chain names.
pub struct Chains<'s, E: Engine> {
    session: &'s mut TableSession<E>,
    started: bool,
    done: bool,
}

impl<E: Engine> Iterator for Chains<'_, E> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        let (engine, handle) = self.session.parts();
        let name = if self.started {
            engine.next_chain(handle)
        } else {
            self.started = true;
            engine.first_chain(handle)
        };
        self.done = name.is_none();
        name
    }
}

impl<E: Engine> FusedIterator for Chains<'_, E> {}

enum Position<C> {
    Start,
    At(C),
    Done,
}

/// Single pass over the rules of one chain; the engine cursor only advances
/// when the next item is requested.
pub struct RuleWalk<'s, E: Engine, T> {
    session: &'s mut TableSession<E>,
    chain: String,
    position: Position<E::Cursor>,
    project: Project<E, T>,
}

impl<E: Engine, T> RuleWalk<'_, E, T> {
    /// Name of the chain being walked.
    pub fn chain_name(&self) -> &str {
        &self.chain
    }
}

impl<E: Engine, T> Iterator for RuleWalk<'_, E, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let (engine, handle) = self.session.parts();
        let cursor = match self.position {
            Position::Start => engine.first_rule(handle, &self.chain),
            Position::At(prev) => engine.next_rule(handle, prev),
            Position::Done => return None,
        };

        match cursor {
            Some(cursor) => {
                self.position = Position::At(cursor);
                Some((self.project)(engine, handle, cursor))
            }
            None => {
                self.position = Position::Done;
                None
            }
        }
    }
}

impl<E: Engine, T> FusedIterator for RuleWalk<'_, E, T> {}
