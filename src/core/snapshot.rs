//! Counters-only view of a table
//!
//! [`CounterSnapshot`] follows the same lifecycle as a
//! [`TableSession`] but only exposes counters: rule predicates are never
//! decoded. Monitoring code that only needs throughput accounting should use it.

use serde::Serialize;

use crate::core::engine::Engine;
use crate::core::error::Result;
use crate::core::rule::{Counter, Family};
use crate::core::session::{Chains, RuleWalk, TableSession};

/// Counters of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainCounters {
    pub name: String,
    pub builtin: bool,
    /// Policy counters, built-in chains only.
    pub policy: Option<Counter>,
    pub rules: Vec<Counter>,
}

impl ChainCounters {
    /// Sum over the chain's rules, policy excluded.
    pub fn total(&self) -> Counter {
        self.rules
            .iter()
            .fold(Counter::ZERO, |acc, c| acc.saturating_add(*c))
    }
}

/// Counters of a whole table at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCounters {
    pub table: String,
    pub family: Family,
    pub chains: Vec<ChainCounters>,
}

impl TableCounters {
    pub fn chain(&self, name: &str) -> Option<&ChainCounters> {
        self.chains.iter().find(|c| c.name == name)
    }
}

/// A table session restricted to counters.
pub struct CounterSnapshot<E: Engine> {
    session: TableSession<E>,
}

impl<E: Engine> From<TableSession<E>> for CounterSnapshot<E> {
    fn from(session: TableSession<E>) -> Self {
        Self { session }
    }
}

impl<E: Engine> CounterSnapshot<E> {
    /// Opens a snapshot of `table`. Errors as [`TableSession::open`].
    pub fn open(engine: E, table: &str) -> Result<Self> {
        TableSession::open(engine, table).map(Self::from)
    }

    pub fn table(&self) -> &str {
        self.session.table()
    }

    pub fn family(&self) -> Family {
        self.session.family()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    #[track_caller]
    pub fn chains(&mut self) -> Chains<'_, E> {
        self.session.chains()
    }

    #[track_caller]
    pub fn is_builtin(&self, chain: &str) -> bool {
        self.session.is_builtin(chain)
    }

    #[track_caller]
    pub fn policy_counter(&mut self, chain: &str) -> Result<Counter> {
        self.session.policy_counter(chain)
    }

    #[track_caller]
    pub fn rule_counters(&mut self, chain: &str) -> RuleWalk<'_, E, Counter> {
        self.session.rule_counters(chain)
    }

    #[track_caller]
    pub fn zero_counters(&mut self, chain: &str) -> Result<()> {
        self.session.zero_counters(chain)
    }

    #[track_caller]
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Reads policy and rule counters of every chain.
    ///
    /// # Errors
    ///
    /// The first policy read the engine fails.
    ///
    /// # Panics
    ///
    /// If the snapshot is closed.
    #[track_caller]
    pub fn capture(&mut self) -> Result<TableCounters> {
        let names: Vec<String> = self.chains().collect();
        let mut chains = Vec::with_capacity(names.len());

        for name in names {
            let builtin = self.is_builtin(&name);
            let policy = if builtin {
                Some(self.policy_counter(&name)?)
            } else {
                None
            };
            let rules = self.rule_counters(&name).collect();
            chains.push(ChainCounters {
                name,
                builtin,
                policy,
                rules,
            });
        }

        Ok(TableCounters {
            table: self.table().to_string(),
            family: self.family(),
            chains,
        })
    }
}
