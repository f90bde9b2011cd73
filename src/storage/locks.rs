//! Named table locks.
//!
//! A table lock is coarse: it covers a whole logical resource (for example the
//! aggregate score table), never a single row. A transaction holds every lock
//! it acquired until it commits or rolls back. Locks must be taken in rank
//! order (the declaration order of [`TableLock`]); asking for a lower-ranked
//! lock while holding a higher-ranked one fails instead of risking deadlock.

use std::sync::{Mutex, MutexGuard};

use super::traits::StorageError;

/// A lockable logical resource, in acquisition rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableLock {
    /// Hosts, addresses and data source host assignments.
    Hosts,
    /// Realm rows.
    Realms,
    /// Accounts, attributes and instances.
    Accounts,
    /// The aggregate score table. Ranked last.
    AggregateScore,
}

impl TableLock {
    fn name(self) -> &'static str {
        match self {
            Self::Hosts => "hosts table lock",
            Self::Realms => "realms table lock",
            Self::Accounts => "accounts table lock",
            Self::AggregateScore => "aggregate score table lock",
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TableLocks {
    hosts: Mutex<()>,
    realms: Mutex<()>,
    accounts: Mutex<()>,
    aggregate_score: Mutex<()>,
}

impl TableLocks {
    fn mutex(&self, table: TableLock) -> &Mutex<()> {
        match table {
            TableLock::Hosts => &self.hosts,
            TableLock::Realms => &self.realms,
            TableLock::Accounts => &self.accounts,
            TableLock::AggregateScore => &self.aggregate_score,
        }
    }
}

/// Locks held by one transaction.
#[derive(Default)]
pub(crate) struct HeldLocks<'db> {
    held: Vec<(TableLock, MutexGuard<'db, ()>)>,
}

impl<'db> HeldLocks<'db> {
    /// Block until `table` is held. Re-acquiring a held lock is a no-op.
    pub(crate) fn acquire(
        &mut self,
        locks: &'db TableLocks,
        table: TableLock,
    ) -> Result<(), StorageError> {
        if self.holds(table) {
            return Ok(());
        }
        if let Some(&(highest, _)) = self.held.last() {
            if highest > table {
                return Err(StorageError::LockOrder {
                    requested: table,
                    held: highest,
                });
            }
        }

        let guard = locks
            .mutex(table)
            .lock()
            .map_err(|_| StorageError::LockPoisoned(table.name()))?;
        self.held.push((table, guard));
        Ok(())
    }

    pub(crate) fn holds(&self, table: TableLock) -> bool {
        self.held.iter().any(|(t, _)| *t == table)
    }

    pub(crate) fn release_all(&mut self) {
        // Release in reverse acquisition order.
        while self.held.pop().is_some() {}
    }
}

impl std::fmt::Debug for HeldLocks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.held.iter().map(|(t, _)| t))
            .finish()
    }
}
