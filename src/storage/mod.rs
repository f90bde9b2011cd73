//! The case database layer.
//!
//! [`CaseDb`] owns the committed tables of one open case, the named table
//! locks, the case-wide row id sequence and (with the `persistent` feature)
//! the durable journal. All mutation goes through a [`Transaction`]:
//!
//! - writes are buffered in the transaction's private change set, and reads
//!   through the transaction see those writes over the committed state;
//! - [`Transaction::lock`] takes a named table lock held until the
//!   transaction ends;
//! - [`Transaction::commit`] journals and applies the change set atomically,
//!   releases the locks, then publishes queued events.
//!
//! A concurrent reader therefore never observes half of a transaction.

mod locks;
pub(crate) mod tables;
mod traits;

#[cfg(feature = "persistent")]
mod persistent;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use crossbeam_channel::Receiver;
use tracing::debug;

use crate::config::CaseConfig;
use crate::events::{CaseEvent, EventBus};
use crate::ids::ObjectId;
use crate::scoring::ScoreChange;

pub use locks::TableLock;
pub use traits::StorageError;

pub(crate) use traits::{Reader, Table};

use locks::{HeldLocks, TableLocks};
use tables::{ChangeSet, Tables};
use traits::{overlay_get, overlay_scan};

fn tables_poisoned() -> StorageError {
    StorageError::LockPoisoned("case tables")
}

/// The shared store of one open case.
#[derive(Debug)]
pub struct CaseDb {
    tables: RwLock<Tables>,
    locks: TableLocks,
    next_id: AtomicI64,
    events: EventBus,
    #[cfg(feature = "persistent")]
    journal: Option<persistent::Journal>,
}

impl CaseDb {
    /// Create an empty, non-durable case.
    #[must_use]
    pub fn in_memory(config: &CaseConfig) -> Self {
        Self::from_parts(Tables::default(), 1, config)
    }

    /// Open (or create) a durable case in `dir`.
    ///
    /// Takes an exclusive lock on the directory for the lifetime of the
    /// returned handle and replays the committed journal.
    ///
    /// # Errors
    /// `Journal` if the directory is locked by another process or the
    /// journal cannot be read or created.
    #[cfg(feature = "persistent")]
    pub fn open(dir: impl AsRef<std::path::Path>, config: &CaseConfig) -> Result<Self, StorageError> {
        let recovered = persistent::Journal::open(dir.as_ref(), config)?;
        let mut db = Self::from_parts(recovered.tables, recovered.next_id, config);
        db.journal = Some(recovered.journal);
        Ok(db)
    }

    fn from_parts(tables: Tables, next_id: i64, config: &CaseConfig) -> Self {
        Self {
            tables: RwLock::new(tables),
            locks: TableLocks::default(),
            next_id: AtomicI64::new(next_id),
            events: EventBus::new(config.event_queue_capacity),
            #[cfg(feature = "persistent")]
            journal: None,
        }
    }

    /// Start a transaction.
    #[must_use]
    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            db: self,
            changes: ChangeSet::default(),
            locks: HeldLocks::default(),
            events: Vec::new(),
            score_changes: BTreeMap::new(),
            finished: false,
        }
    }

    /// Hold the coarse read lock for a consistent multi-statement read.
    ///
    /// # Errors
    /// Fails if the table lock was poisoned.
    pub fn read_view(&self) -> Result<ReadView<'_>, StorageError> {
        let guard = self.tables.read().map_err(|_| tables_poisoned())?;
        Ok(ReadView { tables: guard })
    }

    /// Subscribe to committed events.
    ///
    /// # Errors
    /// Fails if the subscriber list lock was poisoned.
    pub fn subscribe(&self) -> Result<Receiver<CaseEvent>, StorageError> {
        self.events.subscribe()
    }

    /// Events that could not be delivered because a subscriber was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped_events()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn apply(&self, changes: ChangeSet) -> Result<(), StorageError> {
        let mut tables = self.tables.write().map_err(|_| tables_poisoned())?;

        // Journal under the write lock so replay order matches apply order.
        #[cfg(feature = "persistent")]
        if let Some(journal) = self.journal.as_ref() {
            journal.append(&changes)?;
        }

        changes.apply_to(&mut tables);
        Ok(())
    }
}

/// A consistent view of committed state, holding the coarse read lock.
pub struct ReadView<'db> {
    tables: RwLockReadGuard<'db, Tables>,
}

impl Reader for ReadView<'_> {
    fn get<T: Table>(&self, key: &T::Key) -> Result<Option<T::Row>, StorageError> {
        Ok(overlay_get::<T>(&self.tables, None, key))
    }

    fn scan<T, F>(&self, filter: F) -> Result<Vec<(T::Key, T::Row)>, StorageError>
    where
        T: Table,
        F: FnMut(&T::Key, &T::Row) -> bool,
    {
        Ok(overlay_scan::<T, F>(&self.tables, None, filter))
    }
}

/// A unit of work against the case.
///
/// Dropping a transaction without committing rolls it back.
pub struct Transaction<'db> {
    db: &'db CaseDb,
    changes: ChangeSet,
    locks: HeldLocks<'db>,
    events: Vec<CaseEvent>,
    score_changes: BTreeMap<ObjectId, ScoreChange>,
    finished: bool,
}

impl<'db> Transaction<'db> {
    /// Take a named table lock, blocking until it is available. The lock is
    /// held until the transaction ends.
    ///
    /// # Errors
    /// `LockOrder` if a higher-ranked lock is already held, `LockPoisoned` if a
    /// previous holder panicked.
    pub fn lock(&mut self, table: TableLock) -> Result<(), StorageError> {
        self.locks.acquire(&self.db.locks, table)
    }

    /// Returns true if this transaction holds `table`.
    #[must_use]
    pub fn holds(&self, table: TableLock) -> bool {
        self.locks.holds(table)
    }

    /// Publish all writes atomically.
    ///
    /// # Errors
    /// Fails if the journal append or the table write lock fails; nothing is
    /// applied in that case.
    pub fn commit(mut self) -> Result<(), StorageError> {
        self.finished = true;
        let changes = std::mem::take(&mut self.changes);
        let mut events = std::mem::take(&mut self.events);
        events.extend(
            std::mem::take(&mut self.score_changes)
                .into_values()
                .filter(|c| c.old != c.new)
                .map(CaseEvent::ScoreChanged),
        );

        if !changes.is_empty() {
            self.db.apply(changes)?;
        }
        // Locks are released only once the writes are visible.
        self.locks.release_all();
        self.db.events.publish(events);
        Ok(())
    }

    /// Discard all writes and queued events.
    pub fn rollback(mut self) {
        self.finished = true;
        debug!(
            pending_events = self.events.len(),
            "transaction rolled back"
        );
    }

    pub(crate) fn allocate_id(&mut self) -> i64 {
        let id = self.db.allocate_id();
        self.changes.high_water = self.changes.high_water.max(id);
        id
    }

    pub(crate) fn put<T: Table>(&mut self, key: T::Key, row: T::Row) {
        T::pending_mut(&mut self.changes).put(key, row);
    }

    pub(crate) fn remove<T: Table>(&mut self, key: T::Key) {
        T::pending_mut(&mut self.changes).remove(key);
    }

    pub(crate) fn emit(&mut self, event: CaseEvent) {
        self.events.push(event);
    }

    /// Record a score change, coalescing repeated changes to one object.
    pub(crate) fn register_score_change(&mut self, change: ScoreChange) {
        self.score_changes
            .entry(change.object)
            .and_modify(|existing| {
                existing.new = change.new;
                existing.data_source = change.data_source.or(existing.data_source);
            })
            .or_insert(change);
    }
}

impl Reader for Transaction<'_> {
    fn get<T: Table>(&self, key: &T::Key) -> Result<Option<T::Row>, StorageError> {
        let tables = self.db.tables.read().map_err(|_| tables_poisoned())?;
        Ok(overlay_get::<T>(&tables, Some(&self.changes), key))
    }

    fn scan<T, F>(&self, filter: F) -> Result<Vec<(T::Key, T::Row)>, StorageError>
    where
        T: Table,
        F: FnMut(&T::Key, &T::Row) -> bool,
    {
        let tables = self.db.tables.read().map_err(|_| tables_poisoned())?;
        Ok(overlay_scan::<T, F>(&tables, Some(&self.changes), filter))
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(
                pending_events = self.events.len(),
                "transaction dropped without commit; rolled back"
            );
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("locks", &self.locks)
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Host, HostStatus};
    use crate::ids::HostId;
    use tables::Hosts;

    fn host(id: i64, name: &str) -> Host {
        Host {
            id: HostId::new(id),
            name: name.to_string(),
            status: HostStatus::Active,
        }
    }

    #[test]
    fn test_transaction_reads_own_writes() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let mut tx = db.begin();
        let id = HostId::new(tx.allocate_id());
        tx.put::<Hosts>(id, host(id.get(), "alpha"));
        assert!(tx.get::<Hosts>(&id).unwrap().is_some());

        // Not visible outside until commit.
        assert!(db.read_view().unwrap().get::<Hosts>(&id).unwrap().is_none());
        tx.commit().unwrap();
        assert!(db.read_view().unwrap().get::<Hosts>(&id).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards_writes() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let id = {
            let mut tx = db.begin();
            let id = HostId::new(tx.allocate_id());
            tx.put::<Hosts>(id, host(id.get(), "beta"));
            tx.rollback();
            id
        };
        assert!(db.read_view().unwrap().get::<Hosts>(&id).unwrap().is_none());
    }

    #[test]
    fn test_dropped_transaction_releases_locks() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        {
            let mut tx = db.begin();
            tx.lock(TableLock::Realms).unwrap();
        }
        let mut tx = db.begin();
        tx.lock(TableLock::Realms).unwrap();
        assert!(tx.holds(TableLock::Realms));
    }

    #[test]
    fn test_scan_overlays_removals() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let mut tx = db.begin();
        let a = HostId::new(tx.allocate_id());
        let b = HostId::new(tx.allocate_id());
        tx.put::<Hosts>(a, host(a.get(), "a"));
        tx.put::<Hosts>(b, host(b.get(), "b"));
        tx.commit().unwrap();

        let mut tx = db.begin();
        tx.remove::<Hosts>(a);
        let rows = tx.scan::<Hosts, _>(|_, _| true).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, b);
    }

    #[test]
    fn test_score_changes_coalesce_per_object() {
        use crate::scoring::Score;

        let db = CaseDb::in_memory(&CaseConfig::default());
        let rx = db.subscribe().unwrap();
        let mut tx = db.begin();
        let object = ObjectId::new(5);
        tx.register_score_change(ScoreChange {
            object,
            data_source: None,
            old: Score::UNKNOWN,
            new: Score::LIKELY_NOTABLE,
        });
        tx.register_score_change(ScoreChange {
            object,
            data_source: None,
            old: Score::LIKELY_NOTABLE,
            new: Score::NOTABLE,
        });
        tx.commit().unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            CaseEvent::ScoreChanged(ScoreChange {
                object,
                data_source: None,
                old: Score::UNKNOWN,
                new: Score::NOTABLE,
            })
        );
        assert!(rx.try_recv().is_err());
    }
}
