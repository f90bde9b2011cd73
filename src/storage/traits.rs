//! Storage error type and the table/reader abstractions shared by every
//! component.
//!
//! Components never touch the committed tables directly. They read through a
//! [`Reader`] (either a [`ReadView`](super::ReadView) over committed state, or
//! an open [`Transaction`](super::Transaction), which overlays its own pending
//! writes) and write only through a transaction.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::locks::TableLock;
use super::tables::{ChangeSet, Delta, Tables};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A row that must exist is missing.
    #[error("{table} row not found: {key}")]
    RowNotFound {
        /// Table name.
        table: &'static str,
        /// Debug rendering of the key.
        key: String,
    },

    /// A lock was poisoned by a panicking holder.
    #[error("poisoned lock: {0}")]
    LockPoisoned(&'static str),

    /// A transaction asked for a table lock ranked below one it already holds.
    #[error("lock order violation: requested {requested:?} while holding {held:?}")]
    LockOrder {
        /// The lock asked for.
        requested: TableLock,
        /// The highest-ranked lock already held.
        held: TableLock,
    },

    /// The durable journal could not be read or written.
    #[error("journal error: {0}")]
    Journal(String),
}

impl StorageError {
    pub(crate) fn not_found(table: &'static str, key: impl ToString) -> Self {
        Self::RowNotFound {
            table,
            key: key.to_string(),
        }
    }
}

/// A table in the case database.
///
/// Implemented by uninhabited marker types generated alongside [`Tables`].
pub(crate) trait Table {
    type Key: Ord + Clone + Debug + Serialize + DeserializeOwned;
    type Row: Clone + Debug + Serialize + DeserializeOwned;

    const NAME: &'static str;

    fn committed(tables: &Tables) -> &BTreeMap<Self::Key, Self::Row>;
    fn pending(changes: &ChangeSet) -> &Delta<Self::Key, Self::Row>;
    fn pending_mut(changes: &mut ChangeSet) -> &mut Delta<Self::Key, Self::Row>;
}

/// Read access to case tables.
pub(crate) trait Reader {
    /// Get a row by key.
    fn get<T: Table>(&self, key: &T::Key) -> Result<Option<T::Row>, StorageError>;

    /// All rows accepted by `filter`, in key order.
    fn scan<T, F>(&self, filter: F) -> Result<Vec<(T::Key, T::Row)>, StorageError>
    where
        T: Table,
        F: FnMut(&T::Key, &T::Row) -> bool;

    /// Get a row that must exist.
    fn require<T: Table>(&self, key: &T::Key) -> Result<T::Row, StorageError> {
        self.get::<T>(key)?
            .ok_or_else(|| StorageError::not_found(T::NAME, format!("{key:?}")))
    }

    /// Returns true if any row is accepted by `filter`.
    fn exists<T, F>(&self, filter: F) -> Result<bool, StorageError>
    where
        T: Table,
        F: FnMut(&T::Key, &T::Row) -> bool,
    {
        Ok(!self.scan::<T, F>(filter)?.is_empty())
    }
}

/// Scan committed rows with `pending` writes overlaid.
pub(crate) fn overlay_scan<T, F>(
    tables: &Tables,
    pending: Option<&ChangeSet>,
    mut filter: F,
) -> Vec<(T::Key, T::Row)>
where
    T: Table,
    F: FnMut(&T::Key, &T::Row) -> bool,
{
    let committed = T::committed(tables);
    let Some(changes) = pending else {
        return committed
            .iter()
            .filter(|(k, v)| filter(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    };

    let delta = T::pending(changes);
    let mut out = Vec::new();
    for (k, v) in committed {
        let current = match delta.get(k) {
            Some(Some(replaced)) => replaced,
            Some(None) => continue,
            None => v,
        };
        if filter(k, current) {
            out.push((k.clone(), current.clone()));
        }
    }
    for (k, v) in delta.iter() {
        if committed.contains_key(k) {
            continue;
        }
        if let Some(v) = v {
            if filter(k, v) {
                out.push((k.clone(), v.clone()));
            }
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

/// Get a committed row with `pending` writes overlaid.
pub(crate) fn overlay_get<T: Table>(
    tables: &Tables,
    pending: Option<&ChangeSet>,
    key: &T::Key,
) -> Option<T::Row> {
    if let Some(changes) = pending {
        if let Some(entry) = T::pending(changes).get(key) {
            return entry.cloned();
        }
    }
    T::committed(tables).get(key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::not_found("tsk_hosts", 12);
        assert!(err.to_string().contains("tsk_hosts"));
        assert!(err.to_string().contains("12"));

        let err = StorageError::LockOrder {
            requested: TableLock::Hosts,
            held: TableLock::AggregateScore,
        };
        assert!(err.to_string().contains("lock order"));
    }
}
