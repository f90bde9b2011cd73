//! Durable case storage.
//!
//! A durable case is a directory holding an exclusive lock file and an
//! append-only journal of committed change sets. Opening the case replays the
//! journal into fresh tables and restores the row id sequence, so ids are
//! never reused across sessions.

mod codec;
mod file_lock;
mod wal;

use std::path::Path;

use tracing::info;

use crate::config::CaseConfig;
use crate::storage::tables::{ChangeSet, Tables};
use crate::storage::traits::StorageError;

use file_lock::FileLock;
use wal::WriteAheadLog;

const JOURNAL_FILE: &str = "case.journal";

/// Lock and journal of an open durable case.
#[derive(Debug)]
pub(crate) struct Journal {
    wal: WriteAheadLog,
    _lock: FileLock,
}

/// State recovered from a case directory.
pub(crate) struct Recovered {
    pub(crate) journal: Journal,
    pub(crate) tables: Tables,
    pub(crate) next_id: i64,
}

impl Journal {
    /// Lock `dir` (creating it if needed) and replay its journal.
    pub(crate) fn open(dir: &Path, config: &CaseConfig) -> Result<Recovered, StorageError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| StorageError::Journal(format!("create case directory: {e}")))?;
        let lock = FileLock::acquire(dir)
            .map_err(|e| StorageError::Journal(format!("lock case directory: {e}")))?;
        let (wal, entries) = WriteAheadLog::open(
            &dir.join(JOURNAL_FILE),
            config.sync_on_write,
            config.max_journal_entry_bytes,
        )?;

        let mut tables = Tables::default();
        let mut high_water = 0;
        let replayed = entries.len();
        for entry in entries {
            high_water = high_water.max(entry.changes.high_water);
            entry.changes.apply_to(&mut tables);
        }
        info!(
            dir = %dir.display(),
            replayed,
            next_id = high_water + 1,
            "case journal replayed"
        );

        Ok(Recovered {
            journal: Self { wal, _lock: lock },
            tables,
            next_id: high_water + 1,
        })
    }

    pub(crate) fn append(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        self.wal.append(changes).map(|_| ())
    }
}
