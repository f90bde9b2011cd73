//! Append-only journal of committed change sets.
//!
//! Each committed transaction becomes one [`JournalEntry`]. On open the
//! journal is replayed in order; replay stops at the first record that fails
//! to decode, so a torn tail left by a crash loses at most the transaction
//! that was being written.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Seek, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::tables::ChangeSet;
use crate::storage::traits::StorageError;

use super::codec;

const HEADER_LEN: u64 = 5;

/// One committed transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JournalEntry {
    pub(crate) sequence: u64,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) changes: ChangeSet,
}

#[derive(Debug)]
struct WriterState {
    writer: BufWriter<File>,
    sequence: u64,
}

#[derive(Debug)]
pub(crate) struct WriteAheadLog {
    state: Mutex<WriterState>,
    sync_on_write: bool,
    max_entry_bytes: usize,
}

fn journal_err(context: &str, err: &std::io::Error) -> StorageError {
    StorageError::Journal(format!("{context}: {err}"))
}

impl WriteAheadLog {
    /// Open the journal, creating it with a header when absent. Returns the
    /// log together with every entry that replays cleanly.
    pub(crate) fn open(
        path: &Path,
        sync_on_write: bool,
        max_entry_bytes: usize,
    ) -> Result<(Self, Vec<JournalEntry>), StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| journal_err("open journal", &e))?;
        let len = file
            .metadata()
            .map_err(|e| journal_err("stat journal", &e))?
            .len();

        let (entries, valid_len) = if len >= HEADER_LEN {
            Self::replay(path, max_entry_bytes)?
        } else {
            file.set_len(0).map_err(|e| journal_err("reset journal", &e))?;
            codec::write_header(&mut file).map_err(|e| journal_err("write header", &e))?;
            file.sync_all().map_err(|e| journal_err("sync journal", &e))?;
            (Vec::new(), HEADER_LEN)
        };

        // Cut off a corrupt tail so new records are not appended after it.
        if valid_len < len {
            file.set_len(valid_len)
                .map_err(|e| journal_err("truncate corrupt tail", &e))?;
            file.sync_all().map_err(|e| journal_err("sync journal", &e))?;
        }
        drop(file);

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| journal_err("reopen journal", &e))?;
        let sequence = entries.last().map_or(0, |e| e.sequence);

        Ok((
            Self {
                state: Mutex::new(WriterState {
                    writer: BufWriter::new(file),
                    sequence,
                }),
                sync_on_write,
                max_entry_bytes,
            },
            entries,
        ))
    }

    /// Append one committed change set, returning its sequence number.
    pub(crate) fn append(&self, changes: &ChangeSet) -> Result<u64, StorageError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StorageError::LockPoisoned("journal writer"))?;

        let sequence = state.sequence + 1;
        let entry = JournalEntry {
            sequence,
            timestamp: Utc::now(),
            changes: changes.clone(),
        };
        let encoded = codec::encode(&entry, self.max_entry_bytes)
            .map_err(|e| journal_err("encode entry", &e))?;

        state
            .writer
            .write_all(&encoded)
            .map_err(|e| journal_err("append entry", &e))?;
        state
            .writer
            .flush()
            .map_err(|e| journal_err("flush entry", &e))?;
        if self.sync_on_write {
            state
                .writer
                .get_ref()
                .sync_data()
                .map_err(|e| journal_err("sync entry", &e))?;
        }

        state.sequence = sequence;
        Ok(sequence)
    }

    /// Decode entries up to the first bad record. Also returns the byte
    /// length of the valid prefix.
    fn replay(
        path: &Path,
        max_entry_bytes: usize,
    ) -> Result<(Vec<JournalEntry>, u64), StorageError> {
        let file = File::open(path).map_err(|e| journal_err("open journal", &e))?;
        let file_len = file
            .metadata()
            .map_err(|e| journal_err("stat journal", &e))?
            .len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader).map_err(|e| journal_err("read header", &e))?;

        let mut entries = Vec::new();
        let mut valid_len = HEADER_LEN;
        while valid_len < file_len {
            match codec::decode::<JournalEntry>(&mut reader, max_entry_bytes) {
                Ok(entry) => {
                    entries.push(entry);
                    valid_len = reader
                        .stream_position()
                        .map_err(|e| journal_err("seek journal", &e))?;
                }
                Err(e) => {
                    let kind = if e.kind() == ErrorKind::UnexpectedEof {
                        "torn"
                    } else {
                        "corrupt"
                    };
                    warn!(
                        path = %path.display(),
                        after_sequence = entries.last().map_or(0, |e: &JournalEntry| e.sequence),
                        offset = valid_len,
                        error = %e,
                        "{kind} journal tail discarded"
                    );
                    break;
                }
            }
        }
        Ok((entries, valid_len))
    }
}
