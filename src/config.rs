//! Case configuration.

use crate::error::{CaseResult, ValidationError};

/// Configuration for an open case.
#[derive(Debug, Clone)]
pub struct CaseConfig {
    /// Per-subscriber event buffer capacity.
    pub event_queue_capacity: usize,
    /// Whether to fsync the journal after every commit (slower but safer).
    /// Ignored by in-memory cases.
    pub sync_on_write: bool,
    /// Largest journal entry accepted on replay (bytes).
    pub max_journal_entry_bytes: usize,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            sync_on_write: true,
            max_journal_entry_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl CaseConfig {
    const MIN_JOURNAL_ENTRY: usize = 4 * 1024;

    /// Checks the configured limits.
    ///
    /// # Errors
    /// Returns a validation error if a limit is below its minimum.
    pub fn validate(self) -> CaseResult<Self> {
        if self.event_queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                field: "event_queue_capacity",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        if self.max_journal_entry_bytes < Self::MIN_JOURNAL_ENTRY {
            return Err(ValidationError::InvalidConfig {
                field: "max_journal_entry_bytes",
                reason: format!(
                    "must be at least {} bytes (got {})",
                    Self::MIN_JOURNAL_ENTRY,
                    self.max_journal_entry_bytes
                ),
            }
            .into());
        }

        Ok(self)
    }
}
