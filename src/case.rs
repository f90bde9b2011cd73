//! The per-case service object.
//!
//! A [`Case`] is constructed once when a case is opened and dropped when it
//! is closed. It owns the store and the injected tag-score mapping, and hands
//! out cheap borrowed handles for each component. Every mutating handle
//! method takes the caller's [`Transaction`], so several components can take
//! part in one atomic unit of work.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::account::AccountResolver;
use crate::blackboard::Blackboard;
use crate::config::CaseConfig;
use crate::content::ContentCatalog;
use crate::error::{CaseError, CaseResult};
use crate::events::CaseEvent;
use crate::host::{AddressRegistry, HostRegistry};
use crate::realm::RealmResolver;
use crate::scoring::{default_tag_score, KnownStatus, Score, ScoreLedger, TagScoreFn};
use crate::storage::{CaseDb, Transaction};

/// An open case.
pub struct Case {
    db: CaseDb,
    tag_score: TagScoreFn,
}

impl Case {
    /// Open a fresh in-memory case.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn in_memory(config: CaseConfig) -> CaseResult<Self> {
        let config = config.validate()?;
        Ok(Self::from_db(CaseDb::in_memory(&config)))
    }

    /// Open (or create) a durable case stored in `dir`.
    ///
    /// # Errors
    /// Returns an error if `config` is invalid, the directory is locked by
    /// another process, or the journal cannot be replayed.
    #[cfg(feature = "persistent")]
    pub fn open(dir: impl AsRef<std::path::Path>, config: CaseConfig) -> CaseResult<Self> {
        let config = config.validate()?;
        let dir = dir.as_ref();
        let db = CaseDb::open(dir, &config)?;
        tracing::info!(path = %dir.display(), "case opened");
        Ok(Self::from_db(db))
    }

    fn from_db(db: CaseDb) -> Self {
        Self {
            db,
            tag_score: Arc::new(default_tag_score),
        }
    }

    /// Replace the mapping from a tag's known status to a score.
    #[must_use]
    pub fn with_tag_score<F>(mut self, tag_score: F) -> Self
    where
        F: Fn(KnownStatus) -> Score + Send + Sync + 'static,
    {
        self.tag_score = Arc::new(tag_score);
        self
    }

    /// Start a transaction.
    #[must_use]
    pub fn begin(&self) -> Transaction<'_> {
        self.db.begin()
    }

    /// Run `f` in a transaction, committing on `Ok` and rolling back on `Err`.
    ///
    /// # Errors
    /// Returns the error from `f`, or the commit failure.
    pub fn transact<T, F>(&self, f: F) -> CaseResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CaseResult<T>,
    {
        let mut tx = self.db.begin();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    /// Subscribe to events published after each commit.
    ///
    /// # Errors
    /// Returns an error if the subscriber list lock was poisoned.
    pub fn subscribe(&self) -> CaseResult<Receiver<CaseEvent>> {
        self.db.subscribe().map_err(CaseError::from)
    }

    /// Events not delivered because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.db.dropped_events()
    }

    /// Aggregate scores.
    #[must_use]
    pub fn scores(&self) -> ScoreLedger<'_> {
        ScoreLedger::new(&self.db, &self.tag_score)
    }

    /// Analysis results and tags.
    #[must_use]
    pub fn blackboard(&self) -> Blackboard<'_> {
        Blackboard::new(&self.db, self.scores())
    }

    /// Data sources and content objects.
    #[must_use]
    pub fn content(&self) -> ContentCatalog<'_> {
        ContentCatalog::new(&self.db)
    }

    /// Hosts.
    #[must_use]
    pub fn hosts(&self) -> HostRegistry<'_> {
        HostRegistry::new(&self.db)
    }

    /// Host addresses.
    #[must_use]
    pub fn addresses(&self) -> AddressRegistry<'_> {
        AddressRegistry::new(&self.db)
    }

    /// Authentication realms.
    #[must_use]
    pub fn realms(&self) -> RealmResolver<'_> {
        RealmResolver::new(&self.db)
    }

    /// OS accounts.
    #[must_use]
    pub fn accounts(&self) -> AccountResolver<'_> {
        AccountResolver::new(&self.db)
    }
}

impl std::fmt::Debug for Case {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Case").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ObjectId;
    use crate::scoring::{MethodCategory, Significance};

    #[test]
    fn test_transact_rolls_back_on_error() {
        let case = Case::in_memory(CaseConfig::default()).unwrap();
        let result: CaseResult<()> = case.transact(|tx| {
            case.hosts().create_host(tx, "doomed")?;
            Err(CaseError::internal("abort"))
        });
        assert!(result.is_err());
        assert!(case.hosts().host_by_name("doomed").unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CaseConfig {
            event_queue_capacity: 0,
            ..CaseConfig::default()
        };
        assert!(Case::in_memory(config).unwrap_err().is_validation());
    }

    #[test]
    fn test_custom_tag_score() {
        let case = Case::in_memory(CaseConfig::default())
            .unwrap()
            .with_tag_score(|status| match status {
                KnownStatus::Known => Score::new(Significance::Good, MethodCategory::UserDefined),
                _ => Score::UNKNOWN,
            });
        let object = ObjectId::new(40);
        case.transact(|tx| {
            let board = case.blackboard();
            let tag = board.add_tag_name(tx, "Known Good", KnownStatus::Known)?;
            board.tag_content(tx, object, tag.id)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(case.scores().get(object).unwrap().significance, Significance::Good);
    }
}
