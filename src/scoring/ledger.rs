//! The aggregate score ledger.
//!
//! One [`ScoreRow`] per scored object holds the maximum of every analysis
//! result and tag-derived score attached to it. Both mutating paths take the
//! `AggregateScore` table lock and keep it until the enclosing transaction
//! ends, so two writers can never interleave their read-modify-write on the
//! same object.

use std::sync::Arc;

use tracing::debug;

use crate::blackboard;
use crate::error::CaseResult;
use crate::ids::{DataSourceId, ObjectId};
use crate::storage::tables::AggregateScores;
use crate::storage::{CaseDb, Reader, TableLock, Transaction};

use super::{KnownStatus, MethodCategory, Score, ScoreChange, ScoreRow, Significance};

/// Maps the highest known status of an object's tags to a score.
pub type TagScoreFn = Arc<dyn Fn(KnownStatus) -> Score + Send + Sync>;

/// A notable tag is an examiner's call; every other status says nothing.
#[must_use]
pub fn default_tag_score(status: KnownStatus) -> Score {
    match status {
        KnownStatus::Bad => Score::new(Significance::Notable, MethodCategory::UserDefined),
        KnownStatus::Known | KnownStatus::Unknown => Score::UNKNOWN,
    }
}

/// Handle on the score ledger of one case.
#[derive(Clone, Copy)]
pub struct ScoreLedger<'a> {
    db: &'a CaseDb,
    tag_score: &'a TagScoreFn,
}

impl<'a> ScoreLedger<'a> {
    pub(crate) fn new(db: &'a CaseDb, tag_score: &'a TagScoreFn) -> Self {
        Self { db, tag_score }
    }

    /// Committed aggregate score of `object`, or [`Score::UNKNOWN`] if it has
    /// none.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn get(&self, object: ObjectId) -> CaseResult<Score> {
        let view = self.db.read_view()?;
        Ok(stored(&view, object)?.map_or(Score::UNKNOWN, |row| row.score))
    }

    /// Aggregate score of `object` as seen by an open transaction.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn get_in(&self, tx: &Transaction<'_>, object: ObjectId) -> CaseResult<Score> {
        Ok(stored(tx, object)?.map_or(Score::UNKNOWN, |row| row.score))
    }

    /// Fold a newly attached result score into the aggregate.
    ///
    /// An added result can only establish or raise the aggregate, so no
    /// recomputation is needed. Returns the aggregate after the call.
    ///
    /// # Errors
    /// Store access failure, including a lock order violation.
    pub fn apply_result_added(
        &self,
        tx: &mut Transaction<'_>,
        object: ObjectId,
        data_source: Option<DataSourceId>,
        candidate: Score,
    ) -> CaseResult<Score> {
        tx.lock(TableLock::AggregateScore)?;

        let existing = stored(tx, object)?;
        let current = existing.map_or(Score::UNKNOWN, |row| row.score);
        let raises = (current.is_unknown() && !candidate.is_unknown()) || candidate > current;
        if !raises {
            return Ok(current);
        }

        let data_source = data_source.or(existing.and_then(|row| row.data_source));
        write(tx, object, data_source, current, candidate);
        Ok(candidate)
    }

    /// Recompute the aggregate after a result or tag was detached.
    ///
    /// The detached contribution may have been the maximum, so the value is
    /// rebuilt from every remaining analysis result and the score implied by
    /// the highest remaining tag status. Nothing is written when the value
    /// is unchanged.
    ///
    /// # Errors
    /// Store access failure, including a lock order violation.
    pub fn apply_result_removed(
        &self,
        tx: &mut Transaction<'_>,
        object: ObjectId,
        data_source: Option<DataSourceId>,
    ) -> CaseResult<Score> {
        tx.lock(TableLock::AggregateScore)?;

        let existing = stored(tx, object)?;
        let current = existing.map_or(Score::UNKNOWN, |row| row.score);

        let from_results = blackboard::result_scores(tx, object)?.into_iter().max();
        let from_tags = blackboard::max_tag_status(tx, object)?.map(|s| (self.tag_score)(s));
        let recomputed = from_results
            .into_iter()
            .chain(from_tags)
            .max()
            .unwrap_or(Score::UNKNOWN);

        if recomputed == current {
            return Ok(current);
        }
        let data_source = data_source.or(existing.and_then(|row| row.data_source));
        write(tx, object, data_source, current, recomputed);
        Ok(recomputed)
    }

    /// Number of objects in `data_source` whose aggregate has `significance`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn content_count(
        &self,
        data_source: DataSourceId,
        significance: Significance,
    ) -> CaseResult<u64> {
        Ok(self.content_ids(data_source, significance)?.len() as u64)
    }

    /// Objects in `data_source` whose aggregate has `significance`, in id
    /// order.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn content_ids(
        &self,
        data_source: DataSourceId,
        significance: Significance,
    ) -> CaseResult<Vec<ObjectId>> {
        let view = self.db.read_view()?;
        let rows = view.scan::<AggregateScores, _>(|_, row| {
            row.data_source == Some(data_source) && row.score.significance == significance
        })?;
        Ok(rows.into_iter().map(|(object, _)| object).collect())
    }

    pub(crate) fn tag_score(&self, status: KnownStatus) -> Score {
        (self.tag_score)(status)
    }
}

impl std::fmt::Debug for ScoreLedger<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreLedger").finish_non_exhaustive()
    }
}

fn stored(reader: &impl Reader, object: ObjectId) -> CaseResult<Option<ScoreRow>> {
    Ok(reader.get::<AggregateScores>(&object)?)
}

fn write(
    tx: &mut Transaction<'_>,
    object: ObjectId,
    data_source: Option<DataSourceId>,
    old: Score,
    new: Score,
) {
    debug!(object = %object, old = %old, new = %new, "aggregate score changed");
    tx.put::<AggregateScores>(
        object,
        ScoreRow {
            data_source,
            score: new,
        },
    );
    tx.register_score_change(ScoreChange {
        object,
        data_source,
        old,
        new,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaseConfig;

    fn ledger_fixture() -> (CaseDb, TagScoreFn) {
        (
            CaseDb::in_memory(&CaseConfig::default()),
            Arc::new(default_tag_score) as TagScoreFn,
        )
    }

    #[test]
    fn test_missing_row_reads_unknown() {
        let (db, tags) = ledger_fixture();
        let ledger = ScoreLedger::new(&db, &tags);
        assert_eq!(ledger.get(ObjectId::new(99)).unwrap(), Score::UNKNOWN);
    }

    #[test]
    fn test_added_result_never_lowers() {
        let (db, tags) = ledger_fixture();
        let ledger = ScoreLedger::new(&db, &tags);
        let object = ObjectId::new(1);

        let mut tx = db.begin();
        assert_eq!(
            ledger.apply_result_added(&mut tx, object, None, Score::NOTABLE).unwrap(),
            Score::NOTABLE
        );
        assert_eq!(
            ledger.apply_result_added(&mut tx, object, None, Score::LIKELY_NOTABLE).unwrap(),
            Score::NOTABLE
        );
        tx.commit().unwrap();
        assert_eq!(ledger.get(object).unwrap(), Score::NOTABLE);
    }

    #[test]
    fn test_unknown_candidate_writes_nothing() {
        let (db, tags) = ledger_fixture();
        let ledger = ScoreLedger::new(&db, &tags);
        let mut tx = db.begin();
        ledger
            .apply_result_added(&mut tx, ObjectId::new(3), None, Score::UNKNOWN)
            .unwrap();
        assert!(stored(&tx, ObjectId::new(3)).unwrap().is_none());
    }

    #[test]
    fn test_default_tag_score() {
        assert_eq!(
            default_tag_score(KnownStatus::Bad),
            Score::new(Significance::Notable, MethodCategory::UserDefined)
        );
        assert_eq!(default_tag_score(KnownStatus::Known), Score::UNKNOWN);
        assert_eq!(default_tag_score(KnownStatus::Unknown), Score::UNKNOWN);
    }

    #[test]
    fn test_score_lock_held_until_commit() {
        let (db, tags) = ledger_fixture();
        let ledger = ScoreLedger::new(&db, &tags);
        let mut tx = db.begin();
        ledger
            .apply_result_added(&mut tx, ObjectId::new(4), None, Score::GOOD)
            .unwrap();
        assert!(tx.holds(TableLock::AggregateScore));
        tx.commit().unwrap();
    }
}
