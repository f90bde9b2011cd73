//! Analysis results and content tags.
//!
//! Every mutation here runs inside the caller's transaction and drives the
//! score ledger in that same transaction, so a result row and the aggregate
//! it contributed to always commit (or roll back) together.

use serde::{Deserialize, Serialize};

use crate::content;
use crate::error::{CaseResult, ValidationError};
use crate::ids::{DataSourceId, ObjectId, ResultId, TagId, TagNameId};
use crate::scoring::{KnownStatus, Score, ScoreLedger};
use crate::storage::tables::{AnalysisResults, ContentTags, TagNames};
use crate::storage::{CaseDb, Reader, StorageError, Transaction};

/// A scored finding attached to a content object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Row id.
    pub id: ResultId,
    /// The content object this belongs to.
    pub object: ObjectId,
    /// Data source of the object, when known.
    pub data_source: Option<DataSourceId>,
    /// Kind of finding, e.g. `"Encryption Detected"`.
    pub type_name: String,
    /// Score contributed to the object's aggregate.
    pub score: Score,
    /// Free-text conclusion of the analysis.
    pub conclusion: Option<String>,
}

/// A tag definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagName {
    /// Row id.
    pub id: TagNameId,
    /// Display name, unique case-insensitively.
    pub name: String,
    /// Status implied for tagged content.
    pub known_status: KnownStatus,
}

/// A tag applied to a content object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTag {
    /// Row id.
    pub id: TagId,
    /// The content object this belongs to.
    pub object: ObjectId,
    /// The tag definition applied.
    pub tag_name: TagNameId,
}

/// Handle on the blackboard of one case.
#[derive(Debug, Clone, Copy)]
pub struct Blackboard<'a> {
    db: &'a CaseDb,
    ledger: ScoreLedger<'a>,
}

impl<'a> Blackboard<'a> {
    pub(crate) fn new(db: &'a CaseDb, ledger: ScoreLedger<'a>) -> Self {
        Self { db, ledger }
    }

    /// Get or create a tag name (names compare case-insensitively).
    ///
    /// # Errors
    /// Validation error for an empty name.
    pub fn add_tag_name(
        &self,
        tx: &mut Transaction<'_>,
        name: &str,
        known_status: KnownStatus,
    ) -> CaseResult<TagName> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName { field: "tag name" }.into());
        }
        let lowered = name.to_lowercase();
        if let Some((_, existing)) = tx
            .scan::<TagNames, _>(|_, t| t.name.to_lowercase() == lowered)?
            .into_iter()
            .next()
        {
            return Ok(existing);
        }

        let id = TagNameId::new(tx.allocate_id());
        let tag_name = TagName {
            id,
            name: name.to_string(),
            known_status,
        };
        tx.put::<TagNames>(id, tag_name.clone());
        Ok(tag_name)
    }

    /// Attach a result to `object` and fold its score into the aggregate.
    ///
    /// # Errors
    /// Store access failure.
    pub fn add_analysis_result(
        &self,
        tx: &mut Transaction<'_>,
        object: ObjectId,
        type_name: &str,
        score: Score,
        conclusion: Option<&str>,
    ) -> CaseResult<AnalysisResult> {
        let data_source = content::data_source_of(tx, object)?;
        let id = ResultId::new(tx.allocate_id());
        let result = AnalysisResult {
            id,
            object,
            data_source,
            type_name: type_name.to_string(),
            score,
            conclusion: conclusion.map(str::to_string),
        };
        tx.put::<AnalysisResults>(id, result.clone());
        self.ledger
            .apply_result_added(tx, object, data_source, score)?;
        Ok(result)
    }

    /// Remove a result and recompute the aggregate of its object. Returns the
    /// aggregate after removal.
    ///
    /// # Errors
    /// Store access failure, including an unknown result id.
    pub fn delete_analysis_result(
        &self,
        tx: &mut Transaction<'_>,
        result: ResultId,
    ) -> CaseResult<Score> {
        let row = tx.require::<AnalysisResults>(&result)?;
        tx.remove::<AnalysisResults>(result);
        self.ledger
            .apply_result_removed(tx, row.object, row.data_source)
    }

    /// Tag `object` and fold the tag-derived score into the aggregate.
    ///
    /// # Errors
    /// Store access failure, including an unknown tag name.
    pub fn tag_content(
        &self,
        tx: &mut Transaction<'_>,
        object: ObjectId,
        tag_name: TagNameId,
    ) -> CaseResult<ContentTag> {
        let definition = tx.require::<TagNames>(&tag_name)?;
        let id = TagId::new(tx.allocate_id());
        let tag = ContentTag {
            id,
            object,
            tag_name,
        };
        tx.put::<ContentTags>(id, tag.clone());

        let data_source = content::data_source_of(tx, object)?;
        let candidate = self.ledger.tag_score(definition.known_status);
        self.ledger
            .apply_result_added(tx, object, data_source, candidate)?;
        Ok(tag)
    }

    /// Remove a tag and recompute the aggregate of its object.
    ///
    /// # Errors
    /// Store access failure, including an unknown tag id.
    pub fn untag_content(&self, tx: &mut Transaction<'_>, tag: TagId) -> CaseResult<Score> {
        let row = tx.require::<ContentTags>(&tag)?;
        tx.remove::<ContentTags>(tag);
        let data_source = content::data_source_of(tx, row.object)?;
        self.ledger.apply_result_removed(tx, row.object, data_source)
    }

    /// Committed results attached to `object`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn analysis_results(&self, object: ObjectId) -> CaseResult<Vec<AnalysisResult>> {
        let view = self.db.read_view()?;
        Ok(results_for(&view, object)?)
    }

    /// Highest known status among the committed tags on `object`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn max_tag_status(&self, object: ObjectId) -> CaseResult<Option<KnownStatus>> {
        let view = self.db.read_view()?;
        max_tag_status(&view, object)
    }
}

fn results_for(
    reader: &impl Reader,
    object: ObjectId,
) -> Result<Vec<AnalysisResult>, StorageError> {
    Ok(reader
        .scan::<AnalysisResults, _>(|_, r| r.object == object)?
        .into_iter()
        .map(|(_, r)| r)
        .collect())
}

/// Scores of every result currently attached to `object`.
pub(crate) fn result_scores(reader: &impl Reader, object: ObjectId) -> CaseResult<Vec<Score>> {
    Ok(results_for(reader, object)?
        .into_iter()
        .map(|r| r.score)
        .collect())
}

pub(crate) fn max_tag_status(
    reader: &impl Reader,
    object: ObjectId,
) -> CaseResult<Option<KnownStatus>> {
    let mut max = None;
    for (_, tag) in reader.scan::<ContentTags, _>(|_, t| t.object == object)? {
        if let Some(name) = reader.get::<TagNames>(&tag.tag_name)? {
            max = max.max(Some(name.known_status));
        }
    }
    Ok(max)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::CaseConfig;
    use crate::scoring::{default_tag_score, TagScoreFn};

    #[test]
    fn test_tag_name_get_or_create() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let tags: TagScoreFn = Arc::new(default_tag_score);
        let board = Blackboard::new(&db, ScoreLedger::new(&db, &tags));
        let mut tx = db.begin();
        let first = board
            .add_tag_name(&mut tx, "Notable Item", KnownStatus::Bad)
            .unwrap();
        let again = board
            .add_tag_name(&mut tx, "notable item", KnownStatus::Known)
            .unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.known_status, KnownStatus::Bad);
    }

    #[test]
    fn test_max_tag_status_sees_pending_tags() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let tags: TagScoreFn = Arc::new(default_tag_score);
        let board = Blackboard::new(&db, ScoreLedger::new(&db, &tags));
        let object = ObjectId::new(500);
        let mut tx = db.begin();
        let known = board.add_tag_name(&mut tx, "Reviewed", KnownStatus::Known).unwrap();
        let bad = board.add_tag_name(&mut tx, "Evidence", KnownStatus::Bad).unwrap();
        board.tag_content(&mut tx, object, known.id).unwrap();
        assert_eq!(max_tag_status(&tx, object).unwrap(), Some(KnownStatus::Known));
        board.tag_content(&mut tx, object, bad.id).unwrap();
        assert_eq!(max_tag_status(&tx, object).unwrap(), Some(KnownStatus::Bad));
    }
}
