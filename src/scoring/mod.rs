//! Relevance scores and the aggregate score ledger.
//!
//! A [`Score`] pairs a [`Significance`] with the [`MethodCategory`] that
//! produced it. Scores are totally ordered: significance first, method
//! category as the tie-break. [`Score::UNKNOWN`] is the bottom element and is
//! what an object with no recorded results scores.

mod ledger;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{DataSourceId, ObjectId};

pub use ledger::{default_tag_score, ScoreLedger, TagScoreFn};

/// How relevant an object is to the investigation.
///
/// Variants are declared in rank order; the discriminant is the stored id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    /// Nothing is known yet.
    Unknown = 0,
    /// Probably not relevant.
    LikelyNone = 8,
    /// Probably relevant.
    LikelyNotable = 9,
    /// Confirmed not relevant ("good").
    #[serde(rename = "none")]
    Good = 10,
    /// Confirmed relevant.
    Notable = 18,
}

impl Significance {
    /// Stored id of this significance.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Looks a significance up by its stored id.
    #[must_use]
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Unknown),
            8 => Some(Self::LikelyNone),
            9 => Some(Self::LikelyNotable),
            10 => Some(Self::Good),
            18 => Some(Self::Notable),
            _ => None,
        }
    }
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::LikelyNone => "Likely None",
            Self::LikelyNotable => "Likely Notable",
            Self::Good => "None",
            Self::Notable => "Notable",
        };
        f.write_str(s)
    }
}

/// Who or what assigned a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodCategory {
    /// An automated analysis module.
    Auto = 0,
    /// A cyber triage workflow.
    Cyber = 1,
    /// A legal analyst review.
    LegalAnalyst = 2,
    /// An examiner, typically through a tag.
    UserDefined = 10,
}

impl fmt::Display for MethodCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "Auto",
            Self::Cyber => "Cyber",
            Self::LegalAnalyst => "Legal Analyst",
            Self::UserDefined => "User Defined",
        };
        f.write_str(s)
    }
}

/// A relevance score.
///
/// Field order matters: the derived ordering compares significance before
/// method category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Score {
    /// How relevant the object is.
    pub significance: Significance,
    /// Who or what decided; breaks ties between equal significance.
    pub method_category: MethodCategory,
}

impl Score {
    /// The bottom element.
    pub const UNKNOWN: Self = Self::new(Significance::Unknown, MethodCategory::Auto);
    /// Confirmed relevant by an automated module.
    pub const NOTABLE: Self = Self::new(Significance::Notable, MethodCategory::Auto);
    /// Probably relevant, by an automated module.
    pub const LIKELY_NOTABLE: Self = Self::new(Significance::LikelyNotable, MethodCategory::Auto);
    /// Confirmed not relevant by an automated module.
    pub const GOOD: Self = Self::new(Significance::Good, MethodCategory::Auto);
    /// Probably not relevant, by an automated module.
    pub const LIKELY_NONE: Self = Self::new(Significance::LikelyNone, MethodCategory::Auto);

    /// Creates a score.
    #[must_use]
    pub const fn new(significance: Significance, method_category: MethodCategory) -> Self {
        Self {
            significance,
            method_category,
        }
    }

    /// Returns true if this is exactly [`Score::UNKNOWN`].
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.significance, self.method_category)
    }
}

/// An aggregate score that changed value within one committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    /// The scored object.
    pub object: ObjectId,
    /// Data source of the object, when known.
    pub data_source: Option<DataSourceId>,
    /// Aggregate before the transaction.
    pub old: Score,
    /// Aggregate after the transaction.
    pub new: Score,
}

/// Known status carried by a tag name.
///
/// Declared in ascending order so the maximum status of a set of tags is
/// simply `max()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownStatus {
    /// No status recorded.
    Unknown = 0,
    /// Known and uninteresting.
    Known = 1,
    /// Known bad.
    Bad = 2,
}

/// Row stored in the aggregate score table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ScoreRow {
    pub data_source: Option<DataSourceId>,
    pub score: Score,
}
