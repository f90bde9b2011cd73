//! Row identifiers.
//!
//! Every row in a case draws its id from one case-wide, monotonically
//! increasing sequence, so an id is never reused even after the row it named
//! has been tombstoned. Each table gets its own newtype so a realm id cannot
//! be passed where an account id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw row id.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw row id.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Id of any content object (files, data sources, analysis targets).
    ObjectId
);
row_id!(
    /// Id of a data source. Data sources are content objects too, see
    /// [`DataSourceId::object_id`].
    DataSourceId
);
row_id!(
    /// Id of a host row.
    HostId
);
row_id!(
    /// Id of a host address row.
    AddressId
);
row_id!(
    /// Id of an authentication realm row.
    RealmId
);
row_id!(
    /// Id of an OS account row.
    AccountId
);
row_id!(
    /// Id of an analysis result row.
    ResultId
);
row_id!(
    /// Id of a tag name definition.
    TagNameId
);
row_id!(
    /// Id of a content tag row.
    TagId
);
row_id!(
    /// Id of an OS account attribute row.
    AttributeId
);

impl DataSourceId {
    /// The content object id of this data source.
    #[must_use]
    pub const fn object_id(self) -> ObjectId {
        ObjectId(self.0)
    }
}

/// Lifecycle of a deduplicated record.
///
/// Hosts, realms and accounts are never deleted. A duplicate is folded into
/// its canonical record and left behind as a `Merged` tombstone, so its id
/// stays resolvable for rows that still point at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus<I> {
    /// Live; participates in lookups.
    Active,
    /// Tombstone; folded into the given record.
    Merged(I),
}

impl<I: Copy> RecordStatus<I> {
    /// Returns true for a live record.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// The record this tombstone was folded into.
    #[must_use]
    pub fn merged_into(&self) -> Option<I> {
        match self {
            Self::Active => None,
            Self::Merged(dest) => Some(*dest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_display_and_raw() {
        let id = RealmId::new(42);
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(i64::from(id), 42);
    }

    #[test]
    fn test_data_source_is_object() {
        let ds = DataSourceId::new(7);
        assert_eq!(ds.object_id(), ObjectId::new(7));
    }

    #[test]
    fn test_record_status() {
        let live: RecordStatus<RealmId> = RecordStatus::Active;
        assert!(live.is_active());
        assert_eq!(live.merged_into(), None);

        let gone = RecordStatus::Merged(RealmId::new(3));
        assert!(!gone.is_active());
        assert_eq!(gone.merged_into(), Some(RealmId::new(3)));
    }

    #[test]
    fn test_row_id_serializes_transparently() {
        let json = serde_json::to_string(&AccountId::new(9)).unwrap();
        assert_eq!(json, "9");
    }
}
