//! OS accounts, their attributes, and where they were seen.

mod resolver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, AttributeId, DataSourceId, HostId, ObjectId, RealmId, RecordStatus};

pub use resolver::AccountResolver;
pub(crate) use resolver::repoint_attribute_hosts;

/// Lifecycle of an account row.
pub type AccountStatus = RecordStatus<AccountId>;

/// A user account scoped to one realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsAccount {
    /// Row id.
    pub id: AccountId,
    /// Owning realm. Moves when the realm is merged away.
    pub realm: RealmId,
    /// Realm-unique identifier, such as a full user SID.
    pub unique_id: Option<String>,
    /// Compared case-insensitively.
    pub login_name: Option<String>,
    /// Display name, when the source records one.
    pub full_name: Option<String>,
    creation_time: Option<DateTime<Utc>>,
    /// `Merged` once folded into another account.
    pub status: AccountStatus,
    #[serde(skip)]
    dirty: bool,
}

impl OsAccount {
    pub(crate) fn new(
        id: AccountId,
        realm: RealmId,
        unique_id: Option<String>,
        login_name: Option<String>,
    ) -> Self {
        Self {
            id,
            realm,
            unique_id,
            login_name,
            full_name: None,
            creation_time: None,
            status: AccountStatus::Active,
            dirty: false,
        }
    }

    /// Returns true unless this account has been merged away.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// When the account was created on its system, if known.
    #[must_use]
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    /// Set the creation time. Returns true, and marks the account dirty, only
    /// if the value changed.
    pub fn set_creation_time(&mut self, time: DateTime<Utc>) -> bool {
        if self.creation_time == Some(time) {
            return false;
        }
        self.creation_time = Some(time);
        self.dirty = true;
        true
    }

    /// True when a field change is waiting for [`AccountResolver::update`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Take every field `other` has and `self` lacks. Returns true if
    /// anything was adopted.
    pub(crate) fn adopt_missing(&mut self, other: &Self) -> bool {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) -> bool {
            if slot.is_none() && from.is_some() {
                slot.clone_from(from);
                return true;
            }
            false
        }
        let mut changed = fill(&mut self.unique_id, &other.unique_id);
        changed |= fill(&mut self.login_name, &other.login_name);
        changed |= fill(&mut self.full_name, &other.full_name);
        changed |= fill(&mut self.creation_time, &other.creation_time);
        changed
    }

    pub(crate) fn login_is(&self, login: &str) -> bool {
        self.login_name
            .as_deref()
            .is_some_and(|l| l.to_lowercase() == login.to_lowercase())
    }

    pub(crate) fn unique_id_is(&self, unique_id: &str) -> bool {
        self.unique_id
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(unique_id))
    }
}

/// Value of an account attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    /// Free text, such as a home directory.
    Text(String),
    /// A count or flag word.
    Integer(i64),
    /// A point in time, such as the last logon.
    DateTime(DateTime<Utc>),
}

/// A typed fact about an account, optionally attributed to the host and
/// content it was found on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsAccountAttribute {
    /// Row id.
    pub id: AttributeId,
    /// Follows the account through merges.
    pub account: AccountId,
    /// Name of the attribute, e.g. `"last_login"`.
    pub attribute_type: String,
    /// Typed value.
    pub value: AttributeValue,
    /// Host the attribute applies to, if it is host specific.
    pub source_host: Option<HostId>,
    /// Content object the attribute was read from.
    pub source_content: Option<ObjectId>,
}

/// An attribute to be added with [`AccountResolver::add_attributes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttribute {
    /// See [`OsAccountAttribute::attribute_type`].
    pub attribute_type: String,
    /// Typed value.
    pub value: AttributeValue,
    /// See [`OsAccountAttribute::source_host`].
    pub source_host: Option<HostId>,
    /// See [`OsAccountAttribute::source_content`].
    pub source_content: Option<ObjectId>,
}

impl NewAttribute {
    /// An attribute with no source attribution.
    #[must_use]
    pub fn new(attribute_type: impl Into<String>, value: AttributeValue) -> Self {
        Self {
            attribute_type: attribute_type.into(),
            value,
            source_host: None,
            source_content: None,
        }
    }

    /// Attribute the value to `host`.
    #[must_use]
    pub fn with_source_host(mut self, host: HostId) -> Self {
        self.source_host = Some(host);
        self
    }

    /// Attribute the value to the content it was read from.
    #[must_use]
    pub fn with_source_content(mut self, content: ObjectId) -> Self {
        self.source_content = Some(content);
        self
    }
}

/// How an account appeared in a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceType {
    /// The account ran something.
    Launched,
    /// The account accessed something.
    Accessed,
    /// The account is referenced by system data.
    Referenced,
    /// The account is only mentioned.
    Mentioned,
}

/// An account seen in a data source. One per (account, data source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsAccountInstance {
    /// The account seen.
    pub account: AccountId,
    /// The data source it was seen in.
    pub data_source: DataSourceId,
    /// Kind of the first sighting; later sightings do not change it.
    pub instance_type: InstanceType,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_only_changed_creation_time_marks_dirty() {
        let mut account = OsAccount::new(AccountId::new(1), RealmId::new(1), None, None);
        let t = Utc.timestamp_opt(1_611_858_618, 0).unwrap();
        assert!(account.set_creation_time(t));
        assert!(account.is_dirty());

        account.dirty = false;
        assert!(!account.set_creation_time(t));
        assert!(!account.is_dirty());
    }

    #[test]
    fn test_adopt_missing_keeps_own_fields() {
        let mut dest = OsAccount::new(
            AccountId::new(1),
            RealmId::new(1),
            Some("S-1-5-21-1-2-3-1001".to_string()),
            None,
        );
        dest.full_name = Some("Dest Name".to_string());
        let mut src = OsAccount::new(
            AccountId::new(2),
            RealmId::new(2),
            Some("S-1-5-21-1-2-3-1001".to_string()),
            Some("jdoe".to_string()),
        );
        src.full_name = Some("Src Name".to_string());

        assert!(dest.adopt_missing(&src));
        assert_eq!(dest.login_name.as_deref(), Some("jdoe"));
        assert_eq!(dest.full_name.as_deref(), Some("Dest Name"));
    }

    #[test]
    fn test_login_compare_ignores_case() {
        let account = OsAccount::new(
            AccountId::new(1),
            RealmId::new(1),
            None,
            Some("BlueJay".to_string()),
        );
        assert!(account.login_is("bluejay"));
        assert!(!account.login_is("jay"));
    }
}
