//! Authentication realms.
//!
//! A realm is the namespace account identifiers are unique in: one machine's
//! local accounts, or a domain shared by many machines.

mod resolver;

use serde::{Deserialize, Serialize};

use crate::ids::{HostId, RealmId, RecordStatus};

pub use resolver::RealmResolver;

/// Lifecycle of a realm row.
pub type RealmStatus = RecordStatus<RealmId>;

/// Reach of a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealmScope {
    /// Not determined yet; treated like `Local` for lookups.
    Unknown,
    /// One machine.
    Local,
    /// Shared across machines.
    Domain,
}

/// How the scope of a realm was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeConfidence {
    /// Stated by the source.
    Known,
    /// Guessed from context.
    Inferred,
}

/// An authentication realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    /// Row id.
    pub id: RealmId,
    /// Ordered; the first entry is the primary name.
    pub names: Vec<String>,
    /// Stable identifier, such as a machine or domain SID prefix.
    pub address: Option<String>,
    /// Local to one machine or shared by a domain.
    pub scope: RealmScope,
    /// Owning host. Always `None` for domain realms.
    pub scope_host: Option<HostId>,
    /// How `scope` was established.
    pub confidence: ScopeConfidence,
    /// `Merged` once folded into another realm.
    pub status: RealmStatus,
}

impl Realm {
    /// The primary name, if any.
    #[must_use]
    pub fn primary_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }

    /// Returns true unless this realm has been merged away.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Append `name` unless it is already present (case-insensitive).
    /// Returns true if the name was added.
    pub fn add_name(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() || self.has_name(name) {
            return false;
        }
        self.names.push(name.to_string());
        true
    }

    fn has_name(&self, name: &str) -> bool {
        let lowered = name.to_lowercase();
        self.names.iter().any(|n| n.to_lowercase() == lowered)
    }

    pub(crate) fn primary_name_is(&self, name: &str) -> bool {
        self.primary_name()
            .is_some_and(|primary| primary.to_lowercase() == name.to_lowercase())
    }

    pub(crate) fn address_is(&self, address: &str) -> bool {
        self.address
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(address))
    }

    /// Visible to lookups from `host`.
    pub(crate) fn visible_from(&self, host: HostId) -> bool {
        self.scope == RealmScope::Domain || self.scope_host == Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realm(names: &[&str]) -> Realm {
        Realm {
            id: RealmId::new(1),
            names: names.iter().map(|n| (*n).to_string()).collect(),
            address: None,
            scope: RealmScope::Local,
            scope_host: Some(HostId::new(1)),
            confidence: ScopeConfidence::Inferred,
            status: RealmStatus::Active,
        }
    }

    #[test]
    fn test_add_name_keeps_primary_and_skips_duplicates() {
        let mut r = realm(&["CORP"]);
        assert!(!r.add_name("corp"));
        assert!(r.add_name("corp.example"));
        assert_eq!(r.names, vec!["CORP", "corp.example"]);
        assert_eq!(r.primary_name(), Some("CORP"));
    }

    #[test]
    fn test_only_primary_name_matches() {
        let r = realm(&["CORP", "legacy"]);
        assert!(r.primary_name_is("corp"));
        assert!(!r.primary_name_is("legacy"));
    }

    #[test]
    fn test_visibility() {
        let mut r = realm(&["x"]);
        assert!(r.visible_from(HostId::new(1)));
        assert!(!r.visible_from(HostId::new(2)));
        r.scope = RealmScope::Domain;
        r.scope_host = None;
        assert!(r.visible_from(HostId::new(2)));
    }
}
