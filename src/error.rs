//! Error types for caseledger.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! condition they care about. In particular an [`CaseError::InvalidIdentifier`]
//! is distinct from a store failure, which lets batch ingestion skip a bad
//! record instead of aborting.

use thiserror::Error;

use crate::ids::{AccountId, HostId, RealmId};
use crate::storage::StorageError;

/// Validation errors raised before any store mutation takes place.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required name was empty after trimming.
    #[error("{field} cannot be empty")]
    EmptyName {
        /// Which name.
        field: &'static str,
    },

    /// Neither of two alternative inputs was supplied.
    #[error("Either {first} or {second} must be supplied")]
    MissingField {
        /// First alternative.
        first: &'static str,
        /// Second alternative.
        second: &'static str,
    },

    /// An address did not parse as its declared kind.
    #[error("Address '{address}' is not a valid {kind} address")]
    InvalidAddress {
        /// The text as given.
        address: String,
        /// Expected address kind.
        kind: &'static str,
    },

    /// Another active host has the name.
    #[error("Host '{name}' already exists")]
    DuplicateHostName {
        /// The taken name.
        name: String,
    },

    /// Another active account of the realm already matches the login.
    #[error("Realm {realm} already has an account with login '{login}'")]
    DuplicateLoginName {
        /// The taken login.
        login: String,
        /// Realm of both accounts.
        realm: RealmId,
    },

    /// Another active realm with the same owner has the primary name.
    #[error("A realm named '{name}' already exists in the same scope")]
    DuplicateRealmName {
        /// The taken name.
        name: String,
    },

    /// A configuration setting is out of range.
    #[error("Invalid configuration: {field} {reason}")]
    InvalidConfig {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The host is a merge tombstone.
    #[error("Host {id} has been merged and can no longer be modified")]
    InactiveHost {
        /// The tombstoned host.
        id: HostId,
    },

    /// The realm is a merge tombstone.
    #[error("Realm {id} has been merged and can no longer be modified")]
    InactiveRealm {
        /// The tombstoned realm.
        id: RealmId,
    },

    /// The account is a merge tombstone.
    #[error("Account {id} has been merged and can no longer be modified")]
    InactiveAccount {
        /// The tombstoned account.
        id: AccountId,
    },

    /// Source and destination of a merge are the same record.
    #[error("Cannot merge a {kind} into itself")]
    SelfMerge {
        /// Kind of record.
        kind: &'static str,
    },
}

/// Top-level error type for caseledger.
#[derive(Debug, Error)]
pub enum CaseError {
    /// The underlying store failed. Never retried internally.
    #[error("Store access failure: {0}")]
    StoreAccess(#[from] StorageError),

    /// An identifier presented as an individual account id is structurally a
    /// group or other non-user identifier.
    #[error("Invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier {
        /// The rejected identifier.
        identifier: String,
        /// Why it cannot own an account.
        reason: &'static str,
    },

    /// Input rejected before any write.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An invariant of this crate did not hold, or a caller aborted a
    /// transaction.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl CaseError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the store could not be read or written.
    #[must_use]
    pub const fn is_store_access(&self) -> bool {
        matches!(self, Self::StoreAccess(_))
    }

    /// Returns true if an identifier was rejected as a non-user identifier.
    #[must_use]
    pub const fn is_invalid_identifier(&self) -> bool {
        matches!(self, Self::InvalidIdentifier { .. })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Result type alias for caseledger operations.
pub type CaseResult<T> = Result<T, CaseError>;
