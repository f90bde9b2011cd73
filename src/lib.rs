//! # caseledger
//!
//! Consistency-sensitive derived state for a forensic case database.
//!
//! Two subsystems share one transactional store:
//!
//! - the **score ledger**, which keeps one aggregate relevance [`Score`] per
//!   object, raised on every attached analysis result and recomputed when one
//!   is removed, under a table-wide exclusive lock;
//! - the **identity resolvers**, which turn repeated sightings of hosts,
//!   authentication realms and OS accounts into canonical rows, and merge
//!   duplicates by tombstoning rather than deleting.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use caseledger::{Case, CaseConfig, RealmScope};
//!
//! let case = Case::in_memory(CaseConfig::default())?;
//! let account = case.transact(|tx| {
//!     let host = case.hosts().create_host(tx, "WS-01")?;
//!     case.accounts().resolve(
//!         tx,
//!         Some("S-1-5-21-725345543-854245398-1060284298-1003"),
//!         Some("jdoe"),
//!         Some("CORP"),
//!         host.id,
//!         RealmScope::Domain,
//!     )
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod account;
pub mod blackboard;
pub mod case;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod host;
pub mod ids;
pub mod realm;
pub mod scoring;
pub mod sid;
pub mod storage;

pub use account::{
    AccountResolver, AccountStatus, AttributeValue, InstanceType, NewAttribute, OsAccount,
    OsAccountAttribute, OsAccountInstance,
};
pub use blackboard::{AnalysisResult, Blackboard, ContentTag, TagName};
pub use case::Case;
pub use config::CaseConfig;
pub use content::{Content, ContentCatalog, DataSource};
pub use error::{CaseError, CaseResult, ValidationError};
pub use events::CaseEvent;
pub use host::{
    AddressRegistry, EdgeAttribution, Host, HostAddress, HostAddressType, HostRegistry, HostStatus,
};
pub use ids::{
    AccountId, AddressId, AttributeId, DataSourceId, HostId, ObjectId, RealmId, RecordStatus,
    ResultId, TagId, TagNameId,
};
pub use realm::{Realm, RealmResolver, RealmScope, RealmStatus, ScopeConfidence};
pub use scoring::{
    default_tag_score, KnownStatus, MethodCategory, Score, ScoreChange, ScoreLedger,
    Significance, TagScoreFn,
};
pub use storage::{CaseDb, ReadView, StorageError, TableLock, Transaction};
