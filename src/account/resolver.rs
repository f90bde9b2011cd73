use tracing::{debug, info};

use crate::error::{CaseError, CaseResult, ValidationError};
use crate::events::CaseEvent;
use crate::ids::{AccountId, AttributeId, DataSourceId, HostId, RealmId};
use crate::realm::{RealmResolver, RealmScope};
use crate::sid;
use crate::storage::tables::{AccountAttributes, AccountInstances, Accounts, DataSources, Realms};
use crate::storage::{CaseDb, Reader, TableLock, Transaction};

use super::{
    AccountStatus, InstanceType, NewAttribute, OsAccount, OsAccountAttribute, OsAccountInstance,
};

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn active_accounts<F>(reader: &impl Reader, mut filter: F) -> CaseResult<Vec<OsAccount>>
where
    F: FnMut(&OsAccount) -> bool,
{
    Ok(reader
        .scan::<Accounts, _>(|_, a| a.is_active() && filter(a))?
        .into_iter()
        .map(|(_, a)| a)
        .collect())
}

fn first_active<F>(reader: &impl Reader, filter: F) -> CaseResult<Option<OsAccount>>
where
    F: FnMut(&OsAccount) -> bool,
{
    Ok(active_accounts(reader, filter)?.into_iter().next())
}

fn require_active_account(reader: &impl Reader, id: AccountId) -> CaseResult<OsAccount> {
    let account = reader.require::<Accounts>(&id)?;
    if !account.is_active() {
        return Err(ValidationError::InactiveAccount { id }.into());
    }
    Ok(account)
}

/// Login match inside `realm`. Only counts when one side has no unique id,
/// since two different unique ids are two different accounts.
fn login_match(
    reader: &impl Reader,
    realm: RealmId,
    login: &str,
    unique_id: Option<&str>,
) -> CaseResult<Option<OsAccount>> {
    first_active(reader, |a| {
        a.realm == realm && a.login_is(login) && (unique_id.is_none() || a.unique_id.is_none())
    })
}

fn unique_id_match(
    reader: &impl Reader,
    realm: RealmId,
    unique_id: &str,
) -> CaseResult<Option<OsAccount>> {
    first_active(reader, |a| a.realm == realm && a.unique_id_is(unique_id))
}

/// Only individual principals may own an account.
fn validate_unique_id(unique_id: Option<&str>) -> CaseResult<()> {
    let Some(uid) = unique_id else {
        return Ok(());
    };
    sid::validate_user_sid(uid).map_err(|reason| CaseError::InvalidIdentifier {
        identifier: uid.to_string(),
        reason,
    })
}

/// Point attributes attributed to `src` at `dest`.
pub(crate) fn repoint_attribute_hosts(
    tx: &mut Transaction<'_>,
    src: HostId,
    dest: HostId,
) -> CaseResult<()> {
    for (id, mut attribute) in
        tx.scan::<AccountAttributes, _>(|_, a| a.source_host == Some(src))?
    {
        attribute.source_host = Some(dest);
        tx.put::<AccountAttributes>(id, attribute);
    }
    Ok(())
}

/// Handle on the OS accounts of one case.
#[derive(Debug, Clone, Copy)]
pub struct AccountResolver<'a> {
    db: &'a CaseDb,
}

impl<'a> AccountResolver<'a> {
    pub(crate) fn new(db: &'a CaseDb) -> Self {
        Self { db }
    }

    /// Get or create the account for a sighting on `host`.
    ///
    /// The realm is resolved first, with its address derived from
    /// `unique_id` when that is a SID. The account is then matched inside
    /// the realm as in [`resolve_in_realm`](Self::resolve_in_realm).
    ///
    /// # Errors
    /// `InvalidIdentifier` if `unique_id` denotes a group; validation error if
    /// neither id nor login is given or no realm can be resolved.
    pub fn resolve(
        &self,
        tx: &mut Transaction<'_>,
        unique_id: Option<&str>,
        login_name: Option<&str>,
        realm_name: Option<&str>,
        host: HostId,
        scope: RealmScope,
    ) -> CaseResult<OsAccount> {
        let unique_id = clean(unique_id);
        let login_name = clean(login_name);
        if unique_id.is_none() && login_name.is_none() {
            return Err(ValidationError::MissingField {
                first: "unique id",
                second: "login name",
            }
            .into());
        }
        validate_unique_id(unique_id)?;

        let realm = RealmResolver::new(self.db).resolve_for_sid(tx, unique_id, realm_name, host, scope)?;
        self.resolve_in_realm(tx, unique_id, login_name, realm.id)
    }

    /// Get or create an account inside a known realm.
    ///
    /// A unique id match wins. Otherwise a login match is taken when the
    /// sighting or the candidate has no unique id; a candidate without one
    /// adopts the sighting's.
    ///
    /// # Errors
    /// `InvalidIdentifier` if `unique_id` denotes a group; validation error
    /// if neither id nor login is given or the realm has been merged.
    pub fn resolve_in_realm(
        &self,
        tx: &mut Transaction<'_>,
        unique_id: Option<&str>,
        login_name: Option<&str>,
        realm: RealmId,
    ) -> CaseResult<OsAccount> {
        let unique_id = clean(unique_id);
        let login_name = clean(login_name);
        if unique_id.is_none() && login_name.is_none() {
            return Err(ValidationError::MissingField {
                first: "unique id",
                second: "login name",
            }
            .into());
        }
        validate_unique_id(unique_id)?;
        tx.lock(TableLock::Realms)?;
        tx.lock(TableLock::Accounts)?;
        if !tx.require::<Realms>(&realm)?.is_active() {
            return Err(ValidationError::InactiveRealm { id: realm }.into());
        }

        if let Some(uid) = unique_id {
            if let Some(found) = unique_id_match(tx, realm, uid)? {
                return Ok(found);
            }
        }
        if let Some(login) = login_name {
            if let Some(mut found) = login_match(tx, realm, login, unique_id)? {
                if found.unique_id.is_none() && unique_id.is_some() {
                    found.unique_id = unique_id.map(str::to_string);
                    tx.put::<Accounts>(found.id, found.clone());
                    tx.emit(CaseEvent::AccountUpdated(found.id));
                }
                return Ok(found);
            }
        }

        let id = AccountId::new(tx.allocate_id());
        let account = OsAccount::new(
            id,
            realm,
            unique_id.map(str::to_string),
            login_name.map(str::to_string),
        );
        tx.put::<Accounts>(id, account.clone());
        tx.emit(CaseEvent::AccountAdded(id));
        debug!(account = %id, realm = %realm, ?unique_id, ?login_name, "account created");
        Ok(account)
    }

    /// Persist the mutable fields of `account` and clear its dirty flag.
    ///
    /// # Errors
    /// Validation error if the stored account has been merged, or the new
    /// login would match another active account of the realm.
    pub fn update(&self, tx: &mut Transaction<'_>, account: &mut OsAccount) -> CaseResult<()> {
        tx.lock(TableLock::Accounts)?;
        let mut stored = require_active_account(tx, account.id)?;
        let login = clean(account.login_name.as_deref());
        if let Some(login) = login {
            let unique_id = stored.unique_id.clone();
            let taken = first_active(tx, |a| {
                a.id != stored.id
                    && a.realm == stored.realm
                    && a.login_is(login)
                    && (unique_id.is_none() || a.unique_id.is_none())
            })?;
            if taken.is_some() {
                return Err(ValidationError::DuplicateLoginName {
                    login: login.to_string(),
                    realm: stored.realm,
                }
                .into());
            }
        }
        stored.login_name = login.map(str::to_string);
        stored.full_name = clean(account.full_name.as_deref()).map(str::to_string);
        stored.creation_time = account.creation_time;
        tx.put::<Accounts>(stored.id, stored);
        account.dirty = false;
        tx.emit(CaseEvent::AccountUpdated(account.id));
        Ok(())
    }

    /// Attach attributes to an active account.
    ///
    /// # Errors
    /// Validation error for an empty attribute type or a merged account.
    pub fn add_attributes(
        &self,
        tx: &mut Transaction<'_>,
        account: AccountId,
        attributes: Vec<NewAttribute>,
    ) -> CaseResult<Vec<OsAccountAttribute>> {
        if attributes.iter().any(|a| a.attribute_type.trim().is_empty()) {
            return Err(ValidationError::EmptyName {
                field: "attribute type",
            }
            .into());
        }
        tx.lock(TableLock::Accounts)?;
        require_active_account(tx, account)?;

        let mut added = Vec::with_capacity(attributes.len());
        for attribute in attributes {
            let id = AttributeId::new(tx.allocate_id());
            let row = OsAccountAttribute {
                id,
                account,
                attribute_type: attribute.attribute_type.trim().to_string(),
                value: attribute.value,
                source_host: attribute.source_host,
                source_content: attribute.source_content,
            };
            tx.put::<AccountAttributes>(id, row.clone());
            added.push(row);
        }
        if !added.is_empty() {
            tx.emit(CaseEvent::AccountUpdated(account));
        }
        Ok(added)
    }

    /// # Errors
    /// Store access failure only.
    pub fn attributes(&self, account: AccountId) -> CaseResult<Vec<OsAccountAttribute>> {
        Ok(self
            .db
            .read_view()?
            .scan::<AccountAttributes, _>(|_, a| a.account == account)?
            .into_iter()
            .map(|(_, a)| a)
            .collect())
    }

    /// Record that `account` appears in `data_source`. A repeated call
    /// returns the existing instance, whatever `instance_type` it is given.
    ///
    /// # Errors
    /// Validation error for a merged account; store access failure for an
    /// unknown data source.
    pub fn create_instance(
        &self,
        tx: &mut Transaction<'_>,
        account: AccountId,
        data_source: DataSourceId,
        instance_type: InstanceType,
    ) -> CaseResult<OsAccountInstance> {
        tx.lock(TableLock::Accounts)?;
        require_active_account(tx, account)?;
        tx.require::<DataSources>(&data_source)?;
        if let Some(existing) = tx.get::<AccountInstances>(&(account, data_source))? {
            return Ok(existing);
        }
        let instance = OsAccountInstance {
            account,
            data_source,
            instance_type,
        };
        tx.put::<AccountInstances>((account, data_source), instance);
        Ok(instance)
    }

    /// # Errors
    /// Store access failure only.
    pub fn instances(&self, account: AccountId) -> CaseResult<Vec<OsAccountInstance>> {
        Ok(self
            .db
            .read_view()?
            .scan::<AccountInstances, _>(|(a, _), _| *a == account)?
            .into_iter()
            .map(|(_, i)| i)
            .collect())
    }

    /// Accounts with an instance in `data_source`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn accounts_on_data_source(&self, data_source: DataSourceId) -> CaseResult<Vec<OsAccount>> {
        let view = self.db.read_view()?;
        let mut out = Vec::new();
        for ((account, _), _) in view.scan::<AccountInstances, _>(|(_, ds), _| *ds == data_source)? {
            if let Some(row) = view.get::<Accounts>(&account)? {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Account row by id, whatever its status.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn get(&self, id: AccountId) -> CaseResult<Option<OsAccount>> {
        Ok(self.db.read_view()?.get::<Accounts>(&id)?)
    }

    /// # Errors
    /// Store access failure only.
    pub fn by_unique_id(&self, unique_id: &str, realm: RealmId) -> CaseResult<Option<OsAccount>> {
        unique_id_match(&self.db.read_view()?, realm, unique_id.trim())
    }

    /// # Errors
    /// Store access failure only.
    pub fn by_login_name(&self, login_name: &str, realm: RealmId) -> CaseResult<Option<OsAccount>> {
        let login = login_name.trim();
        first_active(&self.db.read_view()?, |a| a.realm == realm && a.login_is(login))
    }

    /// All active accounts, in id order.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn accounts(&self) -> CaseResult<Vec<OsAccount>> {
        active_accounts(&self.db.read_view()?, |_| true)
    }

    /// # Errors
    /// Store access failure only.
    pub fn accounts_in_realm(&self, realm: RealmId) -> CaseResult<Vec<OsAccount>> {
        active_accounts(&self.db.read_view()?, |a| a.realm == realm)
    }

    /// Merge or move every active account of realm `src` into realm `dest`.
    /// Returns how many accounts were processed. The caller holds the
    /// account lock.
    pub(crate) fn merge_realm_accounts(
        &self,
        tx: &mut Transaction<'_>,
        src: RealmId,
        dest: RealmId,
    ) -> CaseResult<usize> {
        let ids: Vec<AccountId> = active_accounts(tx, |a| a.realm == src)?
            .into_iter()
            .map(|a| a.id)
            .collect();

        for id in &ids {
            let mut account = tx.require::<Accounts>(id)?;
            let by_uid = match account.unique_id.as_deref() {
                Some(uid) => unique_id_match(tx, dest, uid)?,
                None => None,
            };
            let mut by_login = match account.login_name.as_deref() {
                Some(login) => login_match(tx, dest, login, account.unique_id.as_deref())?,
                None => None,
            };

            // The login match is the same person as the uid match once this
            // account links the two.
            if let (Some(uid_match), Some(login)) = (&by_uid, &by_login) {
                if uid_match.id != login.id && login.unique_id.is_none() {
                    self.merge_accounts(tx, login.id, uid_match.id)?;
                    by_login = None;
                }
            }

            match by_uid.or(by_login) {
                Some(target) => self.merge_accounts(tx, account.id, target.id)?,
                None => {
                    account.realm = dest;
                    tx.put::<Accounts>(account.id, account);
                }
            }
        }
        Ok(ids.len())
    }

    /// Fold account `src` into `dest`: `dest` adopts the fields it lacks,
    /// attributes and instances are repointed, and `src` becomes a
    /// tombstone.
    pub(crate) fn merge_accounts(
        &self,
        tx: &mut Transaction<'_>,
        src: AccountId,
        dest: AccountId,
    ) -> CaseResult<()> {
        if src == dest {
            return Err(ValidationError::SelfMerge { kind: "account" }.into());
        }
        tx.lock(TableLock::Accounts)?;
        let mut source = require_active_account(tx, src)?;
        let mut destination = require_active_account(tx, dest)?;

        if destination.adopt_missing(&source) {
            tx.put::<Accounts>(dest, destination);
        }

        for (id, mut attribute) in tx.scan::<AccountAttributes, _>(|_, a| a.account == src)? {
            attribute.account = dest;
            tx.put::<AccountAttributes>(id, attribute);
        }

        for ((_, data_source), mut instance) in
            tx.scan::<AccountInstances, _>(|(a, _), _| *a == src)?
        {
            tx.remove::<AccountInstances>((src, data_source));
            if tx.get::<AccountInstances>(&(dest, data_source))?.is_none() {
                instance.account = dest;
                tx.put::<AccountInstances>((dest, data_source), instance);
            }
        }

        source.status = AccountStatus::Merged(dest);
        tx.put::<Accounts>(src, source);
        tx.emit(CaseEvent::AccountsMerged {
            source: src,
            destination: dest,
        });
        info!(source = %src, destination = %dest, "accounts merged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaseConfig;
    use crate::host::HostRegistry;

    fn setup() -> (CaseDb, HostId) {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let mut tx = db.begin();
        let host = HostRegistry::new(&db).create_host(&mut tx, "ws-01").unwrap().id;
        tx.commit().unwrap();
        (db, host)
    }

    #[test]
    fn test_group_identifier_rejected() {
        let (db, host) = setup();
        let accounts = AccountResolver::new(&db);
        let mut tx = db.begin();
        let err = accounts
            .resolve(&mut tx, Some("S-1-1-0"), None, Some("CORP"), host, RealmScope::Local)
            .unwrap_err();
        assert!(err.is_invalid_identifier());
        assert!(active_accounts(&tx, |_| true).unwrap().is_empty());
    }

    #[test]
    fn test_requires_unique_id_or_login() {
        let (db, host) = setup();
        let mut tx = db.begin();
        let err = AccountResolver::new(&db)
            .resolve(&mut tx, None, Some(" "), Some("CORP"), host, RealmScope::Local)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_login_match_adopts_unique_id() {
        let (db, host) = setup();
        let accounts = AccountResolver::new(&db);
        let mut tx = db.begin();
        let by_login = accounts
            .resolve(&mut tx, None, Some("jdoe"), Some("CORP"), host, RealmScope::Local)
            .unwrap();
        let realm = by_login.realm;
        let again = accounts
            .resolve_in_realm(&mut tx, Some("S-1-5-21-1-2-3-1001"), Some("JDoe"), realm)
            .unwrap();
        assert_eq!(by_login.id, again.id);
        assert_eq!(again.unique_id.as_deref(), Some("S-1-5-21-1-2-3-1001"));
    }

    #[test]
    fn test_different_unique_ids_are_different_accounts() {
        let (db, host) = setup();
        let accounts = AccountResolver::new(&db);
        let mut tx = db.begin();
        let a = accounts
            .resolve(&mut tx, Some("S-1-5-21-1-2-3-1001"), Some("admin"), None, host, RealmScope::Local)
            .unwrap();
        let b = accounts
            .resolve(&mut tx, Some("S-1-5-21-1-2-3-1002"), Some("admin"), None, host, RealmScope::Local)
            .unwrap();
        assert_eq!(a.realm, b.realm);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_merge_accounts_drops_duplicate_instances() {
        let (db, host) = setup();
        let accounts = AccountResolver::new(&db);
        let mut tx = db.begin();
        let ds = crate::content::ContentCatalog::new(&db)
            .add_data_source(&mut tx, "image1", Some(host))
            .unwrap()
            .id;
        let a = accounts
            .resolve(&mut tx, None, Some("alice"), Some("CORP"), host, RealmScope::Local)
            .unwrap();
        let b = accounts
            .resolve(&mut tx, None, Some("bob"), Some("CORP"), host, RealmScope::Local)
            .unwrap();
        accounts.create_instance(&mut tx, a.id, ds, InstanceType::Launched).unwrap();
        accounts.create_instance(&mut tx, b.id, ds, InstanceType::Accessed).unwrap();

        accounts.merge_accounts(&mut tx, a.id, b.id).unwrap();
        let remaining = tx.scan::<AccountInstances, _>(|_, _| true).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1.account, b.id);
        assert_eq!(remaining[0].1.instance_type, InstanceType::Accessed);
        assert_eq!(
            tx.require::<Accounts>(&a.id).unwrap().status,
            AccountStatus::Merged(b.id)
        );
    }
}
