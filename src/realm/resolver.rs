use tracing::{debug, info};

use crate::account::AccountResolver;
use crate::error::{CaseResult, ValidationError};
use crate::events::CaseEvent;
use crate::host::require_active_host;
use crate::ids::{HostId, RealmId};
use crate::sid;
use crate::storage::tables::Realms;
use crate::storage::{CaseDb, Reader, TableLock, Transaction};

use super::{Realm, RealmScope, RealmStatus, ScopeConfidence};

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn active_realms<F>(reader: &impl Reader, mut filter: F) -> CaseResult<Vec<Realm>>
where
    F: FnMut(&Realm) -> bool,
{
    Ok(reader
        .scan::<Realms, _>(|_, r| r.is_active() && filter(r))?
        .into_iter()
        .map(|(_, r)| r)
        .collect())
}

/// Address lookup. A realm owned by another host only matches when the
/// sighting says the realm is a domain. The built-in accounts realm is
/// never shared.
fn by_address(
    reader: &impl Reader,
    address: &str,
    host: HostId,
    hint: RealmScope,
) -> CaseResult<Option<Realm>> {
    let shared = address != sid::WELL_KNOWN_REALM_ADDRESS;
    Ok(active_realms(reader, |r| {
        r.address_is(address)
            && (r.visible_from(host) || (shared && hint == RealmScope::Domain))
    })?
    .into_iter()
    .next())
}

/// Primary-name lookup among realms visible from `host`. A realm whose
/// address conflicts with the sighting's is a different realm.
fn by_name(
    reader: &impl Reader,
    name: &str,
    address: Option<&str>,
    host: HostId,
) -> CaseResult<Option<Realm>> {
    Ok(active_realms(reader, |r| {
        r.visible_from(host)
            && r.primary_name_is(name)
            && match (r.address.as_deref(), address) {
                (Some(_), Some(addr)) => r.address_is(addr),
                _ => true,
            }
    })?
    .into_iter()
    .next())
}

fn lookup(
    reader: &impl Reader,
    address: Option<&str>,
    name: Option<&str>,
    host: HostId,
    hint: RealmScope,
) -> CaseResult<Option<Realm>> {
    if let Some(address) = address {
        if let Some(found) = by_address(reader, address, host, hint)? {
            return Ok(Some(found));
        }
    }
    match name {
        Some(name) => by_name(reader, name, address, host),
        None => Ok(None),
    }
}

fn address_for_sid(account_sid: Option<&str>) -> Option<String> {
    clean(account_sid)
        .filter(|s| sid::is_sid(s))
        .map(sid::realm_address)
}

/// Handle on the realms of one case.
#[derive(Debug, Clone, Copy)]
pub struct RealmResolver<'a> {
    db: &'a CaseDb,
}

impl<'a> RealmResolver<'a> {
    pub(crate) fn new(db: &'a CaseDb) -> Self {
        Self { db }
    }

    /// Get or create the realm for a sighting on `host`.
    ///
    /// Lookup order: by address, then by primary name, then create. An
    /// address match reached through a domain sighting is promoted to a
    /// domain realm.
    ///
    /// # Errors
    /// Validation error if neither address nor name is given or `host` is
    /// not active.
    pub fn resolve(
        &self,
        tx: &mut Transaction<'_>,
        address: Option<&str>,
        name: Option<&str>,
        host: HostId,
        scope: RealmScope,
    ) -> CaseResult<Realm> {
        let address = clean(address);
        let name = clean(name);
        if address.is_none() && name.is_none() {
            return Err(ValidationError::MissingField {
                first: "realm address",
                second: "realm name",
            }
            .into());
        }
        // Host merges hold the realm lock, so the host check below cannot
        // race one.
        tx.lock(TableLock::Realms)?;
        require_active_host(tx, host)?;

        if let Some(mut found) = lookup(tx, address, name, host, scope)? {
            let promote = scope == RealmScope::Domain
                && found.scope != RealmScope::Domain
                && address.is_some_and(|a| found.address_is(a))
                && !found.address_is(sid::WELL_KNOWN_REALM_ADDRESS);
            if promote {
                found.scope = RealmScope::Domain;
                found.scope_host = None;
                found.confidence = ScopeConfidence::Known;
                tx.put::<Realms>(found.id, found.clone());
                debug!(realm = %found.id, "realm promoted to domain scope");
            }
            return Ok(found);
        }

        let well_known = address == Some(sid::WELL_KNOWN_REALM_ADDRESS);
        let scope = if well_known { RealmScope::Local } else { scope };
        let id = RealmId::new(tx.allocate_id());
        let realm = Realm {
            id,
            names: name.map(str::to_string).into_iter().collect(),
            address: address.map(str::to_string),
            scope,
            scope_host: (scope != RealmScope::Domain).then_some(host),
            confidence: if address.is_some() {
                ScopeConfidence::Known
            } else {
                ScopeConfidence::Inferred
            },
            status: RealmStatus::Active,
        };
        tx.put::<Realms>(id, realm.clone());
        debug!(realm = %id, ?address, ?name, host = %host, "realm created");
        Ok(realm)
    }

    /// [`resolve`](Self::resolve) for a Windows sighting: the realm address
    /// is derived from the account SID.
    ///
    /// # Errors
    /// As for [`resolve`](Self::resolve).
    pub fn resolve_for_sid(
        &self,
        tx: &mut Transaction<'_>,
        account_sid: Option<&str>,
        name: Option<&str>,
        host: HostId,
        scope: RealmScope,
    ) -> CaseResult<Realm> {
        let address = address_for_sid(account_sid);
        self.resolve(tx, address.as_deref(), name, host, scope)
    }

    /// Lookup only; never creates or promotes.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn find(
        &self,
        address: Option<&str>,
        name: Option<&str>,
        host: HostId,
    ) -> CaseResult<Option<Realm>> {
        let view = self.db.read_view()?;
        lookup(&view, clean(address), clean(name), host, RealmScope::Unknown)
    }

    /// [`find`](Self::find) with the address derived from an account SID.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn find_for_sid(
        &self,
        account_sid: Option<&str>,
        name: Option<&str>,
        host: HostId,
    ) -> CaseResult<Option<Realm>> {
        self.find(address_for_sid(account_sid).as_deref(), name, host)
    }

    /// Realm row by id, whatever its status.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn get(&self, id: RealmId) -> CaseResult<Option<Realm>> {
        Ok(self.db.read_view()?.get::<Realms>(&id)?)
    }

    /// Active realms owned by `host`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn realms_for_host(&self, host: HostId) -> CaseResult<Vec<Realm>> {
        active_realms(&self.db.read_view()?, |r| r.scope_host == Some(host))
    }

    /// Persist the names and address of `realm`.
    ///
    /// # Errors
    /// Validation error if the stored realm has been merged, or another
    /// active realm with the same owner already uses the new primary name.
    pub fn update(&self, tx: &mut Transaction<'_>, realm: &Realm) -> CaseResult<Realm> {
        tx.lock(TableLock::Realms)?;
        let mut stored = tx.require::<Realms>(&realm.id)?;
        if !stored.is_active() {
            return Err(ValidationError::InactiveRealm { id: realm.id }.into());
        }
        let address = clean(realm.address.as_deref());
        if let Some(primary) = realm.primary_name() {
            let taken = active_realms(tx, |r| {
                r.id != stored.id
                    && r.scope_host == stored.scope_host
                    && r.primary_name_is(primary)
                    && match (r.address.as_deref(), address) {
                        (Some(_), Some(addr)) => r.address_is(addr),
                        _ => true,
                    }
            })?;
            if !taken.is_empty() {
                return Err(ValidationError::DuplicateRealmName {
                    name: primary.to_string(),
                }
                .into());
            }
        }
        stored.names.clone_from(&realm.names);
        stored.address = address.map(str::to_string);
        tx.put::<Realms>(stored.id, stored.clone());
        Ok(stored)
    }

    /// Fold `src` into `dest`.
    ///
    /// Each active account of `src` is merged into its match in `dest` or
    /// moved there. `dest` then gains the names of `src` it lacks and, if it
    /// has none, the address of `src`; `src` becomes a tombstone.
    ///
    /// # Errors
    /// Validation error when merging a realm into itself or either realm has
    /// already been merged.
    pub fn merge_realms(&self, tx: &mut Transaction<'_>, src: RealmId, dest: RealmId) -> CaseResult<()> {
        if src == dest {
            return Err(ValidationError::SelfMerge { kind: "realm" }.into());
        }
        tx.lock(TableLock::Realms)?;
        tx.lock(TableLock::Accounts)?;

        let mut source = tx.require::<Realms>(&src)?;
        if !source.is_active() {
            return Err(ValidationError::InactiveRealm { id: src }.into());
        }
        if !tx.require::<Realms>(&dest)?.is_active() {
            return Err(ValidationError::InactiveRealm { id: dest }.into());
        }

        let accounts = AccountResolver::new(self.db).merge_realm_accounts(tx, src, dest)?;

        // Account merges never touch realm rows, so dest is still current.
        let mut destination = tx.require::<Realms>(&dest)?;
        for name in &source.names {
            destination.add_name(name);
        }
        if destination.address.is_none() {
            destination.address.clone_from(&source.address);
        }
        tx.put::<Realms>(dest, destination);

        source.status = RealmStatus::Merged(dest);
        tx.put::<Realms>(src, source);
        tx.emit(CaseEvent::RealmsMerged {
            source: src,
            destination: dest,
        });
        info!(source = %src, destination = %dest, accounts, "realms merged");
        Ok(())
    }

    /// Merge or move every realm owned by `src_host` onto `dest_host`.
    /// Returns how many realms were processed.
    pub(crate) fn move_or_merge_host_realms(
        &self,
        tx: &mut Transaction<'_>,
        src_host: HostId,
        dest_host: HostId,
    ) -> CaseResult<usize> {
        tx.lock(TableLock::Realms)?;
        let owned: Vec<RealmId> = active_realms(tx, |r| r.scope_host == Some(src_host))?
            .into_iter()
            .map(|r| r.id)
            .collect();

        for id in &owned {
            let mut realm = tx.require::<Realms>(id)?;
            let dest_local = |r: &Realm| r.scope_host == Some(dest_host);

            let by_addr = match realm.address.as_deref() {
                Some(addr) => active_realms(tx, |r| dest_local(r) && r.address_is(addr))?
                    .into_iter()
                    .next(),
                None => None,
            };
            let mut by_name = match realm.primary_name() {
                Some(name) => active_realms(tx, |r| dest_local(r) && r.primary_name_is(name))?
                    .into_iter()
                    .next(),
                None => None,
            };

            // A nameless-address realm and an address-less named realm on
            // dest describe the same realm once src links them.
            if let (Some(addr_match), Some(name_match)) = (&by_addr, &by_name) {
                if addr_match.id != name_match.id && name_match.address.is_none() {
                    self.merge_realms(tx, name_match.id, addr_match.id)?;
                    by_name = None;
                }
            }

            let conflicting = |other: &Realm| {
                matches!((&realm.address, &other.address), (Some(a), Some(b)) if !a.eq_ignore_ascii_case(b))
            };
            let target = by_addr.or(by_name.filter(|r| !conflicting(r)));

            match target {
                Some(target) => self.merge_realms(tx, realm.id, target.id)?,
                None => {
                    realm.scope_host = Some(dest_host);
                    tx.put::<Realms>(realm.id, realm);
                }
            }
        }
        Ok(owned.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaseConfig;
    use crate::host::HostRegistry;

    fn setup() -> (CaseDb, HostId, HostId) {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let mut tx = db.begin();
        let hosts = HostRegistry::new(&db);
        let a = hosts.create_host(&mut tx, "a").unwrap().id;
        let b = hosts.create_host(&mut tx, "b").unwrap().id;
        tx.commit().unwrap();
        (db, a, b)
    }

    #[test]
    fn test_requires_address_or_name() {
        let (db, a, _) = setup();
        let mut tx = db.begin();
        let err = RealmResolver::new(&db)
            .resolve(&mut tx, None, Some("  "), a, RealmScope::Local)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_name_match_is_per_host() {
        let (db, a, b) = setup();
        let realms = RealmResolver::new(&db);
        let mut tx = db.begin();
        let on_a = realms.resolve(&mut tx, None, Some("WORKGROUP"), a, RealmScope::Local).unwrap();
        let again = realms.resolve(&mut tx, None, Some("workgroup"), a, RealmScope::Local).unwrap();
        let on_b = realms.resolve(&mut tx, None, Some("WORKGROUP"), b, RealmScope::Local).unwrap();
        assert_eq!(on_a.id, again.id);
        assert_ne!(on_a.id, on_b.id);
        assert_eq!(on_a.confidence, ScopeConfidence::Inferred);
    }

    #[test]
    fn test_domain_sighting_promotes_local_realm() {
        let (db, a, b) = setup();
        let realms = RealmResolver::new(&db);
        let mut tx = db.begin();
        let local = realms
            .resolve(&mut tx, Some("S-1-5-21-1-2-3"), None, a, RealmScope::Local)
            .unwrap();
        let seen = realms
            .resolve(&mut tx, Some("S-1-5-21-1-2-3"), None, b, RealmScope::Domain)
            .unwrap();
        assert_eq!(local.id, seen.id);
        assert_eq!(seen.scope, RealmScope::Domain);
        assert_eq!(seen.scope_host, None);
    }

    #[test]
    fn test_conflicting_address_is_not_a_name_match() {
        let (db, a, _) = setup();
        let realms = RealmResolver::new(&db);
        let mut tx = db.begin();
        let first = realms
            .resolve(&mut tx, Some("S-1-5-21-9-9-9"), Some("CORP"), a, RealmScope::Local)
            .unwrap();
        let second = realms
            .resolve(&mut tx, Some("S-1-5-21-8-8-8"), Some("CORP"), a, RealmScope::Local)
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_merge_into_merged_realm_rejected() {
        let (db, a, _) = setup();
        let realms = RealmResolver::new(&db);
        let mut tx = db.begin();
        let x = realms.resolve(&mut tx, None, Some("x"), a, RealmScope::Local).unwrap();
        let y = realms.resolve(&mut tx, None, Some("y"), a, RealmScope::Local).unwrap();
        let z = realms.resolve(&mut tx, None, Some("z"), a, RealmScope::Local).unwrap();
        realms.merge_realms(&mut tx, x.id, y.id).unwrap();
        let err = realms.merge_realms(&mut tx, z.id, x.id).unwrap_err();
        assert!(err.is_validation());
    }
}
