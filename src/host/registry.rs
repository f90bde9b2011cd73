use tracing::{debug, info};

use crate::account::repoint_attribute_hosts;
use crate::content::DataSource;
use crate::error::{CaseResult, ValidationError};
use crate::events::CaseEvent;
use crate::ids::{DataSourceId, HostId};
use crate::realm::RealmResolver;
use crate::storage::tables::{DataSources, HostAddressMap, Hosts};
use crate::storage::{CaseDb, Reader, TableLock, Transaction};

use super::{Host, HostStatus};

/// Handle on the hosts of one case.
#[derive(Debug, Clone, Copy)]
pub struct HostRegistry<'a> {
    db: &'a CaseDb,
}

fn normalized_name(name: &str) -> Result<&str, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyName { field: "host name" });
    }
    Ok(name)
}

fn active_by_name(reader: &impl Reader, name: &str) -> CaseResult<Option<Host>> {
    let lowered = name.to_lowercase();
    Ok(reader
        .scan::<Hosts, _>(|_, h| h.is_active() && h.name.to_lowercase() == lowered)?
        .into_iter()
        .next()
        .map(|(_, h)| h))
}

pub(crate) fn require_active_host(reader: &impl Reader, id: HostId) -> CaseResult<Host> {
    let host = reader.require::<Hosts>(&id)?;
    if !host.is_active() {
        return Err(ValidationError::InactiveHost { id }.into());
    }
    Ok(host)
}

impl<'a> HostRegistry<'a> {
    pub(crate) fn new(db: &'a CaseDb) -> Self {
        Self { db }
    }

    /// Get or create the active host called `name` (case-insensitive).
    ///
    /// # Errors
    /// Validation error for an empty name.
    pub fn create_host(&self, tx: &mut Transaction<'_>, name: &str) -> CaseResult<Host> {
        let name = normalized_name(name)?;
        tx.lock(TableLock::Hosts)?;
        if let Some(existing) = active_by_name(tx, name)? {
            return Ok(existing);
        }

        let id = HostId::new(tx.allocate_id());
        let host = Host {
            id,
            name: name.to_string(),
            status: HostStatus::Active,
        };
        tx.put::<Hosts>(id, host.clone());
        debug!(host = %id, name, "host created");
        Ok(host)
    }

    /// Active host called `name`. Merged hosts never match.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn host_by_name(&self, name: &str) -> CaseResult<Option<Host>> {
        active_by_name(&self.db.read_view()?, name.trim())
    }

    /// Host row by id, whatever its status.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn get(&self, id: HostId) -> CaseResult<Option<Host>> {
        Ok(self.db.read_view()?.get::<Hosts>(&id)?)
    }

    /// The host a data source is attached to.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn host_of_data_source(&self, data_source: DataSourceId) -> CaseResult<Option<Host>> {
        let view = self.db.read_view()?;
        let Some(ds) = view.get::<DataSources>(&data_source)? else {
            return Ok(None);
        };
        Ok(view.get::<Hosts>(&ds.host)?)
    }

    /// All active hosts, in id order.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn hosts(&self) -> CaseResult<Vec<Host>> {
        Ok(self
            .db
            .read_view()?
            .scan::<Hosts, _>(|_, h| h.is_active())?
            .into_iter()
            .map(|(_, h)| h)
            .collect())
    }

    /// Data sources attached to `host`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn data_sources(&self, host: HostId) -> CaseResult<Vec<DataSource>> {
        Ok(self
            .db
            .read_view()?
            .scan::<DataSources, _>(|_, ds| ds.host == host)?
            .into_iter()
            .map(|(_, ds)| ds)
            .collect())
    }

    /// Rename an active host.
    ///
    /// # Errors
    /// Validation error if the name is empty, taken by another active host,
    /// or the host has been merged.
    pub fn rename(&self, tx: &mut Transaction<'_>, id: HostId, new_name: &str) -> CaseResult<Host> {
        let new_name = normalized_name(new_name)?;
        tx.lock(TableLock::Hosts)?;
        let mut host = require_active_host(tx, id)?;
        if let Some(other) = active_by_name(tx, new_name)? {
            if other.id != id {
                return Err(ValidationError::DuplicateHostName {
                    name: new_name.to_string(),
                }
                .into());
            }
        }
        host.name = new_name.to_string();
        tx.put::<Hosts>(id, host.clone());
        Ok(host)
    }

    /// Fold `src` into `dest`.
    ///
    /// Every realm scoped to `src` is merged into a matching local realm of
    /// `dest` or moved there. Data sources, address assignments and
    /// attribute host references are then repointed, and `src` is left as a
    /// tombstone that no longer resolves by name.
    ///
    /// # Errors
    /// Validation error when merging a host into itself or either host is
    /// not active; store access failure otherwise. Nothing is applied on
    /// error once the transaction is dropped.
    pub fn merge_hosts(&self, tx: &mut Transaction<'_>, src: HostId, dest: HostId) -> CaseResult<()> {
        if src == dest {
            return Err(ValidationError::SelfMerge { kind: "host" }.into());
        }
        tx.lock(TableLock::Hosts)?;
        let mut source = require_active_host(tx, src)?;
        require_active_host(tx, dest)?;

        let realms = RealmResolver::new(self.db).move_or_merge_host_realms(tx, src, dest)?;

        let data_sources = tx.scan::<DataSources, _>(|_, ds| ds.host == src)?;
        for (id, mut ds) in data_sources {
            ds.host = dest;
            tx.put::<DataSources>(id, ds);
        }

        for ((_, address), attribution) in tx.scan::<HostAddressMap, _>(|(h, _), _| *h == src)? {
            tx.remove::<HostAddressMap>((src, address));
            if tx.get::<HostAddressMap>(&(dest, address))?.is_none() {
                tx.put::<HostAddressMap>((dest, address), attribution);
            }
        }

        tx.lock(TableLock::Accounts)?;
        repoint_attribute_hosts(tx, src, dest)?;

        source.status = HostStatus::Merged(dest);
        tx.put::<Hosts>(src, source);
        tx.emit(CaseEvent::HostsMerged {
            source: src,
            destination: dest,
        });
        info!(source = %src, destination = %dest, realms, "hosts merged");
        Ok(())
    }
}
