//! Minimal content catalog.
//!
//! Ingestion owns the real object tree; the catalog only records what the
//! ledger and the registries need: which data source each object belongs to,
//! and which host each data source was acquired from.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CaseResult, ValidationError};
use crate::host::{require_active_host, HostRegistry};
use crate::ids::{DataSourceId, HostId, ObjectId};
use crate::storage::tables::{DataSources, Objects};
use crate::storage::{CaseDb, Reader, TableLock, Transaction};

/// An acquired image or logical file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// Row id; also the id of its root content object.
    pub id: DataSourceId,
    /// Display name.
    pub name: String,
    /// Every data source belongs to exactly one host.
    pub host: HostId,
}

/// A content object inside a data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// Row id.
    pub id: ObjectId,
    /// Display name.
    pub name: String,
    /// Owning data source.
    pub data_source: DataSourceId,
}

/// Handle on the content catalog of one case.
#[derive(Debug, Clone, Copy)]
pub struct ContentCatalog<'a> {
    db: &'a CaseDb,
}

impl<'a> ContentCatalog<'a> {
    pub(crate) fn new(db: &'a CaseDb) -> Self {
        Self { db }
    }

    /// Register a data source. Without a host, a host named `"<name> Host"`
    /// is looked up or created for it.
    ///
    /// # Errors
    /// Validation error for an empty name or an unknown or merged host.
    pub fn add_data_source(
        &self,
        tx: &mut Transaction<'_>,
        name: &str,
        host: Option<HostId>,
    ) -> CaseResult<DataSource> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName {
                field: "data source name",
            }
            .into());
        }

        // Held until commit so a concurrent host merge sees this data source.
        tx.lock(TableLock::Hosts)?;
        let host = match host {
            Some(id) => require_active_host(tx, id)?.id,
            None => {
                HostRegistry::new(self.db)
                    .create_host(tx, &format!("{name} Host"))?
                    .id
            }
        };

        let id = DataSourceId::new(tx.allocate_id());
        let data_source = DataSource {
            id,
            name: name.to_string(),
            host,
        };
        tx.put::<DataSources>(id, data_source.clone());
        // A data source is the root content object of its own tree.
        tx.put::<Objects>(
            id.object_id(),
            Content {
                id: id.object_id(),
                name: name.to_string(),
                data_source: id,
            },
        );
        debug!(data_source = %id, host = %host, "data source added");
        Ok(data_source)
    }

    /// Register a content object under `data_source`.
    ///
    /// # Errors
    /// Store access failure if the data source does not exist.
    pub fn add_content(
        &self,
        tx: &mut Transaction<'_>,
        data_source: DataSourceId,
        name: &str,
    ) -> CaseResult<Content> {
        tx.require::<DataSources>(&data_source)?;
        let id = ObjectId::new(tx.allocate_id());
        let content = Content {
            id,
            name: name.to_string(),
            data_source,
        };
        tx.put::<Objects>(id, content.clone());
        Ok(content)
    }

    /// # Errors
    /// Store access failure only.
    pub fn get(&self, object: ObjectId) -> CaseResult<Option<Content>> {
        Ok(self.db.read_view()?.get::<Objects>(&object)?)
    }

    /// # Errors
    /// Store access failure only.
    pub fn data_source(&self, id: DataSourceId) -> CaseResult<Option<DataSource>> {
        Ok(self.db.read_view()?.get::<DataSources>(&id)?)
    }

    /// The data source `object` belongs to, if the object is known.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn data_source_of(&self, object: ObjectId) -> CaseResult<Option<DataSourceId>> {
        Ok(self.get(object)?.map(|c| c.data_source))
    }
}

pub(crate) fn data_source_of(
    reader: &impl Reader,
    object: ObjectId,
) -> CaseResult<Option<DataSourceId>> {
    Ok(reader.get::<Objects>(&object)?.map(|c| c.data_source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaseConfig;
    use crate::storage::tables::Hosts;

    #[test]
    fn test_data_source_without_host_gets_named_host() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let catalog = ContentCatalog::new(&db);
        let mut tx = db.begin();
        let ds = catalog.add_data_source(&mut tx, "laptop.E01", None).unwrap();
        tx.commit().unwrap();

        let host = db.read_view().unwrap().get::<Hosts>(&ds.host).unwrap().unwrap();
        assert_eq!(host.name, "laptop.E01 Host");
        assert_eq!(catalog.data_source_of(ds.id.object_id()).unwrap(), Some(ds.id));
    }

    #[test]
    fn test_content_belongs_to_data_source() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let catalog = ContentCatalog::new(&db);
        let mut tx = db.begin();
        let ds = catalog.add_data_source(&mut tx, "phone", None).unwrap();
        let file = catalog.add_content(&mut tx, ds.id, "sms.db").unwrap();
        tx.commit().unwrap();
        assert_eq!(catalog.data_source_of(file.id).unwrap(), Some(ds.id));
        assert_eq!(catalog.get(ObjectId::new(10_000)).unwrap(), None);
    }

    #[test]
    fn test_empty_data_source_name_rejected() {
        let db = CaseDb::in_memory(&CaseConfig::default());
        let mut tx = db.begin();
        let err = ContentCatalog::new(&db)
            .add_data_source(&mut tx, "  ", None)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
