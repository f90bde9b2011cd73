use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::content;
use crate::error::{CaseResult, ValidationError};
use crate::ids::{AddressId, DataSourceId, HostId, ObjectId};
use crate::storage::tables::{AddressUsage, HostAddressMap, HostAddresses, HostnameIpMap};
use crate::storage::{CaseDb, Reader, StorageError, TableLock, Transaction};

use super::registry::require_active_host;
use super::{EdgeAttribution, HostAddress, HostAddressType, UsageRow};

fn mac_pattern() -> &'static Regex {
    static MAC: OnceLock<Regex> = OnceLock::new();
    MAC.get_or_init(|| {
        Regex::new(r"^[0-9a-f]{2}([:-][0-9a-f]{2}){5}$").expect("MAC pattern compiles")
    })
}

/// Drop an IPv6 zone index (`fe80::1%eth0`).
fn strip_zone(text: &str) -> &str {
    text.split_once('%').map_or(text, |(addr, _)| addr)
}

fn invalid(address: &str, address_type: HostAddressType) -> ValidationError {
    ValidationError::InvalidAddress {
        address: address.to_string(),
        kind: address_type.label(),
    }
}

/// Resolve `DnsAuto` and normalize `text` for storage and lookup.
pub(crate) fn normalize(
    address_type: HostAddressType,
    text: &str,
) -> Result<(HostAddressType, String), ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyName { field: "address" });
    }

    let resolved = match address_type {
        HostAddressType::DnsAuto => {
            if text.parse::<Ipv4Addr>().is_ok() {
                HostAddressType::Ipv4
            } else if text.contains(':') && strip_zone(text).parse::<Ipv6Addr>().is_ok() {
                HostAddressType::Ipv6
            } else {
                HostAddressType::Hostname
            }
        }
        other => other,
    };

    let normalized = match resolved {
        HostAddressType::Ipv4 => {
            text.parse::<Ipv4Addr>()
                .map_err(|_| invalid(text, resolved))?;
            text.to_string()
        }
        HostAddressType::Ipv6 => {
            let bare = strip_zone(text);
            bare.parse::<Ipv6Addr>()
                .map_err(|_| invalid(text, resolved))?;
            bare.to_lowercase()
        }
        HostAddressType::Ethernet => {
            let lowered = text.to_lowercase();
            if !mac_pattern().is_match(&lowered) {
                return Err(invalid(text, resolved));
            }
            lowered
        }
        HostAddressType::Hostname | HostAddressType::DnsAuto => text.to_lowercase(),
    };
    Ok((resolved, normalized))
}

fn find(
    reader: &impl Reader,
    address_type: HostAddressType,
    normalized: &str,
) -> Result<Option<HostAddress>, StorageError> {
    Ok(reader
        .scan::<HostAddresses, _>(|_, a| a.address_type == address_type && a.address == normalized)?
        .into_iter()
        .next()
        .map(|(_, a)| a))
}

fn resolve_ids(
    reader: &impl Reader,
    ids: impl IntoIterator<Item = AddressId>,
) -> Result<Vec<HostAddress>, StorageError> {
    let mut out = Vec::new();
    for id in ids {
        if let Some(address) = reader.get::<HostAddresses>(&id)? {
            out.push(address);
        }
    }
    Ok(out)
}

/// Handle on the network addresses of one case.
#[derive(Debug, Clone, Copy)]
pub struct AddressRegistry<'a> {
    db: &'a CaseDb,
}

impl<'a> AddressRegistry<'a> {
    pub(crate) fn new(db: &'a CaseDb) -> Self {
        Self { db }
    }

    /// Get or create an address by resolved type and normalized text.
    ///
    /// # Errors
    /// Validation error for an empty or malformed address.
    pub fn create_address(
        &self,
        tx: &mut Transaction<'_>,
        address_type: HostAddressType,
        text: &str,
    ) -> CaseResult<HostAddress> {
        let (address_type, normalized) = normalize(address_type, text)?;
        tx.lock(TableLock::Hosts)?;
        if let Some(existing) = find(tx, address_type, &normalized)? {
            return Ok(existing);
        }

        let id = AddressId::new(tx.allocate_id());
        let address = HostAddress {
            id,
            address_type,
            address: normalized,
        };
        tx.put::<HostAddresses>(id, address.clone());
        debug!(address = %address.address, kind = %address_type, "host address created");
        Ok(address)
    }

    /// # Errors
    /// Validation error for a malformed address; store access failure.
    pub fn get_address(
        &self,
        address_type: HostAddressType,
        text: &str,
    ) -> CaseResult<Option<HostAddress>> {
        let (address_type, normalized) = normalize(address_type, text)?;
        Ok(find(&self.db.read_view()?, address_type, &normalized)?)
    }

    /// # Errors
    /// Store access failure only.
    pub fn get(&self, id: AddressId) -> CaseResult<Option<HostAddress>> {
        Ok(self.db.read_view()?.get::<HostAddresses>(&id)?)
    }

    /// Record that `host` had `address`. Repeating an assignment is a no-op.
    ///
    /// # Errors
    /// Validation error for a merged host; store access failure for unknown
    /// rows.
    pub fn assign_host_to_address(
        &self,
        tx: &mut Transaction<'_>,
        host: HostId,
        address: AddressId,
        attribution: EdgeAttribution,
    ) -> CaseResult<()> {
        tx.lock(TableLock::Hosts)?;
        require_active_host(tx, host)?;
        tx.require::<HostAddresses>(&address)?;
        if tx.get::<HostAddressMap>(&(host, address))?.is_none() {
            tx.put::<HostAddressMap>((host, address), attribution);
        }
        Ok(())
    }

    /// Addresses assigned to `host`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn addresses_assigned_to(&self, host: HostId) -> CaseResult<Vec<HostAddress>> {
        let view = self.db.read_view()?;
        let edges = view.scan::<HostAddressMap, _>(|(h, _), _| *h == host)?;
        Ok(resolve_ids(&view, edges.into_iter().map(|((_, a), _)| a))?)
    }

    /// Record that `hostname` resolved to `ip`. Repeating a mapping is a
    /// no-op.
    ///
    /// # Errors
    /// Validation error if `hostname` is not a hostname address or `ip` is
    /// not an IP address.
    pub fn add_hostname_ip_mapping(
        &self,
        tx: &mut Transaction<'_>,
        hostname: AddressId,
        ip: AddressId,
        attribution: EdgeAttribution,
    ) -> CaseResult<()> {
        tx.lock(TableLock::Hosts)?;
        let name = tx.require::<HostAddresses>(&hostname)?;
        if name.address_type != HostAddressType::Hostname {
            return Err(invalid(&name.address, HostAddressType::Hostname).into());
        }
        let target = tx.require::<HostAddresses>(&ip)?;
        if !target.address_type.is_ip() {
            return Err(invalid(&target.address, HostAddressType::Ipv4).into());
        }
        if tx.get::<HostnameIpMap>(&(hostname, ip))?.is_none() {
            tx.put::<HostnameIpMap>((hostname, ip), attribution);
        }
        Ok(())
    }

    /// IP addresses `hostname` was seen resolving to.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn ip_addresses_for(&self, hostname: &str) -> CaseResult<Vec<HostAddress>> {
        let Ok((_, normalized)) = normalize(HostAddressType::Hostname, hostname) else {
            return Ok(Vec::new());
        };
        let view = self.db.read_view()?;
        let Some(name) = find(&view, HostAddressType::Hostname, &normalized)? else {
            return Ok(Vec::new());
        };
        let edges = view.scan::<HostnameIpMap, _>(|(n, _), _| *n == name.id)?;
        Ok(resolve_ids(&view, edges.into_iter().map(|((_, ip), _)| ip))?)
    }

    /// Hostnames seen resolving to `ip`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn hostnames_for_ip(&self, ip: &str) -> CaseResult<Vec<HostAddress>> {
        let Ok((address_type, normalized)) = normalize(HostAddressType::DnsAuto, ip) else {
            return Ok(Vec::new());
        };
        if !address_type.is_ip() {
            return Ok(Vec::new());
        }
        let view = self.db.read_view()?;
        let Some(target) = find(&view, address_type, &normalized)? else {
            return Ok(Vec::new());
        };
        let edges = view.scan::<HostnameIpMap, _>(|(_, i), _| *i == target.id)?;
        Ok(resolve_ids(&view, edges.into_iter().map(|((n, _), _)| n))?)
    }

    /// Record that `content` referenced `address`. Repeating is a no-op.
    ///
    /// # Errors
    /// Store access failure for an unknown content object or address.
    pub fn add_usage(
        &self,
        tx: &mut Transaction<'_>,
        content: ObjectId,
        address: AddressId,
    ) -> CaseResult<()> {
        let data_source = content::data_source_of(tx, content)?
            .ok_or_else(|| StorageError::not_found("tsk_objects", content))?;
        tx.require::<HostAddresses>(&address)?;
        if tx.get::<AddressUsage>(&(content, address))?.is_none() {
            tx.put::<AddressUsage>((content, address), UsageRow { data_source });
        }
        Ok(())
    }

    /// # Errors
    /// Store access failure only.
    pub fn addresses_used_by_content(&self, content: ObjectId) -> CaseResult<Vec<HostAddress>> {
        let view = self.db.read_view()?;
        let edges = view.scan::<AddressUsage, _>(|(c, _), _| *c == content)?;
        Ok(resolve_ids(&view, edges.into_iter().map(|((_, a), _)| a))?)
    }

    /// Distinct addresses used by any content of `data_source`.
    ///
    /// # Errors
    /// Store access failure only.
    pub fn addresses_used_on_data_source(
        &self,
        data_source: DataSourceId,
    ) -> CaseResult<Vec<HostAddress>> {
        let view = self.db.read_view()?;
        let mut ids: Vec<AddressId> = view
            .scan::<AddressUsage, _>(|_, usage| usage.data_source == data_source)?
            .into_iter()
            .map(|((_, a), _)| a)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(resolve_ids(&view, ids)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_classification() {
        assert_eq!(
            normalize(HostAddressType::DnsAuto, "10.1.2.3").unwrap().0,
            HostAddressType::Ipv4
        );
        assert_eq!(
            normalize(HostAddressType::DnsAuto, "2001:0DB8::1").unwrap(),
            (HostAddressType::Ipv6, "2001:0db8::1".to_string())
        );
        assert_eq!(
            normalize(HostAddressType::DnsAuto, " Mail.Example.COM ").unwrap(),
            (HostAddressType::Hostname, "mail.example.com".to_string())
        );
    }

    #[test]
    fn test_ipv6_zone_index_stripped() {
        let (_, text) = normalize(HostAddressType::Ipv6, "fe80::1%eth0").unwrap();
        assert_eq!(text, "fe80::1");
    }

    #[test]
    fn test_explicit_type_must_parse() {
        assert!(normalize(HostAddressType::Ipv4, "300.1.1.1").is_err());
        assert!(normalize(HostAddressType::Ipv6, "not-an-ip").is_err());
        assert!(normalize(HostAddressType::Ethernet, "00:11:22").is_err());
        assert_eq!(
            normalize(HostAddressType::Ethernet, "00-1A-2B-3C-4D-5E").unwrap().1,
            "00-1a-2b-3c-4d-5e"
        );
    }

    #[test]
    fn test_empty_address_rejected() {
        assert!(matches!(
            normalize(HostAddressType::DnsAuto, "   "),
            Err(ValidationError::EmptyName { .. })
        ));
    }
}
