//! Canonical hosts and network addresses.

mod address;
mod registry;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AddressId, DataSourceId, HostId, RecordStatus};

pub use address::AddressRegistry;
pub use registry::HostRegistry;
pub(crate) use registry::require_active_host;

/// Lifecycle of a host row.
pub type HostStatus = RecordStatus<HostId>;

/// A machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Row id.
    pub id: HostId,
    /// Unique among active hosts, compared case-insensitively.
    pub name: String,
    /// `Merged` once folded into another host.
    pub status: HostStatus,
}

impl Host {
    /// Returns true unless this host has been merged away.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Kind of a host address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAddressType {
    /// Classify from the text. Never stored.
    DnsAuto,
    /// Dotted-quad IPv4.
    Ipv4,
    /// IPv6, stored lowercase without a zone index.
    Ipv6,
    /// MAC address.
    Ethernet,
    /// DNS or NetBIOS name, stored lowercase.
    Hostname,
}

impl HostAddressType {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::DnsAuto => "auto",
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
            Self::Ethernet => "Ethernet",
            Self::Hostname => "hostname",
        }
    }

    /// Returns true for IPv4 and IPv6.
    #[must_use]
    pub fn is_ip(self) -> bool {
        matches!(self, Self::Ipv4 | Self::Ipv6)
    }
}

impl fmt::Display for HostAddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A normalized network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddress {
    /// Row id.
    pub id: AddressId,
    /// Resolved type; never `DnsAuto`.
    pub address_type: HostAddressType,
    /// Normalized text.
    pub address: String,
}

/// When and from which data source an edge was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeAttribution {
    /// When the edge was observed.
    pub time: Option<DateTime<Utc>>,
    /// Data source the edge was observed in.
    pub source: Option<DataSourceId>,
}

/// Content-to-address usage edge payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct UsageRow {
    pub data_source: DataSourceId,
}
