//! Case tables and per-transaction change sets.
//!
//! Every table is an ordered map from key to row. A [`ChangeSet`] holds one
//! [`Delta`] per table: the rows a transaction wrote (or removed) that are not
//! yet visible to anybody else. Committing applies the whole change set at once
//! under the table write lock, and the same change set is what the durable
//! journal records.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{DeserializeOwned, Deserializer, SeqAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::account::{OsAccount, OsAccountAttribute, OsAccountInstance};
use crate::blackboard::{AnalysisResult, ContentTag, TagName};
use crate::content::{Content, DataSource};
use crate::host::{EdgeAttribution, Host, HostAddress, UsageRow};
use crate::ids::{
    AccountId, AddressId, AttributeId, DataSourceId, HostId, ObjectId, RealmId, ResultId, TagId,
    TagNameId,
};
use crate::realm::Realm;
use crate::scoring::ScoreRow;

use super::traits::Table;

/// Pending writes for one table. `None` marks a removed row.
#[derive(Debug, Clone)]
pub(crate) struct Delta<K, V>(BTreeMap<K, Option<V>>);

impl<K, V> Default for Delta<K, V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K: Ord, V> Delta<K, V> {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn put(&mut self, key: K, row: V) {
        self.0.insert(key, Some(row));
    }

    pub(crate) fn remove(&mut self, key: K) {
        self.0.insert(key, None);
    }

    /// `Some(None)` means the row was removed by this change set.
    pub(crate) fn get(&self, key: &K) -> Option<Option<&V>> {
        self.0.get(key).map(Option::as_ref)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, Option<&V>)> {
        self.0.iter().map(|(k, v)| (k, v.as_ref()))
    }

    fn apply_to(self, committed: &mut BTreeMap<K, V>) {
        for (k, v) in self.0 {
            match v {
                Some(row) => {
                    committed.insert(k, row);
                }
                None => {
                    committed.remove(&k);
                }
            }
        }
    }
}

// Deltas are journaled as a sequence of pairs since most keys are not strings.
impl<K: Serialize, V: Serialize> Serialize for Delta<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de, K, V> Deserialize<'de> for Delta<K, V>
where
    K: Ord + DeserializeOwned,
    V: DeserializeOwned,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor<K, V>(PhantomData<(K, V)>);

        impl<'de, K, V> Visitor<'de> for PairsVisitor<K, V>
        where
            K: Ord + DeserializeOwned,
            V: DeserializeOwned,
        {
            type Value = Delta<K, V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a sequence of [key, row] pairs")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut map = BTreeMap::new();
                while let Some((k, v)) = seq.next_element::<(K, Option<V>)>()? {
                    map.insert(k, v);
                }
                Ok(Delta(map))
            }
        }

        deserializer.deserialize_seq(PairsVisitor(PhantomData))
    }
}

macro_rules! case_tables {
    ($( $(#[$doc:meta])* $field:ident: $marker:ident [$name:literal] <$key:ty => $row:ty> ),* $(,)?) => {
        /// Committed case state.
        #[derive(Debug, Default)]
        pub(crate) struct Tables {
            $( pub(crate) $field: BTreeMap<$key, $row>, )*
        }

        /// Writes buffered by one transaction.
        #[derive(Debug, Default, Clone, Serialize, Deserialize)]
        pub(crate) struct ChangeSet {
            /// Highest row id allocated by the transaction.
            #[serde(default)]
            pub(crate) high_water: i64,
            $(
                #[serde(default)]
                pub(crate) $field: Delta<$key, $row>,
            )*
        }

        impl ChangeSet {
            pub(crate) fn is_empty(&self) -> bool {
                true $( && self.$field.is_empty() )*
            }

            pub(crate) fn apply_to(self, tables: &mut Tables) {
                $( self.$field.apply_to(&mut tables.$field); )*
            }
        }

        $(
            $(#[$doc])*
            pub(crate) enum $marker {}

            impl Table for $marker {
                type Key = $key;
                type Row = $row;

                const NAME: &'static str = $name;

                fn committed(tables: &Tables) -> &BTreeMap<$key, $row> {
                    &tables.$field
                }

                fn pending(changes: &ChangeSet) -> &Delta<$key, $row> {
                    &changes.$field
                }

                fn pending_mut(changes: &mut ChangeSet) -> &mut Delta<$key, $row> {
                    &mut changes.$field
                }
            }
        )*
    };
}

case_tables! {
    /// Content objects and the data source each belongs to.
    objects: Objects ["tsk_objects"] <ObjectId => Content>,
    data_sources: DataSources ["data_source_info"] <DataSourceId => DataSource>,
    analysis_results: AnalysisResults ["tsk_analysis_results"] <ResultId => AnalysisResult>,
    tag_names: TagNames ["tag_names"] <TagNameId => TagName>,
    content_tags: ContentTags ["content_tags"] <TagId => ContentTag>,
    /// One aggregate score per scored object.
    aggregate_score: AggregateScores ["tsk_aggregate_score"] <ObjectId => ScoreRow>,
    hosts: Hosts ["tsk_hosts"] <HostId => Host>,
    host_addresses: HostAddresses ["tsk_host_addresses"] <AddressId => HostAddress>,
    /// Host to address assignments.
    host_address_map: HostAddressMap ["tsk_host_address_map"] <(HostId, AddressId) => EdgeAttribution>,
    /// Hostname address to IP address resolutions.
    hostname_ip_map: HostnameIpMap ["tsk_host_address_dns_ip_map"] <(AddressId, AddressId) => EdgeAttribution>,
    address_usage: AddressUsage ["tsk_host_address_usage"] <(ObjectId, AddressId) => UsageRow>,
    realms: Realms ["tsk_os_account_realms"] <RealmId => Realm>,
    accounts: Accounts ["tsk_os_accounts"] <AccountId => OsAccount>,
    account_attributes: AccountAttributes ["tsk_os_account_attributes"] <AttributeId => OsAccountAttribute>,
    /// Keyed by (account, data source) so a repeated sighting is a no-op.
    account_instances: AccountInstances ["tsk_os_account_instances"] <(AccountId, DataSourceId) => OsAccountInstance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_apply_put_and_remove() {
        let mut committed: BTreeMap<i64, &str> = BTreeMap::new();
        committed.insert(1, "a");
        committed.insert(2, "b");

        let mut delta = Delta::default();
        delta.put(3, "c");
        delta.remove(1);
        delta.put(2, "B");
        delta.apply_to(&mut committed);

        assert_eq!(committed.get(&1), None);
        assert_eq!(committed.get(&2), Some(&"B"));
        assert_eq!(committed.get(&3), Some(&"c"));
    }

    #[test]
    fn test_delta_serializes_tuple_keys() {
        let mut delta: Delta<(i64, i64), String> = Delta::default();
        delta.put((1, 2), "edge".to_string());
        delta.remove((3, 4));

        let json = serde_json::to_string(&delta).unwrap();
        let back: Delta<(i64, i64), String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&(1, 2)), Some(Some(&"edge".to_string())));
        assert_eq!(back.get(&(3, 4)), Some(None));
    }

    #[test]
    fn test_empty_change_set() {
        let mut changes = ChangeSet::default();
        assert!(changes.is_empty());
        changes.high_water = 10;
        assert!(changes.is_empty());
        changes.aggregate_score.put(
            ObjectId::new(1),
            ScoreRow {
                data_source: None,
                score: crate::scoring::Score::NOTABLE,
            },
        );
        assert!(!changes.is_empty());
    }
}
