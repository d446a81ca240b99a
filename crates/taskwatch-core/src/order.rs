//! Local view of remote work orders.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One remote work order as observed locally.
///
/// Field names on disk follow the remote listing (`created_time`,
/// `peer_income`) so that recorded orders read like the API payloads
/// they were projected from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: u64,
    pub name: String,
    pub detail: String,
    /// Remote-assigned creation time, kept in the remote's own offset.
    #[serde(rename = "created_time")]
    pub created_at: DateTime<FixedOffset>,
    /// Payout per unit of work.
    #[serde(rename = "peer_income")]
    pub unit_income: f64,
    /// Finished plus in-progress work units.
    pub points: u64,
}

impl OrderSummary {
    /// Creation time as `YYYY-MM-DD<br />HH:MM:SS` in the order's own offset.
    pub fn created_html(&self) -> String {
        self.created_at.format("%Y-%m-%d<br />%H:%M:%S").to_string()
    }
}

/// Everything the watcher remembers between polls: the highest id ever
/// announced as new, and the last observed summary per order id.
///
/// Entries are never removed; orders that drop off the remote listing stay
/// here with their last known points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderLedger {
    pub highest_id_seen: u64,
    pub orders: BTreeMap<u64, OrderSummary>,
}

impl OrderLedger {
    /// Recorded points for `id`, or 0 if the order was never recorded.
    pub fn points_of(&self, id: u64) -> u64 {
        self.orders.get(&id).map_or(0, |o| o.points)
    }

    /// Up to `limit` recorded orders, highest id first.
    pub fn latest(&self, limit: usize) -> impl Iterator<Item = &OrderSummary> {
        self.orders.values().rev().take(limit)
    }
}

/// Serde adapter writing an id-keyed map with keys in descending order.
///
/// Use with `#[serde(with = "taskwatch_core::descending_keys")]`. Key order is
/// cosmetic; reading accepts any order.
pub mod descending_keys {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<V, S>(map: &BTreeMap<u64, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_map(map.iter().rev().map(|(k, v)| (k.to_string(), v)))
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<BTreeMap<u64, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        BTreeMap::<u64, V>::deserialize(deserializer)
    }
}
