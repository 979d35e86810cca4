//! Scenario catalogue: one per join strategy plus hand-built edge cases.

use shardjoin_core::partition_store::{FIRST_ORDER_ID, USER_ROSTER};
use shardjoin_core::{JoinVariant, Order, PartitionedStore, StoreError, User};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// SJ-001: unpartitioned tables, throttled full scan
    FullScan,

    /// SJ-002: two shards per relation, redirect on miss
    Partitioned,

    /// SJ-003: partitioned secondary index lookup
    Indexed,

    /// SJ-004: every shard-0 subject's order lives on the sibling shard
    CrossShard,

    /// SJ-005: one order references a user that does not exist
    NoMatch,

    /// SJ-006: index lookup finds no entry for one subject
    IndexedOrphan,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::FullScan,
            ScenarioId::Partitioned,
            ScenarioId::Indexed,
            ScenarioId::CrossShard,
            ScenarioId::NoMatch,
            ScenarioId::IndexedOrphan,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::FullScan => "full_scan",
            ScenarioId::Partitioned => "partitioned",
            ScenarioId::Indexed => "indexed",
            ScenarioId::CrossShard => "cross_shard",
            ScenarioId::NoMatch => "no_match",
            ScenarioId::IndexedOrphan => "indexed_orphan",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::FullScan => "10 users x 10 orders, row-by-row scan per user",
            ScenarioId::Partitioned => "2 user shards probe 2 order shards, redirect when shard 0 misses",
            ScenarioId::Indexed => "2 user shards resolve a range-partitioned index, then fetch the order",
            ScenarioId::CrossShard => "Shard-0 subjects all own orders on order shard 1",
            ScenarioId::NoMatch => "Judy owns no order; the full scan exhausts the table",
            ScenarioId::IndexedOrphan => "Judy has no index entry; her probe rests and misses",
        }
    }

    /// Join strategy the scenario runs.
    pub fn variant(&self) -> JoinVariant {
        match self {
            ScenarioId::FullScan | ScenarioId::NoMatch => JoinVariant::FullScan,
            ScenarioId::Partitioned | ScenarioId::CrossShard => JoinVariant::Partitioned,
            ScenarioId::Indexed | ScenarioId::IndexedOrphan => JoinVariant::Indexed,
        }
    }

    /// Hand-built store for edge-case scenarios; `None` means a randomized one.
    pub fn fixture(&self) -> Result<Option<PartitionedStore>, StoreError> {
        match self {
            ScenarioId::CrossShard => cross_shard_store().map(Some),
            ScenarioId::NoMatch => no_match_store().map(Some),
            ScenarioId::IndexedOrphan => indexed_orphan_store().map(Some),
            _ => Ok(None),
        }
    }
}

fn roster() -> Vec<User> {
    USER_ROSTER
        .iter()
        .map(|(id, name)| User::new(*id, name))
        .collect()
}

fn orders_owned_by(first_id: i64, owners: &[i64]) -> Vec<Order> {
    owners
        .iter()
        .enumerate()
        .map(|(i, owner)| Order::new(first_id + i as i64, *owner))
        .collect()
}

/// Order shard 0 belongs to users 6..=10, shard 1 to users 1..=5.
fn cross_shard_store() -> Result<PartitionedStore, StoreError> {
    let users = roster();
    let (low, high) = users.split_at(users.len() / 2);
    PartitionedStore::from_parts(
        JoinVariant::Partitioned,
        vec![low.to_vec(), high.to_vec()],
        vec![
            orders_owned_by(FIRST_ORDER_ID, &[6, 7, 8, 9, 10]),
            orders_owned_by(FIRST_ORDER_ID + 5, &[1, 2, 3, 4, 5]),
        ],
    )
}

/// User 10 owns nothing; order 104 points at a user that does not exist.
fn no_match_store() -> Result<PartitionedStore, StoreError> {
    PartitionedStore::from_parts(
        JoinVariant::FullScan,
        vec![roster()],
        vec![orders_owned_by(FIRST_ORDER_ID, &[3, 1, 4, 99, 5, 9, 2, 6, 8, 7])],
    )
}

/// Same ownership as `no_match_store`, split across two shards with an index.
fn indexed_orphan_store() -> Result<PartitionedStore, StoreError> {
    let users = roster();
    let (low, high) = users.split_at(users.len() / 2);
    PartitionedStore::from_parts(
        JoinVariant::Indexed,
        vec![low.to_vec(), high.to_vec()],
        vec![
            orders_owned_by(FIRST_ORDER_ID, &[3, 1, 4, 99, 5]),
            orders_owned_by(FIRST_ORDER_ID + 5, &[9, 2, 6, 8, 7]),
        ],
    )
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full_scan" | "fullscan" | "join1" | "sj-001" => Ok(ScenarioId::FullScan),
            "partitioned" | "join2" | "sj-002" => Ok(ScenarioId::Partitioned),
            "indexed" | "join3" | "sj-003" => Ok(ScenarioId::Indexed),
            "cross_shard" | "crossshard" | "sj-004" => Ok(ScenarioId::CrossShard),
            "no_match" | "nomatch" | "sj-005" => Ok(ScenarioId::NoMatch),
            "indexed_orphan" | "indexedorphan" | "sj-006" => Ok(ScenarioId::IndexedOrphan),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
