//! Relational data model shared by every join strategy.

use serde::{Deserialize, Serialize};
use shardjoin_env::MachineId;

/// A row of the `Users` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
}

impl User {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

/// A row of the `Orders` relation.
///
/// `owner_user_id` references exactly one `User::id`, which may live on a
/// different machine than the order itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub owner_user_id: i64,
    pub item: String,
}

impl Order {
    /// Creates an order whose item name is derived from its id.
    pub fn new(id: i64, owner_user_id: i64) -> Self {
        Self {
            id,
            owner_user_id,
            item: format!("Item{}", id),
        }
    }
}

/// Secondary index row projecting `User::id` onto `Order::id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub user_id: i64,
    pub order_id: i64,
}

impl From<&Order> for IndexEntry {
    fn from(order: &Order) -> Self {
        Self {
            user_id: order.owner_user_id,
            order_id: order.id,
        }
    }
}

/// A matched (User, Order) pair. Never mutated once accumulated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedPair {
    pub user: User,
    pub order: Order,
    /// Machine the order was read from
    pub order_machine: MachineId,
}

/// Location of a row: a machine plus the row offset inside its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowRef {
    pub machine: MachineId,
    pub row: usize,
}

impl RowRef {
    pub fn new(machine: MachineId, row: usize) -> Self {
        Self { machine, row }
    }
}

/// The three join strategies being visualized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinVariant {
    /// One unpartitioned `Users` table joined by scanning one `Orders` table
    #[default]
    FullScan,

    /// Two user shards probing two order shards, with a redirect hop
    Partitioned,

    /// Two user shards resolving a partitioned secondary index first
    Indexed,
}

impl JoinVariant {
    pub fn all() -> Vec<JoinVariant> {
        vec![
            JoinVariant::FullScan,
            JoinVariant::Partitioned,
            JoinVariant::Indexed,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            JoinVariant::FullScan => "full_scan",
            JoinVariant::Partitioned => "partitioned",
            JoinVariant::Indexed => "indexed",
        }
    }

    /// Number of shards each relation is split into.
    pub fn shard_count(&self) -> usize {
        match self {
            JoinVariant::FullScan => 1,
            JoinVariant::Partitioned | JoinVariant::Indexed => 2,
        }
    }

    pub fn has_index(&self) -> bool {
        matches!(self, JoinVariant::Indexed)
    }
}

impl std::fmt::Display for JoinVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JoinVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "join1" | "full_scan" | "fullscan" => Ok(JoinVariant::FullScan),
            "join2" | "partitioned" => Ok(JoinVariant::Partitioned),
            "join3" | "indexed" => Ok(JoinVariant::Indexed),
            _ => Err(format!("Unknown join variant: {}", s)),
        }
    }
}
