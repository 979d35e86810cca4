//! The Partitioned Store - `Users`, `Orders` and `IndexEntries` split into
//! machine-local shards.
//!
//! The store is built once per reset from a randomized owner assignment and
//! is read-only afterwards. Shard membership is:
//! - **Users**: static by construction (the roster is cut into equal halves)
//! - **Orders**: ids are cut into equal halves, owners drawn from one shuffled
//!   permutation of every user id, so cross-shard references are common
//! - **IndexEntries**: range-partitioned; entries are sorted by `user_id`
//!   and cut, so shard 0 holds the lower user ids

use crate::model::{IndexEntry, JoinVariant, Order, User};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

/// The fixed user roster, ids 1..=10.
pub const USER_ROSTER: [(i64, &str); 10] = [
    (1, "Alice"),
    (2, "Bob"),
    (3, "Charlie"),
    (4, "David"),
    (5, "Eve"),
    (6, "Frank"),
    (7, "Grace"),
    (8, "Heidi"),
    (9, "Ivan"),
    (10, "Judy"),
];

/// Id of the first generated order; orders are numbered consecutively.
pub const FIRST_ORDER_ID: i64 = 101;

/// Errors raised when a store is assembled from explicit shards.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{relation} needs {expected} shard(s) for this variant, got {found}")]
    ShardCount {
        relation: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("User shards must hold the same number of rows")]
    UnevenUserShards,

    #[error("Store has no users to join")]
    NoUsers,

    #[error("Duplicate user id: {0}")]
    DuplicateUserId(i64),

    #[error("Duplicate order id: {0}")]
    DuplicateOrderId(i64),
}

/// A relation split into disjoint shards, one per simulated machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation<T> {
    shards: Vec<Vec<T>>,
}

impl<T> Relation<T> {
    pub fn new(shards: Vec<Vec<T>>) -> Self {
        Self { shards }
    }

    pub fn empty() -> Self {
        Self { shards: Vec::new() }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Rows of one shard; empty when the shard does not exist.
    pub fn shard(&self, shard: usize) -> &[T] {
        self.shards.get(shard).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn shards(&self) -> &[Vec<T>] {
        &self.shards
    }

    pub fn get(&self, shard: usize, row: usize) -> Option<&T> {
        self.shards.get(shard)?.get(row)
    }

    /// Total number of rows across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates rows in shard order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.shards.iter().flatten()
    }

    /// Linear scan across shards in shard order; first match wins.
    ///
    /// Returns `(shard, row)` of the matching row.
    pub fn position<P>(&self, mut predicate: P) -> Option<(usize, usize)>
    where
        P: FnMut(&T) -> bool,
    {
        self.shards.iter().enumerate().find_map(|(shard, rows)| {
            rows.iter().position(&mut predicate).map(|row| (shard, row))
        })
    }
}

/// Splits `rows` into `shard_count` consecutive chunks of equal size
/// (the last one shorter when the rows don't divide evenly).
fn cut<T: Clone>(rows: &[T], shard_count: usize) -> Vec<Vec<T>> {
    if shard_count == 0 {
        return Vec::new();
    }
    let chunk = rows.len().div_ceil(shard_count).max(1);
    let mut shards: Vec<Vec<T>> = rows.chunks(chunk).map(<[T]>::to_vec).collect();
    shards.resize_with(shard_count, Vec::new);
    shards
}

/// The three relations of one simulation, sharded for a given variant.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionedStore {
    variant: JoinVariant,
    users: Relation<User>,
    orders: Relation<Order>,
    index: Relation<IndexEntry>,
}

impl PartitionedStore {
    /// Builds a randomized store for `variant`.
    ///
    /// Every user owns exactly one order and every order has exactly one
    /// owner, whatever the rng produces.
    pub fn build<R: Rng + ?Sized>(variant: JoinVariant, rng: &mut R) -> Self {
        let shard_count = variant.shard_count();

        let users: Vec<User> = USER_ROSTER
            .iter()
            .map(|(id, name)| User::new(*id, name))
            .collect();

        let mut owners: Vec<i64> = users.iter().map(|u| u.id).collect();
        owners.shuffle(rng);

        let orders: Vec<Order> = owners
            .iter()
            .enumerate()
            .map(|(i, owner)| Order::new(FIRST_ORDER_ID + i as i64, *owner))
            .collect();

        Self::assemble(variant, cut(&users, shard_count), cut(&orders, shard_count))
    }

    /// Builds a store from explicit shards.
    ///
    /// Ids must be unique and the shard layout must fit the variant. Owner
    /// coverage is not checked, so orphan orders and users without orders
    /// can be modelled.
    pub fn from_parts(
        variant: JoinVariant,
        users: Vec<Vec<User>>,
        orders: Vec<Vec<Order>>,
    ) -> Result<Self, StoreError> {
        let expected = variant.shard_count();
        if users.len() != expected {
            return Err(StoreError::ShardCount {
                relation: "Users",
                expected,
                found: users.len(),
            });
        }
        if orders.len() != expected {
            return Err(StoreError::ShardCount {
                relation: "Orders",
                expected,
                found: orders.len(),
            });
        }

        let per_shard = users[0].len();
        if users.iter().any(|shard| shard.len() != per_shard) {
            return Err(StoreError::UnevenUserShards);
        }
        if per_shard == 0 {
            return Err(StoreError::NoUsers);
        }

        let mut seen = HashSet::new();
        for user in users.iter().flatten() {
            if !seen.insert(user.id) {
                return Err(StoreError::DuplicateUserId(user.id));
            }
        }
        seen.clear();
        for order in orders.iter().flatten() {
            if !seen.insert(order.id) {
                return Err(StoreError::DuplicateOrderId(order.id));
            }
        }

        Ok(Self::assemble(variant, users, orders))
    }

    fn assemble(variant: JoinVariant, users: Vec<Vec<User>>, orders: Vec<Vec<Order>>) -> Self {
        let orders = Relation::new(orders);
        let index = if variant.has_index() {
            Self::build_index(&orders, variant.shard_count())
        } else {
            Relation::empty()
        };

        Self {
            variant,
            users: Relation::new(users),
            orders,
            index,
        }
    }

    /// Projects orders onto index entries and range-partitions them by user id.
    ///
    /// Orders are taken row by row across shards (shard 0 row 0, shard 1
    /// row 0, ...) before a stable sort, so equal keys keep that order.
    fn build_index(orders: &Relation<Order>, shard_count: usize) -> Relation<IndexEntry> {
        let depth = orders.shards().iter().map(Vec::len).max().unwrap_or(0);
        let mut entries: Vec<IndexEntry> = (0..depth)
            .flat_map(|row| {
                orders
                    .shards()
                    .iter()
                    .filter_map(move |shard| shard.get(row))
                    .map(IndexEntry::from)
            })
            .collect();
        entries.sort_by_key(|e| e.user_id);

        Relation::new(cut(&entries, shard_count))
    }

    pub fn variant(&self) -> JoinVariant {
        self.variant
    }

    pub fn users(&self) -> &Relation<User> {
        &self.users
    }

    pub fn orders(&self) -> &Relation<Order> {
        &self.orders
    }

    pub fn index(&self) -> &Relation<IndexEntry> {
        &self.index
    }

    /// Number of subjects each user shard contributes per cycle.
    pub fn subjects_per_shard(&self) -> usize {
        self.users.shard(0).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeSet;

    fn all_user_ids() -> BTreeSet<i64> {
        USER_ROSTER.iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn test_full_scan_layout() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let store = PartitionedStore::build(JoinVariant::FullScan, &mut rng);

        assert_eq!(store.users().shard_count(), 1);
        assert_eq!(store.orders().shard_count(), 1);
        assert_eq!(store.users().len(), 10);
        assert_eq!(store.orders().len(), 10);
        assert!(store.index().is_empty());
        assert_eq!(store.subjects_per_shard(), 10);
    }

    #[test]
    fn test_partitioned_user_split_is_fixed() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let store = PartitionedStore::build(JoinVariant::Partitioned, &mut rng);

        let shard0: Vec<i64> = store.users().shard(0).iter().map(|u| u.id).collect();
        let shard1: Vec<i64> = store.users().shard(1).iter().map(|u| u.id).collect();
        assert_eq!(shard0, vec![1, 2, 3, 4, 5]);
        assert_eq!(shard1, vec![6, 7, 8, 9, 10]);

        let orders0: Vec<i64> = store.orders().shard(0).iter().map(|o| o.id).collect();
        assert_eq!(orders0, vec![101, 102, 103, 104, 105]);
        assert_eq!(store.orders().shard(1)[0].item, "Item106");
    }

    #[test]
    fn test_relation_position_scans_in_shard_order() {
        let rel = Relation::new(vec![vec![3, 5], vec![5, 9]]);
        assert_eq!(rel.position(|v| *v == 5), Some((0, 1)));
        assert_eq!(rel.position(|v| *v == 9), Some((1, 1)));
        assert_eq!(rel.position(|v| *v == 4), None);
        assert!(rel.shard(7).is_empty());
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let users = vec![vec![User::new(1, "Alice"), User::new(1, "Bob")]];
        let orders = vec![vec![Order::new(101, 1)]];
        assert_eq!(
            PartitionedStore::from_parts(JoinVariant::FullScan, users, orders).unwrap_err(),
            StoreError::DuplicateUserId(1)
        );

        let users = vec![vec![User::new(1, "Alice")], vec![User::new(2, "Bob")]];
        let orders = vec![vec![Order::new(101, 2)], vec![Order::new(101, 1)]];
        assert_eq!(
            PartitionedStore::from_parts(JoinVariant::Partitioned, users, orders).unwrap_err(),
            StoreError::DuplicateOrderId(101)
        );
    }

    #[test]
    fn test_from_parts_checks_shape() {
        let users = vec![vec![User::new(1, "Alice")]];
        let orders = vec![vec![Order::new(101, 1)]];
        assert!(matches!(
            PartitionedStore::from_parts(JoinVariant::Indexed, users, orders),
            Err(StoreError::ShardCount { relation: "Users", expected: 2, found: 1 })
        ));

        let users = vec![vec![User::new(1, "Alice")], vec![]];
        let orders = vec![vec![], vec![]];
        assert_eq!(
            PartitionedStore::from_parts(JoinVariant::Partitioned, users, orders).unwrap_err(),
            StoreError::UnevenUserShards
        );
    }

    #[test]
    fn test_from_parts_builds_index() {
        let users = vec![
            vec![User::new(1, "Alice"), User::new(2, "Bob")],
            vec![User::new(3, "Charlie"), User::new(4, "David")],
        ];
        let orders = vec![
            vec![Order::new(101, 4), Order::new(102, 1)],
            vec![Order::new(103, 3), Order::new(104, 2)],
        ];
        let store = PartitionedStore::from_parts(JoinVariant::Indexed, users, orders).unwrap();

        let keys: Vec<(i64, i64)> = store.index().iter().map(|e| (e.user_id, e.order_id)).collect();
        assert_eq!(keys, vec![(1, 102), (2, 104), (3, 103), (4, 101)]);
        assert_eq!(store.index().shard(0).len(), 2);
    }

    proptest! {
        #[test]
        fn prop_full_scan_owners_are_bijective(seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let store = PartitionedStore::build(JoinVariant::FullScan, &mut rng);

            let owners: Vec<i64> = store.orders().iter().map(|o| o.owner_user_id).collect();
            let distinct: BTreeSet<i64> = owners.iter().copied().collect();
            prop_assert_eq!(owners.len(), distinct.len());
            prop_assert_eq!(distinct, all_user_ids());
        }

        #[test]
        fn prop_partitioned_shards_cover_all_ids(seed in any::<u64>(), indexed in any::<bool>()) {
            let variant = if indexed { JoinVariant::Indexed } else { JoinVariant::Partitioned };
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let store = PartitionedStore::build(variant, &mut rng);

            prop_assert_eq!(store.users().shard_count(), 2);
            prop_assert_eq!(store.orders().shard_count(), 2);

            let user_ids: Vec<i64> = store.users().iter().map(|u| u.id).collect();
            let user_set: BTreeSet<i64> = user_ids.iter().copied().collect();
            prop_assert_eq!(user_ids.len(), 10);
            prop_assert_eq!(&user_set, &all_user_ids());

            let owners: Vec<i64> = store.orders().iter().map(|o| o.owner_user_id).collect();
            let owner_set: BTreeSet<i64> = owners.iter().copied().collect();
            prop_assert_eq!(owners.len(), 10);
            prop_assert_eq!(&owner_set, &all_user_ids());

            let order_ids: BTreeSet<i64> = store.orders().iter().map(|o| o.id).collect();
            prop_assert_eq!(order_ids.len(), 10);
        }

        #[test]
        fn prop_index_is_range_partitioned(seed in any::<u64>()) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let store = PartitionedStore::build(JoinVariant::Indexed, &mut rng);
            let index = store.index();

            prop_assert_eq!(index.len(), 10);
            prop_assert_eq!(index.shard(0).len(), 5);
            prop_assert_eq!(index.shard(1).len(), 5);

            let keys: Vec<i64> = index.iter().map(|e| e.user_id).collect();
            prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));

            let max0 = index.shard(0).iter().map(|e| e.user_id).max().unwrap();
            let min1 = index.shard(1).iter().map(|e| e.user_id).min().unwrap();
            prop_assert!(max0 <= min1);

            // Every entry points at a real order with the same owner
            for entry in index.iter() {
                let order = store.orders().iter().find(|o| o.id == entry.order_id).unwrap();
                prop_assert_eq!(order.owner_user_id, entry.user_id);
            }
        }
    }
}
