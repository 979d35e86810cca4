//! Ground truth oracle for join runs.
//!
//! Computes, straight from the store, what one complete cycle must
//! produce: which pairs get joined and how many redirect hops the
//! partitioned protocol takes. The runner compares the machine against it.

use shardjoin_core::{JoinVariant, PartitionedStore};
use std::collections::BTreeMap;

/// Expected outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOracle {
    /// user id -> (order id, order shard) for every user that owns an order
    expected: BTreeMap<i64, (i64, usize)>,

    /// Users whose probe finds nothing
    misses: usize,

    /// Redirect hops per cycle
    migrations: usize,
}

impl JoinOracle {
    pub fn from_store(store: &PartitionedStore) -> Self {
        let mut expected = BTreeMap::new();
        let mut misses = 0;
        let mut migrations = 0;

        for user in store.users().iter() {
            // First match in shard order, like every probe
            let hit = store.orders().position(|o| o.owner_user_id == user.id);
            match hit {
                Some((shard, row)) => {
                    if let Some(order) = store.orders().get(shard, row) {
                        expected.insert(user.id, (order.id, shard));
                    }
                    if shard > 0 {
                        migrations += 1;
                    }
                }
                None => {
                    misses += 1;
                    if store.orders().shard_count() > 1 {
                        migrations += 1;
                    }
                }
            }
        }

        // Only the partitioned scan redirects
        if store.variant() != JoinVariant::Partitioned {
            migrations = 0;
        }

        Self {
            expected,
            misses,
            migrations,
        }
    }

    /// Order the user must be joined with, and the shard it lives on.
    pub fn expected_order(&self, user_id: i64) -> Option<(i64, usize)> {
        self.expected.get(&user_id).copied()
    }

    pub fn expected_pairs(&self) -> usize {
        self.expected.len()
    }

    pub fn expected_misses(&self) -> usize {
        self.misses
    }

    pub fn expected_migrations(&self) -> usize {
        self.migrations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::ScenarioId;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_oracle_random_store_joins_everyone() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let store = PartitionedStore::build(JoinVariant::Indexed, &mut rng);
        let oracle = JoinOracle::from_store(&store);

        assert_eq!(oracle.expected_pairs(), 10);
        assert_eq!(oracle.expected_misses(), 0);
        assert_eq!(oracle.expected_migrations(), 0);
    }

    #[test]
    fn test_oracle_cross_shard_migrations() {
        let store = ScenarioId::CrossShard.fixture().unwrap().unwrap();
        let oracle = JoinOracle::from_store(&store);

        assert_eq!(oracle.expected_migrations(), 5);
        assert_eq!(oracle.expected_order(1), Some((106, 1)));
        assert_eq!(oracle.expected_order(6), Some((101, 0)));
    }

    #[test]
    fn test_oracle_no_match() {
        let store = ScenarioId::NoMatch.fixture().unwrap().unwrap();
        let oracle = JoinOracle::from_store(&store);

        assert_eq!(oracle.expected_pairs(), 9);
        assert_eq!(oracle.expected_misses(), 1);
        assert_eq!(oracle.expected_order(10), None);
    }

    #[test]
    fn test_oracle_indexed_orphan_counts_miss() {
        let store = ScenarioId::IndexedOrphan.fixture().unwrap().unwrap();
        let oracle = JoinOracle::from_store(&store);

        assert_eq!(oracle.expected_pairs(), 9);
        assert_eq!(oracle.expected_misses(), 1);
        assert_eq!(oracle.expected_migrations(), 0);
        assert_eq!(oracle.expected_order(10), None);
    }
}
