//! Common types for the ShardJoin environment.

use serde::{Deserialize, Serialize};

/// Which relation a simulated machine hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineRole {
    User,
    Order,
    Index,
}

impl MachineRole {
    pub fn label(&self) -> &'static str {
        match self {
            MachineRole::User => "User",
            MachineRole::Order => "Order",
            MachineRole::Index => "Index",
        }
    }
}

/// Identifier for a simulated machine (one shard of one relation).
///
/// Shards are numbered from 0; the display form is 1-based to match
/// how the machines are labelled on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MachineId {
    pub role: MachineRole,
    pub shard: usize,
}

impl MachineId {
    pub fn new(role: MachineRole, shard: usize) -> Self {
        Self { role, shard }
    }

    pub fn user(shard: usize) -> Self {
        Self::new(MachineRole::User, shard)
    }

    pub fn order(shard: usize) -> Self {
        Self::new(MachineRole::Order, shard)
    }

    pub fn index(shard: usize) -> Self {
        Self::new(MachineRole::Index, shard)
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Machine {}", self.role.label(), self.shard + 1)
    }
}
