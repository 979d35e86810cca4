//! ShardJoin Core - a replayable simulation of distributed join strategies
//!
//! Three ways a distributed query engine can join `Users` against `Orders`:
//! 1. **Full scan**: one unpartitioned pair of tables, row-by-row scan
//! 2. **Partitioned**: two user shards probe two order shards, redirecting
//!    to the sibling shard when the first one has no match
//! 3. **Index-assisted**: a partitioned secondary index resolves the owning
//!    order shard before the order is visited
//!
//! The crate produces a deterministic sequence of frame states; drawing
//! them is left to a renderer reading [`Snapshot`].

pub mod accumulator;
pub mod config;
pub mod model;
pub mod motion;
pub mod partition_store;
pub mod protocol;
pub mod snapshot;
pub mod step_machine;
pub mod throttle;

// Re-export key types for convenience
pub use accumulator::JoinAccumulator;
pub use config::{Layout, MachineConfig};
pub use model::{IndexEntry, JoinVariant, JoinedPair, Order, RowRef, User};
pub use motion::{Point, Trajectory};
pub use partition_store::{PartitionedStore, Relation, StoreError};
pub use protocol::{Hop, Phase, PhaseAction, Protocol};
pub use snapshot::{Highlight, HighlightKind, ProbeView, Snapshot};
pub use step_machine::{MachineError, MachineEvent, PendingResume, Probe, StepMachine, Verdict};
pub use throttle::Throttle;
