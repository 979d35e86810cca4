//! ShardJoin Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the join
//! visualization core to run against a **wall clock** (tokio) or inside a
//! **deterministic simulation** (virtual clock + seeded RNG).
//!
//! # Core Concept
//!
//! The step state machine never touches `Instant::now()` or thread RNGs.
//! It reads:
//! - Time (`now()`) for scan throttling and settle delays
//! - Frame pacing (`sleep()`) in the driver loop
//! - Randomness (`derive_rng()`) when the partitioned store is rebuilt
//!
//! By deriving all entropy from a single 64-bit seed, any run becomes
//! replayable via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use shardjoin_env::JoinVizContext;
//!
//! async fn frame_loop<Ctx: JoinVizContext>(ctx: &Ctx) {
//!     loop {
//!         machine.advance();
//!         ctx.sleep(Duration::from_millis(16)).await;
//!     }
//! }
//! ```

mod context;
mod types;
mod tokio_impl;

pub use context::JoinVizContext;
pub use types::{MachineId, MachineRole};
pub use tokio_impl::WallClockContext;
