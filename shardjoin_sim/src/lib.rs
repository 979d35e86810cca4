//! ShardJoin Deterministic Simulation Harness
//!
//! This crate drives the join step machine frame by frame against a
//! virtual clock, so a full cycle of any join strategy runs in
//! milliseconds and replays bit-for-bit from a single seed.
//!
//! # Core Principle
//!
//! The machine never reads a clock or an entropy source directly. Both
//! come from its context:
//! - **Time**: `SimContext` holds a virtual clock advanced one frame per tick
//! - **Randomness**: every store generation is derived from the master seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   ScenarioRunner                     │
//! │  ┌───────────────────────┐     ┌──────────────────┐  │
//! │  │       SimWorld        │     │    JoinOracle    │  │
//! │  │  SimContext (clock)   │     │  expected pairs, │  │
//! │  │  StepMachine          │────►│  misses, hops    │  │
//! │  └───────────────────────┘     └──────────────────┘  │
//! │            │ events + snapshots                      │
//! │            ▼                                         │
//! │        SimExport (JSON)                              │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use shardjoin_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).with_cycles(2).run(ScenarioId::Partitioned);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use exporter::{SimExport, SimFrame};
pub use oracle::JoinOracle;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};
