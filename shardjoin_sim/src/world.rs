//! SimWorld - the frame driver around one step machine.

use crate::context::SimContext;

use shardjoin_core::{JoinVariant, MachineConfig, MachineError, PartitionedStore, StepMachine};
use shardjoin_env::JoinVizContext;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Join strategy to simulate
    pub variant: JoinVariant,

    /// Frames per second of the driver
    pub frame_rate_hz: u32,

    /// Number of complete cycles to run
    pub cycles: u32,

    /// Hard stop, in frames
    pub max_frames: u64,

    /// Pacing and layout of the machine
    pub machine: MachineConfig,
}

impl SimConfig {
    /// Default configuration for one variant.
    pub fn for_variant(variant: JoinVariant) -> Self {
        Self {
            variant,
            machine: MachineConfig::for_variant(variant),
            ..Default::default()
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            variant: JoinVariant::FullScan,
            frame_rate_hz: 60,
            cycles: 1,
            max_frames: 200_000,
            machine: MachineConfig::for_variant(JoinVariant::FullScan),
        }
    }
}

/// The SimWorld - a context plus the machine it drives.
pub struct SimWorld<Ctx: JoinVizContext = SimContext> {
    /// Configuration
    pub config: SimConfig,

    /// Shared context (virtual or wall clock)
    pub context: Arc<Ctx>,

    /// The machine under simulation
    pub machine: StepMachine<Ctx>,

    /// Frames driven so far
    frame_count: u64,
}

impl SimWorld<SimContext> {
    /// Creates a world on a virtual clock with a randomized store.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        Self::with_context(config, context)
    }

    /// Creates a world on a virtual clock over a prepared store.
    pub fn with_store(config: SimConfig, store: PartitionedStore) -> Self {
        let context = SimContext::shared(config.seed);
        Self::with_context_store(config, context, store)
    }

    /// Advances one frame: machine step, then one frame period of
    /// virtual time.
    pub fn tick(&mut self) {
        self.machine.advance();
        self.context.advance_time(self.frame_period());
        self.frame_count += 1;
    }
}

impl<Ctx: JoinVizContext> SimWorld<Ctx> {
    /// Creates a world on any context with a randomized store.
    pub fn with_context(config: SimConfig, context: Arc<Ctx>) -> Self {
        let machine =
            StepMachine::with_config(context.clone(), config.variant, config.machine.clone());
        Self {
            config,
            context,
            machine,
            frame_count: 0,
        }
    }

    /// Creates a world on any context over a prepared store.
    pub fn with_context_store(config: SimConfig, context: Arc<Ctx>, store: PartitionedStore) -> Self {
        let machine = StepMachine::with_store(context.clone(), store, config.machine.clone());
        Self {
            config,
            context,
            machine,
            frame_count: 0,
        }
    }

    /// Sends the start signal unless the protocol starts by itself.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.machine.protocol().auto_start {
            return Ok(());
        }
        self.machine.start()
    }

    /// Advances one frame, pacing through the context.
    ///
    /// On a wall clock this sleeps a real frame period.
    pub async fn run_frame(&mut self) {
        self.machine.advance();
        self.context.sleep(self.frame_period()).await;
        self.frame_count += 1;
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.frame_rate_hz.max(1) as f64)
    }

    /// Returns the current context time in seconds.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
