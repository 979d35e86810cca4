//! Scenario runner - drives a machine through full cycles and checks
//! every cycle against the oracle.

use crate::exporter::{SimExport, SimFrame};
use crate::oracle::JoinOracle;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use shardjoin_core::{MachineConfig, MachineEvent};
use shardjoin_env::{JoinVizContext, WallClockContext};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether every completed cycle matched the oracle
    pub passed: bool,

    /// Total frames executed
    pub total_frames: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Complete cycles observed
    pub cycles_completed: u32,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioMetrics {
    /// Order rows inspected by scanning probes
    pub rows_inspected: u64,

    /// Redirects to a sibling order shard
    pub migrations: u64,

    /// Index lookups resolved
    pub index_lookups: u64,

    /// Joined pairs recorded
    pub joins: u64,

    /// Probes that found no order
    pub misses: u64,
}

/// Per-cycle bookkeeping checked on every `CycleFinished`.
struct CycleCheck {
    scenario: ScenarioId,
    oracle: JoinOracle,
    joined_users: HashSet<i64>,
    joined_orders: HashSet<i64>,
    migrations: usize,
    misses: usize,
    cycles: u32,
}

impl CycleCheck {
    fn new(scenario: ScenarioId, oracle: JoinOracle) -> Self {
        Self {
            scenario,
            oracle,
            joined_users: HashSet::new(),
            joined_orders: HashSet::new(),
            migrations: 0,
            misses: 0,
            cycles: 0,
        }
    }

    fn clear_cycle(&mut self) {
        self.joined_users.clear();
        self.joined_orders.clear();
        self.migrations = 0;
        self.misses = 0;
    }

    /// Folds one event into the metrics; `Err` on the first violation.
    fn observe(&mut self, event: &MachineEvent, metrics: &mut ScenarioMetrics) -> Result<(), String> {
        match event {
            MachineEvent::Started { .. } | MachineEvent::Reset { .. } => self.clear_cycle(),
            MachineEvent::RowInspected { .. } => metrics.rows_inspected += 1,
            MachineEvent::Migrated { probe, to } => {
                metrics.migrations += 1;
                self.migrations += 1;
                debug!("probe {} migrated to {}", probe, to);
            }
            MachineEvent::IndexResolved { .. } => metrics.index_lookups += 1,
            MachineEvent::ProbeMissed { .. } => {
                metrics.misses += 1;
                self.misses += 1;
            }
            MachineEvent::Joined {
                probe,
                user_id,
                order_id,
                order_machine,
            } => {
                metrics.joins += 1;

                let expected = self.oracle.expected_order(*user_id);
                if expected != Some((*order_id, order_machine.shard)) {
                    return Err(format!(
                        "user {} joined with order {} on {}, expected {:?}",
                        user_id, order_id, order_machine, expected
                    ));
                }
                if !self.joined_users.insert(*user_id) {
                    return Err(format!("user {} joined twice in one cycle", user_id));
                }
                if !self.joined_orders.insert(*order_id) {
                    return Err(format!("order {} joined twice in one cycle", order_id));
                }
                // One probe per user shard, in shard order
                if self.scenario == ScenarioId::CrossShard && order_machine.shard == *probe {
                    return Err(format!(
                        "user {} matched on its own shard {}",
                        user_id, order_machine
                    ));
                }
            }
            MachineEvent::CycleFinished { joins } => {
                if *joins != self.oracle.expected_pairs() {
                    return Err(format!(
                        "cycle {} finished with {} pairs, expected {}",
                        self.cycles + 1,
                        joins,
                        self.oracle.expected_pairs()
                    ));
                }
                if self.joined_users.len() != *joins {
                    return Err(format!(
                        "{} join events for {} recorded pairs",
                        self.joined_users.len(),
                        joins
                    ));
                }
                if self.misses != self.oracle.expected_misses() {
                    return Err(format!(
                        "{} probes missed, expected {}",
                        self.misses,
                        self.oracle.expected_misses()
                    ));
                }
                if self.migrations != self.oracle.expected_migrations() {
                    return Err(format!(
                        "{} migrations, expected {}",
                        self.migrations,
                        self.oracle.expected_migrations()
                    ));
                }
                self.cycles += 1;
                self.clear_cycle();
            }
            MachineEvent::PhaseEntered { .. } | MachineEvent::SubjectAdvanced { .. } => {}
        }
        Ok(())
    }
}

/// Runs join scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frame rate in Hz
    frame_rate_hz: u32,

    /// Complete cycles each run must reach
    cycles: u32,

    /// Hard stop, in frames
    max_frames: u64,

    scan_period: Option<Duration>,
    settle_delay: Option<Duration>,

    /// Export every n-th frame
    export_interval: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        let defaults = SimConfig::default();
        Self {
            seed,
            frame_rate_hz: defaults.frame_rate_hz,
            cycles: defaults.cycles,
            max_frames: defaults.max_frames,
            scan_period: None,
            settle_delay: None,
            export_interval: 5,
        }
    }

    /// Sets the frame rate.
    pub fn with_frame_rate(mut self, hz: u32) -> Self {
        self.frame_rate_hz = hz;
        self
    }

    /// Sets the number of complete cycles to run.
    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }

    pub fn with_max_frames(mut self, frames: u64) -> Self {
        self.max_frames = frames;
        self
    }

    /// Overrides the scan throttle period.
    pub fn with_scan_period(mut self, period: Duration) -> Self {
        self.scan_period = Some(period);
        self
    }

    /// Overrides the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    pub fn with_export_interval(mut self, frames: u64) -> Self {
        self.export_interval = frames.max(1);
        self
    }

    fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let variant = scenario.variant();
        let mut machine = MachineConfig::for_variant(variant);
        if let Some(period) = self.scan_period {
            machine = machine.with_scan_period(period);
        }
        if let Some(delay) = self.settle_delay {
            machine = machine.with_settle_delay(delay);
        }
        SimConfig {
            seed: self.seed,
            variant,
            frame_rate_hz: self.frame_rate_hz,
            cycles: self.cycles,
            max_frames: self.max_frames,
            machine,
        }
    }

    fn failed(&self, scenario: ScenarioId, reason: String) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_frames: 0,
            final_time_secs: 0.0,
            cycles_completed: 0,
            failure_reason: Some(reason),
            metrics: ScenarioMetrics::default(),
        }
    }

    /// Runs a scenario on a virtual clock and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_inner(scenario, None)
    }

    /// Runs a scenario, recording frames into `export`.
    pub fn run_with_export(&self, scenario: ScenarioId, export: &mut SimExport) -> ScenarioResult {
        let result = self.run_inner(scenario, Some(export));
        export.finalize(result.passed, result.failure_reason.clone());
        result
    }

    fn run_inner(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        info!("  {}", scenario.description());

        let config = self.config_for(scenario);
        let mut world = match scenario.fixture() {
            Ok(Some(store)) => SimWorld::with_store(config, store),
            Ok(None) => SimWorld::new(config),
            Err(e) => return self.failed(scenario, format!("fixture rejected: {}", e)),
        };
        if let Err(e) = world.start() {
            return self.failed(scenario, e.to_string());
        }

        let mut check = CycleCheck::new(scenario, JoinOracle::from_store(world.machine.store()));
        let mut metrics = ScenarioMetrics::default();
        let mut failure = None;
        let mut pending_events = Vec::new();

        while check.cycles < self.cycles && world.frame_count() < self.max_frames {
            world.tick();

            let events = world.machine.drain_events();
            for event in &events {
                if let Err(reason) = check.observe(event, &mut metrics) {
                    failure = Some(reason);
                    break;
                }
            }

            if let Some(export) = export.as_deref_mut() {
                pending_events.extend(events);
                if world.frame_count() % self.export_interval == 0 || failure.is_some() {
                    export.add_frame(SimFrame {
                        frame: world.frame_count(),
                        time_sec: world.time(),
                        snapshot: world.machine.snapshot(),
                        events: std::mem::take(&mut pending_events),
                    });
                }
            }

            if failure.is_some() {
                break;
            }
        }

        self.finish(scenario, &world, check.cycles, failure, metrics)
    }

    /// Runs a scenario against the wall clock, one real frame at a time.
    pub async fn run_realtime(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting realtime scenario: {} ", scenario.name());

        let config = self.config_for(scenario);
        let context = WallClockContext::shared();
        let mut world = match scenario.fixture() {
            Ok(Some(store)) => SimWorld::with_context_store(config, context, store),
            Ok(None) => SimWorld::with_context(config, context),
            Err(e) => return self.failed(scenario, format!("fixture rejected: {}", e)),
        };
        if let Err(e) = world.start() {
            return self.failed(scenario, e.to_string());
        }

        let mut check = CycleCheck::new(scenario, JoinOracle::from_store(world.machine.store()));
        let mut metrics = ScenarioMetrics::default();
        let mut failure = None;

        while check.cycles < self.cycles && world.frame_count() < self.max_frames {
            world.run_frame().await;
            for event in world.machine.drain_events() {
                if let Err(reason) = check.observe(&event, &mut metrics) {
                    failure = Some(reason);
                    break;
                }
            }
            if failure.is_some() {
                break;
            }
        }

        self.finish(scenario, &world, check.cycles, failure, metrics)
    }

    fn finish<Ctx: JoinVizContext>(
        &self,
        scenario: ScenarioId,
        world: &SimWorld<Ctx>,
        cycles_completed: u32,
        failure: Option<String>,
        metrics: ScenarioMetrics,
    ) -> ScenarioResult {
        let failure = failure.or_else(|| {
            (cycles_completed < self.cycles).then(|| {
                format!(
                    "only {}/{} cycles completed within {} frames",
                    cycles_completed, self.cycles, self.max_frames
                )
            })
        });

        match &failure {
            None => info!(
                "✓ {} complete: {} cycles, {} joins, {} rows inspected, {} migrations in {:.1}s",
                scenario.name(),
                cycles_completed,
                metrics.joins,
                metrics.rows_inspected,
                metrics.migrations,
                world.time()
            ),
            Some(reason) => warn!("{} failed at frame {}: {}", scenario.name(), world.frame_count(), reason),
        }

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure.is_none(),
            total_frames: world.frame_count(),
            final_time_secs: world.time(),
            cycles_completed,
            failure_reason: failure,
            metrics,
        }
    }
}
