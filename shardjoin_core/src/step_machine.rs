//! The Step State Machine - one generic engine for every join strategy.
//!
//! # Frame Model
//!
//! ```text
//!   driver ──advance()──► [apply due resume] ─► [Idle/Finished handling]
//!                                                 │
//!                                                 ▼
//!                              protocol.spec(phase).action
//!               ┌──────────────┬──────────────┬──────────────┐
//!            Launch         Transit          Scan          Join
//!         (begin tokens)  (barrier on all  (one row per   (record pairs,
//!                          tokens arrived)  throttle tick)  schedule resume)
//! ```
//!
//! All state changes happen inside `advance()`, `start()` or `reset()`.
//! The settle delay is a `PendingResume` value checked at the top of the
//! next `advance()`, never a callback fired from another context.

use crate::accumulator::JoinAccumulator;
use crate::config::MachineConfig;
use crate::model::{JoinVariant, JoinedPair, RowRef, User};
use crate::motion::{Point, Trajectory};
use crate::partition_store::PartitionedStore;
use crate::protocol::{Hop, Phase, PhaseAction, Protocol};
use crate::snapshot::{Highlight, HighlightKind, ProbeView, Snapshot};
use crate::throttle::Throttle;

use serde::Serialize;
use shardjoin_env::{JoinVizContext, MachineId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors returned by the machine's command surface.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MachineError {
    #[error("start() is only valid from idle, machine is {0}")]
    NotIdle(Phase),
}

/// Outcome of one probe for the current subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Token launched, no row inspected yet
    Pending,

    /// Reading rows of the current order shard
    Scanning,

    /// Current shard exhausted, redirect hop requested
    Migrating,

    /// Matching order located
    Found(RowRef),

    /// No matching order anywhere this probe looked
    NotFound,
}

impl Verdict {
    /// True once the probe has reached a final answer.
    pub fn is_settled(&self) -> bool {
        matches!(self, Verdict::Found(_) | Verdict::NotFound)
    }
}

/// One probing machine: the subject of one user shard and its token.
#[derive(Debug, Clone)]
pub struct Probe {
    /// User shard the subject lives on
    pub user_shard: usize,

    /// Order shard being scanned
    pub scan_shard: usize,

    /// Row of `scan_shard` under inspection
    pub scan_row: usize,

    pub verdict: Verdict,

    /// Whether the redirect hop has already been used
    pub migrated: bool,

    /// Index entry resolved for the subject (index-assisted lookups only)
    pub index_hit: Option<RowRef>,

    pub token: Trajectory,
}

impl Probe {
    fn new(user_shard: usize, at: Point) -> Self {
        Self {
            user_shard,
            scan_shard: 0,
            scan_row: 0,
            verdict: Verdict::Pending,
            migrated: false,
            index_hit: None,
            token: Trajectory::at_rest(at),
        }
    }

    /// Row under inspection, while scanning.
    pub fn scan_ref(&self) -> Option<RowRef> {
        (self.verdict == Verdict::Scanning)
            .then(|| RowRef::new(MachineId::order(self.scan_shard), self.scan_row))
    }
}

/// Settle delay in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingResume {
    /// Context time at which the cursor advances
    pub due: Duration,
}

/// Observable state changes, drained by the harness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MachineEvent {
    Started { variant: JoinVariant },
    PhaseEntered { phase: Phase },
    RowInspected { probe: usize, row: RowRef, matched: bool },
    Migrated { probe: usize, to: MachineId },
    IndexResolved { probe: usize, entry: Option<RowRef> },
    Joined { probe: usize, user_id: i64, order_id: i64, order_machine: MachineId },
    ProbeMissed { probe: usize, user_id: i64 },
    SubjectAdvanced { cursor: usize },
    CycleFinished { joins: usize },
    Reset { generation: u64 },
}

/// Subject of `user_shard` at `cursor`.
///
/// # Panics
/// A cursor outside the shard is an invariant violation.
fn subject(store: &PartitionedStore, user_shard: usize, cursor: usize) -> &User {
    match store.users().get(user_shard, cursor) {
        Some(user) => user,
        None => panic!(
            "subject cursor {} out of range for {}",
            cursor,
            MachineId::user(user_shard)
        ),
    }
}

/// The generic join step machine.
///
/// Generic over the context so the same machine runs against a wall
/// clock or a virtual one.
pub struct StepMachine<Ctx: JoinVizContext> {
    ctx: Arc<Ctx>,
    protocol: &'static Protocol,
    config: MachineConfig,
    store: PartitionedStore,

    phase: Phase,
    cursor: usize,
    probes: Vec<Probe>,
    in_flight: Option<Hop>,

    joined: JoinAccumulator,
    show_joined: bool,

    throttle: Throttle,
    pending: Option<PendingResume>,

    /// Store generation, bumped on every reset
    generation: u64,
    events: Vec<MachineEvent>,
}

impl<Ctx: JoinVizContext> StepMachine<Ctx> {
    /// Creates a machine with the variant's default configuration and a
    /// randomized store.
    pub fn new(ctx: Arc<Ctx>, variant: JoinVariant) -> Self {
        Self::with_config(ctx, variant, MachineConfig::for_variant(variant))
    }

    /// Creates a machine with an explicit configuration.
    pub fn with_config(ctx: Arc<Ctx>, variant: JoinVariant, config: MachineConfig) -> Self {
        let store = PartitionedStore::build(variant, &mut ctx.derive_rng(0));
        Self::with_store(ctx, store, config)
    }

    /// Creates a machine over a prepared store.
    pub fn with_store(ctx: Arc<Ctx>, store: PartitionedStore, config: MachineConfig) -> Self {
        let protocol = Protocol::for_variant(store.variant());
        let throttle = Throttle::new(config.scan_period);

        let mut machine = Self {
            ctx,
            protocol,
            config,
            store,
            phase: Phase::Idle,
            cursor: 0,
            probes: Vec::new(),
            in_flight: None,
            joined: JoinAccumulator::new(),
            show_joined: false,
            throttle,
            pending: None,
            generation: 0,
            events: Vec::new(),
        };
        machine.place_probes();
        machine
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Starts the first cycle. Only valid from `Idle`.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.phase != Phase::Idle {
            return Err(MachineError::NotIdle(self.phase));
        }
        self.begin_cycle();
        Ok(())
    }

    /// Advances the simulation by exactly one frame.
    pub fn advance(&mut self) {
        let now = self.ctx.now();

        if let Some(pending) = self.pending {
            if now >= pending.due {
                self.pending = None;
                self.resume();
            }
            return;
        }

        match self.phase {
            Phase::Idle => {
                if !self.protocol.auto_start {
                    return;
                }
                self.begin_cycle();
            }
            Phase::Finished => {
                self.begin_cycle();
                return;
            }
            _ => {}
        }

        let Some(spec) = self.protocol.spec(self.phase) else {
            return;
        };
        match spec.action {
            PhaseAction::Launch(hop) => self.launch(hop),
            PhaseAction::Transit => self.transit(),
            PhaseAction::Scan => self.scan(now),
            PhaseAction::Join => self.join(now),
        }
    }

    /// Tears down the store and returns to `Idle` with fresh data.
    pub fn reset(&mut self) {
        self.generation += 1;
        let variant = self.store.variant();
        self.store = PartitionedStore::build(variant, &mut self.ctx.derive_rng(self.generation));

        self.phase = Phase::Idle;
        self.cursor = 0;
        self.in_flight = None;
        self.joined.clear();
        self.show_joined = false;
        self.throttle.disarm();
        self.pending = None;
        self.place_probes();

        info!("Reset {} store (generation {})", variant, self.generation);
        self.events.push(MachineEvent::Reset {
            generation: self.generation,
        });
    }

    // =========================================================================
    // CYCLE BOOKKEEPING
    // =========================================================================

    fn begin_cycle(&mut self) {
        self.cursor = 0;
        self.joined.clear();
        self.pending = None;
        self.in_flight = None;
        self.throttle.arm(self.ctx.now());
        self.place_probes();

        debug!("Starting {} cycle over {} subjects", self.variant(), self.subject_count());
        self.events.push(MachineEvent::Started {
            variant: self.variant(),
        });
        self.enter(self.protocol.first_phase());
    }

    /// One probe per user shard, resting at the current subject's row.
    fn place_probes(&mut self) {
        let layout = &self.config.layout;
        let cursor = self.cursor;
        self.probes = (0..self.store.users().shard_count())
            .map(|shard| Probe::new(shard, layout.user_exit(shard, cursor)))
            .collect();
    }

    fn enter(&mut self, phase: Phase) {
        trace!("{} -> {}", self.phase, phase);
        self.phase = phase;
        self.events.push(MachineEvent::PhaseEntered { phase });
    }

    /// Applies a due settle delay: next subject, or end of cycle.
    fn resume(&mut self) {
        self.cursor += 1;
        self.events.push(MachineEvent::SubjectAdvanced {
            cursor: self.cursor,
        });

        if self.cursor >= self.subject_count() {
            info!(
                "{} cycle finished with {} joined pairs",
                self.variant(),
                self.joined.len()
            );
            self.events.push(MachineEvent::CycleFinished {
                joins: self.joined.len(),
            });
            self.enter(Phase::Finished);
        } else {
            self.place_probes();
            self.enter(self.protocol.first_phase());
        }
    }

    // =========================================================================
    // PHASE ACTIONS
    // =========================================================================

    fn launch(&mut self, hop: Hop) {
        let layout = &self.config.layout;
        let speed = self.config.packet_speed;
        let store = &self.store;
        let cursor = self.cursor;

        for (i, probe) in self.probes.iter_mut().enumerate() {
            let user = subject(store, probe.user_shard, cursor);
            let home = layout.user_exit(probe.user_shard, cursor);

            match hop {
                Hop::UserToOrder => {
                    probe.scan_shard = 0;
                    probe.scan_row = 0;
                    probe.migrated = false;
                    probe.verdict = Verdict::Pending;
                    probe.token = Trajectory::begin(home, layout.order_entry(0, 0), speed);
                }
                Hop::UserToSiblingOrder => {
                    if probe.verdict != Verdict::Migrating {
                        continue;
                    }
                    let target = layout.order_entry(probe.scan_shard + 1, 0);
                    probe.token = Trajectory::begin(home, target, speed);
                }
                Hop::UserToIndex => {
                    let hit = store
                        .index()
                        .position(|e| e.user_id == user.id)
                        .map(|(shard, row)| RowRef::new(MachineId::index(shard), row));

                    probe.index_hit = hit;
                    probe.token = match hit {
                        Some(entry) => {
                            probe.verdict = Verdict::Pending;
                            let target = layout.index_entry(entry.machine.shard, entry.row);
                            Trajectory::begin(home, target, speed)
                        }
                        None => {
                            debug!("probe {} found no index entry for user {}", i, user.id);
                            probe.verdict = Verdict::NotFound;
                            self.events.push(MachineEvent::ProbeMissed { probe: i, user_id: user.id });
                            Trajectory::at_rest(home)
                        }
                    };
                    debug!("probe {} resolved user {} to {:?}", i, user.id, hit);
                    self.events.push(MachineEvent::IndexResolved { probe: i, entry: hit });
                }
                Hop::IndexToOrder => {
                    let Some(entry_ref) = probe.index_hit else {
                        probe.token = Trajectory::at_rest(probe.token.position());
                        continue;
                    };
                    let from = layout.index_exit(entry_ref.machine.shard, entry_ref.row);
                    let found = store
                        .index()
                        .get(entry_ref.machine.shard, entry_ref.row)
                        .and_then(|entry| store.orders().position(|o| o.id == entry.order_id));

                    probe.token = match found {
                        Some((shard, row)) => {
                            probe.verdict = Verdict::Found(RowRef::new(MachineId::order(shard), row));
                            Trajectory::begin(from, layout.order_entry(shard, row), speed)
                        }
                        None => {
                            debug!("probe {} found no order for user {}", i, user.id);
                            probe.verdict = Verdict::NotFound;
                            self.events.push(MachineEvent::ProbeMissed { probe: i, user_id: user.id });
                            Trajectory::at_rest(from)
                        }
                    };
                }
            }
        }

        self.in_flight = Some(hop);
        self.enter(self.protocol.next_after(self.phase));
    }

    /// Moves every token; completes only when all of them have arrived.
    fn transit(&mut self) {
        let mut arrived = 0;
        for probe in &mut self.probes {
            if probe.token.advance().1 {
                arrived += 1;
            }
        }
        if arrived < self.probes.len() {
            return;
        }

        let layout = &self.config.layout;
        match self.in_flight.take() {
            Some(Hop::UserToOrder) => {
                for probe in &mut self.probes {
                    probe.verdict = Verdict::Scanning;
                    probe.token = Trajectory::at_rest(layout.order_entry(0, 0));
                }
            }
            Some(Hop::UserToSiblingOrder) => {
                for (i, probe) in self.probes.iter_mut().enumerate() {
                    if probe.verdict != Verdict::Migrating {
                        continue;
                    }
                    probe.scan_shard += 1;
                    probe.scan_row = 0;
                    probe.migrated = true;
                    probe.verdict = Verdict::Scanning;
                    probe.token = Trajectory::at_rest(layout.order_entry(probe.scan_shard, 0));

                    let to = MachineId::order(probe.scan_shard);
                    debug!("probe {} redirected to {}", i, to);
                    self.events.push(MachineEvent::Migrated { probe: i, to });
                }
            }
            Some(Hop::UserToIndex) | Some(Hop::IndexToOrder) | None => {}
        }

        self.enter(self.protocol.next_after(self.phase));
    }

    /// Inspects one row per scanning probe when the throttle elapses.
    fn scan(&mut self, now: Duration) {
        if !self.throttle.ready(now) {
            return;
        }

        let layout = &self.config.layout;
        let store = &self.store;
        let cursor = self.cursor;
        let can_migrate = self.protocol.migrates();
        let order_shards = store.orders().shard_count();
        let mut migrate = false;

        for (i, probe) in self.probes.iter_mut().enumerate() {
            if probe.verdict != Verdict::Scanning {
                continue;
            }

            let user = subject(store, probe.user_shard, cursor);
            let shard = probe.scan_shard;
            let rows = store.orders().shard(shard);

            if let Some(order) = rows.get(probe.scan_row) {
                let row = RowRef::new(MachineId::order(shard), probe.scan_row);
                let matched = order.owner_user_id == user.id;
                trace!("probe {} inspects {} row {}: {}", i, row.machine, row.row, matched);
                self.events.push(MachineEvent::RowInspected { probe: i, row, matched });

                if matched {
                    probe.verdict = Verdict::Found(row);
                } else {
                    probe.scan_row += 1;
                    if probe.scan_row < rows.len() {
                        probe.token = Trajectory::at_rest(layout.order_entry(shard, probe.scan_row));
                    }
                }
            }

            if probe.verdict == Verdict::Scanning && probe.scan_row >= rows.len() {
                if can_migrate && !probe.migrated && shard + 1 < order_shards {
                    probe.verdict = Verdict::Migrating;
                    migrate = true;
                } else {
                    debug!("probe {} found no order for user {}", i, user.id);
                    probe.verdict = Verdict::NotFound;
                    self.events.push(MachineEvent::ProbeMissed { probe: i, user_id: user.id });
                }
            }
        }

        if migrate {
            self.enter(self.protocol.migration[0].phase);
        } else if self.probes.iter().all(|p| p.verdict.is_settled()) {
            self.enter(self.protocol.join_phase());
        }
    }

    /// Records every found match and schedules the settle delay.
    fn join(&mut self, now: Duration) {
        self.show_joined = true;

        for (i, probe) in self.probes.iter().enumerate() {
            let Verdict::Found(row) = probe.verdict else {
                continue;
            };
            let Some(order) = self.store.orders().get(row.machine.shard, row.row) else {
                continue;
            };
            let user = subject(&self.store, probe.user_shard, self.cursor);

            debug!("joined user {} with order {} from {}", user.id, order.id, row.machine);
            self.events.push(MachineEvent::Joined {
                probe: i,
                user_id: user.id,
                order_id: order.id,
                order_machine: row.machine,
            });
            self.joined.push(JoinedPair {
                user: user.clone(),
                order: order.clone(),
                order_machine: row.machine,
            });
        }

        self.pending = Some(PendingResume {
            due: now + self.config.settle_delay,
        });
        self.enter(Phase::Settling);
    }

    // =========================================================================
    // STATE EXPOSURE
    // =========================================================================

    pub fn variant(&self) -> JoinVariant {
        self.store.variant()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Index of the subject row being processed.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Subjects per user shard in one cycle.
    pub fn subject_count(&self) -> usize {
        self.store.subjects_per_shard()
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn joined(&self) -> &JoinAccumulator {
        &self.joined
    }

    pub fn store(&self) -> &PartitionedStore {
        &self.store
    }

    pub fn protocol(&self) -> &'static Protocol {
        self.protocol
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn pending_resume(&self) -> Option<PendingResume> {
        self.pending
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.ctx
    }

    /// Takes the events recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<MachineEvent> {
        std::mem::take(&mut self.events)
    }

    /// Read-only view of everything a renderer draws this frame.
    pub fn snapshot(&self) -> Snapshot {
        let active = !matches!(self.phase, Phase::Idle | Phase::Finished);
        let token_visible = self.protocol.token_visible(self.phase);

        let probes: Vec<ProbeView> = self
            .probes
            .iter()
            .map(|probe| ProbeView {
                user_shard: probe.user_shard,
                subject: self.store.users().get(probe.user_shard, self.cursor).cloned(),
                scan: probe.scan_ref(),
                verdict: probe.verdict,
                index_hit: probe.index_hit,
                position: probe.token.position(),
                token_visible,
            })
            .collect();

        let mut highlights = Vec::new();
        for probe in &self.probes {
            if active {
                highlights.push(Highlight::new(
                    RowRef::new(MachineId::user(probe.user_shard), self.cursor),
                    HighlightKind::Subject,
                ));
            }
            if let Some(entry) = probe.index_hit {
                highlights.push(Highlight::new(entry, HighlightKind::IndexHit));
            }
            match probe.verdict {
                Verdict::Found(row) => highlights.push(Highlight::new(row, HighlightKind::Found)),
                Verdict::Scanning if self.phase == Phase::ScanningOrderTable => {
                    if let Some(row) = probe.scan_ref() {
                        highlights.push(Highlight::new(row, HighlightKind::Scanning));
                    }
                }
                _ => {}
            }
        }

        Snapshot {
            variant: self.variant(),
            phase: self.phase,
            cursor: self.cursor,
            subject_count: self.subject_count(),
            probes,
            joined: self.joined.pairs().to_vec(),
            show_joined: self.show_joined,
            pending_resume: self.pending.map(|p| p.due),
            highlights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IndexEntry, Order, User};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use shardjoin_env::JoinVizContext;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Manually stepped clock for unit tests.
    struct TestClock {
        now_ns: Mutex<u64>,
        seed: u64,
    }

    impl TestClock {
        fn shared(seed: u64) -> Arc<Self> {
            Arc::new(Self {
                now_ns: Mutex::new(0),
                seed,
            })
        }

        fn tick(&self, duration: Duration) {
            *self.now_ns.lock().unwrap() += duration.as_nanos() as u64;
        }
    }

    #[async_trait::async_trait]
    impl JoinVizContext for TestClock {
        fn now(&self) -> Duration {
            Duration::from_nanos(*self.now_ns.lock().unwrap())
        }

        async fn sleep(&self, duration: Duration) {
            self.tick(duration);
        }

        fn derive_rng(&self, seed_extension: u64) -> ChaCha8Rng {
            ChaCha8Rng::seed_from_u64(self.seed ^ seed_extension)
        }

        fn seed(&self) -> u64 {
            self.seed
        }
    }

    const FRAME: Duration = Duration::from_millis(16);

    /// Generous frame budget for one full cycle of any variant.
    const CYCLE_FRAMES: usize = 20_000;

    fn step(machine: &mut StepMachine<TestClock>, clock: &TestClock) {
        machine.advance();
        clock.tick(FRAME);
    }

    fn run_until<F>(machine: &mut StepMachine<TestClock>, clock: &TestClock, mut done: F) -> usize
    where
        F: FnMut(&StepMachine<TestClock>) -> bool,
    {
        for frame in 0..CYCLE_FRAMES {
            if done(machine) {
                return frame;
            }
            step(machine, clock);
        }
        panic!("condition not reached within {} frames", CYCLE_FRAMES);
    }

    fn roster(ids: std::ops::RangeInclusive<i64>) -> Vec<User> {
        ids.map(|id| User::new(id, &format!("user{}", id))).collect()
    }

    #[test]
    fn test_full_scan_waits_for_start() {
        let clock = TestClock::shared(1);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::FullScan);

        for _ in 0..10 {
            step(&mut machine, &clock);
        }
        assert_eq!(machine.phase(), Phase::Idle);

        machine.start().unwrap();
        assert_eq!(machine.phase(), Phase::Requesting);
        assert_eq!(
            machine.start(),
            Err(MachineError::NotIdle(Phase::Requesting))
        );
    }

    #[test]
    fn test_partitioned_auto_starts_and_launches_same_frame() {
        let clock = TestClock::shared(2);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::Partitioned);

        machine.advance();
        assert_eq!(machine.phase(), Phase::Responding);
        assert_eq!(machine.probes().len(), 2);
    }

    #[test]
    fn test_full_scan_cycle_joins_every_user() {
        let clock = TestClock::shared(3);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::FullScan);
        machine.start().unwrap();

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Finished);

        let joined = machine.joined();
        assert_eq!(joined.len(), 10);
        let mut users = HashSet::new();
        let mut orders = HashSet::new();
        for pair in joined.iter() {
            assert_eq!(pair.user.id, pair.order.owner_user_id);
            assert!(users.insert(pair.user.id));
            assert!(orders.insert(pair.order.id));
        }
    }

    #[test]
    fn test_each_subject_adds_one_pair_per_probe() {
        for variant in JoinVariant::all() {
            let clock = TestClock::shared(4);
            let mut machine = StepMachine::new(clock.clone(), variant);
            if !machine.protocol().auto_start {
                machine.start().unwrap();
            }
            let probes = machine.store().users().shard_count();

            let mut seen_cursor = 0;
            run_until(&mut machine, &clock, |m| {
                if m.phase() == Phase::Settling {
                    assert_eq!(m.joined().len(), (m.cursor() + 1) * probes, "{}", variant);
                    seen_cursor = seen_cursor.max(m.cursor() + 1);
                }
                m.phase() == Phase::Finished
            });
            assert_eq!(seen_cursor, machine.subject_count());
        }
    }

    #[test]
    fn test_settle_delay_holds_cursor() {
        let clock = TestClock::shared(5);
        let config = MachineConfig::for_variant(JoinVariant::Indexed)
            .with_settle_delay(Duration::from_millis(300));
        let mut machine = StepMachine::with_config(clock.clone(), JoinVariant::Indexed, config);

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Settling);
        let due = machine.pending_resume().unwrap().due;
        assert_eq!(machine.cursor(), 0);

        // Frames before the due time are no-ops
        while clock.now() + FRAME < due {
            step(&mut machine, &clock);
            assert_eq!(machine.phase(), Phase::Settling);
            assert_eq!(machine.cursor(), 0);
        }

        run_until(&mut machine, &clock, |m| m.phase() != Phase::Settling);
        assert_eq!(machine.cursor(), 1);
        assert_eq!(machine.phase(), Phase::UserToIndexRequest);
        assert!(machine.pending_resume().is_none());
    }

    #[test]
    fn test_finished_restarts_like_start() {
        let clock = TestClock::shared(6);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::FullScan);
        machine.start().unwrap();
        run_until(&mut machine, &clock, |m| m.phase() == Phase::Finished);

        let store_before: Vec<i64> = machine.store().orders().iter().map(|o| o.owner_user_id).collect();
        assert_eq!(machine.joined().len(), 10);

        machine.advance();
        assert_eq!(machine.phase(), Phase::Requesting);
        assert_eq!(machine.cursor(), 0);
        assert!(machine.joined().is_empty());

        // Same data on loop restart
        let store_after: Vec<i64> = machine.store().orders().iter().map(|o| o.owner_user_id).collect();
        assert_eq!(store_before, store_after);
    }

    #[test]
    fn test_cross_shard_subject_migrates_once() {
        // User 1 (user shard 0) owns order 106 on order shard 1
        let users = vec![roster(1..=2), roster(3..=4)];
        let orders = vec![
            vec![Order::new(101, 3), Order::new(102, 2)],
            vec![Order::new(106, 1), Order::new(107, 4)],
        ];
        let store = PartitionedStore::from_parts(JoinVariant::Partitioned, users, orders).unwrap();

        let clock = TestClock::shared(7);
        let config = MachineConfig::for_variant(JoinVariant::Partitioned);
        let mut machine = StepMachine::with_store(clock.clone(), store, config);

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Settling);

        let events = machine.drain_events();
        let moves = events
            .iter()
            .filter(|e| matches!(e, MachineEvent::PhaseEntered { phase: Phase::RequestingMove }))
            .count();
        assert_eq!(moves, 1);
        assert!(events.contains(&MachineEvent::Migrated {
            probe: 0,
            to: MachineId::order(1)
        }));

        let pair = machine
            .joined()
            .iter()
            .find(|p| p.user.id == 1)
            .expect("user 1 joined");
        assert_eq!(pair.order.id, 106);
        assert_ne!(pair.order_machine.shard, 0);

        // User 3 (shard 1) found its order on order shard 0 without moving
        let pair = machine.joined().iter().find(|p| p.user.id == 3).unwrap();
        assert_eq!(pair.order_machine, MachineId::order(0));
    }

    #[test]
    fn test_full_scan_missing_owner_still_advances() {
        let users = vec![roster(1..=3)];
        let orders = vec![vec![Order::new(101, 2), Order::new(102, 3), Order::new(103, 99)]];
        let store = PartitionedStore::from_parts(JoinVariant::FullScan, users, orders).unwrap();

        let clock = TestClock::shared(8);
        let config = MachineConfig::for_variant(JoinVariant::FullScan);
        let mut machine = StepMachine::with_store(clock.clone(), store, config);
        machine.start().unwrap();

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Settling);
        assert_eq!(machine.cursor(), 0);
        assert!(machine.joined().is_empty());
        assert_eq!(machine.probes()[0].verdict, Verdict::NotFound);

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Finished);
        let ids: Vec<i64> = machine.joined().iter().map(|p| p.user.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_scan_reveals_one_row_per_period() {
        let users = vec![roster(1..=1)];
        let orders = vec![vec![Order::new(101, 5), Order::new(102, 6), Order::new(103, 1)]];
        let store = PartitionedStore::from_parts(JoinVariant::FullScan, users, orders).unwrap();

        let clock = TestClock::shared(9);
        let config = MachineConfig::for_variant(JoinVariant::FullScan);
        let mut machine = StepMachine::with_store(clock.clone(), store, config);
        machine.start().unwrap();

        run_until(&mut machine, &clock, |m| m.phase() == Phase::ScanningOrderTable);
        machine.drain_events();

        let mut inspections = Vec::new();
        run_until(&mut machine, &clock, |m| m.phase() == Phase::Settling);
        for event in machine.drain_events() {
            if let MachineEvent::RowInspected { row, matched, .. } = event {
                inspections.push((row.row, matched));
            }
        }
        assert_eq!(inspections, vec![(0, false), (1, false), (2, true)]);
    }

    #[test]
    fn test_indexed_lookup_is_instant() {
        let clock = TestClock::shared(10);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::Indexed);

        machine.advance();
        assert_eq!(machine.phase(), Phase::UserToIndexResponse);
        for probe in machine.probes() {
            let hit = probe.index_hit.expect("every user has an index entry");
            let entry = machine.store().index().get(hit.machine.shard, hit.row).unwrap();
            let user = machine.store().users().get(probe.user_shard, 0).unwrap();
            assert_eq!(entry.user_id, user.id);
        }

        run_until(&mut machine, &clock, |m| m.phase() == Phase::IndexToOrderResponse);
        for probe in machine.probes() {
            assert!(matches!(probe.verdict, Verdict::Found(_)));
        }
    }

    #[test]
    fn test_reset_returns_to_idle_with_new_generation() {
        let clock = TestClock::shared(11);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::Partitioned);
        for _ in 0..50 {
            step(&mut machine, &clock);
        }

        assert!(machine.throttle.is_armed());

        machine.reset();
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.cursor(), 0);
        assert!(machine.joined().is_empty());
        assert!(machine.pending_resume().is_none());
        assert!(!machine.throttle.is_armed());
        assert!(machine
            .drain_events()
            .contains(&MachineEvent::Reset { generation: 1 }));
    }

    #[test]
    fn test_reset_rebuilds_store_from_next_stream() {
        let clock = TestClock::shared(13);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::Indexed);

        let owners = |store: &PartitionedStore| -> Vec<i64> {
            store.orders().iter().map(|o| o.owner_user_id).collect()
        };
        let index = |store: &PartitionedStore| -> Vec<IndexEntry> {
            store.index().iter().copied().collect()
        };

        let initial = PartitionedStore::build(JoinVariant::Indexed, &mut clock.derive_rng(0));
        assert_eq!(owners(machine.store()), owners(&initial));

        machine.reset();
        let first = PartitionedStore::build(JoinVariant::Indexed, &mut clock.derive_rng(1));
        assert_eq!(owners(machine.store()), owners(&first));
        assert_eq!(index(machine.store()), index(&first));

        machine.reset();
        let second = PartitionedStore::build(JoinVariant::Indexed, &mut clock.derive_rng(2));
        assert_eq!(owners(machine.store()), owners(&second));
        assert_eq!(machine.store().users().len(), 10);
    }

    #[test]
    fn test_indexed_lookup_miss_rests_token_and_reports() {
        // User 4 owns nothing; order 102 points at a user that does not exist
        let users = vec![roster(1..=2), roster(3..=4)];
        let orders = vec![
            vec![Order::new(101, 1), Order::new(102, 99)],
            vec![Order::new(103, 3), Order::new(104, 2)],
        ];
        let store = PartitionedStore::from_parts(JoinVariant::Indexed, users, orders).unwrap();

        let clock = TestClock::shared(14);
        let config = MachineConfig::for_variant(JoinVariant::Indexed);
        let home = config.layout.user_exit(1, 1);
        let mut machine = StepMachine::with_store(clock.clone(), store, config);

        run_until(&mut machine, &clock, |m| {
            m.cursor() == 1 && m.phase() == Phase::UserToIndexResponse
        });
        let probe = &machine.probes()[1];
        assert_eq!(probe.verdict, Verdict::NotFound);
        assert_eq!(probe.index_hit, None);
        assert!(probe.token.arrived());
        assert_eq!(probe.token.position(), home);
        assert_eq!(probe.token.frames_to_arrive(), 0);

        let events = machine.drain_events();
        assert!(events.contains(&MachineEvent::IndexResolved { probe: 1, entry: None }));
        assert!(events.contains(&MachineEvent::ProbeMissed { probe: 1, user_id: 4 }));

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Finished);
        let missed = machine
            .drain_events()
            .iter()
            .filter(|e| matches!(e, MachineEvent::ProbeMissed { .. }))
            .count();
        assert_eq!(missed, 0);

        let mut ids: Vec<i64> = machine.joined().iter().map(|p| p.user.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_partitioned_double_miss_migrates_once() {
        // User 1 has no order on either shard
        let users = vec![roster(1..=1), roster(2..=2)];
        let orders = vec![vec![Order::new(101, 2)], vec![Order::new(102, 99)]];
        let store = PartitionedStore::from_parts(JoinVariant::Partitioned, users, orders).unwrap();

        let clock = TestClock::shared(15);
        let config = MachineConfig::for_variant(JoinVariant::Partitioned);
        let mut machine = StepMachine::with_store(clock.clone(), store, config);

        run_until(&mut machine, &clock, |m| m.phase() == Phase::Settling);

        let probe = &machine.probes()[0];
        assert_eq!(probe.verdict, Verdict::NotFound);
        assert!(probe.migrated);
        assert_eq!(probe.scan_shard, 1);

        let events = machine.drain_events();
        let migrations = events
            .iter()
            .filter(|e| matches!(e, MachineEvent::Migrated { .. }))
            .count();
        assert_eq!(migrations, 1);
        assert!(events.contains(&MachineEvent::ProbeMissed { probe: 0, user_id: 1 }));

        let joined: Vec<(i64, i64)> = machine
            .joined()
            .iter()
            .map(|p| (p.user.id, p.order.id))
            .collect();
        assert_eq!(joined, vec![(2, 101)]);
    }

    #[test]
    fn test_snapshot_marks_visible_tokens() {
        let clock = TestClock::shared(12);
        let mut machine = StepMachine::new(clock.clone(), JoinVariant::Partitioned);

        let idle = machine.snapshot();
        assert_eq!(idle.phase, Phase::Idle);
        assert!(idle.highlights.is_empty());
        assert!(idle.probes.iter().all(|p| !p.token_visible));

        machine.advance();
        let snap = machine.snapshot();
        assert_eq!(snap.phase, Phase::Responding);
        assert!(snap.probes.iter().all(|p| p.token_visible));
        assert_eq!(
            snap.highlights
                .iter()
                .filter(|h| h.kind == HighlightKind::Subject)
                .count(),
            2
        );
    }
}
