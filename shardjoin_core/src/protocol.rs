//! Protocol descriptors - one static table per join strategy.
//!
//! A single generic step machine drives every variant. What differs is
//! the ordered list of phases, the hop each launch phase sends tokens
//! along, whether an exhausted scan may redirect to the sibling shard,
//! and whether the cycle starts without an explicit `start()`.
//!
//! Every variant draws from the same `Phase` enum, but a machine only
//! ever enters the phases its descriptor lists (plus the shared
//! `Idle`/`Settling`/`Finished` markers).

use crate::model::JoinVariant;
use serde::{Deserialize, Serialize};

/// Step machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Before the first start signal
    Idle,

    Requesting,
    Responding,
    ScanningOrderTable,
    RequestingMove,
    RespondingMove,

    UserToIndexRequest,
    UserToIndexResponse,
    IndexToOrderRequest,
    IndexToOrderResponse,

    /// Matches are recorded
    Joining,

    /// Waiting for the settle delay before the next subject
    Settling,

    /// All subjects of the cycle are done
    Finished,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Requesting => "requesting",
            Phase::Responding => "responding",
            Phase::ScanningOrderTable => "scanning_order_table",
            Phase::RequestingMove => "requesting_move",
            Phase::RespondingMove => "responding_move",
            Phase::UserToIndexRequest => "user_to_index_request",
            Phase::UserToIndexResponse => "user_to_index_response",
            Phase::IndexToOrderRequest => "index_to_order_request",
            Phase::IndexToOrderResponse => "index_to_order_response",
            Phase::Joining => "joining",
            Phase::Settling => "settling",
            Phase::Finished => "finished",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A simulated network hop a token travels along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hop {
    /// Subject's user machine to the first order machine
    UserToOrder,

    /// Subject's user machine to the next order machine after an exhausted scan
    UserToSiblingOrder,

    /// Subject's user machine to the index machine holding its entry
    UserToIndex,

    /// Index machine to the order machine holding the referenced order
    IndexToOrder,
}

/// What a phase does on each `advance()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseAction {
    /// Compute targets and begin trajectories, then move on (single frame)
    Launch(Hop),

    /// Move tokens until every one has arrived, then move on
    Transit,

    /// Throttled row-by-row reveal of the current order shard
    Scan,

    /// Record matches and schedule the settle delay
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSpec {
    pub phase: Phase,
    pub action: PhaseAction,
}

const fn spec(phase: Phase, action: PhaseAction) -> PhaseSpec {
    PhaseSpec { phase, action }
}

/// Static descriptor of one join strategy.
#[derive(Debug)]
pub struct Protocol {
    pub variant: JoinVariant,

    /// Phases of one subject, in order; the last one is a `Join`
    pub cycle: &'static [PhaseSpec],

    /// Redirect sub-sequence entered when a scan exhausts its shard.
    /// Empty when the protocol never redirects.
    pub migration: &'static [PhaseSpec],

    /// Whether `Idle` is left on the first `advance()`
    pub auto_start: bool,

    /// Phases during which tokens are drawn
    pub token_visible_in: &'static [Phase],
}

pub static FULL_SCAN: Protocol = Protocol {
    variant: JoinVariant::FullScan,
    cycle: &[
        spec(Phase::Requesting, PhaseAction::Launch(Hop::UserToOrder)),
        spec(Phase::Responding, PhaseAction::Transit),
        spec(Phase::ScanningOrderTable, PhaseAction::Scan),
        spec(Phase::Joining, PhaseAction::Join),
    ],
    migration: &[],
    auto_start: false,
    token_visible_in: &[Phase::Responding, Phase::ScanningOrderTable],
};

pub static PARTITIONED: Protocol = Protocol {
    variant: JoinVariant::Partitioned,
    cycle: &[
        spec(Phase::Requesting, PhaseAction::Launch(Hop::UserToOrder)),
        spec(Phase::Responding, PhaseAction::Transit),
        spec(Phase::ScanningOrderTable, PhaseAction::Scan),
        spec(Phase::Joining, PhaseAction::Join),
    ],
    migration: &[
        spec(Phase::RequestingMove, PhaseAction::Launch(Hop::UserToSiblingOrder)),
        spec(Phase::RespondingMove, PhaseAction::Transit),
    ],
    auto_start: true,
    token_visible_in: &[
        Phase::Responding,
        Phase::ScanningOrderTable,
        Phase::RespondingMove,
    ],
};

pub static INDEXED: Protocol = Protocol {
    variant: JoinVariant::Indexed,
    cycle: &[
        spec(Phase::UserToIndexRequest, PhaseAction::Launch(Hop::UserToIndex)),
        spec(Phase::UserToIndexResponse, PhaseAction::Transit),
        spec(Phase::IndexToOrderRequest, PhaseAction::Launch(Hop::IndexToOrder)),
        spec(Phase::IndexToOrderResponse, PhaseAction::Transit),
        spec(Phase::Joining, PhaseAction::Join),
    ],
    migration: &[],
    auto_start: true,
    token_visible_in: &[Phase::UserToIndexResponse, Phase::IndexToOrderResponse],
};

impl Protocol {
    pub fn for_variant(variant: JoinVariant) -> &'static Protocol {
        match variant {
            JoinVariant::FullScan => &FULL_SCAN,
            JoinVariant::Partitioned => &PARTITIONED,
            JoinVariant::Indexed => &INDEXED,
        }
    }

    /// First phase of every subject.
    pub fn first_phase(&self) -> Phase {
        self.cycle[0].phase
    }

    /// Looks a phase up in this protocol. `Idle`, `Settling` and
    /// `Finished` are not part of any descriptor.
    pub fn spec(&self, phase: Phase) -> Option<&PhaseSpec> {
        self.cycle
            .iter()
            .chain(self.migration.iter())
            .find(|s| s.phase == phase)
    }

    pub fn migrates(&self) -> bool {
        !self.migration.is_empty()
    }

    /// The scan phase, if this protocol scans.
    pub fn scan_phase(&self) -> Option<Phase> {
        self.cycle
            .iter()
            .find(|s| s.action == PhaseAction::Scan)
            .map(|s| s.phase)
    }

    /// The phase that records matches.
    pub fn join_phase(&self) -> Phase {
        self.cycle
            .iter()
            .find(|s| s.action == PhaseAction::Join)
            .map(|s| s.phase)
            .unwrap_or(Phase::Joining)
    }

    /// Phase that follows `phase` once it completes.
    ///
    /// The end of the migration sub-sequence returns to the scan phase.
    pub fn next_after(&self, phase: Phase) -> Phase {
        if let Some(i) = self.cycle.iter().position(|s| s.phase == phase) {
            return self
                .cycle
                .get(i + 1)
                .map(|s| s.phase)
                .unwrap_or(Phase::Settling);
        }
        if let Some(i) = self.migration.iter().position(|s| s.phase == phase) {
            return match self.migration.get(i + 1) {
                Some(next) => next.phase,
                None => self.scan_phase().unwrap_or_else(|| self.join_phase()),
            };
        }
        unreachable!("phase {} is not part of the {} protocol", phase, self.variant)
    }

    pub fn token_visible(&self, phase: Phase) -> bool {
        self.token_visible_in.contains(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(protocol: &Protocol) -> Vec<Phase> {
        let mut phases = vec![protocol.first_phase()];
        let mut phase = protocol.first_phase();
        while phase != protocol.join_phase() {
            phase = protocol.next_after(phase);
            phases.push(phase);
        }
        phases
    }

    #[test]
    fn test_full_scan_sequence() {
        assert_eq!(
            walk(&FULL_SCAN),
            vec![
                Phase::Requesting,
                Phase::Responding,
                Phase::ScanningOrderTable,
                Phase::Joining
            ]
        );
        assert!(!FULL_SCAN.migrates());
        assert!(!FULL_SCAN.auto_start);
    }

    #[test]
    fn test_partitioned_migration_returns_to_scan() {
        assert!(PARTITIONED.migrates());
        assert_eq!(PARTITIONED.next_after(Phase::RequestingMove), Phase::RespondingMove);
        assert_eq!(
            PARTITIONED.next_after(Phase::RespondingMove),
            Phase::ScanningOrderTable
        );
        assert_eq!(PARTITIONED.next_after(Phase::Joining), Phase::Settling);
    }

    #[test]
    fn test_indexed_sequence_has_no_scan() {
        assert_eq!(
            walk(&INDEXED),
            vec![
                Phase::UserToIndexRequest,
                Phase::UserToIndexResponse,
                Phase::IndexToOrderRequest,
                Phase::IndexToOrderResponse,
                Phase::Joining
            ]
        );
        assert_eq!(INDEXED.scan_phase(), None);
        assert!(INDEXED.spec(Phase::ScanningOrderTable).is_none());
    }

    #[test]
    fn test_markers_are_outside_every_descriptor() {
        for variant in JoinVariant::all() {
            let protocol = Protocol::for_variant(variant);
            assert_eq!(protocol.variant, variant);
            for marker in [Phase::Idle, Phase::Settling, Phase::Finished] {
                assert!(protocol.spec(marker).is_none());
            }
        }
    }
}
