//! Per-frame, read-only view of the machine for the renderer.

use crate::model::{JoinVariant, JoinedPair, RowRef, User};
use crate::motion::Point;
use crate::protocol::Phase;
use crate::step_machine::Verdict;
use serde::Serialize;
use std::time::Duration;

/// How a highlighted row is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HighlightKind {
    /// The subject row on its user machine
    Subject,

    /// The order row a probe is currently reading
    Scanning,

    /// The order row a probe matched
    Found,

    /// The index entry resolved for a subject
    IndexHit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub row: RowRef,
    pub kind: HighlightKind,
}

impl Highlight {
    pub fn new(row: RowRef, kind: HighlightKind) -> Self {
        Self { row, kind }
    }
}

/// One probe as the renderer sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeView {
    pub user_shard: usize,

    /// `None` once the cursor has run past the last subject
    pub subject: Option<User>,

    pub scan: Option<RowRef>,
    pub verdict: Verdict,
    pub index_hit: Option<RowRef>,
    pub position: Point,
    pub token_visible: bool,
}

/// Everything drawn in one frame.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub variant: JoinVariant,
    pub phase: Phase,
    pub cursor: usize,
    pub subject_count: usize,
    pub probes: Vec<ProbeView>,
    pub joined: Vec<JoinedPair>,

    /// The result table appears after the first `Joining` phase
    pub show_joined: bool,

    pub pending_resume: Option<Duration>,
    pub highlights: Vec<Highlight>,
}

impl Snapshot {
    /// Highlights of one kind.
    pub fn highlighted(&self, kind: HighlightKind) -> impl Iterator<Item = &RowRef> {
        self.highlights
            .iter()
            .filter(move |h| h.kind == kind)
            .map(|h| &h.row)
    }
}
