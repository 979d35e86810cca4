//! The Join Accumulator - the growing, append-only list of matches.

use crate::model::JoinedPair;

/// Ordered matches of the current cycle.
///
/// Pairs are only ever appended; the whole list is dropped when a new
/// cycle starts.
#[derive(Debug, Clone, Default)]
pub struct JoinAccumulator {
    pairs: Vec<JoinedPair>,
}

impl JoinAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pair: JoinedPair) {
        self.pairs.push(pair);
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[JoinedPair] {
        &self.pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = &JoinedPair> {
        self.pairs.iter()
    }
}
