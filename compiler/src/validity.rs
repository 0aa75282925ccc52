// validity.rs — Per-run pass state and the set of trustworthy analysis results
//
// Every pass starts a scheduling run Unscheduled. Running an analysis makes it
// Valid; running a transformation makes it RanTransient (transformations are
// never cached). An invalidation edge moves a Valid pass to Invalidated,
// which the scheduler treats exactly like Unscheduled on the next demand.
//
// Preconditions: ids come from the registry this set was sized for.
// Postconditions: membership in the ValiditySet <=> state Valid.
// Failure modes: none.
// Side effects: none.

use serde::Serialize;

use crate::id::PassId;
use crate::pass::PassKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    #[default]
    Unscheduled,
    Valid,
    RanTransient,
    Invalidated,
}

impl PassState {
    /// Whether a demand for the pass must execute it.
    pub fn needs_run(self) -> bool {
        self != PassState::Valid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValiditySet {
    states: Vec<PassState>,
}

impl ValiditySet {
    pub fn new(pass_count: usize) -> Self {
        Self {
            states: vec![PassState::Unscheduled; pass_count],
        }
    }

    pub fn state(&self, id: PassId) -> PassState {
        self.states.get(id.index()).copied().unwrap_or_default()
    }

    pub fn is_valid(&self, id: PassId) -> bool {
        self.state(id) == PassState::Valid
    }

    /// Record a completed run.
    pub fn record_run(&mut self, id: PassId, kind: PassKind) {
        let next = match kind {
            PassKind::Analysis => PassState::Valid,
            PassKind::Transformation => PassState::RanTransient,
        };
        if let Some(slot) = self.states.get_mut(id.index()) {
            *slot = next;
        }
    }

    /// Drop `id` from the set. Returns true iff it was Valid.
    pub fn invalidate(&mut self, id: PassId) -> bool {
        match self.states.get_mut(id.index()) {
            Some(slot) if *slot == PassState::Valid => {
                *slot = PassState::Invalidated;
                true
            }
            _ => false,
        }
    }

    /// Start a new scheduling run: everything back to Unscheduled.
    pub fn reset(&mut self) {
        self.states.fill(PassState::Unscheduled);
    }

    /// Valid passes, ascending id.
    pub fn valid(&self) -> impl Iterator<Item = PassId> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == PassState::Valid)
            .map(|(i, _)| PassId(i as u32))
    }

    pub fn valid_count(&self) -> usize {
        self.valid().count()
    }
}
