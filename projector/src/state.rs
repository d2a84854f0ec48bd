use projector_core::name::ProjectionName;
use std::collections::BTreeMap;

/// What a projection is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionState {
    /// Neither catching up nor live.
    Idle,
    /// A catch-up task is replaying history for it.
    CatchingUp,
    /// It receives events from the live subscription.
    Live,
}

/// The coordinator's state after the last processed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectorSnapshot {
    /// The state of every registered projection.
    pub states: BTreeMap<ProjectionName, ProjectionState>,
    /// The position of the last event fanned out to live projections. Absent while no
    /// projection is live.
    pub live_position: Option<u64>,
}

impl ProjectorSnapshot {
    /// The state of `name`, if it is registered.
    pub fn state(&self, name: &str) -> Option<ProjectionState> {
        self.states.get(name).copied()
    }

    /// Whether every registered projection is in `state`.
    pub fn all_in(&self, state: ProjectionState) -> bool {
        self.states.values().all(|s| *s == state)
    }

    /// The projections in `state`, in name order.
    pub fn in_state(&self, state: ProjectionState) -> Vec<&ProjectionName> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name)
            .collect()
    }
}
