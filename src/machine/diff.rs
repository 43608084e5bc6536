//! `StateDiff` (§4.8): the pure output of a transition handler. Handlers
//! never mutate storage directly; the driver applies the diff atomically
//! with the watcher cursor advance.

use crate::model::{ActionQueueEntry, ConsensusState, RolloverState, SigningState};

#[derive(Debug, Default, Clone)]
pub struct StateDiff {
    pub consensus_delta: Option<ConsensusState>,
    pub rollover: Option<RolloverState>,
    /// `(message, Some(state))` installs/updates a signing state;
    /// `(message, None)` deallocates it.
    pub signing: Option<([u8; 32], Option<SigningState>)>,
    pub actions: Vec<ActionQueueEntry>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.consensus_delta.is_none() && self.rollover.is_none() && self.signing.is_none() && self.actions.is_empty()
    }

    pub fn with_action(mut self, entry: ActionQueueEntry) -> Self {
        self.actions.push(entry);
        self
    }
}
