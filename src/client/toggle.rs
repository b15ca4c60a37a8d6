//! Optimistic reaction toggles
//!
//! [`begin`] flips the local state before the request is sent and remembers
//! what it replaced. [`settle`] then either adopts the service's answer or
//! puts the snapshot back. Failed toggles are not retried.

use uuid::Uuid;

use super::ClientResult;
use crate::models::ToggleOutcome;

/// What the viewer sees for one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionState {
    pub liked: bool,
    pub count: i64,
}

impl ReactionState {
    /// The state one toggle away. The count never drops below zero.
    pub fn flipped(self) -> Self {
        if self.liked {
            ReactionState { liked: false, count: (self.count - 1).max(0) }
        } else {
            ReactionState { liked: true, count: self.count.max(0) + 1 }
        }
    }
}

impl From<ToggleOutcome> for ReactionState {
    fn from(outcome: ToggleOutcome) -> Self {
        ReactionState { liked: outcome.liked, count: outcome.count.max(0) }
    }
}

/// A view holding per-target reaction state
pub trait Reactable {
    fn reaction_state(&self, target: Uuid) -> Option<ReactionState>;
    fn set_reaction_state(&mut self, target: Uuid, state: ReactionState);
}

/// Local half of a toggle whose request is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingToggle {
    pub target: Uuid,
    pub previous: ReactionState,
}

/// Flip the target locally. `None` when the view does not know the target.
pub fn begin<V: Reactable + ?Sized>(view: &mut V, target: Uuid) -> Option<PendingToggle> {
    let previous = view.reaction_state(target)?;
    view.set_reaction_state(target, previous.flipped());
    Some(PendingToggle { target, previous })
}

/// Reconcile with the service's answer, or roll back
pub fn settle<V: Reactable + ?Sized>(
    view: &mut V,
    pending: PendingToggle,
    result: ClientResult<ToggleOutcome>,
) -> ClientResult<ToggleOutcome> {
    match result {
        Ok(outcome) => {
            view.set_reaction_state(pending.target, outcome.into());
            Ok(outcome)
        }
        Err(e) => {
            tracing::warn!("Reaction toggle on {} failed, rolling back: {}", pending.target, e);
            view.set_reaction_state(pending.target, pending.previous);
            Err(e)
        }
    }
}
