//! Transitions and minibatches

use crate::{Action, Observation, Reward};

/// Single environment transition: the replay memory's unit of storage
#[derive(Debug, Clone)]
pub struct Transition<O, A> {
    /// Observation the action was taken in
    pub state: O,
    /// Action taken
    pub action: A,
    /// Reward received
    pub reward: Reward,
    /// Whether the episode ended with this transition
    pub done: bool,
    /// Observation after the action
    pub next_state: O,
}

/// Minibatch of transitions in struct-of-vectors layout
#[derive(Debug, Clone)]
pub struct TransitionBatch<O, A> {
    /// States
    pub states: Vec<O>,
    /// Actions
    pub actions: Vec<A>,
    /// Rewards
    pub rewards: Vec<f32>,
    /// Terminal flags
    pub dones: Vec<bool>,
    /// Next states
    pub next_states: Vec<O>,
}

impl<O, A> TransitionBatch<O, A> {
    /// Create an empty batch with room for `capacity` transitions
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            states: Vec::with_capacity(capacity),
            actions: Vec::with_capacity(capacity),
            rewards: Vec::with_capacity(capacity),
            dones: Vec::with_capacity(capacity),
            next_states: Vec::with_capacity(capacity),
        }
    }

    /// Number of transitions in the batch
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Check if the batch is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<O: Observation, A: Action> TransitionBatch<O, A> {
    /// Append a transition
    pub fn push(&mut self, transition: &Transition<O, A>) {
        self.states.push(transition.state.clone());
        self.actions.push(transition.action.clone());
        #[allow(clippy::cast_possible_truncation)]
        self.rewards.push(transition.reward.0 as f32);
        self.dones.push(transition.done);
        self.next_states.push(transition.next_state.clone());
    }

    /// Action indices of the batch
    #[must_use]
    pub fn action_indices(&self) -> Vec<usize> {
        self.actions.iter().map(Action::index).collect()
    }
}
