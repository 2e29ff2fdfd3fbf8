//! Experience replay memory for DQN agents

use rand::Rng;

use atari_dqn_core::{
    Action, DiscreteAction, Observation, RLError, Result, Reward, Transition, TransitionBatch,
};

/// Fixed-capacity circular replay memory.
///
/// Slots are filled in order; once full, the oldest slot is overwritten.
#[derive(Debug, Clone)]
pub struct ReplayMemory<O, A = DiscreteAction> {
    /// Slot storage
    slots: Vec<Transition<O, A>>,
    /// Maximum capacity
    capacity: usize,
    /// Next slot to write
    position: usize,
}

impl<O, A> ReplayMemory<O, A>
where
    O: Observation,
    A: Action,
{
    /// Create a new replay memory; a capacity of zero is rejected
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RLError::InvalidConfig(
                "replay memory capacity must be positive".into(),
            ));
        }
        Ok(Self {
            slots: Vec::new(),
            capacity,
            position: 0,
        })
    }

    /// Store a transition, overwriting the oldest once full
    pub fn add(&mut self, state: O, action: A, reward: Reward, done: bool, next_state: O) {
        let transition = Transition {
            state,
            action,
            reward,
            done,
            next_state,
        };
        if self.slots.len() < self.capacity {
            self.slots.push(transition);
        } else {
            self.slots[self.position] = transition;
        }
        self.position = (self.position + 1) % self.capacity;
    }

    /// Sample up to `batch_size` distinct transitions uniformly at random
    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> TransitionBatch<O, A> {
        let amount = batch_size.min(self.slots.len());
        let mut batch = TransitionBatch::with_capacity(amount);
        for i in rand::seq::index::sample(rng, self.slots.len(), amount) {
            batch.push(&self.slots[i]);
        }
        batch
    }

    /// Number of stored transitions
    #[must_use]
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of stored transitions
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the memory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remove every transition
    pub fn clear(&mut self) {
        self.slots.clear();
        self.position = 0;
    }
}
