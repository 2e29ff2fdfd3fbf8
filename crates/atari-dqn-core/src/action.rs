//! Action representations and action spaces

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for actions in an RL environment
pub trait Action: Clone + Debug + Send + Sync {
    /// Index of the action within a discrete space
    fn index(&self) -> usize;
}

/// Trait for defining action spaces
pub trait ActionSpace: Send + Sync {
    /// The type of actions in this space
    type Action: Action;

    /// Sample a random action from the space
    fn sample(&self, rng: &mut dyn rand::RngCore) -> Self::Action;

    /// Check if an action is valid within this space
    fn contains(&self, action: &Self::Action) -> bool;

    /// Number of actions in the space
    fn n(&self) -> usize;
}

/// Discrete action (index into the environment's action set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscreteAction(pub usize);

impl Action for DiscreteAction {
    fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for DiscreteAction {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// Discrete action space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteSpace {
    /// Number of discrete actions
    pub n: usize,
}

impl DiscreteSpace {
    /// Create a new discrete action space
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl ActionSpace for DiscreteSpace {
    type Action = DiscreteAction;

    fn sample(&self, rng: &mut dyn rand::RngCore) -> Self::Action {
        DiscreteAction(rng.gen_range(0..self.n))
    }

    fn contains(&self, action: &Self::Action) -> bool {
        action.0 < self.n
    }

    fn n(&self) -> usize {
        self.n
    }
}
