//! Core reinforcement learning traits and types for the Atari DQN trainer
//!
//! This crate provides the abstractions shared by the environment stack and
//! the agents: actions, frame observations, rewards, environments,
//! transitions and the agent traits.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod agent;
pub mod environment;
pub mod error;
pub mod observation;
pub mod reward;
pub mod trajectory;

// Re-export core traits and types
pub use action::{Action, ActionSpace, DiscreteAction, DiscreteSpace};
pub use agent::{Agent, AgentMetrics, Learning};
pub use environment::{Environment, EnvironmentConfig, Episode, Step, StepInfo, TrackedEnvironment};
pub use error::{RLError, Result};
pub use observation::{GrayFrame, Observation, RgbFrame, StackedFrames};
pub use reward::Reward;
pub use trajectory::{Transition, TransitionBatch};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSpace, Agent, DiscreteAction, Environment, Learning, Observation, Result,
        Reward, Step, StepInfo,
    };
}
