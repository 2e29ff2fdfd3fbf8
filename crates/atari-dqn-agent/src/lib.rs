//! DQN agent, replay memory and training loop for Atari-style games
//!
//! This crate provides:
//! - [`ReplayMemory`], a circular experience store with uniform sampling
//! - [`QNetwork`], the Nature-DQN convolutional network built on candle
//! - [`DQNAgent`] with its estimation and target networks
//! - [`Trainer`], which fills the memory, trains and plays greedily

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod checkpoint;
pub mod dqn;
pub mod network;
pub mod optim;
pub mod trainer;
pub mod utils;

// Re-export agents
pub use dqn::{DQNAgent, DQNConfig};
pub use trainer::{TrainConfig, Trainer, TrainingReport};

// Re-export utilities
pub use buffer::ReplayMemory;
pub use checkpoint::{CheckpointMeta, Checkpointing};
pub use network::QNetwork;
pub use optim::{DqnOptimizer, OptimizerConfig, ParamsRmsProp, RmsProp};
pub use utils::{get_epsilon, EpsilonSchedule, Schedule};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{Checkpointing, DQNAgent, DQNConfig, ReplayMemory, TrainConfig, Trainer};
    pub use atari_dqn_core::prelude::*;
}
