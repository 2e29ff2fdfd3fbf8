//! Atari-style environments for DQN training
//!
//! This crate provides:
//! - the [`Emulator`] interface and the built-in [`PaddleGame`]
//! - [`AtariEnv`], a Gym-style environment over any emulator
//! - the DQN wrapper stack assembled by [`wrap_dqn`]
//! - an emulator registry and a random-play driver

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod atari;
pub mod emulator;
pub mod paddle;
pub mod preprocess;
pub mod random_play;
pub mod registry;
pub mod wrappers;

pub use atari::{AtariConfig, AtariEnv};
pub use emulator::{AtariAction, Emulator, EmulatorSettings, MultiPlayerEmulator};
pub use paddle::PaddleGame;
pub use random_play::{random_play, RandomPlayConfig};
pub use registry::{list_emulators, make_emulator, register_emulator, EmulatorRegistry};
pub use wrappers::{
    make_dqn_env, wrap_dqn, ClipReward, DqnEnv, EpisodicLife, FireReset, FrameStack, MaxAndSkip,
    NoopReset, TimeLimit, WarpFrame, WrapConfig,
};

// Re-export core types
pub use atari_dqn_core::{
    DiscreteAction, Environment, EnvironmentConfig, GrayFrame, RgbFrame, StackedFrames, Step,
    StepInfo,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_dqn_env, AtariConfig, AtariEnv, Emulator, PaddleGame, WrapConfig};
    pub use atari_dqn_core::prelude::*;
}
