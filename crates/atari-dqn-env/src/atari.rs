//! Gym-style environment over an [`Emulator`]

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use atari_dqn_core::{
    ActionSpace, DiscreteAction, DiscreteSpace, Environment, EnvironmentConfig, RLError, Result,
    Reward, RgbFrame, Step, StepInfo,
};

use crate::emulator::{AtariAction, Emulator, EmulatorSettings};
use crate::preprocess;

/// Configuration of an [`AtariEnv`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtariConfig {
    /// Registered emulator name
    pub game: String,
    /// Shared environment settings (seed, step limit, render directory)
    pub env: EnvironmentConfig,
    /// Emulator frames per environment step
    pub frame_skip: usize,
    /// Sticky-action probability
    pub repeat_action_probability: f64,
    /// Expose all 18 actions instead of the game's minimal set
    pub full_action_space: bool,
}

impl Default for AtariConfig {
    fn default() -> Self {
        Self {
            game: crate::paddle::PaddleGame::NAME.to_string(),
            env: EnvironmentConfig {
                seed: Some(123),
                max_steps: Some(100_000),
                ..EnvironmentConfig::default()
            },
            frame_skip: 4,
            repeat_action_probability: 0.0,
            full_action_space: false,
        }
    }
}

impl AtariConfig {
    /// Emulator settings derived from this configuration
    #[must_use]
    pub fn emulator_settings(&self) -> EmulatorSettings {
        EmulatorSettings {
            random_seed: self.env.seed.unwrap_or_else(|| EmulatorSettings::default().random_seed),
            repeat_action_probability: self.repeat_action_probability,
        }
    }
}

/// Environment driving an emulator with discrete action indices
pub struct AtariEnv<E> {
    emulator: E,
    actions: Vec<AtariAction>,
    frame_skip: usize,
    repeat_action_probability: f64,
    last_action: AtariAction,
    rng: StdRng,
    render_dir: Option<PathBuf>,
    rendered: AtomicU64,
    screen_shape: Vec<usize>,
}

impl<E: Emulator> AtariEnv<E> {
    /// Wrap an emulator
    pub fn new(emulator: E, config: &AtariConfig) -> Result<Self> {
        if config.frame_skip == 0 {
            return Err(RLError::InvalidConfig("frame_skip must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&config.repeat_action_probability) {
            return Err(RLError::InvalidConfig(format!(
                "repeat_action_probability {} outside [0, 1]",
                config.repeat_action_probability
            )));
        }
        let actions = if config.full_action_space {
            emulator.legal_action_set()
        } else {
            emulator.minimal_action_set()
        };
        if actions.is_empty() {
            return Err(RLError::Emulator(format!("{} exposes no actions", emulator.name())));
        }
        if let Some(dir) = &config.env.render_dir {
            std::fs::create_dir_all(dir)?;
        }
        let screen_shape = emulator.screen_rgb().shape().to_vec();
        tracing::info!(
            game = emulator.name(),
            actions = ?actions.iter().map(|a| a.meaning()).collect::<Vec<_>>(),
            frame_skip = config.frame_skip,
            "created Atari environment"
        );

        Ok(Self {
            emulator,
            actions,
            frame_skip: config.frame_skip,
            repeat_action_probability: config.repeat_action_probability,
            last_action: AtariAction::Noop,
            rng: StdRng::seed_from_u64(config.emulator_settings().random_seed),
            render_dir: config.env.render_dir.clone(),
            rendered: AtomicU64::new(0),
            screen_shape,
        })
    }

    /// Borrow the emulator
    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    /// Mutably borrow the emulator
    pub fn emulator_mut(&mut self) -> &mut E {
        &mut self.emulator
    }

    fn info(&self) -> StepInfo {
        let mut info = StepInfo::default();
        info.insert(StepInfo::LIVES, self.emulator.lives());
        info.insert("frame_number", self.emulator.frame_number());
        info
    }
}

#[async_trait]
impl<E: Emulator> Environment for AtariEnv<E> {
    type Observation = RgbFrame;
    type Action = DiscreteAction;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(self.actions.len()))
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.screen_shape.clone()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.meaning().to_string()).collect()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.emulator.reset_game();
        self.last_action = AtariAction::Noop;
        Ok((RgbFrame(self.emulator.screen_rgb()), self.info()))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let chosen = *self.actions.get(action.0).ok_or_else(|| {
            RLError::InvalidAction(format!("{} not in 0..{}", action.0, self.actions.len()))
        })?;

        let mut reward = Reward::default();
        for _ in 0..self.frame_skip {
            let sticky = self.repeat_action_probability > 0.0
                && self.rng.gen::<f64>() < self.repeat_action_probability;
            if !sticky {
                self.last_action = chosen;
            }
            reward += Reward::from(self.emulator.act(self.last_action));
            if self.emulator.game_over() {
                break;
            }
        }

        Ok(Step {
            observation: RgbFrame(self.emulator.screen_rgb()),
            reward,
            done: self.emulator.game_over(),
            truncated: false,
            info: self.info(),
        })
    }

    async fn render(&self) -> Result<()> {
        let n = self.rendered.fetch_add(1, Ordering::Relaxed);
        match &self.render_dir {
            Some(dir) => {
                let path = dir.join(format!("frame_{n:06}.png"));
                preprocess::save_png(&self.emulator.screen_rgb(), &path)
            }
            None => {
                tracing::trace!(frame = self.emulator.frame_number(), "render");
                Ok(())
            }
        }
    }
}
