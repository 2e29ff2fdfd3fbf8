//! Environment wrappers for the DQN preprocessing stack
//!
//! Composed by [`wrap_dqn`] in the order: episodic life, no-op reset,
//! max-and-skip, fire reset, frame warping, frame stacking, reward clipping.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use atari_dqn_core::{
    ActionSpace, DiscreteAction, Environment, Episode, GrayFrame, RLError, Result, RgbFrame,
    StackedFrames, Step, StepInfo,
};

use crate::atari::{AtariConfig, AtariEnv};
use crate::preprocess;

/// Step limit used when the environment config sets none
pub const DEFAULT_MAX_STEPS: usize = 100_000;

/// Time limit wrapper
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TimeLimit<E>
where
    E: Environment,
{
    type Observation = E::Observation;
    type Action = E::Action;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.env.observation_shape()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.steps = 0;
        self.env.reset().await
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        self.steps += 1;
        let mut step = self.env.step(action).await?;

        if self.steps >= self.max_steps && !step.done {
            step.truncated = true;
            step.done = true;
        }

        Ok(step)
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Ends the learning episode when a life is lost.
///
/// The underlying game is only reset after a real game over; otherwise reset
/// continues the game with a single no-op step.
pub struct EpisodicLife<E> {
    /// Inner environment
    pub env: E,
    enabled: bool,
    lives: u64,
    was_real_done: bool,
}

impl<E> EpisodicLife<E> {
    /// Create a new episodic-life wrapper
    pub fn new(env: E, enabled: bool) -> Self {
        Self {
            env,
            enabled,
            lives: 0,
            was_real_done: true,
        }
    }

    /// Whether the last episode end was a real game over
    pub fn was_real_done(&self) -> bool {
        self.was_real_done
    }
}

#[async_trait]
impl<E> Environment for EpisodicLife<E>
where
    E: Environment<Action = DiscreteAction>,
{
    type Observation = E::Observation;
    type Action = DiscreteAction;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.env.observation_shape()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let (observation, info) = if self.was_real_done || !self.enabled {
            self.env.reset().await?
        } else {
            let step = self.env.step(DiscreteAction(0)).await?;
            if step.done {
                self.env.reset().await?
            } else {
                (step.observation, step.info)
            }
        };
        self.lives = info.lives().unwrap_or(0);
        self.was_real_done = false;
        Ok((observation, info))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let mut step = self.env.step(action).await?;
        self.was_real_done = step.done;
        let lives = step.info.lives().unwrap_or(0);
        if self.enabled && lives < self.lives && lives > 0 {
            tracing::debug!(lives, "life lost");
            step.done = true;
        }
        self.lives = lives;
        Ok(step)
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Starts every episode with a random number of no-op steps
pub struct NoopReset<E> {
    /// Inner environment
    pub env: E,
    noop_max: usize,
    rng: StdRng,
}

impl<E: Environment> NoopReset<E> {
    /// Create a new no-op reset wrapper; action 0 must be `NOOP`
    pub fn new(env: E, noop_max: usize, seed: u64) -> Result<Self> {
        if let Some(first) = env.action_meanings().first() {
            if first != "NOOP" {
                return Err(RLError::InvalidConfig(format!(
                    "no-op reset needs NOOP at action 0, found {first}"
                )));
            }
        }
        Ok(Self {
            env,
            noop_max,
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

#[async_trait]
impl<E> Environment for NoopReset<E>
where
    E: Environment<Action = DiscreteAction>,
{
    type Observation = E::Observation;
    type Action = DiscreteAction;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.env.observation_shape()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let (mut observation, mut info) = self.env.reset().await?;
        if self.noop_max == 0 {
            return Ok((observation, info));
        }
        let noops = self.rng.gen_range(1..=self.noop_max);
        for _ in 0..noops {
            let step = self.env.step(DiscreteAction(0)).await?;
            if step.done {
                (observation, info) = self.env.reset().await?;
            } else {
                observation = step.observation;
                info = step.info;
            }
        }
        Ok((observation, info))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        self.env.step(action).await
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Repeats each action `skip` times and returns the pixel-wise max of the
/// last two screens
pub struct MaxAndSkip<E> {
    /// Inner environment
    pub env: E,
    skip: usize,
}

impl<E> MaxAndSkip<E> {
    /// Create a new max-and-skip wrapper
    pub fn new(env: E, skip: usize) -> Result<Self> {
        if skip == 0 {
            return Err(RLError::InvalidConfig("skip must be at least 1".into()));
        }
        Ok(Self { env, skip })
    }
}

#[async_trait]
impl<E> Environment for MaxAndSkip<E>
where
    E: Environment<Observation = RgbFrame>,
{
    type Observation = RgbFrame;
    type Action = E::Action;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.env.observation_shape()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.env.reset().await
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let mut previous: Option<RgbFrame> = None;
        let mut step = self.env.step(action.clone()).await?;
        let mut reward = step.reward;
        for _ in 1..self.skip {
            if step.done {
                break;
            }
            let next = self.env.step(action.clone()).await?;
            reward += next.reward;
            previous = Some(std::mem::replace(&mut step, next).observation);
        }
        if let Some(previous) = previous {
            preprocess::max_into(&mut step.observation.0, &previous.0)?;
        }
        step.reward = reward;
        Ok(step)
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Presses FIRE (then action 2) after reset, for games that wait for it
pub struct FireReset<E> {
    /// Inner environment
    pub env: E,
    enabled: bool,
}

impl<E: Environment> FireReset<E> {
    /// Create a new fire-reset wrapper; it is active only when action 1 is
    /// `FIRE` and the game has at least three actions
    pub fn new(env: E) -> Self {
        let meanings = env.action_meanings();
        let enabled = meanings.len() >= 3 && meanings[1] == "FIRE";
        Self { env, enabled }
    }

    /// Whether the wrapper presses FIRE on reset
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait]
impl<E> Environment for FireReset<E>
where
    E: Environment<Action = DiscreteAction>,
{
    type Observation = E::Observation;
    type Action = DiscreteAction;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.env.observation_shape()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let mut reset = self.env.reset().await?;
        if !self.enabled {
            return Ok(reset);
        }
        for action in [1, 2] {
            let step = self.env.step(DiscreteAction(action)).await?;
            reset = if step.done {
                self.env.reset().await?
            } else {
                (step.observation, step.info)
            };
        }
        Ok(reset)
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        self.env.step(action).await
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Converts RGB screens to resized gray frames
pub struct WarpFrame<E> {
    /// Inner environment
    pub env: E,
    height: usize,
    width: usize,
}

impl<E> WarpFrame<E> {
    /// Create a new frame-warping wrapper
    pub fn new(env: E, height: usize, width: usize) -> Self {
        Self { env, height, width }
    }

    fn warp(&self, frame: &RgbFrame) -> Result<GrayFrame> {
        let gray = preprocess::to_grayscale(&frame.0);
        Ok(GrayFrame::new(preprocess::resize(&gray, self.height, self.width)?))
    }
}

#[async_trait]
impl<E> Environment for WarpFrame<E>
where
    E: Environment<Observation = RgbFrame>,
{
    type Observation = GrayFrame;
    type Action = E::Action;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        vec![self.height, self.width]
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let (frame, info) = self.env.reset().await?;
        Ok((self.warp(&frame)?, info))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let step = self.env.step(action).await?;
        let warped = self.warp(&step.observation)?;
        Ok(step.map_observation(|_| warped))
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Frame stacking wrapper for temporal information
pub struct FrameStack<E> {
    /// Inner environment
    pub env: E,
    /// Number of frames to stack
    pub n_frames: usize,
    /// Frame buffer
    frames: VecDeque<GrayFrame>,
}

impl<E> FrameStack<E> {
    /// Create a new frame stack wrapper
    pub fn new(env: E, n_frames: usize) -> Result<Self> {
        if n_frames == 0 {
            return Err(RLError::InvalidConfig("frame stack needs at least one frame".into()));
        }
        Ok(Self {
            env,
            n_frames,
            frames: VecDeque::with_capacity(n_frames),
        })
    }

    fn stacked(&self) -> Result<StackedFrames> {
        StackedFrames::new(self.frames.iter().cloned().collect())
    }
}

#[async_trait]
impl<E> Environment for FrameStack<E>
where
    E: Environment<Observation = GrayFrame>,
{
    type Observation = StackedFrames;
    type Action = E::Action;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        let mut shape = vec![self.n_frames];
        shape.extend(self.env.observation_shape());
        shape
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let (frame, info) = self.env.reset().await?;
        self.frames.clear();
        for _ in 0..self.n_frames {
            self.frames.push_back(frame.clone());
        }
        Ok((self.stacked()?, info))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let step = self.env.step(action).await?;
        if self.frames.len() == self.n_frames {
            self.frames.pop_front();
        }
        self.frames.push_back(step.observation.clone());
        let stacked = self.stacked()?;
        Ok(step.map_observation(|_| stacked))
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Replaces every reward by its sign
pub struct ClipReward<E> {
    /// Inner environment
    pub env: E,
    enabled: bool,
}

impl<E> ClipReward<E> {
    /// Create a new reward-clipping wrapper
    pub fn new(env: E, enabled: bool) -> Self {
        Self { env, enabled }
    }
}

#[async_trait]
impl<E> Environment for ClipReward<E>
where
    E: Environment,
{
    type Observation = E::Observation;
    type Action = E::Action;

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    fn observation_shape(&self) -> Vec<usize> {
        self.env.observation_shape()
    }

    fn action_meanings(&self) -> Vec<String> {
        self.env.action_meanings()
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.env.reset().await
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let mut step = self.env.step(action).await?;
        if self.enabled {
            step.info.insert("raw_reward", step.reward.value());
            step.reward = step.reward.sign();
        }
        Ok(step)
    }

    async fn render(&self) -> Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.env.episode_info()
    }
}

/// Settings of the DQN wrapper stack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapConfig {
    /// End learning episodes on life loss
    pub episodic_life: bool,
    /// Upper bound of random no-ops on reset (0 disables)
    pub noop_max: usize,
    /// Action repeat of the max-and-skip wrapper
    pub skip: usize,
    /// Press FIRE on reset when the game supports it
    pub fire_reset: bool,
    /// Height of the warped frames
    pub frame_height: usize,
    /// Width of the warped frames
    pub frame_width: usize,
    /// Number of stacked frames
    pub frame_stack: usize,
    /// Clip rewards to their sign
    pub clip_rewards: bool,
    /// Seed of the no-op sampler
    pub seed: u64,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            episodic_life: true,
            noop_max: 30,
            skip: 4,
            fire_reset: true,
            frame_height: 84,
            frame_width: 84,
            frame_stack: 4,
            clip_rewards: true,
            seed: 0,
        }
    }
}

/// The fully wrapped environment produced by [`wrap_dqn`]
pub type DqnEnv<Em> = ClipReward<
    FrameStack<WarpFrame<FireReset<MaxAndSkip<NoopReset<EpisodicLife<TimeLimit<AtariEnv<Em>>>>>>>>,
>;

/// Apply the DQN preprocessing stack to an Atari environment
pub fn wrap_dqn<Em>(env: AtariEnv<Em>, max_steps: usize, config: &WrapConfig) -> Result<DqnEnv<Em>>
where
    Em: crate::Emulator,
{
    let env = TimeLimit::new(env, max_steps);
    let env = EpisodicLife::new(env, config.episodic_life);
    let env = NoopReset::new(env, config.noop_max, config.seed)?;
    let env = MaxAndSkip::new(env, config.skip)?;
    let mut env = FireReset::new(env);
    if !config.fire_reset {
        env.enabled = false;
    }
    let env = WarpFrame::new(env, config.frame_height, config.frame_width);
    let env = FrameStack::new(env, config.frame_stack)?;
    let env = ClipReward::new(env, config.clip_rewards);
    tracing::debug!(?config, "wrapped environment for DQN");
    Ok(env)
}

/// Create a registered game and wrap it for DQN training
pub fn make_dqn_env(
    atari: &AtariConfig,
    wrap: &WrapConfig,
) -> Result<DqnEnv<Box<dyn crate::Emulator>>> {
    let emulator = crate::registry::make_emulator(&atari.game, &atari.emulator_settings())?;
    let env = AtariEnv::new(emulator, atari)?;
    wrap_dqn(env, atari.env.max_steps.unwrap_or(DEFAULT_MAX_STEPS), wrap)
}
