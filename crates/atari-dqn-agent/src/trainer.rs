//! Replay-based training loop and greedy evaluation

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use atari_dqn_core::{Environment, Learning, RLError, Result};

use crate::buffer::ReplayMemory;
use crate::checkpoint::Checkpointing;
use crate::utils::{running_reward, EpsilonSchedule, Schedule};

/// Training loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Random transitions stored before learning starts
    pub replay_buffer_fill_len: usize,
    /// Minibatch size
    pub batch_size: usize,
    /// Maximum number of episodes
    pub episodes: usize,
    /// Running reward that ends training
    pub stop_reward: f64,
    /// Steps over which epsilon decays by one
    pub max_epsilon_steps: usize,
    /// Initial exploration rate
    pub epsilon_start: f64,
    /// Final exploration rate
    pub epsilon_final: f64,
    /// Steps between target network syncs
    pub sync_target_net_freq: usize,
    /// Replay memory capacity
    pub replay_capacity: usize,
    /// Episodes between progress logs
    pub log_interval: usize,
    /// Episodes between checkpoints
    pub checkpoint_interval: usize,
    /// Seed of the minibatch sampler
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            replay_buffer_fill_len: 100,
            batch_size: 256,
            episodes: 100_000,
            stop_reward: 19.0,
            max_epsilon_steps: 100_000,
            epsilon_start: 1.0,
            epsilon_final: 0.02,
            sync_target_net_freq: 10_000,
            replay_capacity: 1_000_000,
            log_interval: 10,
            checkpoint_interval: 50,
            seed: 0,
        }
    }
}

impl TrainConfig {
    /// Check that every interval and size is usable
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("max_epsilon_steps", self.max_epsilon_steps),
            ("sync_target_net_freq", self.sync_target_net_freq),
            ("replay_capacity", self.replay_capacity),
            ("log_interval", self.log_interval),
            ("checkpoint_interval", self.checkpoint_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RLError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Exploration schedule described by the epsilon fields
    #[must_use]
    pub fn epsilon_schedule(&self) -> EpsilonSchedule {
        EpsilonSchedule::new(self.epsilon_start, self.epsilon_final, self.max_epsilon_steps)
    }
}

/// Outcome of [`Trainer::train`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Episodes played
    pub episodes: usize,
    /// Environment steps taken while learning
    pub total_steps: usize,
    /// Final running reward
    pub running_reward: f64,
    /// Whether the stop reward was exceeded
    pub stop_reward_reached: bool,
    /// Exploration rate of the last step
    pub epsilon: f64,
    /// Mean loss over the last episode
    pub mean_loss: Option<f64>,
}

/// Owns the environment, the agent and the replay memory
pub struct Trainer<E, A>
where
    E: Environment,
{
    env: E,
    agent: A,
    memory: ReplayMemory<E::Observation, E::Action>,
    rng: StdRng,
}

impl<E, A> Trainer<E, A>
where
    E: Environment,
    A: Learning<Observation = E::Observation, Action = E::Action> + Checkpointing,
{
    /// Create a trainer whose replay memory holds `replay_capacity` transitions
    pub fn new(env: E, agent: A, replay_capacity: usize, seed: u64) -> Result<Self> {
        Ok(Self {
            env,
            agent,
            memory: ReplayMemory::new(replay_capacity)?,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Create a trainer sized and seeded by `config`
    pub fn from_config(env: E, agent: A, config: &TrainConfig) -> Result<Self> {
        Self::new(env, agent, config.replay_capacity, config.seed)
    }

    /// The environment
    pub fn env(&self) -> &E {
        &self.env
    }

    /// The agent
    pub fn agent(&self) -> &A {
        &self.agent
    }

    /// Mutable access to the agent
    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    /// The replay memory
    pub fn memory(&self) -> &ReplayMemory<E::Observation, E::Action> {
        &self.memory
    }

    /// Take back the agent
    pub fn into_agent(self) -> A {
        self.agent
    }

    /// Store `fill_len` transitions gathered with uniformly random actions
    pub async fn populate(&mut self, fill_len: usize) -> Result<()> {
        tracing::info!(fill_len, "Populating replay buffer");
        let (mut state, _) = self.env.reset().await?;
        for _ in 0..fill_len {
            let action = self.agent.act(&state, 1.0)?;
            let step = self.env.step(action.clone()).await?;
            let done = step.done || step.truncated;
            self.memory
                .add(state, action, step.reward, step.done, step.observation.clone());
            state = if done {
                self.env.reset().await?.0
            } else {
                step.observation
            };
        }
        tracing::info!(count = self.memory.count(), "replay buffer populated, start training");
        Ok(())
    }

    /// Run the DQN training loop
    pub async fn train(&mut self, config: &TrainConfig) -> Result<TrainingReport> {
        config.validate()?;
        let start = chrono::Local::now();
        tracing::info!(start = %start.to_rfc2822(), "Start training");

        self.populate(config.replay_buffer_fill_len).await?;

        let schedule = config.epsilon_schedule();
        let mut total_steps = 0usize;
        let mut running = 0.0;
        let mut epsilon = schedule.value(0);
        let mut report = TrainingReport {
            episodes: 0,
            total_steps: 0,
            running_reward: 0.0,
            stop_reward_reached: false,
            epsilon,
            mean_loss: None,
        };

        for i in 1..=config.episodes {
            let (mut state, _) = self.env.reset().await?;
            let mut episode_reward = 0.0;
            let mut episode_length = 0usize;
            let mut loss_sum = 0.0;
            let mut done = false;

            while !done {
                if total_steps % config.sync_target_net_freq == 0 {
                    tracing::info!(total_steps, "synchronizing target network");
                    self.agent.sync_target()?;
                }

                epsilon = schedule.value(total_steps);
                let action = self.agent.act(&state, epsilon)?;
                let step = self.env.step(action.clone()).await?;
                done = step.done || step.truncated;
                episode_reward += step.reward.value();
                let next_state = step.observation;

                self.memory
                    .add(state, action, step.reward, step.done, next_state.clone());
                let batch = self.memory.sample(config.batch_size, &mut self.rng);
                loss_sum += self.agent.learn(&batch)?;

                state = next_state;
                total_steps += 1;
                episode_length += 1;
            }

            running = running_reward(running, episode_reward);
            let stop = running > config.stop_reward;

            if i % config.log_interval == 0 || stop {
                tracing::info!(
                    global_step = total_steps,
                    episode = i,
                    running_reward = %format!("{running:.2}"),
                    epsilon = %format!("{epsilon:.2}"),
                    episode_length,
                    episode_reward,
                    "training progress"
                );
            }

            if i % config.checkpoint_interval == 0 || stop {
                let now = chrono::Local::now();
                tracing::info!(
                    now = %now.to_rfc2822(),
                    running_for_secs = (now - start).num_seconds(),
                    episode = i,
                    "saving model"
                );
                self.agent.save_model_during_training(i).await?;
            }

            #[allow(clippy::cast_precision_loss)]
            let mean_loss = (episode_length > 0).then(|| loss_sum / episode_length as f64);
            report = TrainingReport {
                episodes: i,
                total_steps,
                running_reward: running,
                stop_reward_reached: stop,
                epsilon,
                mean_loss,
            };

            if stop {
                tracing::info!(running_reward = running, "stop reward reached, saving final model");
                self.agent.save_final_model().await?;
                break;
            }
        }

        tracing::info!(finish = %chrono::Local::now().to_rfc2822(), "Finish training");
        Ok(report)
    }

    /// Play greedy episodes, rendering every step; returns the episode rewards
    pub async fn play(&mut self, episodes: usize) -> Result<Vec<f64>> {
        let mut rewards = Vec::with_capacity(episodes);
        for i in 1..=episodes {
            let (mut state, _) = self.env.reset().await?;
            let mut total = 0.0;
            loop {
                let action = self.agent.act(&state, 0.0)?;
                tokio::time::sleep(Duration::from_millis(1)).await;
                let step = self.env.step(action).await?;
                self.env.render().await?;
                total += step.reward.value();
                if step.done || step.truncated {
                    break;
                }
                state = step.observation;
            }
            tracing::info!(episode = i, reward = total, "played episode");
            rewards.push(total);
        }
        Ok(rewards)
    }

    /// Close the environment
    pub async fn close_env(&mut self) -> Result<()> {
        self.env.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{episode_model_path, final_model_path};
    use crate::dqn::{DQNAgent, DQNConfig};
    use approx::assert_relative_eq;
    use async_trait::async_trait;
    use atari_dqn_core::{
        ActionSpace, Agent, DiscreteAction, DiscreteSpace, GrayFrame, Reward, StackedFrames, Step,
        StepInfo, TransitionBatch,
    };
    use ndarray::Array2;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fixed-length episodes paying 1 per step; the pixels hold the step index
    struct Corridor {
        t: usize,
        len: usize,
        side: usize,
        renders: AtomicUsize,
    }

    impl Corridor {
        fn new(len: usize, side: usize) -> Self {
            Self {
                t: 0,
                len,
                side,
                renders: AtomicUsize::new(0),
            }
        }

        fn observation(&self) -> StackedFrames {
            #[allow(clippy::cast_possible_truncation)]
            let frame = GrayFrame::new(Array2::from_elem((self.side, self.side), self.t as u8));
            StackedFrames::new(vec![frame; 4]).unwrap()
        }
    }

    #[async_trait]
    impl Environment for Corridor {
        type Observation = StackedFrames;
        type Action = DiscreteAction;

        fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
            Box::new(DiscreteSpace::new(2))
        }

        fn observation_shape(&self) -> Vec<usize> {
            vec![4, self.side, self.side]
        }

        async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
            self.t = 0;
            Ok((self.observation(), StepInfo::default()))
        }

        async fn step(&mut self, _action: Self::Action) -> Result<Step<Self::Observation>> {
            self.t += 1;
            Ok(Step {
                observation: self.observation(),
                reward: Reward(1.0),
                done: self.t >= self.len,
                truncated: false,
                info: StepInfo::default(),
            })
        }

        async fn render(&self) -> Result<()> {
            self.renders.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        syncs: usize,
        learned: usize,
        epsilons: Vec<f64>,
        saved: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Agent for Recorder {
        type Observation = StackedFrames;
        type Action = DiscreteAction;

        fn act(&mut self, _observation: &StackedFrames, epsilon: f64) -> Result<DiscreteAction> {
            self.epsilons.push(epsilon);
            Ok(DiscreteAction(0))
        }

        async fn save(&self, path: &Path) -> Result<()> {
            self.saved.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }

        async fn load(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    impl Learning for Recorder {
        fn learn(&mut self, batch: &TransitionBatch<StackedFrames, DiscreteAction>) -> Result<f64> {
            assert!(!batch.is_empty());
            self.learned += 1;
            Ok(0.5)
        }

        fn sync_target(&mut self) -> Result<()> {
            self.syncs += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl Checkpointing for Recorder {
        async fn save_final_model(&self) -> Result<PathBuf> {
            let path = final_model_path(Path::new("out"));
            self.save(&path).await?;
            Ok(path)
        }

        async fn save_model_during_training(&self, episode: usize) -> Result<PathBuf> {
            let path = episode_model_path(Path::new("out"), episode);
            self.save(&path).await?;
            Ok(path)
        }
    }

    fn config() -> TrainConfig {
        TrainConfig {
            replay_buffer_fill_len: 3,
            batch_size: 2,
            episodes: 4,
            stop_reward: 100.0,
            max_epsilon_steps: 10,
            sync_target_net_freq: 4,
            replay_capacity: 50,
            log_interval: 2,
            checkpoint_interval: 2,
            ..TrainConfig::default()
        }
    }

    #[tokio::test]
    async fn test_train_counts_and_checkpoints() {
        let mut trainer = Trainer::new(Corridor::new(5, 1), Recorder::default(), 50, 0).unwrap();
        let report = trainer.train(&config()).await.unwrap();

        assert_eq!(report.episodes, 4);
        assert_eq!(report.total_steps, 20);
        assert!(!report.stop_reward_reached);
        assert_relative_eq!(report.running_reward, 1.7195, epsilon = 1e-9);
        assert_relative_eq!(report.epsilon, 0.02);
        assert_relative_eq!(report.mean_loss.unwrap(), 0.5);
        assert_eq!(trainer.memory().count(), 23);

        let agent = trainer.into_agent();
        // syncs at steps 0, 4, 8, 12 and 16
        assert_eq!(agent.syncs, 5);
        assert_eq!(agent.learned, 20);
        // three random fill actions, then a decaying epsilon
        assert_eq!(&agent.epsilons[..3], &[1.0, 1.0, 1.0]);
        assert_relative_eq!(agent.epsilons[3], 1.0);
        assert_relative_eq!(agent.epsilons[4], 0.9);
        assert_eq!(
            *agent.saved.lock().unwrap(),
            vec![episode_model_path(Path::new("out"), 2), episode_model_path(Path::new("out"), 4)]
        );
    }

    #[tokio::test]
    async fn test_stop_reward_saves_final_model() {
        let config = TrainConfig {
            stop_reward: 0.9,
            checkpoint_interval: 10,
            ..config()
        };
        let mut trainer = Trainer::new(Corridor::new(5, 1), Recorder::default(), 50, 0).unwrap();
        let report = trainer.train(&config).await.unwrap();

        // running reward: 0.5, then 0.95
        assert_eq!(report.episodes, 2);
        assert!(report.stop_reward_reached);
        assert_eq!(
            *trainer.agent().saved.lock().unwrap(),
            vec![episode_model_path(Path::new("out"), 2), final_model_path(Path::new("out"))]
        );
    }

    #[tokio::test]
    async fn test_populate_restarts_from_reset_observation() {
        let mut trainer = Trainer::new(Corridor::new(5, 1), Recorder::default(), 50, 0).unwrap();
        trainer.populate(7).await.unwrap();
        assert_eq!(trainer.memory().count(), 7);

        let mut rng = StdRng::seed_from_u64(9);
        let batch = trainer.memory().sample(7, &mut rng);
        let mut tags: Vec<u8> = batch.states.iter().map(|s| s.frames()[0].pixels()[[0, 0]]).collect();
        tags.sort_unstable();
        assert_eq!(tags, vec![0, 0, 1, 1, 2, 3, 4]);
        assert_eq!(batch.dones.iter().filter(|&&d| d).count(), 1);
    }

    #[tokio::test]
    async fn test_play_is_greedy_and_renders() {
        let mut trainer = Trainer::new(Corridor::new(5, 1), Recorder::default(), 10, 0).unwrap();
        let rewards = trainer.play(2).await.unwrap();
        assert_eq!(rewards, vec![5.0, 5.0]);
        assert_eq!(trainer.env().renders.load(Ordering::Relaxed), 10);
        assert!(trainer.agent().epsilons.iter().all(|&e| e == 0.0));
        trainer.close_env().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut trainer = Trainer::new(Corridor::new(5, 1), Recorder::default(), 10, 0).unwrap();
        let config = TrainConfig {
            sync_target_net_freq: 0,
            ..config()
        };
        assert!(trainer.train(&config).await.is_err());
        assert!(Trainer::new(Corridor::new(5, 1), Recorder::default(), 0, 0).is_err());
    }

    #[tokio::test]
    async fn test_learning_epsilons_follow_schedule() {
        let config = TrainConfig {
            epsilon_start: 0.8,
            epsilon_final: 0.1,
            max_epsilon_steps: 4,
            episodes: 2,
            ..config()
        };
        let schedule = config.epsilon_schedule();
        assert_relative_eq!(schedule.start, 0.8);
        assert_relative_eq!(schedule.end, 0.1);
        assert_eq!(schedule.max_steps, 4);

        let mut trainer = Trainer::new(Corridor::new(5, 1), Recorder::default(), 50, 0).unwrap();
        let report = trainer.train(&config).await.unwrap();
        let agent = trainer.into_agent();
        let learning = &agent.epsilons[config.replay_buffer_fill_len..];
        assert_eq!(learning.len(), 10);
        for (t, &epsilon) in learning.iter().enumerate() {
            assert_relative_eq!(epsilon, schedule.value(t));
        }
        assert_relative_eq!(learning[2], 0.3, epsilon = 1e-12);
        assert_relative_eq!(report.epsilon, 0.1);
    }

    #[tokio::test]
    async fn test_dqn_agent_trains_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let agent_config = DQNConfig {
            out_dir: dir.path().to_path_buf(),
            use_cuda: false,
            ..DQNConfig::default()
        };
        let agent = DQNAgent::new(agent_config, &[4, 36, 36], 2).unwrap();
        let mut trainer = Trainer::new(Corridor::new(3, 36), agent, 100, 1).unwrap();
        let config = TrainConfig {
            replay_buffer_fill_len: 4,
            batch_size: 4,
            episodes: 2,
            checkpoint_interval: 1,
            ..config()
        };
        let report = trainer.train(&config).await.unwrap();
        assert_eq!(report.total_steps, 6);
        assert!(report.mean_loss.unwrap().is_finite());
        assert!(dir.path().join("current_model_1.safetensors").exists());
        assert!(dir.path().join("current_model_2.json").exists());
        assert_eq!(trainer.agent().metrics().updates, 6);
    }
}
