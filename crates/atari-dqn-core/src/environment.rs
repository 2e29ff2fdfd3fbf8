//! Environment traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Action, ActionSpace, Observation, Reward};

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step<O> {
    /// Observation from the environment
    pub observation: O,
    /// Reward signal
    pub reward: Reward,
    /// Whether the episode is done
    pub done: bool,
    /// Whether the episode was truncated (e.g., time limit)
    pub truncated: bool,
    /// Additional info from the environment
    pub info: StepInfo,
}

impl<O> Step<O> {
    /// Replace the observation, keeping everything else
    pub fn map_observation<O2>(self, f: impl FnOnce(O) -> O2) -> Step<O2> {
        Step {
            observation: f(self.observation),
            reward: self.reward,
            done: self.done,
            truncated: self.truncated,
            info: self.info,
        }
    }
}

/// Additional information from a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl StepInfo {
    /// Key under which emulators publish the remaining lives
    pub const LIVES: &'static str = "lives";

    /// Set a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Read an unsigned integer field
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(serde_json::Value::as_u64)
    }

    /// Remaining lives, when the environment reports them
    #[must_use]
    pub fn lives(&self) -> Option<u64> {
        self.get_u64(Self::LIVES)
    }
}

/// Episode information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Episode ID
    pub id: String,
    /// Total reward
    pub total_reward: f64,
    /// Number of steps
    pub steps: usize,
    /// Whether episode was truncated
    pub truncated: bool,
    /// Start time
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// End time
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Configuration for environments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Random seed
    pub seed: Option<u64>,
    /// Maximum episode steps
    pub max_steps: Option<usize>,
    /// Directory that `render` writes frames into
    pub render_dir: Option<PathBuf>,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Core environment trait
#[async_trait]
pub trait Environment: Send + Sync {
    /// Observation type
    type Observation: Observation;
    /// Action type
    type Action: Action;

    /// Get the action space
    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>>;

    /// Shape of the observations returned by `reset` and `step`
    fn observation_shape(&self) -> Vec<usize>;

    /// Human-readable names of the actions, indexed like the action space
    fn action_meanings(&self) -> Vec<String> {
        Vec::new()
    }

    /// Reset the environment
    async fn reset(&mut self) -> crate::Result<(Self::Observation, StepInfo)>;

    /// Take a step in the environment
    async fn step(&mut self, action: Self::Action) -> crate::Result<Step<Self::Observation>>;

    /// Render the environment (optional)
    async fn render(&self) -> crate::Result<()> {
        Ok(())
    }

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Get current episode info
    fn episode_info(&self) -> Option<Episode> {
        None
    }
}

/// Wrapper for environments that tracks episodes
pub struct TrackedEnvironment<E> {
    /// Inner environment
    pub env: E,
    /// Current episode
    pub episode: Option<Episode>,
    /// Step counter
    pub step_count: usize,
}

impl<E> TrackedEnvironment<E> {
    /// Create a new tracked environment
    pub fn new(env: E) -> Self {
        Self {
            env,
            episode: None,
            step_count: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TrackedEnvironment<E>
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

    async fn reset(&mut self) -> crate::Result<(Self::Observation, StepInfo)> {
        // End current episode if exists
        if let Some(ref mut episode) = self.episode {
            if episode.end_time.is_none() {
                episode.end_time = Some(chrono::Utc::now());
            }
        }

        self.episode = Some(Episode {
            id: uuid::Uuid::new_v4().to_string(),
            total_reward: 0.0,
            steps: 0,
            truncated: false,
            start_time: chrono::Utc::now(),
            end_time: None,
        });
        self.step_count = 0;

        self.env.reset().await
    }

    async fn step(&mut self, action: Self::Action) -> crate::Result<Step<Self::Observation>> {
        let step = self.env.step(action).await?;

        self.step_count += 1;
        if let Some(ref mut episode) = self.episode {
            episode.total_reward += step.reward.0;
            episode.steps = self.step_count;

            if step.done || step.truncated {
                episode.truncated = step.truncated;
                episode.end_time = Some(chrono::Utc::now());
                tracing::debug!(
                    episode = %episode.id,
                    steps = episode.steps,
                    reward = episode.total_reward,
                    "episode finished"
                );
            }
        }

        Ok(step)
    }

    async fn render(&self) -> crate::Result<()> {
        self.env.render().await
    }

    async fn close(&mut self) -> crate::Result<()> {
        self.env.close().await
    }

    fn episode_info(&self) -> Option<Episode> {
        self.episode.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiscreteAction, DiscreteSpace, GrayFrame};
    use ndarray::Array2;

    /// Ends after three steps with reward 1 each
    struct Countdown {
        left: usize,
    }

    #[async_trait]
    impl Environment for Countdown {
        type Observation = GrayFrame;
        type Action = DiscreteAction;

        fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
            Box::new(DiscreteSpace::new(2))
        }

        fn observation_shape(&self) -> Vec<usize> {
            vec![1, 1]
        }

        async fn reset(&mut self) -> crate::Result<(Self::Observation, StepInfo)> {
            self.left = 3;
            Ok((GrayFrame::new(Array2::zeros((1, 1))), StepInfo::default()))
        }

        async fn step(&mut self, _action: Self::Action) -> crate::Result<Step<Self::Observation>> {
            self.left -= 1;
            Ok(Step {
                observation: GrayFrame::new(Array2::zeros((1, 1))),
                reward: Reward(1.0),
                done: self.left == 0,
                truncated: false,
                info: StepInfo::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_tracked_environment_records_episode() {
        let mut env = TrackedEnvironment::new(Countdown { left: 0 });
        env.reset().await.unwrap();
        loop {
            let step = env.step(DiscreteAction(0)).await.unwrap();
            if step.done {
                break;
            }
        }
        let episode = env.episode_info().unwrap();
        assert_eq!(episode.steps, 3);
        assert_eq!(episode.total_reward, 3.0);
        assert!(episode.end_time.is_some());
    }

    #[test]
    fn test_step_info_lives() {
        let mut info = StepInfo::default();
        assert_eq!(info.lives(), None);
        info.insert(StepInfo::LIVES, 3u32);
        assert_eq!(info.lives(), Some(3));
    }
}
