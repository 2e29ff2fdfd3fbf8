//! Deep Q-Network (DQN) agent implementation

use async_trait::async_trait;
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use atari_dqn_core::{
    Agent, AgentMetrics, DiscreteAction, Learning, Observation, RLError, Result, TransitionBatch,
};

use crate::checkpoint::{self, CheckpointMeta, Checkpointing};
use crate::network::{observations_to_tensor, tensor_error, QNetwork};
use crate::optim::{DqnOptimizer, OptimizerConfig};

/// DQN-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DQNConfig {
    /// Discount factor
    pub gamma: f64,
    /// Optimizer of the estimation network
    pub optimizer: OptimizerConfig,
    /// Directory receiving checkpoints
    pub out_dir: PathBuf,
    /// Seed of the exploration sampler
    pub seed: u64,
    /// Run on the first CUDA device when one is available
    pub use_cuda: bool,
}

impl Default for DQNConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            optimizer: OptimizerConfig::default(),
            out_dir: PathBuf::from("./model"),
            seed: 0,
            use_cuda: true,
        }
    }
}

struct Networks {
    online_varmap: VarMap,
    target_varmap: VarMap,
    online: QNetwork,
    target: QNetwork,
    optimizer: DqnOptimizer,
}

impl Networks {
    fn build(
        config: &DQNConfig,
        input_shape: [usize; 3],
        num_actions: usize,
        device: &Device,
    ) -> candle_core::Result<Self> {
        let online_varmap = VarMap::new();
        let target_varmap = VarMap::new();
        let online = QNetwork::new(
            VarBuilder::from_varmap(&online_varmap, DType::F32, device),
            input_shape,
            num_actions,
        )?;
        let target = QNetwork::new(
            VarBuilder::from_varmap(&target_varmap, DType::F32, device),
            input_shape,
            num_actions,
        )?;
        let optimizer = DqnOptimizer::new(&config.optimizer, online_varmap.all_vars())?;
        Ok(Self {
            online_varmap,
            target_varmap,
            online,
            target,
            optimizer,
        })
    }
}

/// DQN agent with an estimation network and a periodically synced target network
pub struct DQNAgent<O> {
    config: DQNConfig,
    input_shape: [usize; 3],
    num_actions: usize,
    device: Device,
    nets: Networks,
    rng: StdRng,
    metrics: AgentMetrics,
    _observation: PhantomData<fn() -> O>,
}

impl<O: Observation> DQNAgent<O> {
    /// Create a new DQN agent for `(frames, height, width)` observations
    pub fn new(config: DQNConfig, input_shape: &[usize], num_actions: usize) -> Result<Self> {
        let input_shape: [usize; 3] = input_shape.try_into().map_err(|_| {
            RLError::InvalidConfig(format!("expected a (frames, height, width) input, got {input_shape:?}"))
        })?;
        if num_actions == 0 {
            return Err(RLError::InvalidConfig("agent needs at least one action".into()));
        }
        let device = if config.use_cuda {
            Device::cuda_if_available(0).map_err(tensor_error)?
        } else {
            Device::Cpu
        };
        let nets = Networks::build(&config, input_shape, num_actions, &device).map_err(tensor_error)?;
        tracing::info!(
            ?input_shape,
            num_actions,
            device = ?device,
            lr = nets.optimizer.learning_rate(),
            "created DQN agent"
        );

        let mut agent = Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            input_shape,
            num_actions,
            device,
            nets,
            metrics: AgentMetrics::default(),
            _observation: PhantomData,
        };
        agent.sync_target_network()?;
        Ok(agent)
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &DQNConfig {
        &self.config
    }

    /// Number of actions
    #[must_use]
    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// Device holding the networks
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Q-values `(batch, num_actions)` of the estimation network
    pub fn predict_q_values(&self, states: &[O]) -> Result<Tensor> {
        let xs = observations_to_tensor(states, &self.device).map_err(tensor_error)?;
        self.nets.online.forward(&xs).map_err(tensor_error)
    }

    /// Q-values `(batch, num_actions)` of the target network
    pub fn predict_q_target_values(&self, states: &[O]) -> Result<Tensor> {
        let xs = observations_to_tensor(states, &self.device).map_err(tensor_error)?;
        let q = self.nets.target.forward(&xs).map_err(tensor_error)?;
        Ok(q.detach())
    }

    /// Epsilon-greedy action: uniform with probability `epsilon`, else the argmax
    pub fn select_action(&mut self, state: &O, epsilon: f64) -> Result<usize> {
        if self.rng.gen::<f64>() < epsilon {
            return Ok(self.rng.gen_range(0..self.num_actions));
        }
        let q = self.predict_q_values(std::slice::from_ref(state))?;
        let best = q
            .argmax(D::Minus1)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_scalar::<u32>())
            .map_err(tensor_error)?;
        Ok(best as usize)
    }

    /// `reward + gamma * max_a Q_target(next, a)`, without the max term for finished transitions
    pub fn calculate_q_targets(&self, next_states: &[O], rewards: &[f32], dones: &[bool]) -> Result<Vec<f32>> {
        for len in [rewards.len(), dones.len()] {
            if len != next_states.len() {
                return Err(RLError::DimensionMismatch {
                    expected: next_states.len(),
                    actual: len,
                });
            }
        }
        let next_max = self
            .predict_q_target_values(next_states)?
            .max(D::Minus1)
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(tensor_error)?;

        #[allow(clippy::cast_possible_truncation)]
        let gamma = self.config.gamma as f32;
        Ok(rewards
            .iter()
            .zip(dones)
            .zip(next_max)
            .map(|((&r, &done), q)| if done { r } else { r + gamma * q })
            .collect())
    }

    /// One gradient step on the MSE between `Q(s, a)` and `targets`; returns the loss
    pub fn update(&mut self, states: &[O], targets: &[f32], actions: &[usize]) -> Result<f64> {
        for len in [targets.len(), actions.len()] {
            if len != states.len() {
                return Err(RLError::DimensionMismatch {
                    expected: states.len(),
                    actual: len,
                });
            }
        }
        if let Some(&bad) = actions.iter().find(|&&a| a >= self.num_actions) {
            return Err(RLError::InvalidAction(format!("{bad} not in 0..{}", self.num_actions)));
        }

        let predicted = self.predict_q_values(states)?;
        let loss = self.mse_on_actions(&predicted, targets, actions).map_err(tensor_error)?;
        self.nets.optimizer.backward_step(&loss).map_err(tensor_error)?;
        let loss = f64::from(loss.to_scalar::<f32>().map_err(tensor_error)?);

        self.metrics.updates += 1;
        self.metrics.loss = Some(loss);
        Ok(loss)
    }

    fn mse_on_actions(&self, predicted: &Tensor, targets: &[f32], actions: &[usize]) -> candle_core::Result<Tensor> {
        #[allow(clippy::cast_possible_truncation)]
        let indices: Vec<u32> = actions.iter().map(|&a| a as u32).collect();
        let indices = Tensor::from_vec(indices, actions.len(), &self.device)?.unsqueeze(1)?;
        let targets = Tensor::from_slice(targets, targets.len(), &self.device)?.unsqueeze(1)?;
        let affected = predicted.gather(&indices, 1)?;
        candle_nn::loss::mse(&affected, &targets)
    }

    /// Copy every estimation-network parameter into the target network
    pub fn sync_target_network(&mut self) -> Result<()> {
        let online = self
            .nets
            .online_varmap
            .data()
            .lock()
            .map_err(|_| RLError::Agent("online parameters lock poisoned".into()))?;
        let mut target = self
            .nets
            .target_varmap
            .data()
            .lock()
            .map_err(|_| RLError::Agent("target parameters lock poisoned".into()))?;
        for (name, var) in target.iter_mut() {
            let source = online
                .get(name)
                .ok_or_else(|| RLError::Agent(format!("missing parameter {name}")))?;
            var.set(&source.as_tensor().detach()).map_err(tensor_error)?;
        }
        drop(target);
        drop(online);

        self.metrics.target_syncs += 1;
        tracing::debug!(syncs = self.metrics.target_syncs, "synchronized target network");
        Ok(())
    }

    /// Replace both networks and the optimizer with freshly initialized ones
    pub fn reinit(&mut self) -> Result<()> {
        self.nets = Networks::build(&self.config, self.input_shape, self.num_actions, &self.device)
            .map_err(tensor_error)?;
        self.metrics = AgentMetrics::default();
        self.sync_target_network()
    }

    /// Load estimation-network weights, then sync the target network
    pub async fn load_model(&mut self, path: &Path) -> Result<()> {
        self.load(path).await
    }

    fn meta(&self) -> CheckpointMeta<DQNConfig> {
        CheckpointMeta {
            config: self.config.clone(),
            input_shape: self.input_shape,
            num_actions: self.num_actions,
            metrics: self.metrics.clone(),
            saved_at: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl<O: Observation> Agent for DQNAgent<O> {
    type Observation = O;
    type Action = DiscreteAction;

    fn act(&mut self, observation: &O, epsilon: f64) -> Result<DiscreteAction> {
        self.select_action(observation, epsilon).map(DiscreteAction)
    }

    async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.nets.online_varmap.save(path).map_err(tensor_error)?;
        self.meta().write(path).await?;
        tracing::info!(path = %path.display(), "saved model");
        Ok(())
    }

    async fn load(&mut self, path: &Path) -> Result<()> {
        self.nets.online_varmap.load(path).map_err(tensor_error)?;
        self.sync_target_network()?;
        tracing::info!(path = %path.display(), "loaded model");
        Ok(())
    }

    fn metrics(&self) -> AgentMetrics {
        self.metrics.clone()
    }
}

impl<O: Observation> Learning for DQNAgent<O> {
    fn learn(&mut self, batch: &TransitionBatch<O, DiscreteAction>) -> Result<f64> {
        if batch.is_empty() {
            return Err(RLError::Agent("cannot learn from an empty batch".into()));
        }
        let targets = self.calculate_q_targets(&batch.next_states, &batch.rewards, &batch.dones)?;
        self.update(&batch.states, &targets, &batch.action_indices())
    }

    fn sync_target(&mut self) -> Result<()> {
        self.sync_target_network()
    }
}

#[async_trait]
impl<O: Observation> Checkpointing for DQNAgent<O> {
    async fn save_final_model(&self) -> Result<PathBuf> {
        let path = checkpoint::final_model_path(&self.config.out_dir);
        self.save(&path).await?;
        Ok(path)
    }

    async fn save_model_during_training(&self, episode: usize) -> Result<PathBuf> {
        let path = checkpoint::episode_model_path(&self.config.out_dir, episode);
        self.save(&path).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use atari_dqn_core::{GrayFrame, Reward, StackedFrames, Transition};
    use ndarray::Array2;

    const SIDE: usize = 36;

    fn stack(value: u8) -> StackedFrames {
        let frame = GrayFrame::new(Array2::from_elem((SIDE, SIDE), value));
        StackedFrames::new(vec![frame; 4]).unwrap()
    }

    fn agent(out_dir: &Path) -> DQNAgent<StackedFrames> {
        let config = DQNConfig {
            out_dir: out_dir.to_path_buf(),
            use_cuda: false,
            seed: 3,
            ..DQNConfig::default()
        };
        DQNAgent::new(config, &[4, SIDE, SIDE], 3).unwrap()
    }

    fn q_row(agent: &DQNAgent<StackedFrames>, state: &StackedFrames, target: bool) -> Vec<f32> {
        let states = std::slice::from_ref(state);
        let q = if target {
            agent.predict_q_target_values(states).unwrap()
        } else {
            agent.predict_q_values(states).unwrap()
        };
        q.squeeze(0).unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let config = DQNConfig {
            use_cuda: false,
            ..DQNConfig::default()
        };
        assert!(DQNAgent::<StackedFrames>::new(config.clone(), &[84, 84], 3).is_err());
        assert!(DQNAgent::<StackedFrames>::new(config, &[4, SIDE, SIDE], 0).is_err());
    }

    #[test]
    fn test_target_tracks_online_only_on_sync() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = agent(dir.path());
        let s = stack(100);
        assert_eq!(q_row(&agent, &s, false), q_row(&agent, &s, true));

        let before = q_row(&agent, &s, true);
        agent.update(&[s.clone()], &[5.0], &[1]).unwrap();
        assert_ne!(q_row(&agent, &s, false), before);
        assert_eq!(q_row(&agent, &s, true), before);

        agent.sync_target_network().unwrap();
        assert_eq!(q_row(&agent, &s, false), q_row(&agent, &s, true));
        assert_eq!(agent.metrics().target_syncs, 2);
    }

    #[test]
    fn test_q_targets_zero_future_on_done() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent(dir.path());
        let s = stack(50);
        let max_q = q_row(&agent, &s, true).into_iter().fold(f32::MIN, f32::max);

        let targets = agent
            .calculate_q_targets(&[s.clone(), s.clone()], &[1.0, -1.0], &[false, true])
            .unwrap();
        assert_relative_eq!(targets[0], 1.0 + 0.99 * max_q, epsilon = 1e-5);
        assert_relative_eq!(targets[1], -1.0);

        assert!(agent.calculate_q_targets(&[s], &[1.0, 2.0], &[false]).is_err());
    }

    #[test]
    fn test_repeated_updates_reduce_loss() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = agent(dir.path());
        let states = vec![stack(0), stack(128), stack(255)];
        let targets = [1.0, -1.0, 0.5];
        let actions = [0, 1, 2];
        let first = agent.update(&states, &targets, &actions).unwrap();
        let mut last = first;
        for _ in 0..50 {
            last = agent.update(&states, &targets, &actions).unwrap();
        }
        assert!(last < first, "loss {last} did not drop below {first}");
        assert_eq!(agent.metrics().updates, 51);
        assert!(agent.update(&states, &targets, &[0, 1, 3]).is_err());
    }

    #[test]
    fn test_adamw_update_moves_online_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = DQNConfig {
            out_dir: dir.path().to_path_buf(),
            use_cuda: false,
            seed: 3,
            optimizer: OptimizerConfig::AdamW {
                lr: 1e-3,
                weight_decay: 0.0,
            },
            ..DQNConfig::default()
        };
        let mut agent = DQNAgent::<StackedFrames>::new(config, &[4, SIDE, SIDE], 3).unwrap();
        let s = stack(60);
        let before = q_row(&agent, &s, false);

        let loss = agent.update(&[s.clone()], &[4.0], &[0]).unwrap();
        assert!(loss.is_finite());
        let after = q_row(&agent, &s, false);
        assert_ne!(after, before);
        assert!((after[0] - 4.0).abs() < (before[0] - 4.0).abs());
        assert_eq!(q_row(&agent, &s, true), before);
    }

    #[test]
    fn test_select_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = agent(dir.path());
        let s = stack(10);
        let q = q_row(&agent, &s, false);
        let best = q
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(agent.select_action(&s, 0.0).unwrap(), best);
        for _ in 0..20 {
            assert!(agent.select_action(&s, 1.0).unwrap() < 3);
        }
    }

    #[test]
    fn test_learn_from_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = agent(dir.path());
        let mut batch = TransitionBatch::with_capacity(2);
        for (value, done) in [(20, false), (40, true)] {
            batch.push(&Transition {
                state: stack(value),
                action: DiscreteAction(1),
                reward: Reward(1.0),
                done,
                next_state: stack(value + 1),
            });
        }
        let loss = agent.learn(&batch).unwrap();
        assert!(loss.is_finite());
        assert!(agent.learn(&TransitionBatch::with_capacity(0)).is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("model");
        let mut trained = agent(&out);
        let s = stack(77);
        trained.update(&[s.clone()], &[3.0], &[2]).unwrap();

        let path = trained.save_model_during_training(50).await.unwrap();
        assert_eq!(path, out.join("current_model_50.safetensors"));
        assert!(path.exists());
        let meta: CheckpointMeta<DQNConfig> = CheckpointMeta::read(&path).await.unwrap();
        assert_eq!(meta.num_actions, 3);
        assert_eq!(meta.metrics.updates, 1);

        let mut fresh = agent(&out);
        fresh.reinit().unwrap();
        fresh.load_model(&path).await.unwrap();
        assert_eq!(q_row(&fresh, &s, false), q_row(&trained, &s, false));
        assert_eq!(q_row(&fresh, &s, true), q_row(&trained, &s, false));

        let final_path = trained.save_final_model().await.unwrap();
        assert_eq!(final_path, out.join("final_model.safetensors"));
    }
}
