//! Agent traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Action, Observation, TransitionBatch};

/// Core agent trait
#[async_trait]
pub trait Agent: Send + Sync {
    /// Observation type
    type Observation: Observation;
    /// Action type
    type Action: Action;

    /// Select an action, exploring uniformly at random with probability `epsilon`
    fn act(&mut self, observation: &Self::Observation, epsilon: f64) -> crate::Result<Self::Action>;

    /// Save the agent
    async fn save(&self, path: &std::path::Path) -> crate::Result<()>;

    /// Load the agent
    async fn load(&mut self, path: &std::path::Path) -> crate::Result<()>;

    /// Get agent metrics
    fn metrics(&self) -> AgentMetrics {
        AgentMetrics::default()
    }
}

/// Agent metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Total gradient updates performed
    pub updates: usize,
    /// Total target network synchronizations
    pub target_syncs: usize,
    /// Loss of the most recent update
    pub loss: Option<f64>,
}

/// Trait for agents that learn from replayed transitions
pub trait Learning: Agent {
    /// One gradient update on a minibatch; returns the loss
    fn learn(&mut self, batch: &TransitionBatch<Self::Observation, Self::Action>) -> crate::Result<f64>;

    /// Copy the estimation network's parameters into the target network
    fn sync_target(&mut self) -> crate::Result<()>;
}
