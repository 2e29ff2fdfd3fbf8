//! Checkpoint file layout and metadata sidecars

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

use atari_dqn_core::{AgentMetrics, Result};

/// File name of the model saved when training reaches its stop reward
pub const FINAL_MODEL: &str = "final_model.safetensors";

/// Path of the final model inside `out_dir`
#[must_use]
pub fn final_model_path(out_dir: &Path) -> PathBuf {
    out_dir.join(FINAL_MODEL)
}

/// Path of the checkpoint written after `episode` episodes
#[must_use]
pub fn episode_model_path(out_dir: &Path, episode: usize) -> PathBuf {
    out_dir.join(format!("current_model_{episode}.safetensors"))
}

/// Sidecar path holding the metadata of a weights file
#[must_use]
pub fn metadata_path(weights: &Path) -> PathBuf {
    weights.with_extension("json")
}

/// Metadata stored next to a weights file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta<C> {
    /// Agent configuration
    pub config: C,
    /// Network input shape (frames, height, width)
    pub input_shape: [usize; 3],
    /// Number of actions
    pub num_actions: usize,
    /// Training counters at save time
    pub metrics: AgentMetrics,
    /// Wall-clock save time
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl<C: Serialize + DeserializeOwned> CheckpointMeta<C> {
    /// Write the sidecar for `weights`
    pub async fn write(&self, weights: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(metadata_path(weights), json).await?;
        Ok(())
    }

    /// Read the sidecar of `weights`
    pub async fn read(weights: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(metadata_path(weights)).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Agents that persist themselves under an output directory
#[async_trait]
pub trait Checkpointing {
    /// Save the final model; returns the weights path
    async fn save_final_model(&self) -> Result<PathBuf>;

    /// Save an intermediate model after `episode` episodes; returns the weights path
    async fn save_model_during_training(&self, episode: usize) -> Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let dir = Path::new("model");
        assert_eq!(final_model_path(dir), Path::new("model/final_model.safetensors"));
        assert_eq!(
            episode_model_path(dir, 50),
            Path::new("model/current_model_50.safetensors")
        );
        assert_eq!(
            metadata_path(&episode_model_path(dir, 50)),
            Path::new("model/current_model_50.json")
        );
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("w.safetensors");
        let meta = CheckpointMeta {
            config: serde_json::json!({"gamma": 0.99}),
            input_shape: [4, 84, 84],
            num_actions: 6,
            metrics: AgentMetrics::default(),
            saved_at: chrono::Utc::now(),
        };
        meta.write(&weights).await.unwrap();
        let back: CheckpointMeta<serde_json::Value> = CheckpointMeta::read(&weights).await.unwrap();
        assert_eq!(back.input_shape, [4, 84, 84]);
        assert_eq!(back.config["gamma"], 0.99);
    }
}
