// Run configuration: one JSON file with a section per component

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use atari_dqn_agent::{DQNConfig, TrainConfig};
use atari_dqn_env::{AtariConfig, WrapConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub atari: AtariConfig,
    pub wrap: WrapConfig,
    pub agent: DQNConfig,
    pub train: TrainConfig,
}

impl RunConfig {
    /// Read a run file; missing sections and fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"train": {"episodes": 7}, "atari": {"frame_skip": 2}}"#).unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.train.episodes, 7);
        assert_eq!(config.train.batch_size, 256);
        assert_eq!(config.atari.frame_skip, 2);
        assert_eq!(config.atari.game, "paddle");
        assert_eq!(config.wrap.frame_stack, 4);
    }

    #[test]
    fn test_missing_file() {
        assert!(RunConfig::load(Path::new("/nonexistent/run.json")).is_err());
        assert!(RunConfig::load_or_default(None).is_ok());
    }
}
