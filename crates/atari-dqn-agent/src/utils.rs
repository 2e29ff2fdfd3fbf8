//! Exploration schedules and small training helpers

use serde::{Deserialize, Serialize};

/// Trait for schedules (e.g., for epsilon decay)
pub trait Schedule: Send + Sync {
    /// Get value at step t
    fn value(&self, t: usize) -> f64;
}

/// Exploration rate after `total_steps` steps.
///
/// Decays by `1 / max_epsilon_steps` per step from `epsilon_start`, never
/// going below `epsilon_final`.
#[must_use]
pub fn get_epsilon(
    total_steps: usize,
    max_epsilon_steps: usize,
    epsilon_start: f64,
    epsilon_final: f64,
) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let decayed = epsilon_start - total_steps as f64 / max_epsilon_steps.max(1) as f64;
    epsilon_final.max(decayed)
}

/// Epsilon schedule of the DQN training loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpsilonSchedule {
    /// Starting value
    pub start: f64,
    /// Lower bound
    pub end: f64,
    /// Steps over which one unit of epsilon is removed
    pub max_steps: usize,
}

impl EpsilonSchedule {
    /// Create a new epsilon schedule
    #[must_use]
    pub fn new(start: f64, end: f64, max_steps: usize) -> Self {
        Self {
            start,
            end,
            max_steps,
        }
    }
}

impl Default for EpsilonSchedule {
    fn default() -> Self {
        Self::new(1.0, 0.02, 100_000)
    }
}

impl Schedule for EpsilonSchedule {
    fn value(&self, t: usize) -> f64 {
        get_epsilon(t, self.max_steps, self.start, self.end)
    }
}

/// Exponentially smoothed episode reward
#[must_use]
pub fn running_reward(running: f64, episode_reward: f64) -> f64 {
    running * 0.9 + 0.1 * episode_reward
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_epsilon_decays_linearly_to_floor() {
        assert_relative_eq!(get_epsilon(0, 100_000, 1.0, 0.02), 1.0);
        assert_relative_eq!(get_epsilon(50_000, 100_000, 1.0, 0.02), 0.5);
        assert_relative_eq!(get_epsilon(98_000, 100_000, 1.0, 0.02), 0.02, epsilon = 1e-12);
        assert_relative_eq!(get_epsilon(1_000_000, 100_000, 1.0, 0.02), 0.02);
    }

    #[test]
    fn test_schedule_matches_function() {
        let schedule = EpsilonSchedule::default();
        for t in [0, 10, 12_345, 200_000] {
            assert_relative_eq!(schedule.value(t), get_epsilon(t, 100_000, 1.0, 0.02));
        }
    }

    #[test]
    fn test_running_reward() {
        let mut running = 0.0;
        running = running_reward(running, 10.0);
        assert_relative_eq!(running, 1.0);
        running = running_reward(running, 10.0);
        assert_relative_eq!(running, 1.9);
    }
}
