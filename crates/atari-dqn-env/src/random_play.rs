//! Uniform random play directly on an emulator

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use atari_dqn_core::{RLError, Result};

use crate::emulator::{AtariAction, Emulator};

/// Settings of a random-play session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomPlayConfig {
    /// Number of games to play
    pub episodes: usize,
    /// Players sharing the sampled action (1 or 2)
    pub num_players: usize,
    /// Seed of the action sampler
    pub seed: u64,
}

impl Default for RandomPlayConfig {
    fn default() -> Self {
        Self {
            episodes: 10,
            num_players: 2,
            seed: 123,
        }
    }
}

/// Play full games with uniformly random legal actions.
///
/// In multi-player mode every player receives the same action each frame.
/// Returns the first player's score for every game.
pub fn random_play<E>(emulator: &mut E, config: &RandomPlayConfig) -> Result<Vec<i32>>
where
    E: Emulator + ?Sized,
{
    let legal_actions = emulator.legal_action_set();
    tracing::info!(actions = ?legal_actions, "Legal actions");

    if config.num_players > 1 {
        let name = emulator.name().to_string();
        let multi = emulator
            .as_multi_player()
            .ok_or_else(|| RLError::Emulator(format!("{name} has no multi-player modes")))?;
        let modes = multi.available_modes(config.num_players);
        let mode = *modes.first().ok_or_else(|| {
            RLError::Emulator(format!("no mode for {} players", config.num_players))
        })?;
        multi.set_mode(mode)?;
    }
    emulator.reset_game();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut scores = Vec::with_capacity(config.episodes);
    for episode in 0..config.episodes {
        let mut total_reward = 0;
        while !emulator.game_over() {
            let action = *legal_actions
                .choose(&mut rng)
                .ok_or_else(|| RLError::Emulator("empty legal action set".into()))?;
            total_reward += act_all(emulator, action, config.num_players)?;
        }
        tracing::info!("Episode {} ended with score: {}", episode, total_reward);
        scores.push(total_reward);
        emulator.reset_game();
    }
    Ok(scores)
}

fn act_all<E>(emulator: &mut E, action: AtariAction, num_players: usize) -> Result<i32>
where
    E: Emulator + ?Sized,
{
    if num_players <= 1 {
        return Ok(emulator.act(action));
    }
    let multi = emulator
        .as_multi_player()
        .ok_or_else(|| RLError::Emulator("emulator lost its multi-player surface".into()))?;
    let rewards = multi.act_multi(&vec![action; num_players])?;
    Ok(rewards.first().copied().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::{EmulatorSettings, MultiPlayerEmulator};
    use crate::paddle::PaddleGame;

    #[test]
    fn test_random_play_finishes_games() {
        let mut game = PaddleGame::new(&EmulatorSettings::default());
        let config = RandomPlayConfig {
            episodes: 2,
            ..RandomPlayConfig::default()
        };
        let scores = random_play(&mut game, &config).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(game.num_players(), 2);
        for score in scores {
            assert!(score.abs() <= 21);
            assert_ne!(score, 0);
        }
    }

    #[test]
    fn test_random_play_is_seeded() {
        let config = RandomPlayConfig {
            episodes: 1,
            num_players: 1,
            seed: 7,
        };
        let mut a = PaddleGame::new(&EmulatorSettings::default());
        let mut b = PaddleGame::new(&EmulatorSettings::default());
        assert_eq!(
            random_play(&mut a, &config).unwrap(),
            random_play(&mut b, &config).unwrap()
        );
    }

    #[test]
    fn test_boxed_emulator() {
        let mut game: Box<dyn Emulator> = Box::new(PaddleGame::new(&EmulatorSettings::default()));
        let config = RandomPlayConfig {
            episodes: 1,
            ..RandomPlayConfig::default()
        };
        assert_eq!(random_play(game.as_mut(), &config).unwrap().len(), 1);
    }
}
