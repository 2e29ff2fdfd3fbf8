//! Emulator interface
//!
//! The trait mirrors the Arcade Learning Environment's control surface: a
//! game exposes its action sets, advances one frame per `act`, and reports
//! game over, lives and the current screen.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;

use atari_dqn_core::Result;

/// The 18 joystick/button combinations of the Atari 2600 controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AtariAction {
    Noop = 0,
    Fire = 1,
    Up = 2,
    Right = 3,
    Left = 4,
    Down = 5,
    UpRight = 6,
    UpLeft = 7,
    DownRight = 8,
    DownLeft = 9,
    UpFire = 10,
    RightFire = 11,
    LeftFire = 12,
    DownFire = 13,
    UpRightFire = 14,
    UpLeftFire = 15,
    DownRightFire = 16,
    DownLeftFire = 17,
}

impl AtariAction {
    /// All actions in id order
    pub const ALL: [AtariAction; 18] = [
        Self::Noop,
        Self::Fire,
        Self::Up,
        Self::Right,
        Self::Left,
        Self::Down,
        Self::UpRight,
        Self::UpLeft,
        Self::DownRight,
        Self::DownLeft,
        Self::UpFire,
        Self::RightFire,
        Self::LeftFire,
        Self::DownFire,
        Self::UpRightFire,
        Self::UpLeftFire,
        Self::DownRightFire,
        Self::DownLeftFire,
    ];

    /// Look an action up by its numeric id
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Numeric id
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Canonical name, as used in action meaning lists
    #[must_use]
    pub fn meaning(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Fire => "FIRE",
            Self::Up => "UP",
            Self::Right => "RIGHT",
            Self::Left => "LEFT",
            Self::Down => "DOWN",
            Self::UpRight => "UPRIGHT",
            Self::UpLeft => "UPLEFT",
            Self::DownRight => "DOWNRIGHT",
            Self::DownLeft => "DOWNLEFT",
            Self::UpFire => "UPFIRE",
            Self::RightFire => "RIGHTFIRE",
            Self::LeftFire => "LEFTFIRE",
            Self::DownFire => "DOWNFIRE",
            Self::UpRightFire => "UPRIGHTFIRE",
            Self::UpLeftFire => "UPLEFTFIRE",
            Self::DownRightFire => "DOWNRIGHTFIRE",
            Self::DownLeftFire => "DOWNLEFTFIRE",
        }
    }

    /// Whether the fire button is pressed
    #[must_use]
    pub fn fires(self) -> bool {
        matches!(
            self,
            Self::Fire
                | Self::UpFire
                | Self::RightFire
                | Self::LeftFire
                | Self::DownFire
                | Self::UpRightFire
                | Self::UpLeftFire
                | Self::DownRightFire
                | Self::DownLeftFire
        )
    }
}

impl fmt::Display for AtariAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.meaning())
    }
}

/// Settings applied when an emulator is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorSettings {
    /// Seed for the emulator's internal randomness
    pub random_seed: u64,
    /// Probability that the previous action is repeated instead of the new one
    pub repeat_action_probability: f64,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            random_seed: 123,
            repeat_action_probability: 0.0,
        }
    }
}

/// Single-player control surface of a game
pub trait Emulator: Send + Sync {
    /// Name of the loaded game
    fn name(&self) -> &str;

    /// Actions that have an effect in the loaded game
    fn minimal_action_set(&self) -> Vec<AtariAction>;

    /// Every action the controller can produce
    fn legal_action_set(&self) -> Vec<AtariAction> {
        AtariAction::ALL.to_vec()
    }

    /// Advance one frame; returns the reward earned on that frame
    fn act(&mut self, action: AtariAction) -> i32;

    /// Whether the game has ended
    fn game_over(&self) -> bool;

    /// Start a new game
    fn reset_game(&mut self);

    /// Remaining lives (0 for games without lives)
    fn lives(&self) -> u32;

    /// Current screen as height x width x RGB
    fn screen_rgb(&self) -> Array3<u8>;

    /// Frames emulated since the emulator was created
    fn frame_number(&self) -> u64;

    /// Multi-player control surface, for games that have one
    fn as_multi_player(&mut self) -> Option<&mut dyn MultiPlayerEmulator> {
        None
    }
}

/// Games with more than one controller
pub trait MultiPlayerEmulator: Emulator {
    /// Game modes available for `num_players` players
    fn available_modes(&self, num_players: usize) -> Vec<u32>;

    /// Switch game mode; takes effect on the next reset
    fn set_mode(&mut self, mode: u32) -> Result<()>;

    /// Number of players the current mode is played by
    fn num_players(&self) -> usize;

    /// Advance one frame with one action per player; returns per-player rewards
    fn act_multi(&mut self, actions: &[AtariAction]) -> Result<Vec<i32>>;
}

impl<E: Emulator + ?Sized> Emulator for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn minimal_action_set(&self) -> Vec<AtariAction> {
        (**self).minimal_action_set()
    }

    fn legal_action_set(&self) -> Vec<AtariAction> {
        (**self).legal_action_set()
    }

    fn act(&mut self, action: AtariAction) -> i32 {
        (**self).act(action)
    }

    fn game_over(&self) -> bool {
        (**self).game_over()
    }

    fn reset_game(&mut self) {
        (**self).reset_game();
    }

    fn lives(&self) -> u32 {
        (**self).lives()
    }

    fn screen_rgb(&self) -> Array3<u8> {
        (**self).screen_rgb()
    }

    fn frame_number(&self) -> u64 {
        (**self).frame_number()
    }

    fn as_multi_player(&mut self) -> Option<&mut dyn MultiPlayerEmulator> {
        (**self).as_multi_player()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_ids_round_trip_with_table() {
        for (i, action) in AtariAction::ALL.iter().enumerate() {
            assert_eq!(usize::from(action.id()), i);
            assert_eq!(AtariAction::from_id(action.id()), Some(*action));
        }
        assert_eq!(AtariAction::from_id(18), None);
    }

    #[test]
    fn test_meanings() {
        assert_eq!(AtariAction::Fire.meaning(), "FIRE");
        assert_eq!(AtariAction::DownLeftFire.to_string(), "DOWNLEFTFIRE");
        assert!(AtariAction::RightFire.fires());
        assert!(!AtariAction::Right.fires());
    }
}
