//! Built-in two-paddle game
//!
//! A small table-tennis game drawn on the 210x160 Atari screen layout. The
//! agent controls the right paddle; the left paddle is either scripted or, in
//! two-player mode, driven by a second controller. It needs no ROM, so the
//! full training pipeline can run and be tested anywhere.

use ndarray::{s, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use atari_dqn_core::{RLError, Result};

use crate::emulator::{AtariAction, Emulator, EmulatorSettings, MultiPlayerEmulator};

/// Screen height in pixels
pub const SCREEN_HEIGHT: usize = 210;
/// Screen width in pixels
pub const SCREEN_WIDTH: usize = 160;

const FIELD_TOP: f32 = 34.0;
const FIELD_BOTTOM: f32 = 194.0;
const PADDLE_HEIGHT: f32 = 16.0;
const PADDLE_WIDTH: f32 = 4.0;
const RIGHT_PADDLE_X: f32 = 140.0;
const LEFT_PADDLE_X: f32 = 16.0;
const BALL_WIDTH: f32 = 2.0;
const BALL_HEIGHT: f32 = 4.0;
const PADDLE_SPEED: f32 = 1.5;
const OPPONENT_SPEED: f32 = 1.1;
const BALL_SPEED: f32 = 1.5;
const MAX_BALL_SPEED: f32 = 3.0;
const SERVE_DELAY: u32 = 60;
const WINNING_SCORE: u32 = 21;

const BACKGROUND: [u8; 3] = [144, 72, 17];
const WALL: [u8; 3] = [236, 236, 236];
const AGENT_PADDLE: [u8; 3] = [92, 186, 92];
const OPPONENT_PADDLE: [u8; 3] = [213, 130, 74];
const BALL: [u8; 3] = [236, 236, 236];

/// Single-player mode against the scripted opponent
pub const MODE_SINGLE: u32 = 0;
/// Two-player mode: the second controller drives the left paddle
pub const MODE_VERSUS: u32 = 1;

#[derive(Debug, Clone, Copy)]
struct Ball {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
}

/// The built-in paddle game
#[derive(Debug, Clone)]
pub struct PaddleGame {
    rng: StdRng,
    ball: Ball,
    right_y: f32,
    left_y: f32,
    /// `[right, left]` points
    score: [u32; 2],
    serve_timer: u32,
    /// Side the next serve travels towards; `1.0` is right
    serve_towards: f32,
    frame: u64,
    mode: u32,
    pending_mode: u32,
}

impl PaddleGame {
    /// Game name used by the emulator registry
    pub const NAME: &'static str = "paddle";

    /// Create a game seeded from `settings`
    #[must_use]
    pub fn new(settings: &EmulatorSettings) -> Self {
        let mut game = Self {
            rng: StdRng::seed_from_u64(settings.random_seed),
            ball: Ball {
                x: 0.0,
                y: 0.0,
                vx: 0.0,
                vy: 0.0,
            },
            right_y: 0.0,
            left_y: 0.0,
            score: [0, 0],
            serve_timer: 0,
            serve_towards: 1.0,
            frame: 0,
            mode: MODE_SINGLE,
            pending_mode: MODE_SINGLE,
        };
        game.reset_game();
        game
    }

    /// Points scored so far as `(right, left)`
    #[must_use]
    pub fn score(&self) -> (u32, u32) {
        (self.score[0], self.score[1])
    }

    fn center_ball(&mut self) {
        self.ball = Ball {
            x: (SCREEN_WIDTH as f32 - BALL_WIDTH) / 2.0,
            y: (FIELD_TOP + FIELD_BOTTOM - BALL_HEIGHT) / 2.0,
            vx: 0.0,
            vy: 0.0,
        };
        self.serve_timer = SERVE_DELAY;
    }

    fn launch(&mut self) {
        self.ball.vx = BALL_SPEED * self.serve_towards;
        self.ball.vy = self.rng.gen_range(-1.0..1.0);
        self.serve_timer = 0;
    }

    fn direction(action: AtariAction) -> f32 {
        use AtariAction as A;
        match action {
            A::Up | A::Right | A::UpRight | A::UpFire | A::RightFire | A::UpRightFire => -1.0,
            A::Down | A::Left | A::DownLeft | A::DownFire | A::LeftFire | A::DownLeftFire => 1.0,
            _ => 0.0,
        }
    }

    fn move_paddle(y: f32, dy: f32) -> f32 {
        (y + dy).clamp(FIELD_TOP, FIELD_BOTTOM - PADDLE_HEIGHT)
    }

    fn scripted_opponent(&self) -> f32 {
        let target = self.ball.y + BALL_HEIGHT / 2.0 - PADDLE_HEIGHT / 2.0;
        (target - self.left_y).clamp(-OPPONENT_SPEED, OPPONENT_SPEED)
    }

    fn hits(ball: &Ball, paddle_x: f32, paddle_y: f32) -> bool {
        ball.x + BALL_WIDTH >= paddle_x
            && ball.x <= paddle_x + PADDLE_WIDTH
            && ball.y + BALL_HEIGHT >= paddle_y
            && ball.y <= paddle_y + PADDLE_HEIGHT
    }

    fn deflect(&mut self, paddle_y: f32, towards: f32) {
        let offset = (self.ball.y + BALL_HEIGHT / 2.0) - (paddle_y + PADDLE_HEIGHT / 2.0);
        let speed = (self.ball.vx.abs() * 1.05).min(MAX_BALL_SPEED);
        self.ball.vx = speed * towards;
        self.ball.vy = (self.ball.vy + offset * 0.1).clamp(-MAX_BALL_SPEED, MAX_BALL_SPEED);
    }

    /// One frame of play; returns the reward of the right-hand player
    fn tick(&mut self, right: AtariAction, left: Option<AtariAction>) -> i32 {
        if self.game_over() {
            return 0;
        }
        self.frame += 1;

        self.right_y = Self::move_paddle(self.right_y, Self::direction(right) * PADDLE_SPEED);
        let left_dy = match left {
            Some(action) => Self::direction(action) * PADDLE_SPEED,
            None => self.scripted_opponent(),
        };
        self.left_y = Self::move_paddle(self.left_y, left_dy);

        if self.serve_timer > 0 {
            let fired = right.fires() || left.is_some_and(AtariAction::fires);
            self.serve_timer -= 1;
            if fired || self.serve_timer == 0 {
                self.launch();
            }
            return 0;
        }

        self.ball.x += self.ball.vx;
        self.ball.y += self.ball.vy;

        if self.ball.y < FIELD_TOP {
            self.ball.y = 2.0 * FIELD_TOP - self.ball.y;
            self.ball.vy = self.ball.vy.abs();
        } else if self.ball.y + BALL_HEIGHT > FIELD_BOTTOM {
            self.ball.y = 2.0 * (FIELD_BOTTOM - BALL_HEIGHT) - self.ball.y;
            self.ball.vy = -self.ball.vy.abs();
        }

        if self.ball.vx > 0.0 && Self::hits(&self.ball, RIGHT_PADDLE_X, self.right_y) {
            self.deflect(self.right_y, -1.0);
        } else if self.ball.vx < 0.0 && Self::hits(&self.ball, LEFT_PADDLE_X, self.left_y) {
            self.deflect(self.left_y, 1.0);
        }

        if self.ball.x > SCREEN_WIDTH as f32 {
            self.score[1] += 1;
            self.serve_towards = 1.0;
            self.center_ball();
            -1
        } else if self.ball.x + BALL_WIDTH < 0.0 {
            self.score[0] += 1;
            self.serve_towards = -1.0;
            self.center_ball();
            1
        } else {
            0
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fill(screen: &mut Array3<u8>, top: f32, left: f32, height: f32, width: f32, color: [u8; 3]) {
    let y0 = top.max(0.0) as usize;
    let x0 = left.max(0.0) as usize;
    let y1 = ((top + height).max(0.0) as usize).min(SCREEN_HEIGHT);
    let x1 = ((left + width).max(0.0) as usize).min(SCREEN_WIDTH);
    if y0 >= y1 || x0 >= x1 {
        return;
    }
    for (c, value) in color.iter().enumerate() {
        screen.slice_mut(s![y0..y1, x0..x1, c]).fill(*value);
    }
}

impl Emulator for PaddleGame {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn minimal_action_set(&self) -> Vec<AtariAction> {
        vec![
            AtariAction::Noop,
            AtariAction::Fire,
            AtariAction::Right,
            AtariAction::Left,
            AtariAction::RightFire,
            AtariAction::LeftFire,
        ]
    }

    fn act(&mut self, action: AtariAction) -> i32 {
        let left = (self.mode == MODE_VERSUS).then_some(AtariAction::Noop);
        self.tick(action, left)
    }

    fn game_over(&self) -> bool {
        self.score.iter().any(|&s| s >= WINNING_SCORE)
    }

    fn reset_game(&mut self) {
        self.mode = self.pending_mode;
        self.score = [0, 0];
        let middle = (FIELD_TOP + FIELD_BOTTOM - PADDLE_HEIGHT) / 2.0;
        self.right_y = middle;
        self.left_y = middle;
        self.serve_towards = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.center_ball();
    }

    fn lives(&self) -> u32 {
        0
    }

    fn screen_rgb(&self) -> Array3<u8> {
        let mut screen = Array3::zeros((SCREEN_HEIGHT, SCREEN_WIDTH, 3));
        fill(&mut screen, 0.0, 0.0, SCREEN_HEIGHT as f32, SCREEN_WIDTH as f32, BACKGROUND);
        fill(&mut screen, FIELD_TOP - 10.0, 0.0, 10.0, SCREEN_WIDTH as f32, WALL);
        fill(&mut screen, FIELD_BOTTOM, 0.0, 10.0, SCREEN_WIDTH as f32, WALL);
        fill(&mut screen, self.left_y, LEFT_PADDLE_X, PADDLE_HEIGHT, PADDLE_WIDTH, OPPONENT_PADDLE);
        fill(&mut screen, self.right_y, RIGHT_PADDLE_X, PADDLE_HEIGHT, PADDLE_WIDTH, AGENT_PADDLE);
        fill(&mut screen, self.ball.y, self.ball.x, BALL_HEIGHT, BALL_WIDTH, BALL);
        screen
    }

    fn frame_number(&self) -> u64 {
        self.frame
    }

    fn as_multi_player(&mut self) -> Option<&mut dyn MultiPlayerEmulator> {
        Some(self)
    }
}

impl MultiPlayerEmulator for PaddleGame {
    fn available_modes(&self, num_players: usize) -> Vec<u32> {
        match num_players {
            1 => vec![MODE_SINGLE],
            2 => vec![MODE_VERSUS],
            _ => Vec::new(),
        }
    }

    fn set_mode(&mut self, mode: u32) -> Result<()> {
        if mode != MODE_SINGLE && mode != MODE_VERSUS {
            return Err(RLError::Emulator(format!("unsupported mode {mode}")));
        }
        self.pending_mode = mode;
        Ok(())
    }

    fn num_players(&self) -> usize {
        if self.mode == MODE_VERSUS {
            2
        } else {
            1
        }
    }

    fn act_multi(&mut self, actions: &[AtariAction]) -> Result<Vec<i32>> {
        if actions.len() != self.num_players() {
            return Err(RLError::DimensionMismatch {
                expected: self.num_players(),
                actual: actions.len(),
            });
        }
        let left = actions.get(1).copied();
        let reward = self.tick(actions[0], left);
        Ok(match left {
            Some(_) => vec![reward, -reward],
            None => vec![reward],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game() -> PaddleGame {
        PaddleGame::new(&EmulatorSettings::default())
    }

    #[test]
    fn test_screen_layout() {
        let game = game();
        let screen = game.screen_rgb();
        assert_eq!(screen.dim(), (SCREEN_HEIGHT, SCREEN_WIDTH, 3));
        // Background corner, top wall and the agent paddle column
        assert_eq!(screen[[5, 5, 0]], BACKGROUND[0]);
        assert_eq!(screen[[30, 80, 1]], WALL[1]);
        let paddle_row = game.right_y as usize + 1;
        assert_eq!(screen[[paddle_row, 141, 1]], AGENT_PADDLE[1]);
    }

    #[test]
    fn test_fire_serves_and_points_end_game() {
        let mut game = game();
        game.act(AtariAction::Fire);
        assert_eq!(game.serve_timer, 0);
        assert!(game.ball.vx != 0.0);

        // Standing still eventually loses or wins every rally
        let mut total = 0;
        let mut frames = 0;
        while !game.game_over() && frames < 200_000 {
            total += game.act(AtariAction::Noop);
            frames += 1;
        }
        assert!(game.game_over());
        let (right, left) = game.score();
        assert_eq!(total, right as i32 - left as i32);
        assert!(right == WINNING_SCORE || left == WINNING_SCORE);

        // No further rewards once the game is over
        assert_eq!(game.act(AtariAction::Fire), 0);
        game.reset_game();
        assert!(!game.game_over());
        assert_eq!(game.score(), (0, 0));
    }

    #[test]
    fn test_paddle_moves_within_field() {
        let mut game = game();
        for _ in 0..500 {
            game.act(AtariAction::Right);
        }
        assert_eq!(game.right_y, FIELD_TOP);
        for _ in 0..500 {
            game.act(AtariAction::Left);
        }
        assert_eq!(game.right_y, FIELD_BOTTOM - PADDLE_HEIGHT);
    }

    #[test]
    fn test_same_seed_same_game() {
        let mut a = game();
        let mut b = game();
        for i in 0..3_000 {
            let action = if i % 7 < 3 { AtariAction::Right } else { AtariAction::LeftFire };
            assert_eq!(a.act(action), b.act(action));
        }
        assert_eq!(a.screen_rgb(), b.screen_rgb());
    }

    #[test]
    fn test_versus_mode() {
        let mut game = game();
        assert_eq!(game.available_modes(2), vec![MODE_VERSUS]);
        assert!(game.set_mode(7).is_err());
        game.set_mode(MODE_VERSUS).unwrap();
        assert_eq!(game.num_players(), 1);
        game.reset_game();
        assert_eq!(game.num_players(), 2);

        assert!(game.act_multi(&[AtariAction::Noop]).is_err());
        let rewards = game
            .act_multi(&[AtariAction::Noop, AtariAction::Right])
            .unwrap();
        assert_eq!(rewards, vec![0, 0]);
        let start = (FIELD_TOP + FIELD_BOTTOM - PADDLE_HEIGHT) / 2.0;
        assert!(game.left_y < start);
    }
}
