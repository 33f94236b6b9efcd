//! Computer-controlled paddle
//!
//! The AI only sees what a client sees: the `state` snapshot. Ball velocity is
//! not part of it, so it is estimated from consecutive snapshots.

use crate::config::GameConfig;
use crate::ws::protocol::{Direction, GameSnapshot, Side};

use super::physics::PhysicsSystem;

#[derive(Debug, Clone)]
pub struct AiController {
    side: Side,
    reaction_ticks: u32,
    ticks_until_decision: u32,
    target_y: f32,
    last_ball: Option<(f32, f32)>,
    /// Estimated ball velocity in pixels per tick
    velocity: (f32, f32),
}

impl AiController {
    pub fn new(side: Side, config: &GameConfig) -> Self {
        Self {
            side,
            reaction_ticks: config.ai_reaction_ticks(),
            ticks_until_decision: 0,
            target_y: config.court_height / 2.0,
            last_ball: None,
            velocity: (0.0, 0.0),
        }
    }

    #[cfg(test)]
    pub fn target_y(&self) -> f32 {
        self.target_y
    }

    /// Called once per tick with the latest public snapshot
    pub fn decide(&mut self, view: &GameSnapshot, config: &GameConfig) -> Direction {
        self.observe(view);

        if self.ticks_until_decision == 0 {
            self.target_y = self.pick_target(view, config);
            self.ticks_until_decision = self.reaction_ticks;
        }
        self.ticks_until_decision -= 1;

        let paddle = view.paddles.get(self.side);
        let diff = self.target_y - (paddle.y + paddle.height / 2.0);
        if diff.abs() <= config.ai_dead_zone {
            Direction::Stop
        } else if diff < 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    fn observe(&mut self, view: &GameSnapshot) {
        let pos = (view.ball.x, view.ball.y);
        if let Some((x, y)) = self.last_ball {
            self.velocity = (pos.0 - x, pos.1 - y);
        }
        self.last_ball = Some(pos);
    }

    fn approaching(&self) -> bool {
        match self.side {
            Side::Left => self.velocity.0 < 0.0,
            Side::Right => self.velocity.0 > 0.0,
        }
    }

    /// Where the ball will cross our paddle plane, or court center when it is
    /// heading away
    fn pick_target(&self, view: &GameSnapshot, config: &GameConfig) -> f32 {
        let center = config.court_height / 2.0;
        if !self.approaching() {
            return center;
        }

        let radius = view.ball.radius;
        let plane_x = match self.side {
            Side::Left => PhysicsSystem::paddle_face(Side::Left, config) + radius,
            Side::Right => PhysicsSystem::paddle_face(Side::Right, config) - radius,
        };
        let ticks = (plane_x - view.ball.x) / self.velocity.0;
        if ticks < 0.0 {
            return center;
        }

        let raw_y = view.ball.y + self.velocity.1 * ticks;
        fold_into(raw_y, radius, config.court_height - radius)
    }
}

/// Map a free-flight coordinate onto the segment `[min, max]`, mirroring at
/// each end like a ball bouncing between two walls.
fn fold_into(value: f32, min: f32, max: f32) -> f32 {
    let span = max - min;
    if span <= 0.0 {
        return min;
    }
    let period = 2.0 * span;
    let mut t = (value - min).rem_euclid(period);
    if t > span {
        t = period - t;
    }
    min + t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{BallSnapshot, PaddleSnapshot, PaddlesSnapshot, ScoresSnapshot};

    fn view(ball_x: f32, ball_y: f32, paddle_y: f32) -> GameSnapshot {
        GameSnapshot {
            ball: BallSnapshot {
                x: ball_x,
                y: ball_y,
                radius: 8.0,
            },
            paddles: PaddlesSnapshot {
                left: PaddleSnapshot {
                    y: paddle_y,
                    height: 100.0,
                },
                right: PaddleSnapshot {
                    y: paddle_y,
                    height: 100.0,
                },
            },
            scores: ScoresSnapshot { left: 0, right: 0 },
        }
    }

    #[test]
    fn fold_mirrors_at_walls() {
        assert_eq!(fold_into(50.0, 0.0, 100.0), 50.0);
        assert_eq!(fold_into(130.0, 0.0, 100.0), 70.0);
        assert_eq!(fold_into(-20.0, 0.0, 100.0), 20.0);
        assert_eq!(fold_into(250.0, 0.0, 100.0), 50.0);
    }

    #[test]
    fn tracks_projected_intersection_when_ball_approaches() {
        let config = GameConfig::default();
        let mut ai = AiController::new(Side::Right, &config);

        // Ball moving right and down, 5px/tick horizontally, 1px/tick vertically
        ai.decide(&view(400.0, 100.0, 250.0), &config);
        ai.ticks_until_decision = 0;
        let dir = ai.decide(&view(405.0, 101.0, 250.0), &config);

        let plane_x = config.right_paddle_x - 8.0;
        let expected = 101.0 + (plane_x - 405.0) / 5.0;
        assert!((ai.target_y() - expected).abs() < 1e-3);
        // Paddle center is 300, target is above it
        assert_eq!(dir, Direction::Up);
    }

    #[test]
    fn drifts_to_center_when_ball_moves_away() {
        let config = GameConfig::default();
        let mut ai = AiController::new(Side::Left, &config);

        ai.decide(&view(400.0, 100.0, 0.0), &config);
        ai.ticks_until_decision = 0;
        let dir = ai.decide(&view(405.0, 100.0, 0.0), &config);

        assert_eq!(ai.target_y(), config.court_height / 2.0);
        assert_eq!(dir, Direction::Down);
    }

    #[test]
    fn stops_inside_dead_zone() {
        let config = GameConfig::default();
        let mut ai = AiController::new(Side::Left, &config);
        let dir = ai.decide(&view(400.0, 300.0, 250.0), &config);
        assert_eq!(dir, Direction::Stop);
    }

    #[test]
    fn keeps_stale_target_until_reaction_elapses() {
        let config = GameConfig::default();
        let mut ai = AiController::new(Side::Right, &config);

        // First decision: no velocity yet, aims at center
        ai.decide(&view(400.0, 100.0, 250.0), &config);
        assert_eq!(ai.target_y(), config.court_height / 2.0);

        // Ball now clearly approaching, but the AI has not reacted yet
        for step in 1..config.ai_reaction_ticks() {
            ai.decide(&view(400.0 + step as f32 * 5.0, 100.0, 250.0), &config);
            assert_eq!(ai.target_y(), config.court_height / 2.0);
        }

        let reaction = config.ai_reaction_ticks() as f32;
        ai.decide(&view(400.0 + reaction * 5.0, 100.0, 250.0), &config);
        assert!((ai.target_y() - 100.0).abs() < 1e-3);
    }
}
