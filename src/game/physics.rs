//! Ball and paddle physics

use rand::Rng;

use crate::config::GameConfig;
use crate::ws::protocol::{Direction, Side};

/// Ball state (authoritative)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub radius: f32,
}

impl Ball {
    /// Ball resting at court center
    pub fn centered(config: &GameConfig) -> Self {
        Self {
            x: config.court_width / 2.0,
            y: config.court_height / 2.0,
            vel_x: 0.0,
            vel_y: 0.0,
            radius: config.ball_radius,
        }
    }

    pub fn speed(&self) -> f32 {
        (self.vel_x * self.vel_x + self.vel_y * self.vel_y).sqrt()
    }
}

/// Paddle state (authoritative)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paddle {
    /// Top edge
    pub y: f32,
    pub height: f32,
    pub intent: Direction,
}

impl Paddle {
    pub fn centered(config: &GameConfig) -> Self {
        Self {
            y: (config.court_height - config.paddle_height) / 2.0,
            height: config.paddle_height,
            intent: Direction::Stop,
        }
    }

    pub fn center_y(&self) -> f32 {
        self.y + self.height / 2.0
    }
}

/// Physics system for paddles and ball
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Move a paddle by its intent for one tick, clamped to the court
    pub fn move_paddle(paddle: &mut Paddle, config: &GameConfig) {
        let dy = paddle.intent.sign() * config.paddle_speed * config.tick_delta();
        let max_y = (config.court_height - paddle.height).max(0.0);
        paddle.y = (paddle.y + dy).clamp(0.0, max_y);
    }

    /// Velocity for a fresh serve toward `toward`, picked inside the serve cone
    pub fn serve_velocity<R: Rng>(toward: Side, config: &GameConfig, rng: &mut R) -> (f32, f32) {
        let angle = if config.serve_cone > 0.0 {
            rng.gen_range(-config.serve_cone..=config.serve_cone)
        } else {
            0.0
        };
        let dir = match toward {
            Side::Left => -1.0,
            Side::Right => 1.0,
        };
        (
            dir * config.ball_serve_speed * angle.cos(),
            config.ball_serve_speed * angle.sin(),
        )
    }

    /// Reflect the vertical velocity on top/bottom walls.
    /// Returns true if the ball touched a wall.
    pub fn reflect_walls(ball: &mut Ball, config: &GameConfig) -> bool {
        if ball.y - ball.radius < 0.0 {
            ball.y = ball.radius;
            ball.vel_y = ball.vel_y.abs();
            true
        } else if ball.y + ball.radius > config.court_height {
            ball.y = config.court_height - ball.radius;
            ball.vel_y = -ball.vel_y.abs();
            true
        } else {
            false
        }
    }

    /// Front face x coordinate of a paddle (the face the ball hits)
    pub fn paddle_face(side: Side, config: &GameConfig) -> f32 {
        match side {
            Side::Left => config.left_paddle_x + config.paddle_width,
            Side::Right => config.right_paddle_x,
        }
    }

    /// Check whether the ball crossed the front face of `side`'s paddle during
    /// this tick while travelling toward it and inside its vertical extent.
    pub fn hits_paddle(
        side: Side,
        prev_x: f32,
        ball: &Ball,
        paddle: &Paddle,
        config: &GameConfig,
    ) -> bool {
        let face = Self::paddle_face(side, config);
        let crossed = match side {
            Side::Left => {
                ball.vel_x < 0.0 && prev_x - ball.radius >= face && ball.x - ball.radius <= face
            }
            Side::Right => {
                ball.vel_x > 0.0 && prev_x + ball.radius <= face && ball.x + ball.radius >= face
            }
        };
        if !crossed {
            return false;
        }

        let top = paddle.y - ball.radius;
        let bottom = paddle.y + paddle.height + ball.radius;
        ball.y >= top && ball.y <= bottom
    }

    /// Send the ball back from `side`'s paddle.
    ///
    /// The outgoing angle grows linearly with the distance between the contact
    /// point and the paddle center, so edge hits deflect more. Speed is scaled
    /// by `ball_speedup` up to `ball_max_speed`.
    pub fn bounce_off_paddle(side: Side, ball: &mut Ball, paddle: &Paddle, config: &GameConfig) {
        let half_extent = paddle.height / 2.0 + ball.radius;
        let offset = ((ball.y - paddle.center_y()) / half_extent).clamp(-1.0, 1.0);
        let angle = offset * config.max_bounce_angle;
        let speed = (ball.speed() * config.ball_speedup).min(config.ball_max_speed);

        let dir = match side {
            Side::Left => 1.0,
            Side::Right => -1.0,
        };
        ball.vel_x = dir * speed * angle.cos();
        ball.vel_y = speed * angle.sin();
        ball.x = match side {
            Side::Left => Self::paddle_face(side, config) + ball.radius,
            Side::Right => Self::paddle_face(side, config) - ball.radius,
        };
    }

    /// Side awarded a point when the ball center leaves the court horizontally
    pub fn scoring_side(ball: &Ball, config: &GameConfig) -> Option<Side> {
        if ball.x < 0.0 {
            Some(Side::Right)
        } else if ball.x > config.court_width {
            Some(Side::Left)
        } else {
            None
        }
    }
}
