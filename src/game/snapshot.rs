//! Snapshot building and change detection

use crate::ws::protocol::{
    BallSnapshot, GameSnapshot, PaddleSnapshot, PaddlesSnapshot, ScoresSnapshot, ServerMsg, Side,
};

use super::session::CourtState;

/// Builds client-facing snapshots and suppresses unchanged ones
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    /// Last snapshot handed out, used for change detection
    last: Option<GameSnapshot>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Project the authoritative court onto the public view
    pub fn snapshot(court: &CourtState) -> GameSnapshot {
        let paddle = |side: Side| {
            let p = court.paddle(side);
            PaddleSnapshot {
                y: p.y,
                height: p.height,
            }
        };

        GameSnapshot {
            ball: BallSnapshot {
                x: court.ball.x,
                y: court.ball.y,
                radius: court.ball.radius,
            },
            paddles: PaddlesSnapshot {
                left: paddle(Side::Left),
                right: paddle(Side::Right),
            },
            scores: ScoresSnapshot {
                left: court.score(Side::Left),
                right: court.score(Side::Right),
            },
        }
    }

    /// Build a `state` message, or `None` if nothing observable changed
    pub fn state_if_changed(&mut self, court: &CourtState) -> Option<ServerMsg> {
        let snapshot = Self::snapshot(court);
        if self.last.as_ref() == Some(&snapshot) {
            return None;
        }
        self.last = Some(snapshot.clone());
        Some(ServerMsg::State { data: snapshot })
    }

    /// Build the terminal `gameOver` message
    pub fn game_over(&mut self, court: &CourtState) -> ServerMsg {
        let snapshot = Self::snapshot(court);
        self.last = Some(snapshot.clone());
        ServerMsg::GameOver { data: snapshot }
    }

    /// Last snapshot sent to clients
    pub fn last(&self) -> Option<&GameSnapshot> {
        self.last.as_ref()
    }
}
