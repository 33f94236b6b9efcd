//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

/// One of the two participant positions in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// Label sent in the `connected` message
    pub fn player_label(self) -> &'static str {
        match self {
            Side::Left => "Player A",
            Side::Right => "Player B",
        }
    }
}

/// Paddle movement intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    Stop,
}

impl Direction {
    /// Sign of the vertical movement (court y grows downwards)
    pub fn sign(self) -> f32 {
        match self {
            Direction::Up => -1.0,
            Direction::Down => 1.0,
            Direction::Stop => 0.0,
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Change the movement intent of a paddle
    Paddle { paddle: Side, direction: Direction },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Sent once after the connection is bound to a side
    Connected { message: String },

    /// Court state, sent on every tick where it changed
    State { data: GameSnapshot },

    /// Final court state, sent exactly once
    GameOver { data: GameSnapshot },

    /// Error message
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn connected(side: Side) -> Self {
        Self::Connected {
            message: side.player_label().to_string(),
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// After a terminal message nothing else is sent on the channel
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerMsg::GameOver { .. } | ServerMsg::Error { .. })
    }
}

/// Everything a client (or the AI) is allowed to see about a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub ball: BallSnapshot,
    pub paddles: PaddlesSnapshot,
    pub scores: ScoresSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddlesSnapshot {
    pub left: PaddleSnapshot,
    pub right: PaddleSnapshot,
}

impl PaddlesSnapshot {
    pub fn get(&self, side: Side) -> PaddleSnapshot {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleSnapshot {
    /// Top edge of the paddle
    pub y: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoresSnapshot {
    pub left: u32,
    pub right: u32,
}
