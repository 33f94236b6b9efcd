//! Four-player tournaments

pub mod bracket;
pub mod engine;

pub use bracket::{Bracket, BracketError, BracketMatch, TOURNAMENT_SIZE};
pub use engine::{JoinOutcome, TournamentEngine, TournamentError, TournamentView};
