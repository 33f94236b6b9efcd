//! Game simulation modules

pub mod ai;
pub mod physics;
pub mod registry;
pub mod session;
pub mod snapshot;

pub use registry::{SessionError, SessionRegistry, SessionSummary};
pub use session::{
    FinishedMatch, GameSession, Participant, SessionHandle, SessionId, SessionPhase,
    TournamentMatchRef,
};
