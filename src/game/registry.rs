//! Live session registry

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::{PlayerId, Round, TournamentId};
use crate::ws::protocol::{Direction, Side};

use super::session::{
    FinishedMatch, GameSession, Participant, SessionCommand, SessionExit, SessionHandle,
    SessionId, SessionPhase, TournamentMatchRef,
};

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Slot already occupied")]
    SlotOccupied,

    #[error("Session already finished")]
    Finished,

    #[error("Not a participant of this match")]
    NotParticipant,
}

impl SessionError {
    /// Machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound => "SESSION_NOT_FOUND",
            SessionError::SlotOccupied => "SLOT_OCCUPIED",
            SessionError::Finished => "SESSION_FINISHED",
            SessionError::NotParticipant => "NOT_PARTICIPANT",
        }
    }
}

/// Listing entry for `GET /sessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    /// Occupied slots
    pub players: usize,
    pub tournament_id: Option<TournamentId>,
    pub round: Option<Round>,
}

/// Owns every live session, keyed by id
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionHandle>,
    config: Arc<GameConfig>,
    completed_tx: mpsc::UnboundedSender<FinishedMatch>,
}

impl SessionRegistry {
    /// Create the registry together with the stream of finished matches
    pub fn new(config: Arc<GameConfig>) -> (Self, mpsc::UnboundedReceiver<FinishedMatch>) {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let registry = Self {
            sessions: DashMap::new(),
            config,
            completed_tx,
        };
        (registry, completed_rx)
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Create a free-play session
    pub fn create(&self) -> SessionId {
        self.spawn(None)
    }

    /// Create a session for a bracket match, reserved for `players` (left, right)
    pub fn create_for_match(&self, match_ref: TournamentMatchRef, players: [PlayerId; 2]) -> SessionId {
        self.spawn(Some((match_ref, players)))
    }

    fn spawn(&self, tournament: Option<(TournamentMatchRef, [PlayerId; 2])>) -> SessionId {
        let id = Uuid::new_v4();
        let (session, handle) =
            GameSession::new(id, rand::random(), self.config.clone(), tournament);
        self.sessions.insert(id, handle);

        let completed = self.completed_tx.clone();
        tokio::spawn(async move {
            match session.run().await {
                SessionExit::Finished(result) => {
                    if completed.send(result).is_err() {
                        error!(session_id = %id, "Result channel closed, match not recorded");
                    }
                }
                SessionExit::Terminated => {
                    debug!(session_id = %id, "Session loop exited after termination");
                }
            }
        });

        match tournament {
            Some((match_ref, players)) => info!(
                session_id = %id,
                tournament_id = match_ref.tournament_id,
                round = match_ref.round.as_str(),
                player1 = players[0],
                player2 = players[1],
                "Tournament session created"
            ),
            None => info!(session_id = %id, "Session created"),
        }

        id
    }

    pub fn get(&self, id: SessionId) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::NotFound)
    }

    /// Live session deciding a bracket match, finished ones included until
    /// they are evicted
    pub fn find_for_match(&self, match_ref: TournamentMatchRef) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .find(|entry| entry.tournament == Some(match_ref) && !entry.shared.lock().terminated)
            .map(|entry| entry.value().clone())
    }

    /// Claim a slot. With `side` unset the first free side is taken.
    /// Filling the second slot starts play.
    pub fn attach(
        &self,
        id: SessionId,
        side: Option<Side>,
        participant: Participant,
    ) -> Result<Side, SessionError> {
        let handle = self.get(id)?;
        let mut shared = handle.shared.lock();

        if shared.terminated {
            return Err(SessionError::NotFound);
        }
        if shared.phase == SessionPhase::Finished {
            return Err(SessionError::Finished);
        }

        let side = match shared.reserved {
            Some(reserved) => {
                let player = match participant {
                    Participant::Client(player) => player,
                    Participant::Ai => return Err(SessionError::NotParticipant),
                };
                let own = Side::BOTH
                    .into_iter()
                    .find(|s| reserved[s.index()] == player)
                    .ok_or(SessionError::NotParticipant)?;
                if side.is_some_and(|requested| requested != own) {
                    return Err(SessionError::NotParticipant);
                }
                own
            }
            None => {
                if participant == Participant::Ai
                    && shared.slots.contains(&Some(Participant::Ai))
                {
                    return Err(SessionError::SlotOccupied);
                }
                match side {
                    Some(requested) => requested,
                    None => Side::BOTH
                        .into_iter()
                        .find(|s| shared.slot(*s).is_none())
                        .ok_or(SessionError::SlotOccupied)?,
                }
            }
        };

        if shared.slot(side).is_some() {
            return Err(SessionError::SlotOccupied);
        }

        shared.slots[side.index()] = Some(participant);
        shared.last_activity = Instant::now();
        if shared.is_full() {
            shared.phase = SessionPhase::Playing;
        }

        info!(
            session_id = %id,
            side = ?side,
            participant = ?participant,
            phase = ?shared.phase,
            "Participant attached"
        );
        Ok(side)
    }

    /// Release `side`. A game in progress is forfeited by that side.
    pub async fn detach(&self, id: SessionId, side: Side) -> Result<(), SessionError> {
        let handle = self.get(id)?;

        let forfeit = {
            let mut shared = handle.shared.lock();
            match shared.phase {
                SessionPhase::Waiting => {
                    shared.slots[side.index()] = None;
                    shared.last_activity = Instant::now();
                    debug!(session_id = %id, side = ?side, "Slot released");
                    false
                }
                SessionPhase::Playing => true,
                SessionPhase::Finished => false,
            }
        };

        if forfeit && handle.commands.send(SessionCommand::Forfeit { side }).await.is_err() {
            warn!(session_id = %id, side = ?side, "Session loop gone before forfeit");
        }
        Ok(())
    }

    /// Queue a paddle intent for the next tick
    pub fn send_input(
        &self,
        id: SessionId,
        side: Side,
        direction: Direction,
    ) -> Result<(), SessionError> {
        let handle = self.get(id)?;
        if let Err(err) = handle
            .commands
            .try_send(SessionCommand::Paddle { side, direction })
        {
            debug!(session_id = %id, error = %err, "Paddle command dropped");
        }
        Ok(())
    }

    /// Force the session to end. Nothing is recorded.
    pub fn terminate(&self, id: SessionId) -> Result<(), SessionError> {
        let (_, handle) = self.sessions.remove(&id).ok_or(SessionError::NotFound)?;
        handle.shared.lock().terminated = true;
        handle.shutdown.notify_one();
        info!(session_id = %id, "Session terminate requested");
        Ok(())
    }

    /// Sessions still waiting or playing
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<(Instant, SessionSummary)> = self
            .sessions
            .iter()
            .filter_map(|entry| {
                let shared = entry.shared.lock();
                if shared.phase == SessionPhase::Finished || shared.terminated {
                    return None;
                }
                Some((
                    entry.created_at,
                    SessionSummary {
                        session_id: entry.id,
                        phase: shared.phase,
                        players: shared.slots.iter().flatten().count(),
                        tournament_id: entry.tournament.map(|t| t.tournament_id),
                        round: entry.tournament.map(|t| t.round),
                    },
                ))
            })
            .collect();
        sessions.sort_by_key(|(created_at, _)| *created_at);
        sessions.into_iter().map(|(_, summary)| summary).collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Evict idle free-play sessions, finished sessions past their grace
    /// period and sessions whose loop is gone
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let mut idle = Vec::new();
        let mut expired = Vec::new();

        for entry in self.sessions.iter() {
            let shared = entry.shared.lock();
            match shared.phase {
                SessionPhase::Waiting
                    if shared.reserved.is_none()
                        && now.duration_since(shared.last_activity)
                            > self.config.session_idle_timeout =>
                {
                    idle.push(entry.id);
                }
                SessionPhase::Finished
                    if shared.finished_at.is_some_and(|at| {
                        now.duration_since(at) > self.config.session_finished_grace
                    }) =>
                {
                    expired.push(entry.id);
                }
                _ if entry.commands.is_closed() && shared.phase != SessionPhase::Finished => {
                    warn!(session_id = %entry.id, phase = ?shared.phase, "Session loop stopped unexpectedly");
                    expired.push(entry.id);
                }
                _ => {}
            }
        }

        for id in &idle {
            info!(session_id = %id, "Reaping idle session");
            let _ = self.terminate(*id);
        }
        for id in &expired {
            self.sessions.remove(id);
            debug!(session_id = %id, "Finished session evicted");
        }

        idle.len() + expired.len()
    }

    /// Periodically reap sessions
    pub async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = self.reap();
            if reaped > 0 {
                debug!(reaped, active = self.active_sessions(), "Reaper pass");
            }
        }
    }
}
