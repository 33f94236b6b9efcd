//! Session state and authoritative tick loop

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::{PlayerId, Round, TournamentId, AI_PLAYER_ID};
use crate::ws::protocol::{Direction, ServerMsg, Side};

use super::ai::AiController;
use super::physics::{Ball, Paddle, PhysicsSystem};
use super::snapshot::SnapshotBuilder;

pub type SessionId = Uuid;

/// Session phase, never goes backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Waiting,
    Playing,
    Finished,
}

/// Occupant of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participant {
    Client(PlayerId),
    Ai,
}

impl Participant {
    /// Player id written to the match record
    pub fn player_id(self) -> PlayerId {
        match self {
            Participant::Client(id) => id,
            Participant::Ai => AI_PLAYER_ID,
        }
    }
}

/// Back-reference from a session to the bracket match it decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TournamentMatchRef {
    pub tournament_id: TournamentId,
    pub round: Round,
}

/// Commands drained by the loop at the start of every tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionCommand {
    Paddle { side: Side, direction: Direction },
    /// The client on `side` left mid-game
    Forfeit { side: Side },
}

/// Result of a session that reached `Finished`, handed to the result recorder
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedMatch {
    pub session_id: SessionId,
    pub tournament: Option<TournamentMatchRef>,
    /// Left side
    pub player1: PlayerId,
    /// Right side
    pub player2: PlayerId,
    pub score_player1: u32,
    pub score_player2: u32,
    pub winner_id: PlayerId,
    pub forfeit: bool,
}

/// Authoritative court: ball, paddles and scores
#[derive(Debug, Clone)]
pub struct CourtState {
    pub ball: Ball,
    paddles: [Paddle; 2],
    scores: [u32; 2],
    in_play: bool,
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub scored: Option<Side>,
    pub winner: Option<Side>,
}

impl CourtState {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            ball: Ball::centered(config),
            paddles: [Paddle::centered(config), Paddle::centered(config)],
            scores: [0, 0],
            in_play: false,
        }
    }

    pub fn paddle(&self, side: Side) -> &Paddle {
        &self.paddles[side.index()]
    }

    pub fn paddle_mut(&mut self, side: Side) -> &mut Paddle {
        &mut self.paddles[side.index()]
    }

    pub fn score(&self, side: Side) -> u32 {
        self.scores[side.index()]
    }

    pub fn in_play(&self) -> bool {
        self.in_play
    }

    pub fn set_intent(&mut self, side: Side, direction: Direction) {
        self.paddles[side.index()].intent = direction;
    }

    /// Recenter the ball and launch it toward `toward`
    pub fn serve<R: Rng>(&mut self, toward: Side, config: &GameConfig, rng: &mut R) {
        self.ball = Ball::centered(config);
        let (vel_x, vel_y) = PhysicsSystem::serve_velocity(toward, config, rng);
        self.ball.vel_x = vel_x;
        self.ball.vel_y = vel_y;
        self.in_play = true;
    }

    pub fn winner(&self, config: &GameConfig) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.score(*side) >= config.win_score)
    }

    /// Advance one fixed step
    pub fn step<R: Rng>(&mut self, config: &GameConfig, rng: &mut R) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.in_play {
            return outcome;
        }

        for paddle in self.paddles.iter_mut() {
            PhysicsSystem::move_paddle(paddle, config);
        }

        let dt = config.tick_delta();
        let prev_x = self.ball.x;
        self.ball.x += self.ball.vel_x * dt;
        self.ball.y += self.ball.vel_y * dt;
        PhysicsSystem::reflect_walls(&mut self.ball, config);

        for side in Side::BOTH {
            let paddle = self.paddles[side.index()];
            if PhysicsSystem::hits_paddle(side, prev_x, &self.ball, &paddle, config) {
                PhysicsSystem::bounce_off_paddle(side, &mut self.ball, &paddle, config);
                break;
            }
        }

        if let Some(scorer) = PhysicsSystem::scoring_side(&self.ball, config) {
            self.scores[scorer.index()] += 1;
            outcome.scored = Some(scorer);

            if let Some(winner) = self.winner(config) {
                self.ball = Ball::centered(config);
                self.in_play = false;
                outcome.winner = Some(winner);
            } else {
                self.serve(scorer, config, rng);
            }
        }

        outcome
    }

    /// End the game because `leaver` disconnected: the other side is awarded
    /// the win threshold, the leaver keeps its score.
    pub fn forfeit(&mut self, leaver: Side, config: &GameConfig) -> Side {
        let winner = leaver.opponent();
        let score = &mut self.scores[winner.index()];
        *score = (*score).max(config.win_score);
        self.in_play = false;
        winner
    }
}

/// Admission and lifecycle data shared between the loop and the registry.
/// The loop holds the lock for the whole tick.
#[derive(Debug)]
pub struct SessionShared {
    pub phase: SessionPhase,
    pub slots: [Option<Participant>; 2],
    /// Players a tournament session is reserved for, left then right
    pub reserved: Option<[PlayerId; 2]>,
    pub terminated: bool,
    pub last_activity: Instant,
    pub finished_at: Option<Instant>,
}

impl SessionShared {
    pub fn new(reserved: Option<[PlayerId; 2]>) -> Self {
        Self {
            phase: SessionPhase::Waiting,
            slots: [None, None],
            reserved,
            terminated: false,
            last_activity: Instant::now(),
            finished_at: None,
        }
    }

    pub fn slot(&self, side: Side) -> Option<Participant> {
        self.slots[side.index()]
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn finish(&mut self) {
        self.phase = SessionPhase::Finished;
        self.finished_at = Some(Instant::now());
    }
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub tournament: Option<TournamentMatchRef>,
    pub commands: mpsc::Sender<SessionCommand>,
    pub events: broadcast::Sender<ServerMsg>,
    pub shared: Arc<Mutex<SessionShared>>,
    pub shutdown: Arc<Notify>,
    pub created_at: Instant,
}

impl SessionHandle {
    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events.subscribe()
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq)]
pub enum SessionExit {
    Finished(FinishedMatch),
    Terminated,
}

/// The authoritative game session
pub struct GameSession {
    id: SessionId,
    config: Arc<GameConfig>,
    tournament: Option<TournamentMatchRef>,
    court: CourtState,
    rng: ChaCha8Rng,
    ai: [Option<AiController>; 2],
    forfeit: Option<Side>,
    shared: Arc<Mutex<SessionShared>>,
    commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<ServerMsg>,
    shutdown: Arc<Notify>,
    snapshots: SnapshotBuilder,
}

impl GameSession {
    /// Create a new session
    pub fn new(
        id: SessionId,
        seed: u64,
        config: Arc<GameConfig>,
        tournament: Option<(TournamentMatchRef, [PlayerId; 2])>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Mutex::new(SessionShared::new(
            tournament.map(|(_, players)| players),
        )));
        let shutdown = Arc::new(Notify::new());
        let match_ref = tournament.map(|(match_ref, _)| match_ref);

        let handle = SessionHandle {
            id,
            tournament: match_ref,
            commands: command_tx,
            events: events_tx.clone(),
            shared: shared.clone(),
            shutdown: shutdown.clone(),
            created_at: Instant::now(),
        };

        let session = Self {
            id,
            court: CourtState::new(&config),
            config,
            tournament: match_ref,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ai: [None, None],
            forfeit: None,
            shared,
            commands: command_rx,
            events: events_tx,
            shutdown,
            snapshots: SnapshotBuilder::new(),
        };

        (session, handle)
    }

    /// Run the authoritative tick loop until the session finishes or is
    /// terminated
    pub async fn run(mut self) -> SessionExit {
        debug!(session_id = %self.id, "Session loop started");

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {}
                _ = self.shutdown.notified() => {}
            }

            if let Some(exit) = self.tick() {
                return exit;
            }
        }
    }

    /// Run a single tick. Returns `Some` once the session is over.
    fn tick(&mut self) -> Option<SessionExit> {
        let shared_state = Arc::clone(&self.shared);
        let mut shared = shared_state.lock();

        self.drain_commands(shared.phase);

        if shared.terminated {
            info!(session_id = %self.id, "Session terminated");
            let _ = self
                .events
                .send(ServerMsg::error("SESSION_TERMINATED", "Session was terminated"));
            return Some(SessionExit::Terminated);
        }

        match shared.phase {
            SessionPhase::Waiting => return None,
            SessionPhase::Finished => return Some(SessionExit::Terminated),
            SessionPhase::Playing => {}
        }

        if !self.court.in_play() && self.forfeit.is_none() {
            let toward = if self.rng.gen_bool(0.5) { Side::Left } else { Side::Right };
            self.court.serve(toward, &self.config, &mut self.rng);
            info!(session_id = %self.id, "Session playing");
        }

        self.run_ai(&shared);

        let winner = match self.forfeit {
            Some(leaver) => {
                let winner = self.court.forfeit(leaver, &self.config);
                info!(
                    session_id = %self.id,
                    leaver = ?leaver,
                    "Participant left, awarding forfeit"
                );
                Some(winner)
            }
            None => {
                let outcome = self.court.step(&self.config, &mut self.rng);
                if let Some(scorer) = outcome.scored {
                    debug!(
                        session_id = %self.id,
                        scorer = ?scorer,
                        left = self.court.score(Side::Left),
                        right = self.court.score(Side::Right),
                        "Point scored"
                    );
                }
                outcome.winner
            }
        };

        match winner {
            Some(winner) => {
                shared.finish();
                let _ = self.events.send(self.snapshots.game_over(&self.court));
                let result = self.build_result(&shared, winner);
                info!(
                    session_id = %self.id,
                    winner_id = result.winner_id,
                    score_left = result.score_player1,
                    score_right = result.score_player2,
                    "Session finished"
                );
                Some(SessionExit::Finished(result))
            }
            None => {
                if let Some(state) = self.snapshots.state_if_changed(&self.court) {
                    let _ = self.events.send(state);
                }
                None
            }
        }
    }

    /// Drain all pending commands without waiting. Paddle input only counts
    /// once the game is running.
    fn drain_commands(&mut self, phase: SessionPhase) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SessionCommand::Paddle { side, direction } => {
                    if phase == SessionPhase::Playing {
                        self.court.set_intent(side, direction);
                    }
                }
                SessionCommand::Forfeit { side } => {
                    if self.forfeit.is_none() {
                        self.forfeit = Some(side);
                    }
                }
            }
        }
    }

    /// Let AI participants pick their paddle direction from the last public
    /// snapshot
    fn run_ai(&mut self, shared: &SessionShared) {
        let view = match self.snapshots.last() {
            Some(view) => view.clone(),
            None => SnapshotBuilder::snapshot(&self.court),
        };

        for side in Side::BOTH {
            if shared.slot(side) != Some(Participant::Ai) {
                continue;
            }
            let config = &self.config;
            let ai = self.ai[side.index()].get_or_insert_with(|| AiController::new(side, config));
            let direction = ai.decide(&view, config);
            self.court.set_intent(side, direction);
        }
    }

    fn build_result(&self, shared: &SessionShared, winner: Side) -> FinishedMatch {
        let player = |side: Side| {
            shared
                .slot(side)
                .map(Participant::player_id)
                .or_else(|| shared.reserved.map(|r| r[side.index()]))
                .unwrap_or_else(|| {
                    warn!(session_id = %self.id, side = ?side, "Finished with an empty slot");
                    AI_PLAYER_ID
                })
        };

        let player1 = player(Side::Left);
        let player2 = player(Side::Right);

        FinishedMatch {
            session_id: self.id,
            tournament: self.tournament,
            player1,
            player2,
            score_player1: self.court.score(Side::Left),
            score_player2: self.court.score(Side::Right),
            winner_id: match winner {
                Side::Left => player1,
                Side::Right => player2,
            },
            forfeit: self.forfeit.is_some(),
        }
    }
}
