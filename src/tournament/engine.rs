//! Tournament engine: enrollment, round advancement and standings

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::game::{SessionRegistry, TournamentMatchRef};
use crate::results::MatchObserver;
use crate::store::{
    MatchRecord, PlayerId, Storage, StoreError, TournamentId, TournamentStatus, TournamentSummary,
    UNKNOWN_PLAYER_NAME,
};

use super::bracket::{Advance, Bracket, BracketError, BracketMatch, PendingMatch};

#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    #[error("Tournament not found")]
    NotFound,

    #[error("Tournament is full")]
    Full,

    #[error("Player already joined")]
    AlreadyJoined,

    #[error("Bracket rejected the update: {0}")]
    Bracket(BracketError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<BracketError> for TournamentError {
    fn from(err: BracketError) -> Self {
        match err {
            BracketError::Full => TournamentError::Full,
            BracketError::AlreadyJoined => TournamentError::AlreadyJoined,
            other => TournamentError::Bracket(other),
        }
    }
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub tournament_id: TournamentId,
    pub status: TournamentStatus,
    pub player_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub username: String,
    pub seed: u8,
    pub final_position: Option<u8>,
}

/// Players and bracket of one tournament
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentView {
    pub id: TournamentId,
    pub creator_id: PlayerId,
    pub status: TournamentStatus,
    pub players: Vec<PlayerView>,
    pub matches: Vec<BracketMatch>,
}

type SharedBracket = Arc<Mutex<Bracket>>;

pub struct TournamentEngine {
    store: Arc<dyn Storage>,
    sessions: Arc<SessionRegistry>,
    /// Loaded brackets; each lock serializes joins and results of one tournament
    brackets: DashMap<TournamentId, SharedBracket>,
}

impl TournamentEngine {
    pub fn new(store: Arc<dyn Storage>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            store,
            sessions,
            brackets: DashMap::new(),
        }
    }

    /// Create a pending tournament with `creator` as first seed
    pub async fn create(&self, creator: PlayerId) -> Result<TournamentId, TournamentError> {
        let record = self.store.create_tournament(creator).await?;
        self.brackets.insert(
            record.id,
            Arc::new(Mutex::new(Bracket::new(record.id, creator))),
        );
        info!(tournament_id = record.id, creator_id = creator, "Tournament created");
        Ok(record.id)
    }

    /// Enroll `player`. Check and write happen under the tournament lock, so
    /// concurrent joins cannot overfill the bracket.
    pub async fn join(
        &self,
        tournament_id: TournamentId,
        player: PlayerId,
    ) -> Result<JoinOutcome, TournamentError> {
        let shared = self.bracket(tournament_id).await?;
        let mut bracket = shared.lock().await;

        bracket.check_join(player)?;
        let seed = bracket.players().len() as u8 + 1;
        match self
            .store
            .add_tournament_player(tournament_id, player, seed)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(TournamentError::AlreadyJoined),
            Err(err) => return Err(err.into()),
        }

        let advance = bracket.join(player)?;
        info!(
            tournament_id,
            player_id = player,
            seed,
            "Player joined tournament"
        );
        self.apply(&mut bracket, advance).await;

        Ok(JoinOutcome {
            tournament_id,
            status: bracket.status(),
            player_count: bracket.players().len(),
        })
    }

    /// Advance the bracket with a freshly stored match
    pub async fn record_result(&self, record: &MatchRecord) -> Result<(), TournamentError> {
        let Some(tournament_id) = record.tournament_id else {
            return Ok(());
        };
        let shared = self.bracket(tournament_id).await?;
        let mut bracket = shared.lock().await;

        match bracket.record(record) {
            Ok(advance) => {
                info!(
                    tournament_id,
                    match_id = record.id,
                    round = ?record.round,
                    winner_id = record.winner_id,
                    "Bracket advanced"
                );
                self.apply(&mut bracket, advance).await;
                Ok(())
            }
            Err(BracketError::AlreadyDecided(round)) => {
                warn!(
                    tournament_id,
                    match_id = record.id,
                    round = round.as_str(),
                    "Round already decided, result ignored"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Players with names and positions, plus every scheduled match
    pub async fn view(&self, tournament_id: TournamentId) -> Result<TournamentView, TournamentError> {
        let shared = self.bracket(tournament_id).await?;
        let (mut view, ids) = {
            let bracket = shared.lock().await;
            let view = TournamentView {
                id: bracket.id(),
                creator_id: bracket.creator_id(),
                status: bracket.status(),
                players: bracket
                    .players()
                    .iter()
                    .enumerate()
                    .map(|(index, id)| PlayerView {
                        id: *id,
                        username: UNKNOWN_PLAYER_NAME.to_string(),
                        seed: index as u8 + 1,
                        final_position: bracket.position(*id),
                    })
                    .collect(),
                matches: bracket.matches().cloned().collect(),
            };
            (view, bracket.players().to_vec())
        };

        let names = self.store.player_names(&ids).await?;
        for player in &mut view.players {
            if let Some(name) = names.get(&player.id) {
                player.username = name.clone();
            }
        }
        Ok(view)
    }

    /// Tournaments that are still pending or running
    pub async fn list_open(&self) -> Result<Vec<TournamentSummary>, TournamentError> {
        Ok(self.store.list_open_tournaments().await?)
    }

    /// Cached bracket, loaded from storage on first use
    async fn bracket(&self, tournament_id: TournamentId) -> Result<SharedBracket, TournamentError> {
        if let Some(bracket) = self.brackets.get(&tournament_id) {
            return Ok(bracket.clone());
        }

        let tournament = self
            .store
            .get_tournament(tournament_id)
            .await?
            .ok_or(TournamentError::NotFound)?;
        let players = self.store.list_tournament_players(tournament_id).await?;
        let matches = self.store.list_tournament_matches(tournament_id).await?;
        let loaded = Bracket::from_rows(&tournament, &players, &matches);

        let shared = self
            .brackets
            .entry(tournament_id)
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .clone();

        {
            let mut bracket = shared.lock().await;
            self.reconcile(&mut bracket, tournament.status, &players_positions(&players))
                .await;
            self.ensure_sessions(&mut bracket);
        }
        debug!(tournament_id, "Tournament loaded from storage");
        Ok(shared)
    }

    /// Persist what the bracket derived but storage is missing
    async fn reconcile(
        &self,
        bracket: &mut Bracket,
        stored_status: TournamentStatus,
        stored_positions: &HashMap<PlayerId, u8>,
    ) {
        let status = (bracket.status() != stored_status).then_some(bracket.status());
        let positions = bracket
            .positions()
            .filter(|(player, pos)| stored_positions.get(player) != Some(pos))
            .collect::<Vec<_>>();
        if status.is_none() && positions.is_empty() {
            return;
        }

        warn!(
            tournament_id = bracket.id(),
            stored = stored_status.as_str(),
            derived = bracket.status().as_str(),
            "Stored tournament lagged behind its matches, reconciling"
        );
        self.persist(bracket.id(), status, &positions).await;
    }

    /// Make sure every undecided match has a session
    fn ensure_sessions(&self, bracket: &mut Bracket) {
        if bracket.status() != TournamentStatus::Started {
            return;
        }
        let missing: Vec<PendingMatch> = bracket
            .undecided()
            .into_iter()
            .filter(|pending| {
                let match_ref = TournamentMatchRef {
                    tournament_id: bracket.id(),
                    round: pending.round,
                };
                match self.sessions.find_for_match(match_ref) {
                    Some(handle) => {
                        bracket.set_session(pending.round, handle.id);
                        false
                    }
                    None => true,
                }
            })
            .collect();
        if !missing.is_empty() {
            info!(
                tournament_id = bracket.id(),
                count = missing.len(),
                "Respawning sessions for undecided matches"
            );
        }
        self.spawn_matches(bracket, &missing);
    }

    fn spawn_matches(&self, bracket: &mut Bracket, matches: &[PendingMatch]) {
        for pending in matches {
            let session_id = self.sessions.create_for_match(
                TournamentMatchRef {
                    tournament_id: bracket.id(),
                    round: pending.round,
                },
                pending.players,
            );
            bracket.set_session(pending.round, session_id);
        }
    }

    /// Persist a bracket transition and open its new sessions. Storage
    /// failures are logged; the next load reconciles them.
    async fn apply(&self, bracket: &mut Bracket, advance: Advance) {
        self.persist(bracket.id(), advance.status, &advance.positions)
            .await;
        self.spawn_matches(bracket, &advance.new_matches);
        if advance.status == Some(TournamentStatus::Finished) {
            info!(tournament_id = bracket.id(), "Tournament finished");
        }
    }

    async fn persist(
        &self,
        tournament_id: TournamentId,
        status: Option<TournamentStatus>,
        positions: &[(PlayerId, u8)],
    ) {
        if let Some(status) = status {
            if let Err(err) = self.store.set_tournament_status(tournament_id, status).await {
                error!(
                    tournament_id,
                    status = status.as_str(),
                    error = %err,
                    "Failed to store tournament status"
                );
            }
        }
        for (player, position) in positions {
            if let Err(err) = self
                .store
                .set_final_position(tournament_id, *player, *position)
                .await
            {
                error!(
                    tournament_id,
                    player_id = player,
                    position,
                    error = %err,
                    "Failed to store final position"
                );
            }
        }
    }
}

fn players_positions(players: &[crate::store::TournamentPlayer]) -> HashMap<PlayerId, u8> {
    players
        .iter()
        .filter_map(|p| p.final_position.map(|pos| (p.player_id, pos)))
        .collect()
}

#[async_trait]
impl MatchObserver for TournamentEngine {
    async fn on_match_recorded(&self, record: &MatchRecord) -> anyhow::Result<()> {
        self.record_result(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::{FinishedMatch, SessionPhase};
    use crate::store::{MemoryStore, NewMatch, Round};
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    struct Harness {
        store: Arc<MemoryStore>,
        sessions: Arc<SessionRegistry>,
        engine: Arc<TournamentEngine>,
        _completed: mpsc::UnboundedReceiver<FinishedMatch>,
    }

    fn harness_with(store: Arc<MemoryStore>) -> Harness {
        let (registry, completed) = SessionRegistry::new(Arc::new(GameConfig::default()));
        let sessions = Arc::new(registry);
        let engine = Arc::new(TournamentEngine::new(store.clone(), sessions.clone()));
        Harness {
            store,
            sessions,
            engine,
            _completed: completed,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryStore::new()))
    }

    async fn store_result(
        store: &MemoryStore,
        tournament_id: TournamentId,
        round: Round,
        players: [PlayerId; 2],
        scores: [u32; 2],
    ) -> MatchRecord {
        store
            .insert_match(NewMatch {
                tournament_id: Some(tournament_id),
                player1: players[0],
                player2: players[1],
                score_player1: scores[0],
                score_player2: scores[1],
                winner_id: if scores[0] > scores[1] { players[0] } else { players[1] },
                round: Some(round),
                created_at: 0,
            })
            .await
            .unwrap()
    }

    fn session_players(h: &Harness, tournament_id: TournamentId, round: Round) -> [PlayerId; 2] {
        let handle = h
            .sessions
            .find_for_match(TournamentMatchRef {
                tournament_id,
                round,
            })
            .expect("session for round");
        let players = handle.shared.lock().reserved.expect("reserved players");
        players
    }

    #[tokio::test]
    async fn fourth_join_starts_semis() {
        let h = harness();
        let id = h.engine.create(10).await.unwrap();

        for (player, expected) in [(11, 2), (12, 3)] {
            let outcome = h.engine.join(id, player).await.unwrap();
            assert_eq!(outcome.player_count, expected);
            assert_eq!(outcome.status, TournamentStatus::Pending);
        }
        assert_eq!(h.sessions.active_sessions(), 0);

        let outcome = h.engine.join(id, 13).await.unwrap();
        assert_eq!(outcome.status, TournamentStatus::Started);
        assert_eq!(outcome.player_count, 4);

        assert_eq!(h.sessions.active_sessions(), 2);
        assert_eq!(session_players(&h, id, Round::Semi1), [10, 11]);
        assert_eq!(session_players(&h, id, Round::Semi2), [12, 13]);

        let stored = h.store.get_tournament(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TournamentStatus::Started);
    }

    #[tokio::test]
    async fn join_errors() {
        let h = harness();
        assert!(matches!(
            h.engine.join(404, 11).await,
            Err(TournamentError::NotFound)
        ));

        let id = h.engine.create(10).await.unwrap();
        assert!(matches!(
            h.engine.join(id, 10).await,
            Err(TournamentError::AlreadyJoined)
        ));
        for player in [11, 12, 13] {
            assert_ok!(h.engine.join(id, player).await);
        }
        assert!(matches!(
            h.engine.join(id, 14).await,
            Err(TournamentError::Full)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_for_last_seat_admit_exactly_one() {
        let h = harness();
        let id = h.engine.create(10).await.unwrap();
        h.engine.join(id, 11).await.unwrap();
        h.engine.join(id, 12).await.unwrap();

        let attempts: Vec<_> = (100..116)
            .map(|player| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.join(id, player).await })
            })
            .collect();

        let mut won = 0;
        let mut full = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => won += 1,
                Err(TournamentError::Full) => full += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(full, 15);
        assert_eq!(h.store.list_tournament_players(id).await.unwrap().len(), 4);
        assert_eq!(h.sessions.active_sessions(), 2);
    }

    #[tokio::test]
    async fn semis_advance_to_finals_and_standings() {
        let h = harness();
        let id = h.engine.create(10).await.unwrap();
        for player in [11, 12, 13] {
            h.engine.join(id, player).await.unwrap();
        }

        let semi1 = store_result(&h.store, id, Round::Semi1, [10, 11], [5, 2]).await;
        h.engine.on_match_recorded(&semi1).await.unwrap();
        assert_eq!(h.sessions.active_sessions(), 2);

        let semi2 = store_result(&h.store, id, Round::Semi2, [12, 13], [4, 5]).await;
        h.engine.on_match_recorded(&semi2).await.unwrap();
        assert_eq!(session_players(&h, id, Round::Final), [10, 13]);
        assert_eq!(session_players(&h, id, Round::LittleFinal), [11, 12]);

        let little = store_result(&h.store, id, Round::LittleFinal, [11, 12], [5, 1]).await;
        h.engine.on_match_recorded(&little).await.unwrap();
        let final_match = store_result(&h.store, id, Round::Final, [10, 13], [3, 5]).await;
        h.engine.on_match_recorded(&final_match).await.unwrap();

        let view = h.engine.view(id).await.unwrap();
        assert_eq!(view.status, TournamentStatus::Finished);
        let position = |player: PlayerId| {
            view.players
                .iter()
                .find(|p| p.id == player)
                .and_then(|p| p.final_position)
        };
        assert_eq!(position(13), Some(1));
        assert_eq!(position(10), Some(2));
        assert_eq!(position(11), Some(3));
        assert_eq!(position(12), Some(4));

        let stored = h.store.list_tournament_players(id).await.unwrap();
        assert!(stored.iter().all(|p| p.final_position.is_some()));
        assert!(h.engine.list_open().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn decided_round_ignores_second_result() {
        let h = harness();
        let id = h.engine.create(10).await.unwrap();
        for player in [11, 12, 13] {
            h.engine.join(id, player).await.unwrap();
        }

        let first = store_result(&h.store, id, Round::Semi1, [10, 11], [5, 2]).await;
        h.engine.on_match_recorded(&first).await.unwrap();
        let second = store_result(&h.store, id, Round::Semi1, [10, 11], [1, 5]).await;
        h.engine.on_match_recorded(&second).await.unwrap();

        let view = h.engine.view(id).await.unwrap();
        let semi = view.matches.iter().find(|m| m.round == Round::Semi1).unwrap();
        assert_eq!(semi.winner(), Some(10));
    }

    #[tokio::test]
    async fn view_names_players() {
        let h = harness();
        h.store.upsert_player(10, "alice");
        let id = h.engine.create(10).await.unwrap();
        h.engine.join(id, 11).await.unwrap();

        let view = h.engine.view(id).await.unwrap();
        assert_eq!(view.players.len(), 2);
        assert_eq!(view.players[0].username, "alice");
        assert_eq!(view.players[1].username, UNKNOWN_PLAYER_NAME);
        assert_eq!(view.players[1].seed, 2);
        assert!(view.matches.is_empty());
    }

    #[tokio::test]
    async fn started_tournament_respawns_sessions_after_restart() {
        let store = Arc::new(MemoryStore::new());
        let id = {
            let before = harness_with(store.clone());
            let id = before.engine.create(10).await.unwrap();
            for player in [11, 12, 13] {
                before.engine.join(id, player).await.unwrap();
            }
            store_result(&store, id, Round::Semi1, [10, 11], [5, 0]).await;
            id
        };

        // Fresh engine and registry over the same rows
        let after = harness_with(store);
        let view = after.engine.view(id).await.unwrap();

        assert_eq!(view.status, TournamentStatus::Started);
        assert_eq!(after.sessions.active_sessions(), 1);
        let semi2 = view.matches.iter().find(|m| m.round == Round::Semi2).unwrap();
        let session = after.sessions.get(semi2.session_id.unwrap()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Waiting);
        assert_eq!(session_players(&after, id, Round::Semi2), [12, 13]);
    }
}
