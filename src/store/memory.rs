//! In-process storage used when no database is configured, and by tests

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::util::time::unix_millis;

use super::models::*;
use super::{Storage, StoreError};

#[derive(Default)]
struct Tables {
    matches: Vec<MatchRecord>,
    tournaments: BTreeMap<TournamentId, TournamentRecord>,
    tournament_players: Vec<TournamentPlayer>,
    players: HashMap<PlayerId, String>,
    next_match_id: MatchId,
    next_tournament_id: TournamentId,
}

/// Storage backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or rename an entry of the player directory
    pub fn upsert_player(&self, id: PlayerId, username: &str) {
        self.tables.lock().players.insert(id, username.to_string());
    }

    /// Every recorded match, oldest first
    pub fn matches(&self) -> Vec<MatchRecord> {
        self.tables.lock().matches.clone()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        let mut tables = self.tables.lock();
        tables.next_match_id += 1;
        let record = MatchRecord {
            id: tables.next_match_id,
            tournament_id: new_match.tournament_id,
            player1: new_match.player1,
            player2: new_match.player2,
            score_player1: new_match.score_player1,
            score_player2: new_match.score_player2,
            winner_id: new_match.winner_id,
            round: new_match.round,
            created_at: new_match.created_at,
        };
        tables.matches.push(record.clone());
        Ok(record)
    }

    async fn find_round_match(
        &self,
        tournament_id: TournamentId,
        round: Round,
    ) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .matches
            .iter()
            .find(|m| m.tournament_id == Some(tournament_id) && m.round == Some(round))
            .cloned())
    }

    async fn list_tournament_matches(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        Ok(self
            .tables
            .lock()
            .matches
            .iter()
            .filter(|m| m.tournament_id == Some(tournament_id))
            .cloned()
            .collect())
    }

    async fn create_tournament(&self, creator_id: PlayerId) -> Result<TournamentRecord, StoreError> {
        let mut tables = self.tables.lock();
        tables.next_tournament_id += 1;
        let record = TournamentRecord {
            id: tables.next_tournament_id,
            creator_id,
            status: TournamentStatus::Pending,
            created_at: unix_millis() as i64,
        };
        tables.tournaments.insert(record.id, record.clone());
        tables.tournament_players.push(TournamentPlayer {
            tournament_id: record.id,
            player_id: creator_id,
            seed: 1,
            final_position: None,
        });
        Ok(record)
    }

    async fn get_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Option<TournamentRecord>, StoreError> {
        Ok(self.tables.lock().tournaments.get(&tournament_id).cloned())
    }

    async fn list_tournament_players(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<TournamentPlayer>, StoreError> {
        let mut players: Vec<TournamentPlayer> = self
            .tables
            .lock()
            .tournament_players
            .iter()
            .filter(|p| p.tournament_id == tournament_id)
            .cloned()
            .collect();
        players.sort_by_key(|p| p.seed);
        Ok(players)
    }

    async fn add_tournament_player(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
        seed: u8,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if !tables.tournaments.contains_key(&tournament_id) {
            return Err(StoreError::NotFound(format!("tournament {}", tournament_id)));
        }
        if tables
            .tournament_players
            .iter()
            .any(|p| p.tournament_id == tournament_id && p.player_id == player_id)
        {
            return Err(StoreError::Conflict(format!(
                "player {} already in tournament {}",
                player_id, tournament_id
            )));
        }
        tables.tournament_players.push(TournamentPlayer {
            tournament_id,
            player_id,
            seed,
            final_position: None,
        });
        Ok(())
    }

    async fn set_tournament_status(
        &self,
        tournament_id: TournamentId,
        status: TournamentStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let tournament = tables
            .tournaments
            .get_mut(&tournament_id)
            .ok_or_else(|| StoreError::NotFound(format!("tournament {}", tournament_id)))?;
        tournament.status = status;
        Ok(())
    }

    async fn set_final_position(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
        position: u8,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        let row = tables
            .tournament_players
            .iter_mut()
            .find(|p| p.tournament_id == tournament_id && p.player_id == player_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "player {} in tournament {}",
                    player_id, tournament_id
                ))
            })?;
        row.final_position = Some(position);
        Ok(())
    }

    async fn list_open_tournaments(&self) -> Result<Vec<TournamentSummary>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .tournaments
            .values()
            .filter(|t| t.status != TournamentStatus::Finished)
            .map(|t| TournamentSummary {
                id: t.id,
                status: t.status,
                username: tables
                    .players
                    .get(&t.creator_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PLAYER_NAME.to_string()),
                player_count: tables
                    .tournament_players
                    .iter()
                    .filter(|p| p.tournament_id == t.id)
                    .count(),
            })
            .collect())
    }

    async fn player_stats(&self) -> Result<Vec<PlayerStats>, StoreError> {
        let tables = self.tables.lock();
        let mut tally = StatsTally::default();
        for m in &tables.matches {
            tally.add_match(m.player1, m.player2, m.winner_id);
        }
        for p in &tables.tournament_players {
            tally.add_enrollment(p.player_id, p.final_position);
        }
        Ok(tally.finish(&tables.players))
    }

    async fn player_names(&self, ids: &[PlayerId]) -> Result<HashMap<PlayerId, String>, StoreError> {
        let tables = self.tables.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.players.get(id).map(|name| (*id, name.clone())))
            .collect())
    }
}
