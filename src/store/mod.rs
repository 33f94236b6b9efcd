//! Storage collaborator for matches and tournaments

pub mod memory;
pub mod models;
pub mod supabase;

use std::collections::HashMap;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use models::*;
pub use supabase::{SupabaseClient, SupabaseError, SupabaseStore};

/// Row store behind the result recorder and the tournament engine.
///
/// Implementations only persist; bracket rules live in the tournament engine.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError>;

    /// Match already recorded for a bracket round, if any
    async fn find_round_match(
        &self,
        tournament_id: TournamentId,
        round: Round,
    ) -> Result<Option<MatchRecord>, StoreError>;

    async fn list_tournament_matches(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    /// Create a `PENDING` tournament with the creator enrolled as seed 1
    async fn create_tournament(&self, creator_id: PlayerId) -> Result<TournamentRecord, StoreError>;

    async fn get_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Option<TournamentRecord>, StoreError>;

    /// Enrolled players ordered by seed
    async fn list_tournament_players(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<TournamentPlayer>, StoreError>;

    /// Fails with `StoreError::Conflict` if the player is already enrolled
    async fn add_tournament_player(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
        seed: u8,
    ) -> Result<(), StoreError>;

    async fn set_tournament_status(
        &self,
        tournament_id: TournamentId,
        status: TournamentStatus,
    ) -> Result<(), StoreError>;

    async fn set_final_position(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
        position: u8,
    ) -> Result<(), StoreError>;

    /// Tournaments still `PENDING` or `STARTED`
    async fn list_open_tournaments(&self) -> Result<Vec<TournamentSummary>, StoreError>;

    /// Totals for every player with a recorded match or enrolment
    async fn player_stats(&self) -> Result<Vec<PlayerStats>, StoreError>;

    /// Usernames from the player directory; unknown ids are left out
    async fn player_names(&self, ids: &[PlayerId]) -> Result<HashMap<PlayerId, String>, StoreError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Supabase(#[from] SupabaseError),

    #[error("Conflicting row: {0}")]
    Conflict(String),

    #[error("Row not found: {0}")]
    NotFound(String),
}
