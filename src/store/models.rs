//! Persisted row shapes

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// User id attached to requests by the auth service
pub type PlayerId = i64;
pub type TournamentId = i64;
pub type MatchId = i64;

/// Player id recorded for the computer opponent
pub const AI_PLAYER_ID: PlayerId = 0;

/// Bracket round of a tournament match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Round {
    #[serde(rename = "SEMI_1")]
    Semi1,
    #[serde(rename = "SEMI_2")]
    Semi2,
    #[serde(rename = "LITTLE_FINAL")]
    LittleFinal,
    #[serde(rename = "FINAL")]
    Final,
}

impl Round {
    pub fn as_str(self) -> &'static str {
        match self {
            Round::Semi1 => "SEMI_1",
            Round::Semi2 => "SEMI_2",
            Round::LittleFinal => "LITTLE_FINAL",
            Round::Final => "FINAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TournamentStatus {
    Pending,
    Started,
    Finished,
}

impl TournamentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TournamentStatus::Pending => "PENDING",
            TournamentStatus::Started => "STARTED",
            TournamentStatus::Finished => "FINISHED",
        }
    }
}

/// Row of the `match` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: MatchId,
    pub tournament_id: Option<TournamentId>,
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub score_player1: u32,
    pub score_player2: u32,
    pub winner_id: PlayerId,
    pub round: Option<Round>,
    /// Unix milliseconds
    pub created_at: i64,
}

/// New match for insertion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMatch {
    pub tournament_id: Option<TournamentId>,
    pub player1: PlayerId,
    pub player2: PlayerId,
    pub score_player1: u32,
    pub score_player2: u32,
    pub winner_id: PlayerId,
    pub round: Option<Round>,
    pub created_at: i64,
}

/// Row of the `tournament` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub id: TournamentId,
    pub creator_id: PlayerId,
    pub status: TournamentStatus,
    pub created_at: i64,
}

/// Row of the `tournament_player` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentPlayer {
    pub tournament_id: TournamentId,
    pub player_id: PlayerId,
    /// 1-based join order
    pub seed: u8,
    pub final_position: Option<u8>,
}

/// Listing entry for open tournaments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentSummary {
    pub id: TournamentId,
    pub status: TournamentStatus,
    /// Creator's username, `unknown` when the directory has no entry
    pub username: String,
    pub player_count: usize,
}

pub const UNKNOWN_PLAYER_NAME: &str = "unknown";

/// Career totals of one player
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: PlayerId,
    pub username: String,
    pub tournaments_played: u32,
    pub tournaments_won: u32,
    pub matches_played: u32,
    pub matches_won: u32,
}

/// Accumulates `PlayerStats` from match and enrolment rows. The AI is not
/// a player and is left out.
#[derive(Debug, Default)]
pub struct StatsTally {
    rows: BTreeMap<PlayerId, PlayerStats>,
}

impl StatsTally {
    fn row(&mut self, player_id: PlayerId) -> Option<&mut PlayerStats> {
        if player_id == AI_PLAYER_ID {
            return None;
        }
        Some(self.rows.entry(player_id).or_insert_with(|| PlayerStats {
            player_id,
            ..PlayerStats::default()
        }))
    }

    pub fn add_match(&mut self, player1: PlayerId, player2: PlayerId, winner_id: PlayerId) {
        for player in [player1, player2] {
            if let Some(row) = self.row(player) {
                row.matches_played += 1;
                if player == winner_id {
                    row.matches_won += 1;
                }
            }
        }
    }

    pub fn add_enrollment(&mut self, player_id: PlayerId, final_position: Option<u8>) {
        if let Some(row) = self.row(player_id) {
            row.tournaments_played += 1;
            if final_position == Some(1) {
                row.tournaments_won += 1;
            }
        }
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.rows.keys().copied().collect()
    }

    /// Rows ordered by player id, named from `names`
    pub fn finish(self, names: &HashMap<PlayerId, String>) -> Vec<PlayerStats> {
        self.rows
            .into_values()
            .map(|mut row| {
                row.username = names
                    .get(&row.player_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PLAYER_NAME.to_string());
                row
            })
            .collect()
    }
}
