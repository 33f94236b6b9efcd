//! PostgREST storage backend using the service_role key

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::util::time::unix_millis;

use super::models::*;
use super::{Storage, StoreError};

/// Thin PostgREST client.
/// Uses the service_role key which bypasses RLS.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, SupabaseError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(SupabaseError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Authenticated GET returning every matching row
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)
    }

    /// Authenticated GET expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Option<T>, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authed(self.client.get(&url))
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        Self::check(response)
            .await?
            .json()
            .await
            .map(Some)
            .map_err(SupabaseError::Parse)
    }

    /// Insert one row and return its representation
    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        data: &T,
    ) -> Result<R, SupabaseError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        // PostgREST returns an array, get first element
        let rows: Vec<R> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)?;
        rows.into_iter().next().ok_or(SupabaseError::NoRowReturned)
    }

    /// PATCH the rows matched by `query`, returning how many changed
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        query: &str,
        data: &T,
    ) -> Result<usize, SupabaseError> {
        let url = format!("{}?{}", self.rest_url(table), query);
        let response = self
            .authed(self.client.patch(&url))
            .header("Prefer", "return=representation")
            .json(data)
            .send()
            .await
            .map_err(SupabaseError::Request)?;

        let rows: Vec<serde_json::Value> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(SupabaseError::Parse)?;
        Ok(rows.len())
    }
}

/// PostgREST errors
#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned from insert")]
    NoRowReturned,
}

impl SupabaseError {
    fn is_unique_violation(&self) -> bool {
        matches!(self, SupabaseError::Api { status: 409, .. })
    }
}

#[derive(Serialize)]
struct NewTournament {
    creator_id: PlayerId,
    status: TournamentStatus,
    created_at: i64,
}

#[derive(Serialize)]
struct NewTournamentPlayer {
    tournament_id: TournamentId,
    player_id: PlayerId,
    seed: u8,
}

#[derive(Deserialize)]
struct PlayerRow {
    id: PlayerId,
    username: String,
}

#[derive(Deserialize)]
struct EnrollmentRow {
    tournament_id: TournamentId,
}

#[derive(Deserialize)]
struct MatchOutcomeRow {
    player1: PlayerId,
    player2: PlayerId,
    winner_id: PlayerId,
}

#[derive(Deserialize)]
struct PlacementRow {
    player_id: PlayerId,
    final_position: Option<u8>,
}

/// Storage backed by the Supabase tables
/// `match`, `tournament`, `tournament_player` and `player`
#[derive(Clone)]
pub struct SupabaseStore {
    client: SupabaseClient,
}

impl SupabaseStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

fn id_list(ids: impl IntoIterator<Item = i64>) -> String {
    ids.into_iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl Storage for SupabaseStore {
    async fn insert_match(&self, new_match: NewMatch) -> Result<MatchRecord, StoreError> {
        Ok(self.client.insert("match", &new_match).await?)
    }

    async fn find_round_match(
        &self,
        tournament_id: TournamentId,
        round: Round,
    ) -> Result<Option<MatchRecord>, StoreError> {
        let query = format!(
            "tournament_id=eq.{}&round=eq.{}&limit=1",
            tournament_id,
            round.as_str()
        );
        let rows: Vec<MatchRecord> = self.client.get("match", &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_tournament_matches(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let query = format!("tournament_id=eq.{}&order=id.asc", tournament_id);
        Ok(self.client.get("match", &query).await?)
    }

    async fn create_tournament(&self, creator_id: PlayerId) -> Result<TournamentRecord, StoreError> {
        let record: TournamentRecord = self
            .client
            .insert(
                "tournament",
                &NewTournament {
                    creator_id,
                    status: TournamentStatus::Pending,
                    created_at: unix_millis() as i64,
                },
            )
            .await?;
        self.add_tournament_player(record.id, creator_id, 1).await?;
        debug!(tournament_id = record.id, creator_id, "Tournament row created");
        Ok(record)
    }

    async fn get_tournament(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Option<TournamentRecord>, StoreError> {
        let query = format!("id=eq.{}", tournament_id);
        Ok(self.client.get_one("tournament", &query).await?)
    }

    async fn list_tournament_players(
        &self,
        tournament_id: TournamentId,
    ) -> Result<Vec<TournamentPlayer>, StoreError> {
        let query = format!("tournament_id=eq.{}&order=seed.asc", tournament_id);
        Ok(self.client.get("tournament_player", &query).await?)
    }

    async fn add_tournament_player(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
        seed: u8,
    ) -> Result<(), StoreError> {
        let row = NewTournamentPlayer {
            tournament_id,
            player_id,
            seed,
        };
        match self
            .client
            .insert::<_, TournamentPlayer>("tournament_player", &row)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_unique_violation() => Err(StoreError::Conflict(format!(
                "player {} already in tournament {}",
                player_id, tournament_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_tournament_status(
        &self,
        tournament_id: TournamentId,
        status: TournamentStatus,
    ) -> Result<(), StoreError> {
        let query = format!("id=eq.{}", tournament_id);
        let changed = self
            .client
            .update("tournament", &query, &serde_json::json!({ "status": status }))
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("tournament {}", tournament_id)));
        }
        Ok(())
    }

    async fn set_final_position(
        &self,
        tournament_id: TournamentId,
        player_id: PlayerId,
        position: u8,
    ) -> Result<(), StoreError> {
        let query = format!("tournament_id=eq.{}&player_id=eq.{}", tournament_id, player_id);
        let changed = self
            .client
            .update(
                "tournament_player",
                &query,
                &serde_json::json!({ "final_position": position }),
            )
            .await?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "player {} in tournament {}",
                player_id, tournament_id
            )));
        }
        Ok(())
    }

    async fn list_open_tournaments(&self) -> Result<Vec<TournamentSummary>, StoreError> {
        let tournaments: Vec<TournamentRecord> = self
            .client
            .get("tournament", "status=in.(PENDING,STARTED)&order=id.asc")
            .await?;
        if tournaments.is_empty() {
            return Ok(Vec::new());
        }

        let enrollments: Vec<EnrollmentRow> = self
            .client
            .get(
                "tournament_player",
                &format!(
                    "select=tournament_id&tournament_id=in.({})",
                    id_list(tournaments.iter().map(|t| t.id))
                ),
            )
            .await?;
        let mut counts: HashMap<TournamentId, usize> = HashMap::new();
        for row in enrollments {
            *counts.entry(row.tournament_id).or_default() += 1;
        }

        let creators: Vec<PlayerId> = tournaments
            .iter()
            .map(|t| t.creator_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let names = self.player_names(&creators).await?;

        Ok(tournaments
            .into_iter()
            .map(|t| TournamentSummary {
                id: t.id,
                status: t.status,
                username: names
                    .get(&t.creator_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PLAYER_NAME.to_string()),
                player_count: counts.get(&t.id).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn player_stats(&self) -> Result<Vec<PlayerStats>, StoreError> {
        let matches: Vec<MatchOutcomeRow> = self
            .client
            .get("match", "select=player1,player2,winner_id")
            .await?;
        let placements: Vec<PlacementRow> = self
            .client
            .get("tournament_player", "select=player_id,final_position")
            .await?;

        let mut tally = StatsTally::default();
        for row in matches {
            tally.add_match(row.player1, row.player2, row.winner_id);
        }
        for row in placements {
            tally.add_enrollment(row.player_id, row.final_position);
        }
        let names = self.player_names(&tally.player_ids()).await?;
        Ok(tally.finish(&names))
    }

    async fn player_names(&self, ids: &[PlayerId]) -> Result<HashMap<PlayerId, String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let query = format!("select=id,username&id=in.({})", id_list(ids.iter().copied()));
        let rows: Vec<PlayerRow> = self.client.get("player", &query).await?;
        Ok(rows.into_iter().map(|row| (row.id, row.username)).collect())
    }
}
