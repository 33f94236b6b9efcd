//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::app::AppState;
use crate::game::{Participant, SessionError, SessionId, SessionSummary};
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::store::{PlayerStats, StoreError, TournamentId, TournamentSummary};
use crate::tournament::{JoinOutcome, TournamentError, TournamentView};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::Side;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/create-session", post(create_session_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/:session_id/join-ai", post(join_ai_handler))
        .route("/tournaments", get(list_tournaments_handler))
        .route("/stats", get(stats_handler))
        .route("/ws/:session_id", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/create-tournament", post(create_tournament_handler))
        .route(
            "/tournaments/:tournament_id",
            get(tournament_handler).post(join_tournament_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_sessions: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_sessions: state.sessions.active_sessions(),
    })
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: SessionId,
}

async fn create_session_handler(State(state): State<AppState>) -> Json<CreateSessionResponse> {
    Json(CreateSessionResponse {
        session_id: state.sessions.create(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinAiResponse {
    session_id: SessionId,
    side: Side,
}

async fn join_ai_handler(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<JoinAiResponse>, AppError> {
    let side = state.sessions.attach(session_id, None, Participant::Ai)?;
    Ok(Json(JoinAiResponse { session_id, side }))
}

async fn list_sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list())
}

// ============================================================================
// Tournament endpoints
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTournamentResponse {
    tournament_id: TournamentId,
}

async fn create_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<CreateTournamentResponse>, AppError> {
    let tournament_id = state.tournaments.create(auth.player_id).await?;
    Ok(Json(CreateTournamentResponse { tournament_id }))
}

async fn list_tournaments_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<TournamentSummary>>, AppError> {
    Ok(Json(state.tournaments.list_open().await?))
}

async fn join_tournament_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<TournamentId>,
) -> Result<Json<JoinOutcome>, AppError> {
    Ok(Json(
        state.tournaments.join(tournament_id, auth.player_id).await?,
    ))
}

async fn tournament_handler(
    State(state): State<AppState>,
    Path(tournament_id): Path<TournamentId>,
) -> Result<Json<TournamentView>, AppError> {
    Ok(Json(state.tournaments.view(tournament_id).await?))
}

// ============================================================================
// Player statistics
// ============================================================================

async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlayerStats>>, AppError> {
    Ok(Json(state.store.player_stats().await?))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let code = err.code();
        let message = err.to_string();
        match err {
            SessionError::NotFound => AppError::NotFound { code, message },
            SessionError::SlotOccupied | SessionError::Finished => {
                AppError::Conflict { code, message }
            }
            SessionError::NotParticipant => AppError::Forbidden { code, message },
        }
    }
}

impl From<TournamentError> for AppError {
    fn from(err: TournamentError) -> Self {
        let message = err.to_string();
        match err {
            TournamentError::NotFound => AppError::NotFound {
                code: "TOURNAMENT_NOT_FOUND",
                message,
            },
            TournamentError::Full => AppError::Conflict {
                code: "TOURNAMENT_FULL",
                message,
            },
            TournamentError::AlreadyJoined => AppError::Conflict {
                code: "ALREADY_JOINED",
                message,
            },
            TournamentError::Bracket(_) | TournamentError::Store(_) => {
                error!(error = %err, "Tournament operation failed");
                AppError::Internal(message)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "Storage query failed");
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            AppError::NotFound { code, .. } => (StatusCode::NOT_FOUND, *code),
            AppError::Conflict { code, .. } => (StatusCode::CONFLICT, *code),
            AppError::Forbidden { code, .. } => (StatusCode::FORBIDDEN, *code),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{Config, GameConfig, StorageConfig};
    use crate::http::middleware::test_support::token_for;
    use crate::store::MemoryStore;

    const SECRET: &str = "route-secret";

    fn app() -> (Router, AppState) {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            jwt_secret: SECRET.to_string(),
            client_origin: "http://localhost:5173".to_string(),
            storage: StorageConfig::Memory,
            game: GameConfig::default(),
        };
        let (state, _completed) = AppState::new(config, Arc::new(MemoryStore::new()));
        (build_router(state.clone()), state)
    }

    async fn call(router: &Router, method: &str, uri: &str, player: Option<i64>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(player) = player {
            request = request.header("Authorization", format!("Bearer {}", token_for(player, SECRET)));
        }
        let response = router
            .clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_sessions() {
        let (router, _) = app();
        call(&router, "POST", "/create-session", None).await;
        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_sessions"], 1);
    }

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let (router, _) = app();
        let (status, body) = call(&router, "POST", "/create-session", None).await;
        assert_eq!(status, StatusCode::OK);
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        let (status, body) = call(&router, "GET", "/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["sessionId"], session_id.as_str());
        assert_eq!(body[0]["phase"], "waiting");
        assert_eq!(body[0]["players"], 0);
        assert_eq!(body[0]["tournamentId"], Value::Null);

        let uri = format!("/sessions/{}/join-ai", session_id);
        let (status, body) = call(&router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"sessionId": session_id, "side": "left"}));

        let (status, body) = call(&router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "SLOT_OCCUPIED");
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let (router, _) = app();
        let uri = format!("/sessions/{}/join-ai", uuid::Uuid::new_v4());
        let (status, body) = call(&router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn tournament_routes_require_auth() {
        let (router, _) = app();
        let (status, body) = call(&router, "POST", "/create-tournament", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn tournament_flow_over_http() {
        let (router, state) = app();
        let (status, body) = call(&router, "POST", "/create-tournament", Some(10)).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["tournamentId"].as_i64().unwrap();
        let uri = format!("/tournaments/{}", id);

        let (status, body) = call(&router, "POST", &uri, Some(10)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_JOINED");

        for (player, count) in [(11, 2), (12, 3)] {
            let (status, body) = call(&router, "POST", &uri, Some(player)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["playerCount"], count);
            assert_eq!(body["status"], "PENDING");
        }
        let (_, body) = call(&router, "POST", &uri, Some(13)).await;
        assert_eq!(body["status"], "STARTED");

        let (status, body) = call(&router, "POST", &uri, Some(14)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "TOURNAMENT_FULL");

        let (status, body) = call(&router, "GET", &uri, Some(14)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["players"].as_array().unwrap().len(), 4);
        assert_eq!(body["matches"].as_array().unwrap().len(), 2);
        assert_eq!(body["matches"][0]["round"], "SEMI_1");
        assert!(body["matches"][0]["sessionId"].is_string());

        let (_, body) = call(&router, "GET", "/tournaments", None).await;
        assert_eq!(body[0]["id"], id);
        assert_eq!(body[0]["player_count"], 4);
        assert_eq!(body[0]["username"], "unknown");

        assert_eq!(state.sessions.list().len(), 2);
    }

    #[tokio::test]
    async fn unknown_tournament_is_404() {
        let (router, _) = app();
        let (status, body) = call(&router, "POST", "/tournaments/999", Some(10)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "TOURNAMENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn stats_are_public_and_list_players() {
        let (router, state) = app();
        call(&router, "POST", "/create-tournament", Some(10)).await;
        state
            .store
            .insert_match(crate::store::NewMatch {
                tournament_id: None,
                player1: 10,
                player2: crate::store::AI_PLAYER_ID,
                score_player1: 2,
                score_player2: 5,
                winner_id: crate::store::AI_PLAYER_ID,
                round: None,
                created_at: 0,
            })
            .await
            .unwrap();

        let (status, body) = call(&router, "GET", "/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!([{
                "player_id": 10,
                "username": "unknown",
                "tournaments_played": 1,
                "tournaments_won": 0,
                "matches_played": 1,
                "matches_won": 0,
            }])
        );
    }
}
