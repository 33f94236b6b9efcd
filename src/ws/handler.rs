//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::{Participant, SessionError, SessionId};
use crate::http::middleware::{authenticate, AuthError};
use crate::store::PlayerId;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, Direction, ServerMsg, Side};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<SessionId>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    let token = match query.token {
        Some(token) => token,
        None => return AuthError::MissingHeader.into_response(),
    };

    match authenticate(&token, &state.config.jwt_secret) {
        Ok(player_id) => {
            info!(session_id = %session_id, player_id, "WebSocket upgrade for authenticated player");
            ws.on_upgrade(move |socket| handle_socket(socket, session_id, player_id, state))
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Bind the upgraded connection to a side and pump frames until either end stops
async fn handle_socket(socket: WebSocket, session_id: SessionId, player_id: PlayerId, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();

    // Subscribe before attaching so the first state after the game starts is not missed
    let events = match state.sessions.get(session_id) {
        Ok(handle) => handle.subscribe(),
        Err(e) => {
            reject(&mut ws_sink, session_id, e).await;
            return;
        }
    };

    let side = match state
        .sessions
        .attach(session_id, None, Participant::Client(player_id))
    {
        Ok(side) => side,
        Err(e) => {
            reject(&mut ws_sink, session_id, e).await;
            return;
        }
    };

    if let Err(e) = send_msg(&mut ws_sink, &ServerMsg::connected(side)).await {
        error!(session_id = %session_id, player_id, error = %e, "Failed to send connected");
    } else {
        run_connection(&state, session_id, player_id, side, ws_sink, ws_stream, events).await;
    }

    // A finished session ignores this, a playing one treats it as a forfeit
    if let Err(e) = state.sessions.detach(session_id, side).await {
        debug!(session_id = %session_id, error = %e, "Detach after close");
    }

    info!(session_id = %session_id, player_id, side = ?side, "WebSocket connection closed");
}

/// Send an `error` frame for a failed attach and close
async fn reject(sink: &mut SplitSink<WebSocket, Message>, session_id: SessionId, err: SessionError) {
    info!(session_id = %session_id, code = err.code(), "Rejecting connection");
    let _ = send_msg(sink, &ServerMsg::error(err.code(), err.to_string())).await;
    let _ = sink.send(Message::Close(None)).await;
}

/// What to do with one inbound text frame
#[derive(Debug, PartialEq)]
enum FrameAction {
    Forward(Direction),
    Ignore(&'static str),
}

/// Per-connection input filter. A frame that changes the paddle direction
/// always goes through; repeats of the current direction are rate limited.
struct InputGate {
    limiter: ConnectionRateLimiter,
    last: Option<Direction>,
}

impl InputGate {
    fn new() -> Self {
        Self {
            limiter: ConnectionRateLimiter::new(),
            last: None,
        }
    }

    fn route_frame(&mut self, text: &str, side: Side) -> FrameAction {
        let direction = match serde_json::from_str::<ClientMsg>(text) {
            Ok(ClientMsg::Paddle { paddle, direction }) if paddle == side => direction,
            Ok(ClientMsg::Paddle { .. }) => {
                return FrameAction::Ignore("paddle owned by the other side")
            }
            Err(_) => return FrameAction::Ignore("unparseable frame"),
        };

        if self.last == Some(direction) && !self.limiter.check_paddle() {
            return FrameAction::Ignore("rate limited");
        }
        self.last = Some(direction);
        FrameAction::Forward(direction)
    }
}

/// Run the connection with read/write split
async fn run_connection(
    state: &AppState,
    session_id: SessionId,
    player_id: PlayerId,
    side: Side,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut events: broadcast::Receiver<ServerMsg>,
) {
    let mut gate = InputGate::new();

    // Writer task: session broadcast -> WebSocket, closing after the last message
    let mut writer_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                        break;
                    }
                    if msg.is_terminal() {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        session_id = %session_id,
                        lagged_count = n,
                        "Client lagged, skipping {} states", n
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(session_id = %session_id, "Session channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> session commands
    loop {
        let frame = tokio::select! {
            _ = &mut writer_handle => break,
            frame = ws_stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match gate.route_frame(&text, side) {
                FrameAction::Forward(direction) => {
                    if state.sessions.send_input(session_id, side, direction).is_err() {
                        debug!(session_id = %session_id, "Session gone");
                        break;
                    }
                }
                FrameAction::Ignore(reason) => {
                    warn!(session_id = %session_id, player_id, reason, "Ignoring client frame");
                }
            },
            Some(Ok(Message::Binary(_))) => {
                warn!(session_id = %session_id, player_id, "Received binary message, ignoring");
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!(session_id = %session_id, player_id, "Client initiated close");
                break;
            }
            Some(Err(e)) => {
                error!(session_id = %session_id, player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
