//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::http::middleware::{verify_jwt, AuthenticatedUser};
use crate::session::{ConnectionId, OUTBOUND_BUFFER};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            let user = AuthenticatedUser::from(claims);
            info!(identity = %user.identity, "WebSocket upgrade for authenticated user");
            ws.on_upgrade(move |socket| handle_socket(socket, user, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthenticatedUser, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let conn = state
        .hub
        .register_connection(&user.identity, user.email.clone(), outbound_tx);

    info!(identity = %user.identity, connection = conn, "New WebSocket connection");

    run_session(&state, conn, &user, ws_sink, ws_stream, outbound_rx).await;

    // Runs once per connection however the socket ended
    state.hub.disconnect(conn).await;

    info!(identity = %user.identity, connection = conn, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    state: &AppState,
    conn: ConnectionId,
    user: &AuthenticatedUser,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: hub frames -> WebSocket
    let writer_identity = user.identity.clone();
    let mut writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(identity = %writer_identity, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> hub
    loop {
        let frame = tokio::select! {
            frame = ws_stream.next() => frame,
            _ = &mut writer_handle => {
                debug!(identity = %user.identity, "Writer stopped");
                break;
            }
        };

        let Some(result) = frame else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(identity = %user.identity, "Rate limited inbound message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => state.hub.handle_message(conn, client_msg).await,
                    Err(e) => {
                        warn!(identity = %user.identity, error = %e, "Failed to parse client message");
                        state.hub.send_error(conn, format!("Invalid message: {}", e));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(identity = %user.identity, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(identity = %user.identity, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(identity = %user.identity, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
