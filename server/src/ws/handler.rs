use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::session::{validate_session_token, SessionError};
use crate::state::AppState;
use crate::ws::actor;

/// Optional query parameters for the WebSocket connection.
/// A `token` here authenticates the connection up front, saving the client
/// an `auth` frame.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket close codes for a rejected `?token=`:
/// 4001 = token expired
/// 4002 = token invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws[?token=SESSION_TOKEN]
/// WebSocket upgrade endpoint. Without a token the connection is admitted
/// unauthenticated and may authenticate later with an `auth` frame.
/// A token that fails validation gets the socket closed with a 400x code.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = params.token else {
        return ws.on_upgrade(move |socket| actor::run_connection(socket, state, None));
    };

    match validate_session_token(&state.session_secret, &token) {
        Ok(claims) => {
            tracing::info!(user_id = claims.sub, "WebSocket connection authenticated by query token");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, Some(claims.sub)))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                SessionError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                SessionError::Invalid(_) => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(close_code = close_code, reason = reason, "WebSocket auth failed");

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
