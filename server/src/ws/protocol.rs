use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::session::{validate_session_token, SessionError};
use crate::chat::messages::publish_chat_message;
use crate::state::AppState;
use crate::store::models::ChatMessage;
use crate::store::StoreError;
use crate::ws::broadcast::send_to;
use crate::ws::ConnectionId;

// --- Frames ---

/// Frames a client may send. JSON text, `{"type": ..., "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundFrame {
    Auth(AuthPayload),
    ChatMessage(ChatPayload),
    Subscribe(RidePayload),
    Unsubscribe(RidePayload),
}

/// Either a signed session token or, when tokens are not required, a bare
/// user id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub ride_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RidePayload {
    pub ride_id: i64,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundFrame {
    ChatMessage(ChatMessage),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

// --- Outcomes ---

/// What a successfully handled frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Authenticated { user_id: i64 },
    Published { message_id: i64, delivered: usize },
    Subscribed { ride_id: i64 },
    Unsubscribed { ride_id: i64 },
}

/// Why a frame was rejected. None of these close the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("auth frame carries neither token nor userId")]
    MissingCredentials,
    #[error("a session token is required")]
    TokenRequired,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("connection has not authenticated")]
    Unauthenticated,
    #[error("invalid ride id {0}")]
    InvalidRideId(i64),
    #[error("message is empty")]
    EmptyMessage,
    #[error("message is {len} characters, limit is {max}")]
    MessageTooLong { len: usize, max: usize },
    #[error("connection is no longer registered")]
    UnknownConnection,
    #[error("failed to store message: {0}")]
    Store(#[from] StoreError),
}

impl FrameError {
    /// Status-like code reported in error frames.
    pub fn code(&self) -> u16 {
        match self {
            FrameError::Malformed(_)
            | FrameError::MissingCredentials
            | FrameError::InvalidRideId(_)
            | FrameError::EmptyMessage => 400,
            FrameError::TokenRequired | FrameError::Session(_) | FrameError::Unauthenticated => 401,
            FrameError::UnknownConnection => 410,
            FrameError::MessageTooLong { .. } => 413,
            FrameError::Store(_) => 500,
        }
    }
}

// --- Dispatch ---

/// Handle one inbound text frame from `conn_id`.
///
/// Rejected frames are logged and, if the relay is configured for it,
/// answered with an error frame to the sender only. The connection is never
/// closed here.
pub fn handle_text_message(text: &str, state: &AppState, conn_id: ConnectionId) {
    match handle_frame(text, state, conn_id) {
        Ok(outcome) => {
            tracing::debug!(connection_id = %conn_id, outcome = ?outcome, "Frame handled");
        }
        Err(err) => {
            match &err {
                FrameError::Store(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "Chat message not stored");
                }
                other => {
                    tracing::debug!(connection_id = %conn_id, error = %other, "Dropped inbound frame");
                }
            }
            if state.relay.error_frames {
                send_error(state, conn_id, &err);
            }
        }
    }
}

/// Parse and apply one frame. Exposed separately so callers (and tests) can
/// observe the outcome.
pub fn handle_frame(
    text: &str,
    state: &AppState,
    conn_id: ConnectionId,
) -> Result<FrameOutcome, FrameError> {
    let frame: InboundFrame = serde_json::from_str(text)?;
    dispatch_frame(frame, state, conn_id)
}

fn dispatch_frame(
    frame: InboundFrame,
    state: &AppState,
    conn_id: ConnectionId,
) -> Result<FrameOutcome, FrameError> {
    match frame {
        InboundFrame::Auth(payload) => handle_auth(payload, state, conn_id),
        InboundFrame::ChatMessage(payload) => handle_chat(payload, state, conn_id),
        InboundFrame::Subscribe(RidePayload { ride_id }) => {
            if !state.connections.subscribe(conn_id, ride_id) {
                return Err(FrameError::UnknownConnection);
            }
            Ok(FrameOutcome::Subscribed { ride_id })
        }
        InboundFrame::Unsubscribe(RidePayload { ride_id }) => {
            if !state.connections.unsubscribe(conn_id, ride_id) {
                return Err(FrameError::UnknownConnection);
            }
            Ok(FrameOutcome::Unsubscribed { ride_id })
        }
    }
}

/// Bind a user to the connection. A token always wins over a bare user id.
/// A rejected auth frame leaves any earlier binding in place.
fn handle_auth(
    payload: AuthPayload,
    state: &AppState,
    conn_id: ConnectionId,
) -> Result<FrameOutcome, FrameError> {
    let user_id = match (payload.token, payload.user_id) {
        (Some(token), _) => validate_session_token(&state.session_secret, &token)?.sub,
        (None, Some(_)) if state.require_token => return Err(FrameError::TokenRequired),
        (None, Some(user_id)) => user_id,
        (None, None) => return Err(FrameError::MissingCredentials),
    };

    if !state.connections.bind(conn_id, user_id) {
        return Err(FrameError::UnknownConnection);
    }

    tracing::info!(connection_id = %conn_id, user_id = user_id, "Connection authenticated");
    Ok(FrameOutcome::Authenticated { user_id })
}

fn handle_chat(
    payload: ChatPayload,
    state: &AppState,
    conn_id: ConnectionId,
) -> Result<FrameOutcome, FrameError> {
    if payload.ride_id <= 0 {
        return Err(FrameError::InvalidRideId(payload.ride_id));
    }

    // Stored as sent; whitespace-only text counts as empty
    if payload.message.trim().is_empty() {
        return Err(FrameError::EmptyMessage);
    }
    let len = payload.message.chars().count();
    if len > state.relay.max_message_length {
        return Err(FrameError::MessageTooLong {
            len,
            max: state.relay.max_message_length,
        });
    }

    if !state.connections.is_registered(conn_id) {
        return Err(FrameError::UnknownConnection);
    }
    let user_id = state.connections.user_id(conn_id);
    if user_id.is_none() && !state.relay.allow_anonymous_chat {
        return Err(FrameError::Unauthenticated);
    }

    let (stored, delivered) =
        publish_chat_message(state, payload.ride_id, user_id, payload.message)?;

    Ok(FrameOutcome::Published {
        message_id: stored.id,
        delivered,
    })
}

/// Send an error frame to one connection.
fn send_error(state: &AppState, conn_id: ConnectionId, err: &FrameError) {
    let frame = OutboundFrame::Error(ErrorPayload {
        code: err.code(),
        message: err.to_string(),
    });
    send_to(&state.connections, conn_id, &frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::issue_session_token;
    use crate::config::{AuthConfig, RelayConfig, StoreConfig};
    use axum::extract::ws::Message;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    type Inbox = mpsc::UnboundedReceiver<Message>;

    fn test_state(relay: RelayConfig, auth: AuthConfig, store: StoreConfig) -> AppState {
        AppState::new(&relay, &auth, &store)
    }

    fn default_state() -> AppState {
        test_state(
            RelayConfig::default(),
            AuthConfig {
                session_secret: "test-secret".to_string(),
                ..AuthConfig::default()
            },
            StoreConfig::default(),
        )
    }

    fn connect(state: &AppState) -> (ConnectionId, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (state.connections.register(tx), rx)
    }

    /// Drain every queued frame as parsed JSON.
    fn drain(inbox: &mut Inbox) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(msg) = inbox.try_recv() {
            match msg {
                Message::Text(text) => frames.push(serde_json::from_str(text.as_str()).unwrap()),
                other => panic!("unexpected message {:?}", other),
            }
        }
        frames
    }

    fn send(state: &AppState, conn: ConnectionId, frame: Value) -> Result<FrameOutcome, FrameError> {
        handle_frame(&frame.to_string(), state, conn)
    }

    #[test]
    fn test_auth_then_chat_broadcasts_to_everyone() {
        let state = default_state();
        let (c1, mut inbox1) = connect(&state);
        let (_c2, mut inbox2) = connect(&state);

        let outcome = send(&state, c1, json!({"type": "auth", "payload": {"userId": 7}})).unwrap();
        assert_eq!(outcome, FrameOutcome::Authenticated { user_id: 7 });

        let outcome = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 3, "message": "hi"}}),
        )
        .unwrap();
        assert!(matches!(outcome, FrameOutcome::Published { delivered: 2, .. }));

        let stored = state.store.chat_messages_for_ride(3).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].user_id, Some(7));
        assert_eq!(stored[0].message, "hi");

        for inbox in [&mut inbox1, &mut inbox2] {
            let frames = drain(inbox);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["type"], "chat_message");
            assert_eq!(frames[0]["payload"]["id"], stored[0].id);
            assert_eq!(frames[0]["payload"]["rideId"], 3);
            assert_eq!(frames[0]["payload"]["userId"], 7);
            assert_eq!(frames[0]["payload"]["message"], "hi");
            assert!(frames[0]["payload"]["timestamp"].is_string());
        }
    }

    #[test]
    fn test_unauthenticated_chat_rejected_by_default() {
        let state = default_state();
        let (c1, mut inbox1) = connect(&state);
        let (_c2, mut inbox2) = connect(&state);

        let err = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "x"}}),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::Unauthenticated));
        assert_eq!(state.store.chat_message_count().unwrap(), 0);
        assert!(drain(&mut inbox1).is_empty());
        assert!(drain(&mut inbox2).is_empty());
    }

    #[test]
    fn test_anonymous_chat_stored_without_user_when_allowed() {
        let state = test_state(
            RelayConfig {
                allow_anonymous_chat: true,
                ..RelayConfig::default()
            },
            AuthConfig::default(),
            StoreConfig::default(),
        );
        let (c1, mut inbox1) = connect(&state);
        let (_c2, mut inbox2) = connect(&state);

        send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "x"}}),
        )
        .unwrap();

        let stored = state.store.chat_messages_for_ride(1).unwrap();
        assert_eq!(stored[0].user_id, None);
        for inbox in [&mut inbox1, &mut inbox2] {
            let frames = drain(inbox);
            assert_eq!(frames.len(), 1);
            assert!(frames[0]["payload"]["userId"].is_null());
        }
    }

    #[test]
    fn test_closed_connection_excluded_from_broadcast() {
        let state = default_state();
        let (c1, _inbox1) = connect(&state);
        let (c2, mut inbox2) = connect(&state);
        state.connections.unregister(c1);

        send(&state, c2, json!({"type": "auth", "payload": {"userId": 2}})).unwrap();
        let outcome = send(
            &state,
            c2,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "still here"}}),
        )
        .unwrap();

        assert!(matches!(outcome, FrameOutcome::Published { delivered: 1, .. }));
        assert_eq!(drain(&mut inbox2).len(), 1);
    }

    #[test]
    fn test_malformed_frames_leave_state_untouched() {
        let state = default_state();
        let (c1, mut inbox1) = connect(&state);

        for text in [
            r#"{"type": "bogus"}"#,
            r#"{"type": "bogus", "payload": {}}"#,
            "not json at all",
            r#"{"type": "auth"}"#,
            r#"{"type": "chat_message", "payload": {"message": "no ride"}}"#,
            r#"{"type": "chat_message", "payload": {"rideId": "3", "message": "string id"}}"#,
        ] {
            let err = handle_frame(text, &state, c1).unwrap_err();
            assert!(matches!(err, FrameError::Malformed(_)), "{text}: {err:?}");
        }

        assert!(state.connections.is_registered(c1));
        assert_eq!(state.connections.user_id(c1), None);
        assert_eq!(state.store.chat_message_count().unwrap(), 0);
        assert!(drain(&mut inbox1).is_empty(), "no error frames unless enabled");
    }

    #[test]
    fn test_auth_without_credentials_rejected() {
        let state = default_state();
        let (c1, _inbox) = connect(&state);
        let err = send(&state, c1, json!({"type": "auth", "payload": {}})).unwrap_err();
        assert!(matches!(err, FrameError::MissingCredentials));
    }

    #[test]
    fn test_empty_and_oversized_messages_rejected() {
        let state = test_state(
            RelayConfig {
                max_message_length: 5,
                ..RelayConfig::default()
            },
            AuthConfig::default(),
            StoreConfig::default(),
        );
        let (c1, _inbox) = connect(&state);
        send(&state, c1, json!({"type": "auth", "payload": {"userId": 1}})).unwrap();

        let err = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "   "}}),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::EmptyMessage));

        let err = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "too long"}}),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLong { len: 8, max: 5 }));
        assert_eq!(err.code(), 413);

        let err = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 0, "message": "hey"}}),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::InvalidRideId(0)));

        // Whitespace is kept as sent and counts toward the limit
        let err = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "  hey  "}}),
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::MessageTooLong { len: 7, max: 5 }));

        send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": " hey "}}),
        )
        .unwrap();
        assert_eq!(state.store.chat_messages_for_ride(1).unwrap()[0].message, " hey ");
    }

    #[test]
    fn test_error_frames_sent_only_to_sender() {
        let state = test_state(
            RelayConfig {
                error_frames: true,
                ..RelayConfig::default()
            },
            AuthConfig::default(),
            StoreConfig::default(),
        );
        let (c1, mut inbox1) = connect(&state);
        let (_c2, mut inbox2) = connect(&state);

        handle_text_message(r#"{"type": "bogus"}"#, &state, c1);

        let frames = drain(&mut inbox1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
        assert_eq!(frames[0]["payload"]["code"], 400);
        assert!(drain(&mut inbox2).is_empty());
        assert!(state.connections.is_registered(c1));
    }

    #[test]
    fn test_token_auth_binds_subject() {
        let state = default_state();
        let (c1, _inbox) = connect(&state);
        let token = issue_session_token(&state.session_secret, 42, 60).unwrap();

        let outcome = send(
            &state,
            c1,
            json!({"type": "auth", "payload": {"token": token, "userId": 1}}),
        )
        .unwrap();
        assert_eq!(outcome, FrameOutcome::Authenticated { user_id: 42 });
        assert_eq!(state.connections.user_id(c1), Some(42));
    }

    #[test]
    fn test_invalid_token_keeps_previous_binding() {
        let state = default_state();
        let (c1, _inbox) = connect(&state);
        send(&state, c1, json!({"type": "auth", "payload": {"userId": 5}})).unwrap();

        let forged = issue_session_token(b"someone-else", 99, 60).unwrap();
        let err = send(&state, c1, json!({"type": "auth", "payload": {"token": forged}})).unwrap_err();
        assert!(matches!(err, FrameError::Session(_)));
        assert_eq!(err.code(), 401);
        assert_eq!(state.connections.user_id(c1), Some(5));
    }

    #[test]
    fn test_require_token_rejects_bare_user_id() {
        let state = test_state(
            RelayConfig::default(),
            AuthConfig {
                require_token: true,
                session_secret: "test-secret".to_string(),
                ..AuthConfig::default()
            },
            StoreConfig::default(),
        );
        let (c1, _inbox) = connect(&state);

        let err = send(&state, c1, json!({"type": "auth", "payload": {"userId": 7}})).unwrap_err();
        assert!(matches!(err, FrameError::TokenRequired));
        assert_eq!(state.connections.user_id(c1), None);

        let token = issue_session_token(&state.session_secret, 7, 60).unwrap();
        send(&state, c1, json!({"type": "auth", "payload": {"token": token}})).unwrap();
        assert_eq!(state.connections.user_id(c1), Some(7));
    }

    #[test]
    fn test_ride_scoped_broadcast_reaches_subscribers_only() {
        let state = test_state(
            RelayConfig {
                ride_scoped_broadcast: true,
                ..RelayConfig::default()
            },
            AuthConfig::default(),
            StoreConfig::default(),
        );
        let (c1, mut inbox1) = connect(&state);
        let (c2, mut inbox2) = connect(&state);
        let (_c3, mut inbox3) = connect(&state);

        send(&state, c1, json!({"type": "subscribe", "payload": {"rideId": 3}})).unwrap();
        send(&state, c2, json!({"type": "subscribe", "payload": {"rideId": 3}})).unwrap();
        send(&state, c2, json!({"type": "unsubscribe", "payload": {"rideId": 3}})).unwrap();
        send(&state, c1, json!({"type": "auth", "payload": {"userId": 1}})).unwrap();
        let outcome = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 3, "message": "see you at the gate"}}),
        )
        .unwrap();

        assert!(matches!(outcome, FrameOutcome::Published { delivered: 1, .. }));
        assert_eq!(drain(&mut inbox1).len(), 1);
        assert!(drain(&mut inbox2).is_empty());
        assert!(drain(&mut inbox3).is_empty());
    }

    #[test]
    fn test_store_failure_prevents_broadcast() {
        let state = test_state(
            RelayConfig::default(),
            AuthConfig::default(),
            StoreConfig {
                max_chat_messages: Some(1),
            },
        );
        let (c1, mut inbox1) = connect(&state);
        send(&state, c1, json!({"type": "auth", "payload": {"userId": 1}})).unwrap();

        send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "first"}}),
        )
        .unwrap();
        let err = send(
            &state,
            c1,
            json!({"type": "chat_message", "payload": {"rideId": 1, "message": "second"}}),
        )
        .unwrap_err();

        assert!(matches!(err, FrameError::Store(StoreError::CapacityExceeded(1))));
        let frames = drain(&mut inbox1);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["payload"]["message"], "first");
    }

    #[test]
    fn test_broadcast_order_matches_store_order() {
        let state = default_state();
        let (c1, mut inbox1) = connect(&state);
        let (c2, mut inbox2) = connect(&state);
        send(&state, c1, json!({"type": "auth", "payload": {"userId": 1}})).unwrap();
        send(&state, c2, json!({"type": "auth", "payload": {"userId": 2}})).unwrap();

        for i in 0..10 {
            let sender = if i % 2 == 0 { c1 } else { c2 };
            send(
                &state,
                sender,
                json!({"type": "chat_message", "payload": {"rideId": 1, "message": format!("m{i}")}}),
            )
            .unwrap();
        }

        let ids1: Vec<i64> = drain(&mut inbox1)
            .iter()
            .map(|f| f["payload"]["id"].as_i64().unwrap())
            .collect();
        let ids2: Vec<i64> = drain(&mut inbox2)
            .iter()
            .map(|f| f["payload"]["id"].as_i64().unwrap())
            .collect();
        let stored: Vec<i64> = state
            .store
            .chat_messages_for_ride(1)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();

        assert_eq!(ids1, stored);
        assert_eq!(ids2, stored);
    }

    #[test]
    fn test_concurrent_publishers_observe_one_order() {
        let state = default_state();
        let (_watcher_a, mut inbox_a) = connect(&state);
        let (_watcher_b, mut inbox_b) = connect(&state);

        let handles: Vec<_> = (1..=4)
            .map(|user| {
                let state = state.clone();
                std::thread::spawn(move || {
                    let (conn, _inbox) = connect(&state);
                    send(&state, conn, json!({"type": "auth", "payload": {"userId": user}})).unwrap();
                    for i in 0..25 {
                        send(
                            &state,
                            conn,
                            json!({"type": "chat_message", "payload": {"rideId": 1, "message": format!("{user}-{i}")}}),
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let order_a: Vec<i64> = drain(&mut inbox_a)
            .iter()
            .map(|f| f["payload"]["id"].as_i64().unwrap())
            .collect();
        let order_b: Vec<i64> = drain(&mut inbox_b)
            .iter()
            .map(|f| f["payload"]["id"].as_i64().unwrap())
            .collect();

        assert_eq!(order_a.len(), 100);
        assert_eq!(order_a, order_b);
        assert!(order_a.windows(2).all(|w| w[0] < w[1]));
    }
}
