//! Chat message publishing and the REST history endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use crate::auth::middleware::SessionUser;
use crate::chat::broadcast;
use crate::state::AppState;
use crate::store::models::ChatMessage;
use crate::store::StoreError;

/// Persist a chat message, then broadcast it.
///
/// Both steps run under the publish lock, so every client sees broadcasts in
/// the same order as message ids. Nothing is broadcast if the store refuses
/// the message. Returns the stored record and the number of connections the
/// frame was queued for.
pub fn publish_chat_message(
    state: &AppState,
    ride_id: i64,
    user_id: Option<i64>,
    message: String,
) -> Result<(ChatMessage, usize), StoreError> {
    let _sequenced = state.publish_lock.lock().map_err(|_| StoreError::Poisoned)?;

    let stored = state
        .store
        .create_chat_message(ride_id, user_id, message, Utc::now())?;

    let delivered = broadcast::broadcast_new_message(
        &state.connections,
        stored.clone(),
        state.relay.ride_scoped_broadcast,
    );

    tracing::debug!(
        message_id = stored.id,
        ride_id = ride_id,
        user_id = ?user_id,
        delivered = delivered,
        "Chat message published"
    );

    Ok((stored, delivered))
}

/// GET /api/rides/{ride_id}/messages
/// Full chat history for a ride, oldest first. Loaded once when a client opens
/// the ride's chat view; live messages then arrive over the WebSocket.
pub async fn get_ride_messages(
    State(state): State<AppState>,
    SessionUser(user): SessionUser,
    Path(ride_id): Path<i64>,
) -> Result<Json<Vec<ChatMessage>>, StatusCode> {
    if state.require_token && user.is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let messages = state.store.chat_messages_for_ride(ride_id).map_err(|e| {
        tracing::error!(ride_id = ride_id, error = %e, "Failed to load chat history");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(messages))
}
