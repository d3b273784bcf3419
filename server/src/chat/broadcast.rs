//! WebSocket broadcast helpers for chat events.
//! Wraps a stored chat message in an outbound frame and fans it out.

use crate::store::models::ChatMessage;
use crate::ws::broadcast::{broadcast_to_all, broadcast_to_ride};
use crate::ws::protocol::OutboundFrame;
use crate::ws::ConnectionRegistry;

/// Broadcast a new chat message. With `ride_scoped` only subscribers of the
/// message's ride receive it; otherwise every connection does and clients
/// filter by `rideId`. Returns the number of connections reached.
pub fn broadcast_new_message(
    registry: &ConnectionRegistry,
    chat_message: ChatMessage,
    ride_scoped: bool,
) -> usize {
    let ride_id = chat_message.ride_id;
    let frame = OutboundFrame::ChatMessage(chat_message);
    if ride_scoped {
        broadcast_to_ride(registry, ride_id, &frame)
    } else {
        broadcast_to_all(registry, &frame)
    }
}
