use axum::extract::ws::Message;

use super::protocol::OutboundFrame;
use super::{ConnectionId, ConnectionRegistry, ConnectionSender};

/// Encode an outbound frame as a JSON text message.
fn encode(frame: &OutboundFrame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound frame");
            None
        }
    }
}

/// Push one message onto each queue. A closed queue only means that
/// connection is going away; it never affects the others.
fn fan_out(targets: Vec<(ConnectionId, ConnectionSender)>, msg: Message) -> usize {
    let mut delivered = 0;
    for (id, sender) in targets {
        if sender.send(msg.clone()).is_ok() {
            delivered += 1;
        } else {
            tracing::debug!(connection_id = %id, "Skipping closed connection during broadcast");
        }
    }
    delivered
}

/// Broadcast a frame to every registered connection, including the sender
/// and connections that have not authenticated. Returns how many queues
/// accepted the frame.
pub fn broadcast_to_all(registry: &ConnectionRegistry, frame: &OutboundFrame) -> usize {
    let Some(msg) = encode(frame) else {
        return 0;
    };
    fan_out(registry.senders_where(|_| true), msg)
}

/// Broadcast a frame to the connections subscribed to one ride.
pub fn broadcast_to_ride(registry: &ConnectionRegistry, ride_id: i64, frame: &OutboundFrame) -> usize {
    let Some(msg) = encode(frame) else {
        return 0;
    };
    fan_out(
        registry.senders_where(|entry| entry.rides.contains(&ride_id)),
        msg,
    )
}

/// Send a frame to a single connection.
pub fn send_to(registry: &ConnectionRegistry, id: ConnectionId, frame: &OutboundFrame) -> bool {
    let (Some(sender), Some(msg)) = (registry.sender(id), encode(frame)) else {
        return false;
    };
    sender.send(msg).is_ok()
}
