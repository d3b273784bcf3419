pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sender half of a connection's outbound queue.
/// The connection's writer task drains the other half into the socket.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Opaque handle for one realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry entry: outbound queue, bound user, subscribed rides.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub sender: ConnectionSender,
    pub user_id: Option<i64>,
    pub rides: HashSet<i64>,
}

/// Connection registry: every open WebSocket, authenticated or not.
/// Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, ConnectionEntry>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new connection. It starts out unauthenticated.
    pub fn register(&self, sender: ConnectionSender) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                user_id: None,
                rides: HashSet::new(),
            },
        );
        tracing::debug!(
            connection_id = %id,
            connections = self.connections.len(),
            "Connection registered"
        );
        id
    }

    /// Attach a user id to a connection. Last write wins.
    /// Returns false if the connection is no longer registered.
    pub fn bind(&self, id: ConnectionId, user_id: i64) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.user_id = Some(user_id);
                true
            }
            None => false,
        }
    }

    pub fn user_id(&self, id: ConnectionId) -> Option<i64> {
        self.connections.get(&id).and_then(|entry| entry.user_id)
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            tracing::debug!(
                connection_id = %id,
                connections = self.connections.len(),
                "Connection unregistered"
            );
        }
    }

    pub fn subscribe(&self, id: ConnectionId, ride_id: i64) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.rides.insert(ride_id);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, id: ConnectionId, ride_id: i64) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut entry) => {
                entry.rides.remove(&ride_id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of the senders matching `filter`, taken without holding any
    /// map shard lock during the actual sends.
    pub(crate) fn senders_where(
        &self,
        filter: impl Fn(&ConnectionEntry) -> bool,
    ) -> Vec<(ConnectionId, ConnectionSender)> {
        self.connections
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| (*entry.key(), entry.value().sender.clone()))
            .collect()
    }

    pub(crate) fn sender(&self, id: ConnectionId) -> Option<ConnectionSender> {
        self.connections.get(&id).map(|entry| entry.sender.clone())
    }
}
