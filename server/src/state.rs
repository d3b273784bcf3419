use std::sync::{Arc, Mutex};

use crate::auth::session::session_secret;
use crate::config::{AuthConfig, RelayConfig, StoreConfig};
use crate::store::{RecordStore, SharedStore};
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// In-memory tables for every entity kind
    pub store: SharedStore,
    /// Every open WebSocket connection
    pub connections: ConnectionRegistry,
    /// Relay behaviour (anonymous chat, ride scoping, error frames, limits)
    pub relay: Arc<RelayConfig>,
    /// HS256 secret for session tokens
    pub session_secret: Vec<u8>,
    /// Reject bare user ids and unauthenticated history requests
    pub require_token: bool,
    /// Serializes persist+broadcast so all clients see one chat order
    pub publish_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(relay: &RelayConfig, auth: &AuthConfig, store: &StoreConfig) -> Self {
        Self {
            store: RecordStore::with_chat_capacity(store.max_chat_messages).shared(),
            connections: ConnectionRegistry::new(),
            relay: Arc::new(relay.clone()),
            session_secret: session_secret(&auth.session_secret),
            require_token: auth.require_token,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }
}
