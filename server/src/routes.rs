use axum::{middleware, routing::get, Router};

use crate::auth::middleware::SessionSecret;
use crate::chat::messages;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the session secret into request extensions so the SessionUser
/// extractor can find it.
async fn inject_session_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(SessionSecret(state.session_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Realtime relay (auth via frame or optional ?token=)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Initial history load for a ride's chat view
    let chat_routes = Router::new().route(
        "/api/rides/{ride_id}/messages",
        get(messages::get_ride_messages),
    );

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(chat_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_session_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
