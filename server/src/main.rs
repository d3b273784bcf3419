use std::net::SocketAddr;
use tokio::net::TcpListener;

use rideshare_server::config::{generate_config_template, Config};
use rideshare_server::{routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rideshare_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("Ride-share chat server v{} starting", env!("CARGO_PKG_VERSION"));

    let relay = config.relay();
    let auth = config.auth();
    let store = config.store();

    if relay.allow_anonymous_chat {
        tracing::warn!("Anonymous chat enabled: unauthenticated connections may post messages");
    }
    if !auth.require_token {
        tracing::warn!("Session tokens not required: auth frames may carry a bare userId");
    }
    tracing::info!(
        ride_scoped_broadcast = relay.ride_scoped_broadcast,
        error_frames = relay.error_frames,
        max_chat_messages = ?store.max_chat_messages,
        "Relay configured"
    );

    let app_state = state::AppState::new(&relay, &auth, &store);
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address(), config.port());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
