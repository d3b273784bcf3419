use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Campus ride-share realtime chat server
///
/// Flags left off the command line stay unset (or false) and are not
/// serialized, so they never mask values from the TOML file or environment.
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "rideshare-server", version, about = "Campus ride-share realtime chat server")]
pub struct Config {
    /// Port to listen on [default: 5000]
    #[arg(long, env = "RIDESHARE_PORT")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "RIDESHARE_BIND_ADDRESS")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./rideshare.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RIDESHARE_JSON_LOGS")]
    #[serde(default, skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(default, skip_serializing_if = "is_false")]
    pub generate_config: bool,

    /// Realtime relay behaviour (loaded from [relay] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    /// Session token settings (loaded from [auth] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Record store limits (loaded from [store] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,
}

/// Configuration for the chat relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Accept chat frames from connections that never authenticated and store
    /// them without a user id (default: false, such frames are rejected)
    #[serde(default)]
    pub allow_anonymous_chat: bool,

    /// Deliver chat only to connections subscribed to the message's ride
    /// instead of to every connection (default: false)
    #[serde(default)]
    pub ride_scoped_broadcast: bool,

    /// Send a non-fatal error frame back when an inbound frame is rejected
    /// (default: false, rejected frames are dropped silently)
    #[serde(default)]
    pub error_frames: bool,

    /// Maximum chat message length in characters (default: 4000)
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            allow_anonymous_chat: false,
            ride_scoped_broadcast: false,
            error_frames: false,
            max_message_length: 4000,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

fn default_max_message_length() -> usize {
    4000
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

/// Configuration for session-token authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Only accept session tokens in auth frames and require a bearer token
    /// on the history endpoint (default: false)
    #[serde(default)]
    pub require_token: bool,

    /// HS256 secret shared with the login service.
    /// A random one is generated at startup if empty.
    #[serde(default)]
    pub session_secret: String,
}

/// Configuration for the in-memory record store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of chat messages kept (default: unlimited)
    #[serde(default)]
    pub max_chat_messages: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_PORT),
            bind_address: Some(DEFAULT_BIND_ADDRESS.to_string()),
            config: "./rideshare.toml".to_string(),
            json_logs: false,
            generate_config: false,
            relay: None,
            auth: None,
            store: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RIDESHARE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Self::layered(Toml::file(&config_path), cli)
    }

    fn layered(toml: impl figment::Provider, cli: Config) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed("RIDESHARE_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn bind_address(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }

    pub fn relay(&self) -> RelayConfig {
        self.relay.clone().unwrap_or_default()
    }

    pub fn auth(&self) -> AuthConfig {
        self.auth.clone().unwrap_or_default()
    }

    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Ride-share Chat Server Configuration
# Place this file at ./rideshare.toml or specify with --config <path>
# All settings can be overridden via environment variables (RIDESHARE_PORT,
# RIDESHARE_RELAY__ALLOW_ANONYMOUS_CHAT, etc.) or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Realtime Relay ----
# [relay]

# Accept chat from connections that never sent an auth frame.
# Such messages are stored without a user id.
# allow_anonymous_chat = false

# Deliver chat only to connections that sent a subscribe frame for the ride.
# When off, every connection receives every chat message and clients filter.
# ride_scoped_broadcast = false

# Reply to rejected frames with {"type":"error",...} instead of dropping them
# error_frames = false

# max_message_length = 4000
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Session Tokens ----
# [auth]

# Refuse bare {"userId": n} auth frames; only signed session tokens bind a user
# require_token = false

# HS256 secret shared with the login service (random per process if empty)
# session_secret = ""

# ---- Record Store ----
# [store]

# Maximum number of chat messages kept in memory (unlimited if unset)
# max_chat_messages = 100000
"#
    .to_string()
}
