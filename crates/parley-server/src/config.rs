//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first of the default paths that exists)
//! - Environment variables (`PARLEY__PORT`, `PARLEY__LIMITS__MAX_ROOMS`, ...)

use anyhow::{bail, Context, Result};
use parley_core::room::validate_chat_id;
use parley_core::RouterConfig;
use parley_protocol::codec::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Files searched, in order, by [`Config::load`].
const CONFIG_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

const ENV_PREFIX: &str = "PARLEY";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Session tokens accepted on `connect`.
    #[serde(default)]
    pub identities: Vec<IdentityConfig>,

    /// Chats and their participants.
    #[serde(default)]
    pub chats: Vec<ChatConfig>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of open rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum rooms one session may join.
    #[serde(default = "default_max_rooms_per_session")]
    pub max_rooms_per_session: usize,

    /// Events buffered per room before slow sessions lose the oldest. Also
    /// sizes each session's outbound event queue.
    #[serde(default = "default_room_capacity")]
    pub room_capacity: usize,

    /// Maximum inbound frame body size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum outbound frame body size in bytes. History and search pages
    /// can be far larger than anything a client sends.
    #[serde(default = "default_max_reply_size")]
    pub max_reply_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Idle time after which a session is closed, in milliseconds. Also
    /// bounds how long the `connect` handshake may take.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A session token and the identity it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub token: String,
    pub actor_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A chat and its participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_rooms_per_session() -> usize {
    64
}

fn default_room_capacity() -> usize {
    256
}

fn default_max_frame_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_reply_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            identities: Vec::new(),
            chats: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            max_rooms_per_session: default_max_rooms_per_session(),
            room_capacity: default_room_capacity(),
            max_frame_size: default_max_frame_size(),
            max_reply_size: default_max_reply_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl LimitsConfig {
    /// Room router settings derived from these limits.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_rooms: self.max_rooms,
            max_rooms_per_session: self.max_rooms_per_session,
            room_capacity: self.room_capacity,
        }
    }
}

impl Config {
    /// Load configuration from the first default path that exists, layered
    /// with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result fails validation.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::load_from(path.as_deref())
    }

    /// Load configuration from `path` (if any) plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be read or parsed, or the
    /// result fails validation.
    pub fn load_from(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path, "Loading configuration file");
            builder = builder.add_source(::config::File::new(path, ::config::FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        if self.limits.max_frame_size == 0 || self.limits.max_frame_size > MAX_FRAME_SIZE {
            bail!(
                "limits.max_frame_size must be between 1 and {}",
                MAX_FRAME_SIZE
            );
        }
        if self.limits.max_reply_size < self.limits.max_frame_size
            || self.limits.max_reply_size > MAX_FRAME_SIZE
        {
            bail!(
                "limits.max_reply_size must be between limits.max_frame_size and {}",
                MAX_FRAME_SIZE
            );
        }
        if self.limits.room_capacity == 0 {
            bail!("limits.room_capacity must be at least 1");
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms < self.heartbeat.interval_ms
        {
            bail!("heartbeat.timeout_ms must be at least heartbeat.interval_ms");
        }

        let mut tokens = HashSet::new();
        for identity in &self.identities {
            if identity.token.is_empty() || identity.actor_id.trim().is_empty() {
                bail!("identities need a token and an actor_id");
            }
            if !tokens.insert(identity.token.as_str()) {
                bail!("duplicate identity token for actor {}", identity.actor_id);
            }
        }

        for chat in &self.chats {
            if let Err(reason) = validate_chat_id(&chat.id) {
                bail!("chat {:?}: {}", chat.id, reason);
            }
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.transport.websocket_path, "/ws");
        assert!(config.identities.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_rooms = 500

            [[identities]]
            token = "tok-alice"
            actor_id = "alice"
            display_name = "Alice"

            [[identities]]
            token = "tok-bob"
            actor_id = "bob"

            [[chats]]
            id = "general"
            participants = ["alice", "bob"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_rooms, 500);
        assert_eq!(config.limits.max_rooms_per_session, 64);
        assert_eq!(config.identities.len(), 2);
        assert_eq!(config.identities[0].display_name.as_deref(), Some("Alice"));
        assert!(config.identities[1].display_name.is_none());
        assert_eq!(config.chats[0].participants, ["alice", "bob"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("parley-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "port = 9100\n\n[[chats]]\nid = \"ops\"\nparticipants = [\"alice\"]\n",
        )
        .unwrap();

        let config = Config::load_from(path.to_str());
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.chats[0].id, "ops");
        assert_eq!(config.chats[0].participants, ["alice"]);
    }

    #[test]
    fn test_router_config_from_limits() {
        let limits = LimitsConfig {
            max_rooms: 3,
            max_rooms_per_session: 2,
            room_capacity: 16,
            max_frame_size: 1024,
            max_reply_size: 4096,
        };
        let router = limits.router_config();
        assert_eq!(router.max_rooms, 3);
        assert_eq!(router.max_rooms_per_session, 2);
        assert_eq!(router.room_capacity, 16);
    }

    #[test]
    fn test_validation_rejects_bad_config() {
        let duplicate_tokens: Config = toml::from_str(
            r#"
            [[identities]]
            token = "same"
            actor_id = "alice"

            [[identities]]
            token = "same"
            actor_id = "bob"
        "#,
        )
        .unwrap();
        assert!(duplicate_tokens.validate().is_err());

        let bad_chat: Config = toml::from_str(
            r#"
            [[chats]]
            id = ""
        "#,
        )
        .unwrap();
        assert!(bad_chat.validate().is_err());

        let mut oversized = Config::default();
        oversized.limits.max_frame_size = MAX_FRAME_SIZE + 1;
        assert!(oversized.validate().is_err());

        let mut bad_path = Config::default();
        bad_path.transport.websocket_path = "ws".into();
        assert!(bad_path.validate().is_err());

        let mut small_replies = Config::default();
        small_replies.limits.max_reply_size = small_replies.limits.max_frame_size - 1;
        assert!(small_replies.validate().is_err());

        let mut no_buffer = Config::default();
        no_buffer.limits.room_capacity = 0;
        assert!(no_buffer.validate().is_err());
    }
}
