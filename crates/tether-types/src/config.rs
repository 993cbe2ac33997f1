//! Configuration for relay clients, multiplexers and the reference relay.
//!
//! All structs deserialize from TOML with `#[serde(default)]`, so a config file
//! only needs to name the fields it overrides. Durations are milliseconds.

use crate::error::{TetherError, TetherResult};
use crate::identity::DEFAULT_LEDGER_ID;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded reconnection policy applied when a live link breaks.
///
/// The default makes exactly one immediate reconnection attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum number of connect attempts per reconnection cycle (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each following attempt.
    pub min_delay_ms: u64,
    /// Upper bound for the delay between attempts.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = none, 1.0 = up to +100%).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            min_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: 0.0,
        }
    }
}

/// Configuration for a single relay client connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the relay node.
    pub relay_addr: String,
    /// Hex-encoded public key of the relay; signed during registration.
    pub relay_public_key: String,
    /// How long to wait for the TCP connection to open.
    pub connect_timeout_ms: u64,
    /// How long to wait for the relay's reply to the registration record.
    pub handshake_timeout_ms: u64,
    /// Policy for reconnection cycles triggered by I/O failures.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:11000".to_string(),
            relay_public_key: String::new(),
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for the two fields every client must set.
    pub fn new(relay_addr: impl Into<String>, relay_public_key: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            relay_public_key: relay_public_key.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Configuration for a multiplexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Capacity of the outbound queue; `put` blocks when it is full.
    pub outbound_capacity: usize,
    /// Send a keep-alive on every connected link after this much outbound idleness.
    /// `None` disables keep-alives.
    pub keepalive_interval_ms: Option<u64>,
    /// Keep running when only some connections could be established.
    pub allow_partial_start: bool,
    /// Pause before a receive worker polls a link that is not connected again.
    pub idle_poll_ms: u64,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 1024,
            keepalive_interval_ms: None,
            allow_partial_start: false,
            idle_poll_ms: 100,
        }
    }
}

impl MultiplexerConfig {
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

/// Configuration for the reference relay node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind the listener on.
    pub listen_addr: SocketAddr,
    /// This relay's unique node ID.
    pub node_id: String,
    /// Human-readable relay name.
    pub node_name: String,
    /// Pre-shared key for HMAC-SHA256 authentication of relay peers.
    pub shared_secret: String,
    /// Identity schemes accepted from registering clients.
    pub supported_ledgers: Vec<String>,
    /// Relays to peer with at startup.
    pub entry_peers: Vec<SocketAddr>,
    /// Hex-encoded Ed25519 secret key. A random key is generated when unset.
    pub private_key_hex: Option<String>,
    /// Per-session outbound queue capacity.
    pub session_queue_capacity: usize,
    /// Redial policy for entry peers whose link is down. When a cycle is
    /// exhausted the relay waits `max_delay_ms` and starts another.
    pub peer_reconnect: ReconnectPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            node_id: uuid::Uuid::new_v4().to_string(),
            node_name: "tether-relay".to_string(),
            shared_secret: String::new(),
            supported_ledgers: vec![DEFAULT_LEDGER_ID.to_string()],
            entry_peers: Vec::new(),
            private_key_hex: None,
            session_queue_capacity: 1024,
            peer_reconnect: ReconnectPolicy {
                max_attempts: 5,
                min_delay_ms: 500,
                max_delay_ms: 10_000,
                jitter: 0.2,
            },
        }
    }
}

impl RelayConfig {
    /// Parse a relay configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> TetherResult<Self> {
        toml::from_str(contents).map_err(|e| TetherError::Config(e.to_string()))
    }
}

/// Load relay configuration from a TOML file, falling back to defaults.
///
/// A missing or unparsable file is logged and replaced by
/// [`RelayConfig::default`].
pub fn load_relay_config(path: &Path) -> RelayConfig {
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return RelayConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match RelayConfig::from_toml_str(&contents) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to parse config, using defaults"
                );
                RelayConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %path.display(),
                "Failed to read config file, using defaults"
            );
            RelayConfig::default()
        }
    }
}
