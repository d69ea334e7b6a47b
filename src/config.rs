//! Runtime configuration loaded from environment variables
//!
//! Every setting has a default, so the server runs with no environment at all.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::history::MAX_HISTORY;

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// Settings for the hub event loop
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of chat messages replayed to new sessions
    pub max_history: usize,
    /// Capacity of the hub's inbound event queue
    pub event_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_history: MAX_HISTORY,
            event_capacity: DEFAULT_HUB_CAPACITY,
        }
    }
}

/// Settings for each connected session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the per-session outbound queue
    pub outbound_capacity: usize,
    /// Close the session if nothing arrives for this long (None = never)
    pub idle_timeout: Option<Duration>,
    /// Interval between keepalive pings (None = no pings)
    pub ping_interval: Option<Duration>,
    /// Deadline for a single outbound frame
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            idle_timeout: Some(Duration::from_secs(60)),
            ping_interval: Some(Duration::from_secs(20)),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub static_dir: PathBuf,
    pub hub: HubConfig,
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: PathBuf::from("static"),
            hub: HubConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Read and parse an env var, falling back to `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Seconds from env; 0 disables the timer
fn env_secs(key: &str, default: Option<Duration>) -> Option<Duration> {
    match std::env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => default,
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_history: env_or("HALLWAY_MAX_HISTORY", defaults.max_history),
            event_capacity: env_or("HALLWAY_HUB_CAPACITY", defaults.event_capacity).max(1),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let write_timeout = env_secs("HALLWAY_WRITE_TIMEOUT_SECS", Some(defaults.write_timeout))
            .unwrap_or(defaults.write_timeout);

        Self {
            outbound_capacity: env_or("HALLWAY_OUTBOUND_CAPACITY", defaults.outbound_capacity)
                .max(1),
            idle_timeout: env_secs("HALLWAY_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            ping_interval: env_secs("HALLWAY_PING_INTERVAL_SECS", defaults.ping_interval),
            write_timeout,
        }
    }
}

impl ServerConfig {
    /// Load config from environment variables
    pub fn from_env() -> Self {
        let bind = std::env::var("HALLWAY_BIND")
            .ok()
            .and_then(|v| SocketAddr::from_str(v.trim()).ok())
            .unwrap_or_else(default_bind);

        let static_dir = std::env::var("HALLWAY_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static"));

        let config = Self {
            bind,
            static_dir,
            hub: HubConfig::from_env(),
            session: SessionConfig::from_env(),
        };

        tracing::info!(
            bind = %config.bind,
            static_dir = %config.static_dir.display(),
            max_history = config.hub.max_history,
            outbound_capacity = config.session.outbound_capacity,
            idle_timeout = ?config.session.idle_timeout,
            ping_interval = ?config.session.ping_interval,
            "Server config loaded"
        );

        if config.session.outbound_capacity <= config.hub.max_history {
            tracing::warn!(
                outbound_capacity = config.session.outbound_capacity,
                max_history = config.hub.max_history,
                "Outbound queue is not larger than history; replay may evict new sessions"
            );
        }

        config
    }
}
