//! Client construction options.
//!
//! Everything the constructor accepts: where the store lives, the
//! initial bucket types, key namespacing, and the tunables for command
//! dispatch and liveness probing. Duration fields deserialize from
//! humantime strings (`"125ms"`, `"30s"`, `"7d"`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::registry::TypeDef;

/// TTL applied to state entries of buckets that never refill (7 days).
pub const DEFAULT_GLOBAL_TTL_S: u64 = 7 * 24 * 60 * 60;

/// Lifetime of the elevated-mode activation entry when unspecified.
pub const DEFAULT_ERL_ACTIVATION_PERIOD_S: u64 = 900;

/// Default per-command dispatch timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(125);

fn default_global_ttl() -> Duration {
    Duration::from_secs(DEFAULT_GLOBAL_TTL_S)
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

/// Client options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Full connection URI (`redis://...` / `rediss://...`). Takes
    /// precedence over `nodes`.
    pub uri: Option<String>,
    /// Host:port addresses; the first reachable entry is used.
    pub nodes: Vec<String>,
    /// Initial bucket types, compiled at construction.
    pub buckets: IndexMap<String, TypeDef>,
    /// Optional namespace prepended to every key this client touches.
    pub prefix: String,
    pub password: Option<String>,
    /// Connect with TLS when building the URI from `nodes`.
    pub tls: bool,
    /// TTL for state entries of non-refilling buckets.
    #[serde(with = "humantime_serde")]
    pub global_ttl: Duration,
    /// Upper bound on a single store round trip.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Liveness probing; `None` disables the monitor task.
    pub ping: Option<PingConfig>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            uri: None,
            nodes: Vec::new(),
            buckets: IndexMap::new(),
            prefix: String::new(),
            password: None,
            tls: false,
            global_ttl: default_global_ttl(),
            command_timeout: default_command_timeout(),
            ping: None,
        }
    }
}

impl Options {
    pub fn global_ttl_s(&self) -> u64 {
        self.global_ttl.as_secs().max(1)
    }

    /// Resolve the connection URI from `uri` or `nodes`/`password`/`tls`.
    pub fn connection_uri(&self) -> String {
        if let Some(uri) = &self.uri {
            return uri.clone();
        }
        let scheme = if self.tls { "rediss" } else { "redis" };
        let node = self
            .nodes
            .first()
            .map(String::as_str)
            .unwrap_or("127.0.0.1:6379");
        match &self.password {
            Some(password) => format!("{}://:{}@{}", scheme, password, node),
            None => format!("{}://{}", scheme, node),
        }
    }
}

/// Liveness-probe configuration for the background monitor task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Consecutive failures before a reconnect is signalled.
    pub max_failed_attempts: u32,
    /// When false, reconnects are only signalled as dry runs.
    pub reconnect_if_failed: bool,
    /// Further failures required before signalling another reconnect.
    pub max_failed_attempts_to_retry_reconnect: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_failed_attempts: 5,
            reconnect_if_failed: true,
            max_failed_attempts_to_retry_reconnect: 10,
        }
    }
}
