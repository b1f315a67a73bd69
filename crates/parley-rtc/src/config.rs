use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_stats_interval_ms() -> u64 {
    2000
}

fn default_ice_restart_timeout_ms() -> u64 {
    10_000
}

fn default_quality_history() -> usize {
    30
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        username: String::new(),
        credential: String::new(),
    }]
}

/// A STUN/TURN server used for NAT traversal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential: String,
}

impl fmt::Debug for IceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let credential = if self.credential.is_empty() {
            ""
        } else {
            "[REDACTED]"
        };
        f.debug_struct("IceServer")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field("credential", &credential)
            .finish()
    }
}

/// Peer connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    /// ICE servers used when the caller does not supply its own.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    /// Transport statistics polling interval. Default: 2000ms.
    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
    /// How long an ICE restart may take before the connection is declared
    /// failed. Default: 10000ms.
    #[serde(default = "default_ice_restart_timeout_ms")]
    pub ice_restart_timeout_ms: u64,
    /// Number of quality samples retained for diagnostics. Default: 30.
    #[serde(default = "default_quality_history")]
    pub quality_history: usize,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            stats_interval_ms: default_stats_interval_ms(),
            ice_restart_timeout_ms: default_ice_restart_timeout_ms(),
            quality_history: default_quality_history(),
        }
    }
}

impl RtcConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms.max(1))
    }

    pub fn ice_restart_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_restart_timeout_ms)
    }
}
