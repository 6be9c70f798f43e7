//! Event hub configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use chainfabric_core::config::PeerConfig;

use crate::error::EventHubError;

/// Configuration for a single event hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHubConfig {
    /// Peer event service to connect to
    pub peer: PeerConfig,
    /// How long `connect` waits for the peer to acknowledge registration
    #[serde(default = "default_reg_timeout_ms")]
    pub reg_timeout_ms: u64,
}

fn default_reg_timeout_ms() -> u64 { 3_000 }

impl EventHubConfig {
    /// Config for `peer_url` with default timeouts.
    pub fn new(peer_url: impl Into<String>) -> Self {
        Self::for_peer(PeerConfig::new(peer_url))
    }

    pub fn for_peer(peer: PeerConfig) -> Self {
        Self {
            peer,
            reg_timeout_ms: default_reg_timeout_ms(),
        }
    }

    pub fn with_reg_timeout(mut self, timeout: Duration) -> Self {
        self.reg_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reg_timeout(&self) -> Duration {
        Duration::from_millis(self.reg_timeout_ms)
    }

    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, EventHubError> {
        serde_json::from_str(json).map_err(|e| EventHubError::Config {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EventHubError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EventHubError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| EventHubError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
