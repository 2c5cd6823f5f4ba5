//! Optional TOML configuration file.
//!
//! Everything here can also be given as a command-line flag; flags win.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Ingress configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressConfig {
    /// Address the client-facing WebSocket endpoint listens on.
    #[serde(default)]
    pub listen_addr: Option<String>,
    /// Hop path as npub addresses, in order.
    #[serde(default)]
    pub path: Vec<String>,
    /// Relay URLs the wrapped envelopes are published to.
    #[serde(default)]
    pub server_relays: Vec<String>,
}

impl IngressConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
