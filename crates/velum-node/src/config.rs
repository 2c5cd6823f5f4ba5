//! Optional TOML configuration file.
//!
//! Everything here can also be given as a command-line flag; flags win.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Mix node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hex-encoded 32-byte private key. Generated at startup when absent.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Relay URLs used for both subscribing and publishing.
    #[serde(default)]
    pub relays: Vec<String>,
}

impl NodeConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: NodeConfig = toml::from_str(
            r#"
            private_key = "aa"
            relays = ["wss://relay.example.com", "wss://other.example.com"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.private_key.as_deref(), Some("aa"));
        assert_eq!(config.relays.len(), 2);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: NodeConfig = toml::from_str("").expect("parse");
        assert!(config.private_key.is_none());
        assert!(config.relays.is_empty());
    }
}
