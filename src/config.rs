//! Server configuration from the environment

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_STATE_FILE: &str = "./data/chain_state.jsonl";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// JSON or JSONL storage export used to hydrate the sandbox chain
    pub state_file: PathBuf,
}

impl ServerConfig {
    /// Read `DERIVE_BIND_ADDR` and `DERIVE_STATE_FILE`, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = lookup("DERIVE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse()
            .with_context(|| format!("Invalid DERIVE_BIND_ADDR: {}", bind_addr))?;

        let state_file = lookup("DERIVE_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));

        Ok(Self {
            bind_addr,
            state_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.state_file, PathBuf::from(DEFAULT_STATE_FILE));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(|key| match key {
            "DERIVE_BIND_ADDR" => Some("127.0.0.1:8080".into()),
            "DERIVE_STATE_FILE" => Some("/tmp/state.json".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.state_file, PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn test_invalid_bind_addr() {
        let result = ServerConfig::from_lookup(|key| {
            (key == "DERIVE_BIND_ADDR").then(|| "not-an-addr".to_string())
        });
        assert!(result.is_err());
    }
}
