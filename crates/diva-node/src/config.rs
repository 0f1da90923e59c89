//! Node configuration.
//!
//! Options load from a TOML file, are overridden by `DIVA_*`
//! environment variables and finally by CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the node is reachable at.
    pub ip: String,

    /// UDP overlay port (also the registry endpoint port).
    pub port: u16,

    /// WebSocket block feed port.
    pub port_block_feed: u16,

    /// HTTP admin API port.
    pub http: u16,

    /// UDP bind port; defaults to `port`.
    pub udp: u16,

    /// Directory holding `<ident>.public` / `<ident>.private`.
    pub path_keys: PathBuf,

    /// Directory for node-local state (API token).
    pub path_state: PathBuf,

    /// Directory for the RocksDB block store.
    pub path_blockstore: PathBuf,

    /// Path to the genesis JSON document.
    pub path_genesis: PathBuf,

    /// Target registry cardinality.
    pub network_size: usize,

    /// Base overlay interval in milliseconds; deadlines and windows
    /// scale with the registry size.
    pub network_p2p_interval_ms: u64,

    /// Peer-table refresh / bootstrap retry interval in milliseconds.
    pub network_morph_interval_ms: u64,

    /// Whether to sync and self-register on startup.
    pub bootstrap: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".into(),
            port: 17_468,
            port_block_feed: 17_469,
            http: 17_470,
            udp: 17_468,
            path_keys: PathBuf::from("data/keys"),
            path_state: PathBuf::from("data/state"),
            path_blockstore: PathBuf::from("data/blockstore"),
            path_genesis: PathBuf::from("genesis/block.v1.json"),
            network_size: 7,
            network_p2p_interval_ms: 500,
            network_morph_interval_ms: 30_000,
            bootstrap: false,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overrides fields from `DIVA_*` environment variables.
    pub fn merge_env(&mut self) -> Result<()> {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if let Some(v) = var("DIVA_IP") {
            self.ip = v;
        }
        if let Some(v) = var("DIVA_PORT") {
            self.port = v.parse().context("DIVA_PORT")?;
        }
        if let Some(v) = var("DIVA_PORT_BLOCK_FEED") {
            self.port_block_feed = v.parse().context("DIVA_PORT_BLOCK_FEED")?;
        }
        if let Some(v) = var("DIVA_HTTP") {
            self.http = v.parse().context("DIVA_HTTP")?;
        }
        if let Some(v) = var("DIVA_UDP") {
            self.udp = v.parse().context("DIVA_UDP")?;
        }
        if let Some(v) = var("DIVA_PATH_KEYS") {
            self.path_keys = v.into();
        }
        if let Some(v) = var("DIVA_PATH_STATE") {
            self.path_state = v.into();
        }
        if let Some(v) = var("DIVA_PATH_BLOCKSTORE") {
            self.path_blockstore = v.into();
        }
        if let Some(v) = var("DIVA_PATH_GENESIS") {
            self.path_genesis = v.into();
        }
        if let Some(v) = var("DIVA_NETWORK_SIZE") {
            self.network_size = v.parse().context("DIVA_NETWORK_SIZE")?;
        }
        if let Some(v) = var("DIVA_NETWORK_P2P_INTERVAL_MS") {
            self.network_p2p_interval_ms = v.parse().context("DIVA_NETWORK_P2P_INTERVAL_MS")?;
        }
        if let Some(v) = var("DIVA_NETWORK_MORPH_INTERVAL_MS") {
            self.network_morph_interval_ms =
                v.parse().context("DIVA_NETWORK_MORPH_INTERVAL_MS")?;
        }
        if let Some(v) = var("DIVA_BOOTSTRAP") {
            self.bootstrap = matches!(v.as_str(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Rejects configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.ip.is_empty(), "ip must not be empty");
        anyhow::ensure!(self.network_size >= 1, "network_size must be at least 1");
        anyhow::ensure!(
            self.network_p2p_interval_ms >= 50,
            "network_p2p_interval_ms must be at least 50"
        );
        anyhow::ensure!(
            self.port != self.http && self.port != self.port_block_feed,
            "overlay, http and feed ports must differ"
        );
        Ok(())
    }

    /// The node's key file ident, derived from its endpoint.
    #[must_use]
    pub fn key_ident(&self) -> String {
        format!("{}_{}", self.ip.replace(['.', ':'], "-"), self.port)
    }

    /// The phase-deadline / window base, scaled by network size.
    #[must_use]
    pub fn scaled_interval_ms(&self) -> u64 {
        self.network_size as u64 * self.network_p2p_interval_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.port, config.port);
        assert_eq!(loaded.path_genesis, config.path_genesis);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "port = 20000\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.port, 20_000);
        assert_eq!(loaded.http, Config::default().http);
    }

    #[test]
    fn validate_rejects_port_collisions() {
        let config = Config {
            http: 17_468,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn key_ident_is_filesystem_safe() {
        let config = Config::default();
        let ident = config.key_ident();
        assert!(!ident.contains('.'));
        assert!(!ident.contains(':'));
    }
}
