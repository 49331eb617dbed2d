use serde::Deserialize;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};
use thiserror::Error;

// Chain difficulty descriptor handed to external miners alongside the block
// template. The core does not verify proof-of-work.
pub type Difficulty = u64;
pub const STATIC_DIFFICULTY: Difficulty = 0x28_0000;

// P2p timers and limits
pub const P2P_PING_INTERVAL_SECS: u64 = 10;
pub const PEER_TIMEOUT_SECS: u64 = 60;
pub const PEER_PACKET_CHANNEL_SIZE: usize = 128;
pub const SEEN_ENDPOINTS_CACHE_SIZE: usize = 512;

pub const DEFAULT_MAX_PEERS: usize = 32;
pub const DEFAULT_TARGET_PEERS: usize = 8;

// Capacity of the block / transaction event channels
pub const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    // destroy any existing store before opening
    #[serde(default)]
    pub clean: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct KeysConfig {
    pub public_path: PathBuf,
    pub private_path: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NetConfig {
    pub listen_address: SocketAddr,
    pub public_port: u16,
    #[serde(default)]
    pub bootstrap_peers: Vec<SocketAddr>,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    #[serde(default = "default_target_peers")]
    pub target_peers: usize,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct MinerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub threads: usize,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub keys: KeysConfig,
    pub net: NetConfig,
    #[serde(default)]
    pub miner: MinerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn default_max_peers() -> usize {
    DEFAULT_MAX_PEERS
}

fn default_target_peers() -> usize {
    DEFAULT_TARGET_PEERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let raw = r#"{
            "database": { "path": "chain-db" },
            "keys": { "public_path": "node.pub", "private_path": "node.key" },
            "net": { "listen_address": "0.0.0.0:2255", "public_port": 2255 }
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert!(!config.database.clean);
        assert_eq!(config.net.max_peers, DEFAULT_MAX_PEERS);
        assert!(config.net.bootstrap_peers.is_empty());
        assert!(!config.miner.enabled);
    }
}
