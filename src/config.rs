//! Node Configuration
//!
//! Per-node JSON configuration: identity, bind address, the seed peer list,
//! quorum parameters and gossip timings. Validation is fatal at startup;
//! a node must never run with an unsafe quorum.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A peer known at startup. Gossip learns about everyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    pub replication_factor: usize,
    pub read_quorum: usize,
    pub write_quorum: usize,
    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,
    #[serde(default = "default_failure_check_interval_ms")]
    pub failure_check_interval_ms: u64,
    #[serde(default = "default_gossip_timeout_ms")]
    pub gossip_timeout_ms: u64,
}

fn default_gossip_interval_ms() -> u64 {
    500
}

fn default_failure_check_interval_ms() -> u64 {
    1000
}

fn default_gossip_timeout_ms() -> u64 {
    1000
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("config read error: {}", path.display()))?;
        let config: Config = serde_json::from_str(&data).context("config parse error")?;
        config.validate().context("config validation failed")?;
        Ok(config)
    }

    /// Enforces R, W, N > 0 and R + W > N, plus a sane gossip cadence.
    pub fn validate(&self) -> Result<()> {
        if self.read_quorum == 0 || self.write_quorum == 0 || self.replication_factor == 0 {
            bail!("quorums must be positive integers");
        }

        if self.read_quorum + self.write_quorum <= self.replication_factor {
            bail!(
                "unsafe quorum: R({}) + W({}) <= N({})",
                self.read_quorum,
                self.write_quorum,
                self.replication_factor
            );
        }

        if self.gossip_interval_ms < 100 {
            bail!("gossip interval too short: {}ms", self.gossip_interval_ms);
        }

        Ok(())
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn failure_check_interval(&self) -> Duration {
        Duration::from_millis(self.failure_check_interval_ms)
    }

    pub fn gossip_timeout(&self) -> Duration {
        Duration::from_millis(self.gossip_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            node_id: "nodeA".to_string(),
            host: "localhost".to_string(),
            port: 8000,
            peers: vec![],
            replication_factor: 3,
            read_quorum: 2,
            write_quorum: 2,
            gossip_interval_ms: 500,
            failure_check_interval_ms: 1000,
            gossip_timeout_ms: 1000,
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_quorum_rejected() {
        let mut config = base_config();
        config.read_quorum = 0;
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.write_quorum = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsafe_quorum_rejected() {
        // R + W <= N admits stale quorum reads
        let mut config = base_config();
        config.read_quorum = 1;
        config.write_quorum = 1;
        config.replication_factor = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_too_fast_gossip_rejected() {
        let mut config = base_config();
        config.gossip_interval_ms = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parses_full_json() {
        let json = r#"{
            "node_id": "nodeA",
            "host": "localhost",
            "port": 8000,
            "peers": [
                {"node_id": "nodeB", "host": "localhost", "port": 8001}
            ],
            "replication_factor": 3,
            "read_quorum": 2,
            "write_quorum": 2,
            "gossip_interval_ms": 500,
            "failure_check_interval_ms": 1000,
            "gossip_timeout_ms": 1000
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.node_id, "nodeA");
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].port, 8001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timing_defaults_applied() {
        let json = r#"{
            "node_id": "nodeA",
            "host": "localhost",
            "port": 8000,
            "replication_factor": 1,
            "read_quorum": 1,
            "write_quorum": 1
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.gossip_interval(), Duration::from_millis(500));
        assert_eq!(config.failure_check_interval(), Duration::from_millis(1000));
    }
}
