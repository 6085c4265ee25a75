//! Cluster configuration (spec.md §6.4), loaded the way `nearcore::config`
//! loads `config.json`: `serde_json` deserialization with a `from_file`
//! entry point. Process bootstrap/CLI stays out of scope; this module is a
//! library surface only.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::FullShardId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub shard_mask_list: Vec<FullShardId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsensusType {
    PoWSimulate,
    PoWDoubleSha256,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub remote_mine: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootGenesisConfig {
    pub difficulty: u64,
}

impl Default for RootGenesisConfig {
    fn default() -> Self {
        RootGenesisConfig { difficulty: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    pub consensus_type: ConsensusType,
    pub consensus_config: ConsensusConfig,
    pub genesis: RootGenesisConfig,
}

impl Default for RootConfig {
    fn default() -> Self {
        RootConfig {
            consensus_type: ConsensusType::PoWSimulate,
            consensus_config: ConsensusConfig::default(),
            genesis: RootGenesisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarkchainConfig {
    pub genesis_shard_ids: Vec<FullShardId>,
    pub chain_ids: Vec<u32>,
    pub root: RootConfig,
    pub guardian_public_key: Option<String>,
    pub root_signer_private_key: Option<String>,
}

impl QuarkchainConfig {
    pub fn guardian_public_key_bytes(&self) -> Option<Vec<u8>> {
        self.guardian_public_key.as_deref().map(|h| hex::decode(h).unwrap_or_default())
    }

    pub fn root_signer_private_key_bytes(&self) -> Option<Vec<u8>> {
        self.root_signer_private_key.as_deref().map(|h| hex::decode(h).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub slave_list: Vec<SlaveConfig>,
    pub quarkchain: QuarkchainConfig,
    pub heartbeat_period_ms: u64,
    pub rpc_deadline_ms: u64,
    pub max_minor_blocks_per_root: usize,
    pub heartbeat_miss_threshold: u32,
    pub reconnect_backoff_ceiling_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            slave_list: Vec::new(),
            quarkchain: QuarkchainConfig::default(),
            heartbeat_period_ms: 5_000,
            rpc_deadline_ms: 10_000,
            max_minor_blocks_per_root: 100,
            heartbeat_miss_threshold: 3,
            reconnect_backoff_ceiling_ms: 30_000,
        }
    }
}

impl ClusterConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_deadline_ms)
    }

    pub fn reconnect_backoff_ceiling(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ceiling_ms)
    }

    /// Load config from a JSON file, matching `nearcore::config::Config::from_file`.
    pub fn from_file(path: &Path) -> Result<Self, crate::error::MasterError> {
        let json_str = std::fs::read_to_string(path).map_err(|e| {
            crate::error::MasterError::ConfigMismatch(format!(
                "failed to read config from {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&json_str).map_err(|e| {
            crate::error::MasterError::ConfigMismatch(format!(
                "failed to deserialize config from {}: {e}",
                path.display()
            ))
        })
    }
}
