//! Slave registry and dispatch (spec.md §4.C): mapping `FullShardId → ordered
//! non-empty list of SlaveConnections`, built at initialization from the
//! configured slave list and each slave's advertised coverage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{MasterError, MasterResult};
use crate::slave::{SlaveConnection, SlaveState};
use crate::types::{Address, FullShardId};

/// Constructs a [`SlaveConnection`] for a descriptor; the injectable seam
/// replacing the Go source's `monkey.Patch(NewSlaveConn, ...)` (design note 1).
pub type SlaveConnFactory =
    Arc<dyn Fn(&str, &str, &[FullShardId]) -> Arc<SlaveConnection> + Send + Sync>;

pub struct Registry {
    /// Preferred-replica order within each shard's list is the order slaves
    /// appear in configuration.
    by_shard: RwLock<HashMap<FullShardId, Vec<Arc<SlaveConnection>>>>,
    all_connections: RwLock<Vec<Arc<SlaveConnection>>>,
    chain_ids: Vec<u32>,
    round_robin: RwLock<HashMap<FullShardId, usize>>,
}

impl Registry {
    pub fn empty(chain_ids: Vec<u32>) -> Self {
        Registry {
            by_shard: RwLock::new(HashMap::new()),
            all_connections: RwLock::new(Vec::new()),
            chain_ids,
            round_robin: RwLock::new(HashMap::new()),
        }
    }

    /// Bootstraps the registry per spec.md §4.C: connect, `Ping`, verify the
    /// union of advertised shards equals the configured genesis set, then
    /// insert one entry per (covered shard → connection) preserving
    /// configuration order.
    pub async fn bootstrap(
        cluster: &crate::config::ClusterConfig,
        factory: SlaveConnFactory,
    ) -> MasterResult<Self> {
        let chain_ids: Vec<u32> = cluster
            .quarkchain
            .genesis_shard_ids
            .iter()
            .map(|id| id >> 16)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        let registry = Registry::empty(chain_ids);
        let mut advertised = std::collections::BTreeSet::new();

        for slave_cfg in &cluster.slave_list {
            let endpoint = format!("{}:{}", slave_cfg.host, slave_cfg.port);
            let conn = factory(&slave_cfg.id, &endpoint, &slave_cfg.shard_mask_list);
            conn.set_state(SlaveState::Connecting);
            let (advertised_id, covered) = conn.ping().await.map_err(|e| {
                MasterError::ConfigMismatch(format!("slave {} failed to respond to Ping: {e}", slave_cfg.id))
            })?;
            if advertised_id != slave_cfg.id {
                return Err(MasterError::ConfigMismatch(format!(
                    "slave at {} advertised id {advertised_id}, configured id is {}",
                    endpoint, slave_cfg.id
                )));
            }
            conn.set_state(SlaveState::Ready);
            advertised.extend(covered.iter().copied());
            registry.insert_connection(conn);
        }

        let configured: std::collections::BTreeSet<_> =
            cluster.quarkchain.genesis_shard_ids.iter().copied().collect();
        if advertised != configured {
            return Err(MasterError::ConfigMismatch(format!(
                "advertised shard union {advertised:?} does not match configured genesis shards {configured:?}"
            )));
        }
        info!(slaves = cluster.slave_list.len(), shards = configured.len(), "registry bootstrapped");
        Ok(registry)
    }

    fn insert_connection(&self, conn: Arc<SlaveConnection>) {
        self.all_connections.write().push(conn.clone());
        let mut by_shard = self.by_shard.write();
        for shard in conn.covers.iter().copied() {
            by_shard.entry(shard).or_default().push(conn.clone());
        }
    }

    pub fn all_shards(&self) -> Vec<FullShardId> {
        self.by_shard.read().keys().copied().collect()
    }

    pub fn all_connections(&self) -> Vec<Arc<SlaveConnection>> {
        self.all_connections.read().clone()
    }

    /// First `Ready` connection covering `shard`; `None` if unconfigured or
    /// every covering connection has failed.
    pub fn one_of(&self, shard: FullShardId) -> Option<Arc<SlaveConnection>> {
        self.by_shard
            .read()
            .get(&shard)?
            .iter()
            .find(|c| c.state() == SlaveState::Ready)
            .cloned()
    }

    /// A `Ready` connection covering `shard`, round-robining across repeated
    /// calls to spread load (used by heartbeat and broadcast fan-out).
    pub fn round_robin_of(&self, shard: FullShardId) -> Option<Arc<SlaveConnection>> {
        let by_shard = self.by_shard.read();
        let candidates = by_shard.get(&shard)?;
        if candidates.is_empty() {
            return None;
        }
        let mut rr = self.round_robin.write();
        let idx = rr.entry(shard).or_insert(0);
        for offset in 0..candidates.len() {
            let i = (*idx + offset) % candidates.len();
            if candidates[i].state() == SlaveState::Ready {
                *idx = i + 1;
                return Some(candidates[i].clone());
            }
        }
        None
    }

    /// One connection per shard, spreading load via [`Self::round_robin_of`].
    pub fn all_of(&self) -> Vec<Arc<SlaveConnection>> {
        self.all_shards()
            .into_iter()
            .filter_map(|shard| self.round_robin_of(shard))
            .collect()
    }

    /// Resolves an address's shard via the configured chain layout, then
    /// dispatches through [`Self::one_of`].
    pub fn by_address(&self, addr: Address) -> MasterResult<Arc<SlaveConnection>> {
        let chain_id = addr.chain_id();
        if !self.chain_ids.is_empty() && !self.chain_ids.contains(&chain_id) {
            return Err(MasterError::UnknownChain { chain_id });
        }
        self.one_of(addr.full_shard_key).ok_or(MasterError::UnknownShard(addr.full_shard_key))
    }

    /// Retries a failed single-operation call once via the next connection
    /// covering `shard`; surfaces the error only if no covering connection
    /// succeeds (spec.md §4.C failure policy).
    pub fn retry_list(&self, shard: FullShardId, failed: &Arc<SlaveConnection>) -> Option<Arc<SlaveConnection>> {
        failed.set_state(SlaveState::Failed);
        warn!(shard, slave = %failed.slave_id, "marking connection failed, retrying via alternate replica");
        self.by_shard
            .read()
            .get(&shard)?
            .iter()
            .find(|c| c.slave_id != failed.slave_id && c.state() == SlaveState::Ready)
            .cloned()
    }
}
