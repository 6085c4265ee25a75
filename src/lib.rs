//! Master coordinator core (spec.md): the slave registry and dispatch
//! layer, root-block assembly pipeline, and shard-status cache for a
//! sharded blockchain cluster.

pub mod assembler;
pub mod config;
pub mod consensus;
pub mod error;
pub mod heartbeat;
pub mod master;
pub mod registry;
pub mod shard_status;
pub mod signing;
pub mod slave;
pub mod store;
pub mod transport;
pub mod types;
pub mod wire;

use std::sync::Arc;

use crate::assembler::RootBlockAssembler;
use crate::config::ClusterConfig;
use crate::consensus::{ConsensusDriver, Engine, PoWDoubleSha256Engine, PoWSimulateEngine};
use crate::error::MasterResult;
use crate::heartbeat::HeartbeatSupervisor;
use crate::master::Master;
use crate::registry::{Registry, SlaveConnFactory};
use crate::shard_status::ShardStatusCache;
use crate::signing::Signer;
use crate::store::StoreFactory;

/// Builds a [`Master`] from configuration, bootstrapping the registry and
/// wiring every component per spec.md §2's data flow. `slave_factory` and
/// `store_factory` are the two dependency-injection seams design note 1
/// calls for (replacing the upstream `NewSlaveConn`/`createDB` monkey-patch
/// points with explicit, test-substitutable closures).
pub async fn build_master(
    cluster: &ClusterConfig,
    slave_factory: SlaveConnFactory,
    store_factory: StoreFactory,
) -> MasterResult<Master> {
    let registry = Arc::new(Registry::bootstrap(cluster, slave_factory).await?);
    let shard_status = Arc::new(ShardStatusCache::new());
    let heartbeat = Arc::new(HeartbeatSupervisor::new(
        registry.clone(),
        cluster.heartbeat_period(),
        cluster.heartbeat_miss_threshold,
    ));

    let signer = cluster
        .quarkchain
        .root_signer_private_key_bytes()
        .map(|bytes| Signer::from_bytes(&bytes))
        .transpose()
        .map_err(crate::error::MasterError::ConfigMismatch)?;
    let guardian_public_key: Option<[u8; 33]> = cluster
        .quarkchain
        .guardian_public_key_bytes()
        .map(|bytes| {
            let mut key = [0u8; 33];
            if bytes.len() == 33 {
                key.copy_from_slice(&bytes);
            }
            key
        });

    let assembler = RootBlockAssembler::new(
        registry.clone(),
        cluster.max_minor_blocks_per_root,
        cluster.rpc_deadline(),
        signer,
        guardian_public_key,
    )?;

    let engine: Arc<dyn Engine> = match cluster.quarkchain.root.consensus_type {
        config::ConsensusType::PoWSimulate => Arc::new(PoWSimulateEngine),
        config::ConsensusType::PoWDoubleSha256 => Arc::new(PoWDoubleSha256Engine),
    };
    let consensus_signer = cluster
        .quarkchain
        .root_signer_private_key_bytes()
        .map(|bytes| Signer::from_bytes(&bytes))
        .transpose()
        .map_err(crate::error::MasterError::ConfigMismatch)?;
    let consensus = ConsensusDriver::new(engine, guardian_public_key, consensus_signer)?;

    let chain_db = store_factory();
    let genesis_tip = assembler::RootChainTip {
        hash: types::Hash256::ZERO,
        height: 0,
        difficulty: cluster.quarkchain.root.genesis.difficulty,
    };

    Ok(Master::new(registry, shard_status, heartbeat, assembler, consensus, chain_db, genesis_tip))
}
