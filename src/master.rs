//! Master façade (spec.md §4.H): the typed API consumed by the external
//! JSON-RPC layer. Each method locates the target branch, optionally
//! resolves `latest` via the shard-status cache, dispatches via the
//! registry, and translates the reply into a typed result.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument};

use crate::assembler::{CandidateRootBlock, RootBlockAssembler, RootChainTip};
use crate::consensus::ConsensusDriver;
use crate::error::{MasterError, MasterResult};
use crate::heartbeat::HeartbeatSupervisor;
use crate::registry::Registry;
use crate::shard_status::ShardStatusCache;
use crate::slave::{AccountData, LogEntry};
use crate::store::Store;
use crate::types::{Address, FullShardId, Hash256, ShardStatus, Signature65};

/// Mining state (`isMining`, current candidate); guarded by its own lock,
/// never held alongside the registry or shard-status locks (spec.md §5).
struct MiningState {
    is_mining: bool,
    current_candidate: Option<CandidateRootBlock>,
}

pub struct Master {
    pub registry: Arc<Registry>,
    pub shard_status: Arc<ShardStatusCache>,
    pub heartbeat: Arc<HeartbeatSupervisor>,
    assembler: RootBlockAssembler,
    consensus: ConsensusDriver,
    chain_db: Arc<dyn Store>,
    mining: RwLock<MiningState>,
    root_tip: RwLock<RootChainTip>,
}

impl Master {
    pub fn new(
        registry: Arc<Registry>,
        shard_status: Arc<ShardStatusCache>,
        heartbeat: Arc<HeartbeatSupervisor>,
        assembler: RootBlockAssembler,
        consensus: ConsensusDriver,
        chain_db: Arc<dyn Store>,
        genesis_tip: RootChainTip,
    ) -> Self {
        Master {
            registry,
            shard_status,
            heartbeat,
            assembler,
            consensus,
            chain_db,
            mining: RwLock::new(MiningState { is_mining: false, current_candidate: None }),
            root_tip: RwLock::new(genesis_tip),
        }
    }

    /// S1: probes every slave once, concurrently.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self) {
        self.heartbeat.tick().await;
    }

    pub fn get_one_slave_conn_by_id(&self, full_shard_id: FullShardId) -> Option<Arc<crate::slave::SlaveConnection>> {
        self.registry.one_of(full_shard_id)
    }

    /// S2/S3: runs the root-block assembly pipeline (spec.md §4.F).
    #[instrument(skip(self, coinbase_address))]
    pub async fn create_root_block_to_mine(&self, coinbase_address: Address, now: u64) -> MasterResult<CandidateRootBlock> {
        let tip = *self.root_tip.read();
        let db = self.chain_db.clone();
        let is_ancestor = move |hash: &Hash256| -> bool {
            // A header's prevRootBlockHash is an ancestor if it is in the
            // committed header chain; the store only knows committed
            // headers, so absence means "not yet an ancestor" and the
            // header is dropped for this attempt (spec.md §4.F step 2).
            db.get(&crate::store::header_key(hash)).is_some() || *hash == Hash256::ZERO
        };
        let candidate = self.assembler.assemble(coinbase_address, tip, now, &is_ancestor).await?;
        let mut mining = self.mining.write();
        mining.is_mining = true;
        mining.current_candidate = Some(candidate.clone());
        Ok(candidate)
    }

    /// `isMining` in the upstream `MasterInfo`/status surface: true once a
    /// candidate root block has been handed out for mining.
    pub fn is_mining(&self) -> bool {
        self.mining.read().is_mining
    }

    /// Accepts a registration/gossiped update (writer: heartbeat-adjacent
    /// gossip path, or a confirming `AddRootBlock` broadcast).
    pub fn update_shard_status(&self, status: ShardStatus) {
        self.shard_status.update(status);
    }

    /// `GetMinorBlockByHeight` routing check (spec.md §8 property 7):
    /// resolves `latest` via the cache, fails with `UnknownShard` otherwise.
    pub fn resolve_height_for_branch(&self, branch: crate::types::Branch, height: Option<u64>) -> MasterResult<u64> {
        match height {
            Some(h) => Ok(h),
            None => self.shard_status.resolve_latest_height(branch),
        }
    }

    async fn dispatch_with_retry<T, F, Fut>(&self, shard: FullShardId, op: F) -> MasterResult<T>
    where
        F: Fn(Arc<crate::slave::SlaveConnection>) -> Fut,
        Fut: std::future::Future<Output = MasterResult<T>>,
    {
        let conn = self.registry.one_of(shard).ok_or(MasterError::UnknownShard(shard))?;
        match op(conn.clone()).await {
            Ok(value) => Ok(value),
            Err(MasterError::Transport { .. }) => {
                let alternate = self.registry.retry_list(shard, &conn).ok_or(MasterError::UnknownShard(shard))?;
                op(alternate).await
            }
            Err(other) => Err(other),
        }
    }

    pub async fn get_account_data(&self, address: Address) -> MasterResult<Vec<(FullShardId, AccountData)>> {
        self.dispatch_with_retry(address.full_shard_key, move |conn| async move { conn.get_account_data(address).await }).await
    }

    /// Address → branch translation rejects with `UnknownChain` when
    /// `fromFullShardKey`'s chain id is outside the configured set.
    pub async fn add_transaction(&self, raw_tx: &[u8], from_full_shard_key: u32) -> MasterResult<()> {
        let conn = self.registry.by_address(Address { recipient: [0u8; 20], full_shard_key: from_full_shard_key })?;
        conn.add_transaction(raw_tx).await
    }

    pub async fn execute_transaction(&self, raw_tx: &[u8], from: Address, tx_full_shard_key: u32) -> MasterResult<Vec<u8>> {
        let conn = self.registry.by_address(Address { recipient: [0u8; 20], full_shard_key: tx_full_shard_key })?;
        conn.execute_transaction(raw_tx, from).await
    }

    pub async fn get_logs(&self, shard: FullShardId, from_height: u64, to_height: u64) -> MasterResult<Vec<LogEntry>> {
        self.dispatch_with_retry(shard, move |conn| async move { conn.get_logs(shard, from_height, to_height).await }).await
    }

    pub async fn get_minor_block(&self, shard: FullShardId, hash: Hash256) -> MasterResult<Option<Vec<u8>>> {
        self.dispatch_with_retry(shard, move |conn| async move { conn.get_minor_block(hash).await }).await
    }

    pub async fn get_transaction(&self, shard: FullShardId, hash: Hash256) -> MasterResult<Option<Vec<u8>>> {
        self.dispatch_with_retry(shard, move |conn| async move { conn.get_transaction(hash).await }).await
    }

    pub async fn get_transaction_receipt(&self, shard: FullShardId, hash: Hash256) -> MasterResult<Option<Vec<u8>>> {
        self.dispatch_with_retry(shard, move |conn| async move { conn.get_transaction_receipt(hash).await }).await
    }

    pub async fn get_transaction_list_by_address(&self, address: Address, start: u64, limit: u32) -> MasterResult<(Vec<Hash256>, u64)> {
        self.dispatch_with_retry(address.full_shard_key, move |conn| async move { conn.get_transaction_list_by_address(address, start, limit).await })
            .await
    }

    /// Requests a mining candidate from the slave owning `shard`, addressed
    /// to `coinbase`; the shard-mining counterpart to `create_root_block_to_mine`.
    pub async fn get_next_block_to_mine(&self, shard: FullShardId, coinbase: Address) -> MasterResult<Vec<u8>> {
        self.dispatch_with_retry(shard, move |conn| async move { conn.get_next_block_to_mine(coinbase).await }).await
    }

    pub async fn add_minor_block(&self, shard: FullShardId, raw_block: Vec<u8>) -> MasterResult<bool> {
        self.dispatch_with_retry(shard, move |conn| {
            let raw_block = raw_block.clone();
            async move { conn.add_minor_block(&raw_block).await }
        })
        .await
    }

    pub async fn estimate_gas(&self, raw_tx: &[u8], from: Address, tx_full_shard_key: u32) -> MasterResult<u32> {
        let conn = self.registry.by_address(Address { recipient: [0u8; 20], full_shard_key: tx_full_shard_key })?;
        conn.estimate_gas(raw_tx, from).await
    }

    pub async fn get_storage_at(&self, address: Address, key: Hash256) -> MasterResult<Hash256> {
        self.dispatch_with_retry(address.full_shard_key, move |conn| async move { conn.get_storage_at(address, key).await }).await
    }

    pub async fn get_code(&self, address: Address) -> MasterResult<Vec<u8>> {
        self.dispatch_with_retry(address.full_shard_key, move |conn| async move { conn.get_code(address).await }).await
    }

    pub async fn gas_price(&self, branch: crate::types::Branch) -> MasterResult<u64> {
        self.dispatch_with_retry(branch.full_shard_id(), move |conn| async move { conn.gas_price().await }).await
    }

    /// `Some(shard)` targets that shard's slave; `None` targets the root
    /// chain (handled locally by the consensus driver).
    pub async fn get_work(&self, shard: Option<FullShardId>) -> MasterResult<(Hash256, u64, u64)> {
        match shard {
            Some(shard_id) => self.dispatch_with_retry(shard_id, move |conn| async move { conn.get_work(Some(shard_id)).await }).await,
            None => {
                let candidate = self.mining.read().current_candidate.clone().ok_or(MasterError::Internal("no candidate root block to mine".into()))?;
                Ok((candidate.header.seal_hash, candidate.header.height, candidate.header.difficulty))
            }
        }
    }

    /// `Some(shard)` forwards to the owning slave; `None` is the root-chain
    /// submit path, which ingests the sealed block and broadcasts it
    /// (spec.md §4.G).
    pub async fn submit_work(
        &self,
        shard: Option<FullShardId>,
        seal_hash: Hash256,
        nonce: u64,
        mix_hash: Hash256,
        signature: Option<Signature65>,
    ) -> MasterResult<bool> {
        match shard {
            Some(shard_id) => {
                self.dispatch_with_retry(shard_id, move |conn| async move { conn.submit_work(Some(shard_id), seal_hash, nonce, mix_hash, signature).await }).await
            }
            None => {
                let candidate = self.mining.read().current_candidate.clone().ok_or(MasterError::Internal("no candidate root block to mine".into()))?;
                self.consensus.verify_submitted_root_work(seal_hash, nonce, candidate.header.difficulty, signature)?;
                self.ingest_and_broadcast(candidate).await?;
                Ok(true)
            }
        }
    }

    /// Ingests a sealed root block locally, persists it, then broadcasts
    /// `AddRootBlock` to every slave. A `Transport` error on any single
    /// slave is logged and does not roll back the local ingestion
    /// (design note resolution 1, matching the upstream source's leniency).
    async fn ingest_and_broadcast(&self, candidate: CandidateRootBlock) -> MasterResult<()> {
        self.chain_db.put(&crate::store::header_key(&candidate.header.seal_hash), b"sealed-root-header");
        *self.root_tip.write() = RootChainTip {
            hash: candidate.header.seal_hash,
            height: candidate.header.height,
            difficulty: candidate.header.difficulty,
        };
        info!(height = candidate.header.height, "root block ingested, broadcasting to slaves");
        for conn in self.registry.all_of() {
            if let Err(e) = conn.add_root_block(b"sealed-root-block").await {
                tracing::warn!(slave = %conn.slave_id, error = %e, "AddRootBlock broadcast failed, continuing");
            }
        }
        Ok(())
    }

    pub async fn add_root_block(&self, candidate: CandidateRootBlock) -> MasterResult<()> {
        self.ingest_and_broadcast(candidate).await
    }
}
