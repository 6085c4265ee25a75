//! Core data model (spec.md §3): the types shared by every component.

use std::cmp::Ordering;

/// 32-bit identifier encoding `(chainId ‖ shardId-within-chain)`.
pub type FullShardId = u32;

/// The on-wire label for "which shard"; equal to a [`FullShardId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Branch(pub FullShardId);

impl Branch {
    pub fn full_shard_id(&self) -> FullShardId {
        self.0
    }

    /// The chain id is encoded in the upper 16 bits of a full-shard-id.
    pub fn chain_id(&self) -> u32 {
        self.0 >> 16
    }
}

/// 32-byte hash, used for block hashes, seal hashes, and transaction hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// 24-byte address: 20-byte recipient + 4-byte full-shard-key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub recipient: [u8; 20],
    pub full_shard_key: u32,
}

impl Address {
    pub fn chain_id(&self) -> u32 {
        self.full_shard_key >> 16
    }
}

/// 65-byte `r ‖ s ‖ v` secp256k1 signature, all-zero when unsigned.
pub type Signature65 = [u8; 65];
pub const ZERO_SIGNATURE: Signature65 = [0u8; 65];

/// A minor (shard) block header, the unit the assembler orders and commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinorBlockHeader {
    pub branch: Branch,
    pub height: u64,
    pub hash: Hash256,
    pub prev_root_block_hash: Hash256,
    pub create_time: u64,
    pub difficulty: u64,
    pub coinbase_amount: u128,
}

/// Deterministic cross-shard ordering (spec.md §4.F step 4):
/// `(createTime asc, fullShardId asc, height asc)`, ties broken by hash.
impl Ord for MinorBlockHeader {
    fn cmp(&self, other: &Self) -> Ordering {
        self.create_time
            .cmp(&other.create_time)
            .then_with(|| self.branch.full_shard_id().cmp(&other.branch.full_shard_id()))
            .then_with(|| self.height.cmp(&other.height))
            .then_with(|| self.hash.0.cmp(&other.hash.0))
    }
}

impl PartialOrd for MinorBlockHeader {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `{ id, endpoint, covers }`. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SlaveDescriptor {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub covers: Vec<FullShardId>,
}

impl SlaveDescriptor {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn covers_shard(&self, full_shard_id: FullShardId) -> bool {
        self.covers.contains(&full_shard_id)
    }
}

/// Latest known tip of a shard (spec.md §3 `ShardStatus`). Mutable;
/// overwritten on every gossiped update whose height is strictly greater,
/// or equal with greater total difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardStatus {
    pub branch: Branch,
    pub height: u64,
    pub hash: Hash256,
    pub total_difficulty: u128,
    pub timestamp: u64,
}

impl ShardStatus {
    /// Whether `new` should replace `self` per the monotone-update invariant.
    pub fn should_replace_with(&self, new: &ShardStatus) -> bool {
        new.height > self.height || (new.height == self.height && new.total_difficulty > self.total_difficulty)
    }
}
