//! Closed set of error kinds surfaced by the master coordinator.
//!
//! Only [`MasterError::Transport`] is retried automatically, and only once,
//! by the registry dispatch layer; every other variant is surfaced to the
//! caller with a stable kind tag and human-readable detail.

use crate::wire::Op;

pub type MasterResult<T> = Result<T, MasterError>;

#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// RPC channel failed and no covering connection could pick up the call.
    #[error("transport error talking to slave {slave_id} (shard {full_shard_id}): {detail}")]
    Transport { slave_id: String, full_shard_id: u32, detail: String },

    /// Deadline elapsed before a reply arrived; never retried at this layer.
    #[error("request {op:?} timed out after {elapsed_ms}ms")]
    Timeout { op: Op, elapsed_ms: u64 },

    /// Request addressed a shard the registry does not serve.
    #[error("shard {0} is not served by any configured slave")]
    UnknownShard(u32),

    /// `fromFullShardKey`'s chain id is outside the configured genesis chain set.
    #[error("chain id {chain_id} is not a configured chain")]
    UnknownChain { chain_id: u32 },

    /// Startup-time disagreement between configuration and what a slave (or
    /// signer key) actually advertises.
    #[error("config mismatch: {0}")]
    ConfigMismatch(String),

    /// `VerifySeal` rejected a submitted nonce/signature.
    #[error("consensus rejected submitted work: {0}")]
    ConsensusRejected(String),

    /// `AddRootBlock` arrived for a height already finalized on another fork.
    #[error("stale root block at height {height}")]
    Stale { height: u64 },

    /// Invariant violated; fatal, process should abort after logging.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// A frame failed to decode or the connection was severed mid-read.
    #[error("codec error: {0}")]
    Codec(#[from] std::io::Error),
}

impl MasterError {
    pub fn transport(slave_id: impl Into<String>, full_shard_id: u32, detail: impl Into<String>) -> Self {
        MasterError::Transport { slave_id: slave_id.into(), full_shard_id, detail: detail.into() }
    }
}
