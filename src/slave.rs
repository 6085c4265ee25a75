//! SlaveConnection (spec.md §4.B): wraps transport A, knows a slave's id and
//! covered shards, exposes typed per-shard operations — each a 1:1 mapping
//! to a unique `op` code.

use bytes::{Buf, Bytes, BytesMut};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{MasterError, MasterResult};
use crate::transport::RpcChannel;
use crate::types::{Address, FullShardId, Hash256, MinorBlockHeader, Signature65};
use crate::wire::{get_bytes, put_bytes, Op, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Connecting,
    Ready,
    Failed,
}

impl From<u8> for SlaveState {
    fn from(v: u8) -> Self {
        match v {
            0 => SlaveState::Connecting,
            1 => SlaveState::Ready,
            _ => SlaveState::Failed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountData {
    pub balance: u128,
    pub nonce: u64,
    pub code_hash: Hash256,
}

#[derive(Debug, Clone, Default)]
pub struct LogEntry {
    pub data: Vec<u8>,
}

/// Runtime pairing of a [`crate::types::SlaveDescriptor`] with a live RPC
/// channel; owns its connection state per spec.md §3.
pub struct SlaveConnection {
    pub slave_id: String,
    pub endpoint: String,
    pub covers: Vec<FullShardId>,
    channel: Arc<dyn RpcChannel>,
    state: AtomicU8,
    deadline: Duration,
}

impl SlaveConnection {
    pub fn new(slave_id: String, endpoint: String, covers: Vec<FullShardId>, channel: Arc<dyn RpcChannel>, deadline: Duration) -> Self {
        SlaveConnection { slave_id, endpoint, covers, channel, state: AtomicU8::new(0), deadline }
    }

    pub fn state(&self) -> SlaveState {
        SlaveState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SlaveState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn covers_shard(&self, full_shard_id: FullShardId) -> bool {
        self.covers.contains(&full_shard_id)
    }

    async fn call(&self, op: Op, payload: Bytes) -> MasterResult<Bytes> {
        let (status, body) = self
            .channel
            .call(op as u32, payload, self.deadline)
            .await
            .map_err(|e| match e {
                MasterError::Transport { detail, .. } => {
                    self.set_state(SlaveState::Failed);
                    MasterError::transport(&self.slave_id, self.covers.first().copied().unwrap_or(0), detail)
                }
                other => other,
            })?;
        match status {
            Status::Ok => Ok(body),
            Status::UnknownOp => Err(MasterError::Internal(format!("slave {} answered UnknownOp for {op:?}", self.slave_id))),
            Status::Error => Err(MasterError::Internal(format!("slave {} returned an application error for {op:?}", self.slave_id))),
        }
    }

    /// Sent once at registration; identity mismatch is the caller's concern
    /// (spec.md §4.C step 2 checks the union of advertised shards).
    pub async fn ping(&self) -> MasterResult<(String, Vec<FullShardId>)> {
        let body = self.call(Op::Ping, Bytes::new()).await?;
        let mut buf = body;
        let id_bytes = get_bytes(&mut buf)?;
        let count = buf.get_u32() as usize;
        let mut shards = Vec::with_capacity(count);
        for _ in 0..count {
            shards.push(buf.get_u32());
        }
        Ok((String::from_utf8_lossy(&id_bytes).into_owned(), shards))
    }

    pub async fn heartbeat(&self) -> MasterResult<()> {
        self.call(Op::Heartbeat, Bytes::new()).await?;
        Ok(())
    }

    pub async fn connect_to_slaves(&self, peers: &[(String, String)]) -> MasterResult<Vec<bool>> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(peers.len() as u32).to_be_bytes());
        for (id, endpoint) in peers {
            put_bytes(&mut buf, id.as_bytes());
            put_bytes(&mut buf, endpoint.as_bytes());
        }
        let body = self.call(Op::ConnectToSlaves, buf.freeze()).await?;
        let mut buf = body;
        let count = buf.get_u32() as usize;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            results.push(buf.get_u8() != 0);
        }
        Ok(results)
    }

    /// Sorted by height ascending; one entry per shard this slave covers.
    pub async fn get_unconfirmed_header_list(&self) -> MasterResult<Vec<(FullShardId, Vec<MinorBlockHeader>)>> {
        let body = self.call(Op::GetUnconfirmedHeaderList, Bytes::new()).await?;
        let mut buf = body;
        let shard_count = buf.get_u32() as usize;
        let mut out = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let shard = buf.get_u32();
            let header_count = buf.get_u32() as usize;
            let mut headers = Vec::with_capacity(header_count);
            for _ in 0..header_count {
                headers.push(decode_minor_header(&mut buf, shard)?);
            }
            out.push((shard, headers));
        }
        Ok(out)
    }

    /// Requests a mining candidate for this slave's shard, coinbase-addressed
    /// to `coinbase`; the returned bytes are an opaque mining payload.
    pub async fn get_next_block_to_mine(&self, coinbase: Address) -> MasterResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        encode_address(&mut buf, &coinbase);
        let body = self.call(Op::GetNextBlockToMine, buf.freeze()).await?;
        let mut buf = body;
        Ok(get_bytes(&mut buf)?.to_vec())
    }

    /// Submits a mined minor block; returns whether the slave accepted it.
    pub async fn add_minor_block(&self, raw_block: &[u8]) -> MasterResult<bool> {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, raw_block);
        let mut body = self.call(Op::AddMinorBlock, buf.freeze()).await?;
        Ok(body.get_u8() != 0)
    }

    pub async fn get_account_data(&self, address: Address) -> MasterResult<Vec<(FullShardId, AccountData)>> {
        let mut buf = BytesMut::new();
        encode_address(&mut buf, &address);
        let body = self.call(Op::GetAccountData, buf.freeze()).await?;
        let mut buf = body;
        let count = buf.get_u32() as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let shard = buf.get_u32();
            let balance = buf.get_u128();
            let nonce = buf.get_u64();
            let mut hash = [0u8; 32];
            buf.copy_to_slice(&mut hash);
            out.push((shard, AccountData { balance, nonce, code_hash: Hash256(hash) }));
        }
        Ok(out)
    }

    pub async fn add_transaction(&self, raw_tx: &[u8]) -> MasterResult<()> {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, raw_tx);
        self.call(Op::AddTransaction, buf.freeze()).await?;
        Ok(())
    }

    pub async fn execute_transaction(&self, raw_tx: &[u8], from: Address) -> MasterResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, raw_tx);
        encode_address(&mut buf, &from);
        let body = self.call(Op::ExecuteTransaction, buf.freeze()).await?;
        let mut buf = body;
        Ok(get_bytes(&mut buf)?.to_vec())
    }

    /// `None` when the slave has no block with that hash.
    pub async fn get_minor_block(&self, hash: Hash256) -> MasterResult<Option<Vec<u8>>> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&hash.0);
        let mut body = self.call(Op::GetMinorBlock, buf.freeze()).await?;
        if body.get_u8() == 0 {
            return Ok(None);
        }
        Ok(Some(get_bytes(&mut body)?.to_vec()))
    }

    /// `None` when the slave has no transaction with that hash.
    pub async fn get_transaction(&self, hash: Hash256) -> MasterResult<Option<Vec<u8>>> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&hash.0);
        let mut body = self.call(Op::GetTransaction, buf.freeze()).await?;
        if body.get_u8() == 0 {
            return Ok(None);
        }
        Ok(Some(get_bytes(&mut body)?.to_vec()))
    }

    /// `None` when the transaction has not been included in a block yet.
    pub async fn get_transaction_receipt(&self, hash: Hash256) -> MasterResult<Option<Vec<u8>>> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&hash.0);
        let mut body = self.call(Op::GetTransactionReceipt, buf.freeze()).await?;
        if body.get_u8() == 0 {
            return Ok(None);
        }
        Ok(Some(get_bytes(&mut body)?.to_vec()))
    }

    /// Paginated transaction history for `address`; `start` is an opaque
    /// cursor (0 at the newest), `limit` bounds the page size. Returns the
    /// page of transaction hashes plus the cursor for the next page.
    pub async fn get_transaction_list_by_address(&self, address: Address, start: u64, limit: u32) -> MasterResult<(Vec<Hash256>, u64)> {
        let mut buf = BytesMut::new();
        encode_address(&mut buf, &address);
        buf.extend_from_slice(&start.to_be_bytes());
        buf.extend_from_slice(&limit.to_be_bytes());
        let mut body = self.call(Op::GetTransactionListByAddress, buf.freeze()).await?;
        let count = body.get_u32() as usize;
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let mut hash = [0u8; 32];
            body.copy_to_slice(&mut hash);
            hashes.push(Hash256(hash));
        }
        let next_start = body.get_u64();
        Ok((hashes, next_start))
    }

    pub async fn get_logs(&self, shard: FullShardId, from_height: u64, to_height: u64) -> MasterResult<Vec<LogEntry>> {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&shard.to_be_bytes());
        buf.extend_from_slice(&from_height.to_be_bytes());
        buf.extend_from_slice(&to_height.to_be_bytes());
        let body = self.call(Op::GetLogs, buf.freeze()).await?;
        let mut buf = body;
        let count = buf.get_u32() as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(LogEntry { data: get_bytes(&mut buf)?.to_vec() });
        }
        Ok(out)
    }

    pub async fn estimate_gas(&self, raw_tx: &[u8], from: Address) -> MasterResult<u32> {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, raw_tx);
        encode_address(&mut buf, &from);
        let mut body = self.call(Op::EstimateGas, buf.freeze()).await?;
        Ok(body.get_u32())
    }

    pub async fn get_storage_at(&self, address: Address, key: Hash256) -> MasterResult<Hash256> {
        let mut buf = BytesMut::new();
        encode_address(&mut buf, &address);
        buf.extend_from_slice(&key.0);
        let body = self.call(Op::GetStorageAt, buf.freeze()).await?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&body[..32]);
        Ok(Hash256(hash))
    }

    pub async fn get_code(&self, address: Address) -> MasterResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        encode_address(&mut buf, &address);
        let body = self.call(Op::GetCode, buf.freeze()).await?;
        let mut buf = body;
        Ok(get_bytes(&mut buf)?.to_vec())
    }

    pub async fn gas_price(&self) -> MasterResult<u64> {
        let mut body = self.call(Op::GasPrice, Bytes::new()).await?;
        Ok(body.get_u64())
    }

    /// Returns `switched`: whether the slave reorged as a result of ingesting
    /// this root block.
    pub async fn add_root_block(&self, root_block: &[u8]) -> MasterResult<bool> {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, root_block);
        let mut body = self.call(Op::AddRootBlock, buf.freeze()).await?;
        Ok(body.get_u8() != 0)
    }

    /// `Some(shard_id)` scopes the request to that shard; `None` targets the
    /// root chain, matching spec.md §4.B's `GetWork` signature.
    pub async fn get_work(&self, shard: Option<FullShardId>) -> MasterResult<(Hash256, u64, u64)> {
        let mut buf = BytesMut::new();
        encode_optional_shard(&mut buf, shard);
        let body = self.call(Op::GetWork, buf.freeze()).await?;
        let mut buf = body;
        let mut hash = [0u8; 32];
        buf.copy_to_slice(&mut hash);
        let height = buf.get_u64();
        let difficulty = buf.get_u64();
        Ok((Hash256(hash), height, difficulty))
    }

    pub async fn submit_work(
        &self,
        shard: Option<FullShardId>,
        seal_hash: Hash256,
        nonce: u64,
        mix_hash: Hash256,
        signature: Option<Signature65>,
    ) -> MasterResult<bool> {
        let mut buf = BytesMut::new();
        encode_optional_shard(&mut buf, shard);
        buf.extend_from_slice(&seal_hash.0);
        buf.extend_from_slice(&nonce.to_be_bytes());
        buf.extend_from_slice(&mix_hash.0);
        match signature {
            Some(sig) => {
                buf.extend_from_slice(&[1]);
                buf.extend_from_slice(&sig);
            }
            None => buf.extend_from_slice(&[0]),
        }
        let mut body = self.call(Op::SubmitWork, buf.freeze()).await?;
        Ok(body.get_u8() != 0)
    }
}

fn encode_address(buf: &mut BytesMut, address: &Address) {
    buf.extend_from_slice(&address.recipient);
    buf.extend_from_slice(&address.full_shard_key.to_be_bytes());
}

fn encode_optional_shard(buf: &mut BytesMut, shard: Option<FullShardId>) {
    match shard {
        Some(s) => {
            buf.extend_from_slice(&[1]);
            buf.extend_from_slice(&s.to_be_bytes());
        }
        None => buf.extend_from_slice(&[0]),
    }
}

fn decode_minor_header(buf: &mut Bytes, shard: FullShardId) -> MasterResult<MinorBlockHeader> {
    if buf.len() < 32 + 8 + 32 + 8 + 8 + 16 {
        return Err(MasterError::Internal("truncated minor block header".into()));
    }
    let mut hash = [0u8; 32];
    buf.copy_to_slice(&mut hash);
    let height = buf.get_u64();
    let mut prev_root = [0u8; 32];
    buf.copy_to_slice(&mut prev_root);
    let create_time = buf.get_u64();
    let difficulty = buf.get_u64();
    let coinbase_amount = buf.get_u128();
    Ok(MinorBlockHeader {
        branch: crate::types::Branch(shard),
        height,
        hash: Hash256(hash),
        prev_root_block_hash: Hash256(prev_root),
        create_time,
        difficulty,
        coinbase_amount,
    })
}
