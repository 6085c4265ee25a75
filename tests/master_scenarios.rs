//! End-to-end scenarios exercising the master façade against a fake RPC
//! channel, standing in for a real slave process the way the upstream Go
//! test suite's `fakeRpcClient` stands in for a real slave connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use qkc_master::assembler::DEFAULT_ROOT_BLOCK_REWARD;
use qkc_master::build_master;
use qkc_master::config::{ClusterConfig, ConsensusType, QuarkchainConfig, RootConfig, RootGenesisConfig, SlaveConfig};
use qkc_master::consensus::{Engine, PoWDoubleSha256Engine};
use qkc_master::error::MasterError;
use qkc_master::store::memory_store_factory;
use qkc_master::transport::RpcChannel;
use qkc_master::types::{Address, FullShardId};
use qkc_master::wire::{put_bytes, Op, Status};

const SHARD_A: FullShardId = 0x0001_0000;
const SHARD_B: FullShardId = 0x0002_0000;

type Handler = Arc<dyn Fn(u32, Bytes) -> Result<(Status, Bytes), MasterError> + Send + Sync>;
type SlaveFactory = Arc<dyn Fn(&str, &str, &[FullShardId]) -> Arc<qkc_master::slave::SlaveConnection> + Send + Sync>;

struct FakeChannel {
    id: String,
    shards: Vec<FullShardId>,
    handler: Handler,
}

#[async_trait]
impl RpcChannel for FakeChannel {
    async fn call(&self, op_code: u32, payload: Bytes, _deadline: Duration) -> Result<(Status, Bytes), MasterError> {
        if op_code == Op::Ping as u32 {
            let mut buf = BytesMut::new();
            put_bytes(&mut buf, self.id.as_bytes());
            buf.put_u32(self.shards.len() as u32);
            for s in &self.shards {
                buf.put_u32(*s);
            }
            return Ok((Status::Ok, buf.freeze()));
        }
        (self.handler)(op_code, payload)
    }
}

fn single_slave_cluster() -> ClusterConfig {
    ClusterConfig {
        slave_list: vec![SlaveConfig { id: "S0".into(), host: "127.0.0.1".into(), port: 9000, shard_mask_list: vec![SHARD_A] }],
        quarkchain: QuarkchainConfig {
            genesis_shard_ids: vec![SHARD_A],
            chain_ids: vec![1],
            root: RootConfig { consensus_type: ConsensusType::PoWSimulate, genesis: RootGenesisConfig { difficulty: 2000 }, ..RootConfig::default() },
            ..QuarkchainConfig::default()
        },
        heartbeat_miss_threshold: 2,
        ..ClusterConfig::default()
    }
}

fn multi_shard_slave_cluster() -> ClusterConfig {
    ClusterConfig {
        slave_list: vec![SlaveConfig { id: "S0".into(), host: "127.0.0.1".into(), port: 9000, shard_mask_list: vec![SHARD_A, SHARD_B] }],
        quarkchain: QuarkchainConfig {
            genesis_shard_ids: vec![SHARD_A, SHARD_B],
            chain_ids: vec![1, 2],
            root: RootConfig { consensus_type: ConsensusType::PoWSimulate, genesis: RootGenesisConfig { difficulty: 2000 }, ..RootConfig::default() },
            ..QuarkchainConfig::default()
        },
        heartbeat_miss_threshold: 2,
        ..ClusterConfig::default()
    }
}

fn slave_factory_with_handler(handler: Handler) -> SlaveFactory {
    Arc::new(move |id, _endpoint, shards| {
        let channel: Arc<dyn RpcChannel> = Arc::new(FakeChannel { id: id.to_string(), shards: shards.to_vec(), handler: handler.clone() });
        Arc::new(qkc_master::slave::SlaveConnection::new(id.to_string(), "fake".into(), shards.to_vec(), channel, Duration::from_secs(5)))
    })
}

fn ok(payload: Bytes) -> Result<(Status, Bytes), MasterError> {
    Ok((Status::Ok, payload))
}

/// S1: HeartBeat — a healthy slave stays Ready; a slave missing the
/// configured threshold of consecutive heartbeats transitions to Failed.
#[tokio::test]
async fn heartbeat_marks_unresponsive_slave_failed() {
    let healthy: Handler = Arc::new(|_op: u32, _p: Bytes| ok(Bytes::new()));
    let cluster = single_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(healthy), memory_store_factory()).await.unwrap();
    master.heartbeat().await;
    let conn = master.get_one_slave_conn_by_id(SHARD_A).unwrap();
    assert_eq!(conn.state(), qkc_master::slave::SlaveState::Ready);

    let failing: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::Heartbeat as u32 {
            Err(MasterError::transport("S0", SHARD_A, "connection reset"))
        } else {
            ok(Bytes::new())
        }
    });
    let cluster = single_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(failing), memory_store_factory()).await.unwrap();
    master.heartbeat().await;
    master.heartbeat().await;
    let conn = master.get_one_slave_conn_by_id(SHARD_A);
    assert!(conn.is_none(), "no Ready connection should remain after crossing the miss threshold");
}

fn encode_minor_header(hash: u8, height: u64, create_time: u64, prev_root_zero: bool) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[hash; 32]);
    buf.put_u64(height);
    if prev_root_zero {
        buf.extend_from_slice(&[0u8; 32]);
    } else {
        buf.extend_from_slice(&[0xffu8; 32]);
    }
    buf.put_u64(create_time);
    buf.put_u64(0); // difficulty
    buf.put_u128(0); // coinbase_amount
    buf.to_vec()
}

fn header_list_response(headers: &[(u8, u64, u64)]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32(1); // one shard
    buf.put_u32(SHARD_A);
    buf.put_u32(headers.len() as u32);
    for (hash, height, create_time) in headers {
        buf.extend_from_slice(&encode_minor_header(*hash, *height, *create_time, true));
    }
    buf.freeze()
}

fn two_shard_header_list_response(shard_a: &[(u8, u64, u64)], shard_b: &[(u8, u64, u64)]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32(2); // two shards in one slave's coverage
    buf.put_u32(SHARD_A);
    buf.put_u32(shard_a.len() as u32);
    for (hash, height, create_time) in shard_a {
        buf.extend_from_slice(&encode_minor_header(*hash, *height, *create_time, true));
    }
    buf.put_u32(SHARD_B);
    buf.put_u32(shard_b.len() as u32);
    for (hash, height, create_time) in shard_b {
        buf.extend_from_slice(&encode_minor_header(*hash, *height, *create_time, true));
    }
    buf.freeze()
}

/// Regression test for a slave covering more than one shard: a single
/// `GetUnconfirmedHeaderList` call answers for its whole coverage, so
/// collection must issue exactly one call per slave connection, not one per
/// shard it covers — otherwise every header from that slave is committed to
/// the candidate once per covered shard.
#[tokio::test]
async fn create_root_block_to_mine_does_not_duplicate_headers_from_a_multi_shard_slave() {
    let handler: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::GetUnconfirmedHeaderList as u32 {
            ok(two_shard_header_list_response(&[(1, 1, 100)], &[(2, 1, 100)]))
        } else {
            ok(Bytes::new())
        }
    });
    let cluster = multi_shard_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();

    let coinbase = Address { recipient: [4u8; 20], full_shard_key: SHARD_A };
    let candidate = master.create_root_block_to_mine(coinbase, 1_000).await.unwrap();

    assert_eq!(candidate.minor_headers.len(), 2, "one header per shard, not duplicated per covered shard");
}

/// S2: CreateRootBlockToMine — collects unconfirmed headers, orders them
/// deterministically, and stamps the configured coinbase reward.
#[tokio::test]
async fn create_root_block_to_mine_assembles_deterministic_candidate() {
    let handler: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::GetUnconfirmedHeaderList as u32 {
            ok(header_list_response(&[(9, 2, 100), (1, 1, 100)]))
        } else {
            ok(Bytes::new())
        }
    });
    let cluster = single_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();

    let coinbase = Address { recipient: [1u8; 20], full_shard_key: SHARD_A };
    let candidate = master.create_root_block_to_mine(coinbase, 1_000).await.unwrap();

    assert_eq!(candidate.coinbase_amount, DEFAULT_ROOT_BLOCK_REWARD);
    assert_eq!(candidate.header.height, 1);
    assert_eq!(candidate.minor_headers.len(), 2);
    assert_eq!(candidate.minor_headers[0].height, 1, "lower height sorts first at equal createTime");
    assert!(master.is_mining());
}

/// S3: SignedRoot — when a guardian key is configured, the assembled
/// candidate carries a signature that recovers to that key.
#[tokio::test]
async fn create_root_block_to_mine_signs_when_guardian_configured() {
    let handler: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::GetUnconfirmedHeaderList as u32 {
            ok(header_list_response(&[]))
        } else {
            ok(Bytes::new())
        }
    });
    let signer = qkc_master::signing::Signer::from_bytes(&[9u8; 32]).unwrap();
    let guardian_hex = hex::encode(signer.public_key_compressed());
    let signer_hex = hex::encode([9u8; 32]);

    let mut cluster = single_slave_cluster();
    cluster.quarkchain.guardian_public_key = Some(guardian_hex);
    cluster.quarkchain.root_signer_private_key = Some(signer_hex);

    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();
    let coinbase = Address { recipient: [0u8; 20], full_shard_key: SHARD_A };
    let candidate = master.create_root_block_to_mine(coinbase, 1_000).await.unwrap();

    assert_ne!(candidate.header.signature, qkc_master::types::ZERO_SIGNATURE);
    let recovered = qkc_master::signing::recover_public_key(&candidate.header.seal_hash, &candidate.header.signature).unwrap();
    assert_eq!(recovered, signer.public_key_compressed());
}

/// S4: ExecuteTransaction — the call-result bytes the slave returns pass
/// through the master façade unchanged.
#[tokio::test]
async fn execute_transaction_returns_slave_result_bytes() {
    let handler: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::ExecuteTransaction as u32 {
            let mut buf = BytesMut::new();
            put_bytes(&mut buf, b"qkc");
            ok(buf.freeze())
        } else {
            ok(Bytes::new())
        }
    });
    let cluster = single_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();

    let from = Address { recipient: [2u8; 20], full_shard_key: SHARD_A };
    let result = master.execute_transaction(b"raw-tx", from, SHARD_A).await.unwrap();
    assert_eq!(result, b"qkc");
}

/// An address whose chain id is outside the configured genesis chain set is
/// rejected before any slave is contacted.
#[tokio::test]
async fn add_transaction_rejects_unknown_chain() {
    let handler: Handler = Arc::new(|_op: u32, _p: Bytes| ok(Bytes::new()));
    let cluster = single_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();

    let unknown_chain_shard: FullShardId = 0x0004_0000;
    let err = master.add_transaction(b"raw-tx", unknown_chain_shard).await.unwrap_err();
    assert!(matches!(err, MasterError::UnknownChain { chain_id: 4 }));
}

/// S5: GetLogs — log entries returned by the slave are decoded intact.
#[tokio::test]
async fn get_logs_decodes_slave_response() {
    let handler: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::GetLogs as u32 {
            let mut buf = BytesMut::new();
            buf.put_u32(1);
            put_bytes(&mut buf, b"qkc");
            ok(buf.freeze())
        } else {
            ok(Bytes::new())
        }
    });
    let cluster = single_slave_cluster();
    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();

    let logs = master.get_logs(SHARD_A, 0, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].data, b"qkc");
}

/// S6: SubmitWorkRootChain — a nonce found against `difficulty / 1000`
/// verifies, and submitting it ingests the candidate and advances the tip.
#[tokio::test]
async fn submit_work_root_chain_ingests_on_valid_nonce() {
    let handler: Handler = Arc::new(|op: u32, _p: Bytes| {
        if op == Op::GetUnconfirmedHeaderList as u32 {
            ok(header_list_response(&[]))
        } else if op == Op::AddRootBlock as u32 {
            let mut buf = BytesMut::new();
            buf.put_u8(1);
            ok(buf.freeze())
        } else {
            ok(Bytes::new())
        }
    });
    let mut cluster = single_slave_cluster();
    cluster.quarkchain.root.consensus_type = ConsensusType::PoWDoubleSha256;
    let master = build_master(&cluster, slave_factory_with_handler(handler), memory_store_factory()).await.unwrap();

    let coinbase = Address { recipient: [3u8; 20], full_shard_key: SHARD_A };
    let candidate = master.create_root_block_to_mine(coinbase, 1_000).await.unwrap();

    let engine = PoWDoubleSha256Engine;
    let verify_difficulty = candidate.header.difficulty / 1000;
    let nonce = engine
        .seal(candidate.header.seal_hash, verify_difficulty, 1_000_000)
        .expect("a nonce satisfying the lowered target exists within budget");

    let accepted = master
        .submit_work(None, candidate.header.seal_hash, nonce, qkc_master::types::Hash256::ZERO, None)
        .await
        .unwrap();
    assert!(accepted);
}
