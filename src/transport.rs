//! RPC transport (spec.md §4.A): one framed, full-duplex, connection-oriented
//! channel per slave, multiplexing concurrent requests by correlation id.
//!
//! [`RpcChannel`] is the seam [`crate::slave::SlaveConnection`] calls through;
//! [`TcpChannel`] is the real implementation, reconnecting with exponential
//! backoff capped at a configured ceiling. Tests substitute a fake channel
//! instead of monkey-patching a global constructor (design note 1).

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, warn};

use crate::error::MasterError;
use crate::wire::{Request, RequestCodec, Response, ResponseCodec, Status};

#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Issue one RPC call, suspending until the correlation id receives a
    /// reply or `deadline` elapses. Abandoning the returned future cancels
    /// the correlation id; any later reply is discarded silently.
    async fn call(&self, op_code: u32, payload: Bytes, deadline: Duration) -> Result<(Status, Bytes), MasterError>;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// TCP-backed [`RpcChannel`] with a background writer/reader pair and
/// reconnect-with-backoff, per spec.md §4.A.
pub struct TcpChannel {
    endpoint: String,
    slave_id: String,
    next_correlation_id: AtomicU64,
    backoff_ceiling: Duration,
    inner: Mutex<Option<ConnectionHandles>>,
}

struct ConnectionHandles {
    writer: tokio::sync::mpsc::UnboundedSender<Request>,
    pending: PendingMap,
    reader_task: tokio::task::JoinHandle<()>,
}

impl TcpChannel {
    pub fn new(slave_id: impl Into<String>, endpoint: impl Into<String>, backoff_ceiling: Duration) -> Self {
        TcpChannel {
            endpoint: endpoint.into(),
            slave_id: slave_id.into(),
            next_correlation_id: AtomicU64::new(1),
            backoff_ceiling,
            inner: Mutex::new(None),
        }
    }

    async fn ensure_connected(&self, deadline: Duration) -> Result<(), MasterError> {
        if self.inner.lock().is_some() {
            return Ok(());
        }
        let mut backoff = Duration::from_millis(100);
        let started = tokio::time::Instant::now();
        loop {
            match timeout(deadline, TcpStream::connect(&self.endpoint)).await {
                Ok(Ok(stream)) => {
                    let (read_half, write_half) = stream.into_split();
                    let reader = FramedRead::new(read_half, ResponseCodec);
                    let writer = FramedWrite::new(write_half, RequestCodec);
                    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
                    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Request>();
                    let reader_task = spawn_io_loop(writer, reader, rx, pending.clone());
                    *self.inner.lock() = Some(ConnectionHandles { writer: tx, pending, reader_task });
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(slave = %self.slave_id, endpoint = %self.endpoint, error = %e, "connect failed, backing off");
                }
                Err(_) => {
                    return Err(MasterError::transport(&self.slave_id, 0, "connect deadline exceeded"));
                }
            }
            if started.elapsed() >= deadline {
                return Err(MasterError::transport(&self.slave_id, 0, "could not reconnect within deadline"));
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.backoff_ceiling);
        }
    }
}

fn spawn_io_loop(
    mut writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, RequestCodec>,
    mut reader: FramedRead<tokio::net::tcp::OwnedReadHalf, ResponseCodec>,
    mut outbox: tokio::sync::mpsc::UnboundedReceiver<Request>,
    pending: PendingMap,
) -> tokio::task::JoinHandle<()> {
    // One task drives both halves of the duplex connection: the write half
    // is framed with RequestCodec, the read half with ResponseCodec, so a
    // peer's actual status byte is decoded rather than assumed.
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_req = outbox.recv() => {
                    match maybe_req {
                        Some(req) => {
                            if writer.send(req).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                maybe_frame = reader.next() => {
                    match maybe_frame {
                        Some(Ok(resp)) => {
                            if let Some(tx) = pending.lock().remove(&resp.correlation_id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Some(Err(e)) => {
                            debug!(error = %e, "transport read error, closing connection");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    })
}

#[async_trait]
impl RpcChannel for TcpChannel {
    async fn call(&self, op_code: u32, payload: Bytes, deadline: Duration) -> Result<(Status, Bytes), MasterError> {
        self.ensure_connected(deadline).await?;
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let guard = self.inner.lock();
            let handles = guard.as_ref().ok_or_else(|| {
                MasterError::transport(&self.slave_id, 0, "connection dropped before send")
            })?;
            handles.pending.lock().insert(correlation_id, tx);
            handles
                .writer
                .send(Request { op_code, correlation_id, payload })
                .map_err(|_| MasterError::transport(&self.slave_id, 0, "writer closed"))?;
        }
        match timeout(deadline, rx).await {
            Ok(Ok(resp)) => Ok((resp.status, resp.payload)),
            Ok(Err(_)) => {
                // Sender dropped: connection died mid-flight. Tear down so the
                // next call reconnects.
                self.drop_connection();
                Err(MasterError::transport(&self.slave_id, 0, "connection closed while awaiting reply"))
            }
            Err(_) => {
                // Deadline elapsed: discard the correlation id so a late
                // reply is dropped silently, per spec.md §5 cancellation.
                if let Some(handles) = self.inner.lock().as_ref() {
                    handles.pending.lock().remove(&correlation_id);
                }
                Err(MasterError::Timeout { op: crate::wire::Op::from_u32(op_code).unwrap_or(crate::wire::Op::Ping), elapsed_ms: deadline.as_millis() as u64 })
            }
        }
    }
}

impl TcpChannel {
    fn drop_connection(&self) {
        if let Some(handles) = self.inner.lock().take() {
            handles.reader_task.abort();
        }
    }
}
