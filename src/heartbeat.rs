//! Heartbeat supervisor (spec.md §4.D): periodic liveness probe to every
//! slave; the only component that initiates reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::registry::Registry;
use crate::slave::SlaveState;

struct MissCounters {
    last_seen: HashMap<String, Instant>,
    consecutive_misses: HashMap<String, u32>,
}

pub struct HeartbeatSupervisor {
    registry: Arc<Registry>,
    period: Duration,
    miss_threshold: u32,
    state: Mutex<MissCounters>,
}

impl HeartbeatSupervisor {
    pub fn new(registry: Arc<Registry>, period: Duration, miss_threshold: u32) -> Self {
        HeartbeatSupervisor {
            registry,
            period,
            miss_threshold,
            state: Mutex::new(MissCounters { last_seen: HashMap::new(), consecutive_misses: HashMap::new() }),
        }
    }

    /// Issues `Heartbeat` on every connection concurrently; a connection
    /// missing `miss_threshold` consecutive heartbeats transitions to
    /// `Failed`. Returns once every connection has been probed exactly once.
    pub async fn tick(&self) {
        let connections = self.registry.all_connections();
        let results = futures::future::join_all(connections.iter().map(|conn| {
            let conn = conn.clone();
            async move {
                let ok = conn.heartbeat().await.is_ok();
                (conn, ok)
            }
        }))
        .await;

        let mut state = self.state.lock();
        for (conn, ok) in results {
            if ok {
                state.last_seen.insert(conn.slave_id.clone(), Instant::now());
                state.consecutive_misses.insert(conn.slave_id.clone(), 0);
                debug!(slave = %conn.slave_id, "heartbeat ok");
            } else {
                let misses = state.consecutive_misses.entry(conn.slave_id.clone()).or_insert(0);
                *misses += 1;
                if *misses >= self.miss_threshold {
                    warn!(slave = %conn.slave_id, misses = *misses, "heartbeat threshold exceeded, marking failed");
                    conn.set_state(SlaveState::Failed);
                }
            }
        }
    }

    /// Runs [`Self::tick`] on `period` until `shutdown` resolves. Heartbeat
    /// cancellation never propagates to in-flight user RPCs: each tick is a
    /// self-contained fan-out with its own join barrier.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
