//! Asynchronous heartbeat ingestion.
//!
//! One worker task owns the mutable statistics and drains a channel of
//! heartbeat events, so observations for any (shard, node) pair apply in
//! arrival order. Schedulers hold a cloneable handle: reports go through
//! the channel, queries read a consistent snapshot behind a lock that the
//! worker only holds across one whole cache update at a time.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cluster::limiter::{ClusterLimiter, RateSink};
use crate::config::LoadAwareConfig;
use crate::error::{Error, Result};
use crate::flow::FlowKind;
use crate::heartbeat::{NodeHeartbeat, ShardHeartbeat};
use crate::metrics::LoadMetrics;
use crate::statistics::hot_peer::HotPeerStat;
use crate::statistics::hot_stat::HotStat;
use crate::statistics::node_stats::NodeFlowSnapshot;
use crate::NodeId;

/// Heartbeats queued before senders start waiting.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// One ingestible observation.
#[derive(Debug, Clone)]
pub enum HeartbeatEvent {
    /// Per-shard flow report.
    Shard(ShardHeartbeat),
    /// Per-node utilization report.
    Node(NodeHeartbeat),
}

/// Running ingestion worker. Dropping it without [`Self::shutdown`]
/// detaches the task, which then stops once every handle is gone.
pub struct StatsWorker {
    handle: StatsHandle,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl StatsWorker {
    /// Validates the configuration and spawns the ingestion task on the
    /// current tokio runtime.
    pub fn spawn(
        config: LoadAwareConfig,
        sink: Arc<dyn RateSink>,
        metrics: Arc<LoadMetrics>,
    ) -> Result<StatsWorker> {
        config.validate()?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let hot = Arc::new(RwLock::new(HotStat::new(&config, Arc::clone(&metrics))));
        let limiter = Arc::new(ClusterLimiter::new(&config, sink, metrics));
        let join =
            tokio::spawn(run(event_rx, shutdown_rx, Arc::clone(&hot), Arc::clone(&limiter)));
        Ok(StatsWorker { handle: StatsHandle { event_tx, hot, limiter }, shutdown_tx, join })
    }

    /// Cloneable handle for reporting and querying.
    pub fn handle(&self) -> StatsHandle {
        self.handle.clone()
    }

    /// Stops the worker and waits for it to finish. Heartbeats still
    /// queued are dropped; they are rebuilt from the next reports anyway.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

/// Shared entry point to the statistics: ingestion goes through the
/// worker's queue, queries read the current snapshot directly.
#[derive(Clone)]
pub struct StatsHandle {
    event_tx: mpsc::Sender<HeartbeatEvent>,
    hot: Arc<RwLock<HotStat>>,
    limiter: Arc<ClusterLimiter>,
}

impl StatsHandle {
    /// Queues one shard heartbeat.
    pub async fn report_shard(&self, hb: ShardHeartbeat) -> Result<()> {
        self.event_tx
            .send(HeartbeatEvent::Shard(hb))
            .await
            .map_err(|_| Error::WorkerStopped)
    }

    /// Queues one node heartbeat.
    pub async fn report_node(&self, hb: NodeHeartbeat) -> Result<()> {
        self.event_tx.send(HeartbeatEvent::Node(hb)).await.map_err(|_| Error::WorkerStopped)
    }

    /// Cached hot records of the given kind at `min_hot_degree` or above,
    /// grouped by node.
    pub fn shard_stats(
        &self,
        kind: FlowKind,
        min_hot_degree: u64,
    ) -> HashMap<NodeId, Vec<HotPeerStat>> {
        self.hot.read().shard_stats(kind, min_hot_degree)
    }

    /// Whether the shard is hot in either direction.
    pub fn is_shard_hot(&self, hb: &ShardHeartbeat, min_hot_degree: u64) -> bool {
        self.hot.read().is_shard_hot(hb, min_hot_degree)
    }

    /// Smoothed flow summary for one node.
    pub fn node_flow(&self, node_id: NodeId) -> Option<NodeFlowSnapshot> {
        self.hot.read().nodes_stats().snapshot(node_id)
    }

    /// The admission-rate controller fed by this worker.
    pub fn limiter(&self) -> Arc<ClusterLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Exports hot-cache gauges.
    pub fn collect_metrics(&self) {
        self.hot.read().collect_metrics();
    }
}

async fn run(
    mut events: mpsc::Receiver<HeartbeatEvent>,
    mut shutdown: mpsc::Receiver<()>,
    hot: Arc<RwLock<HotStat>>,
    limiter: Arc<ClusterLimiter>,
) {
    info!("load-aware worker started");
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("load-aware worker stopping");
                break;
            }
            event = events.recv() => match event {
                Some(HeartbeatEvent::Shard(hb)) => {
                    hot.write().observe_shard(&hb);
                }
                Some(HeartbeatEvent::Node(hb)) => {
                    // node summaries only need the reader side; the
                    // classifier serializes inside the limiter
                    hot.read().observe_node(&hb);
                    limiter.collect(&hb);
                }
                None => {
                    debug!("all handles dropped, worker exiting");
                    break;
                }
            }
        }
    }
}
