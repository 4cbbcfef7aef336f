//! Aggregated hotspot statistics: both flow caches plus node summaries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::LoadAwareConfig;
use crate::flow::FlowKind;
use crate::heartbeat::{NodeHeartbeat, ShardHeartbeat};
use crate::metrics::LoadMetrics;
use crate::statistics::hot_peer::HotPeerStat;
use crate::statistics::hot_peer_cache::HotPeerCache;
use crate::statistics::node_stats::NodesStats;
use crate::NodeId;

/// Read and write hot-peer caches under one roof.
#[derive(Debug)]
pub struct HotCache {
    read: HotPeerCache,
    write: HotPeerCache,
}

impl HotCache {
    /// Empty caches for both flow kinds.
    pub fn new(config: &LoadAwareConfig, metrics: Arc<LoadMetrics>) -> Self {
        HotCache {
            read: HotPeerCache::new(FlowKind::Read, &config.heartbeat, Arc::clone(&metrics)),
            write: HotPeerCache::new(FlowKind::Write, &config.heartbeat, metrics),
        }
    }

    /// Runs the read-flow check for one shard heartbeat.
    pub fn check_read(&self, hb: &ShardHeartbeat) -> Vec<HotPeerStat> {
        self.read.check_shard_flow(hb)
    }

    /// Runs the write-flow check for one shard heartbeat.
    pub fn check_write(&self, hb: &ShardHeartbeat) -> Vec<HotPeerStat> {
        self.write.check_shard_flow(hb)
    }

    /// Applies one emitted record to the cache of its kind.
    pub fn update(&mut self, stat: HotPeerStat) {
        match stat.kind {
            FlowKind::Read => self.read.update(stat),
            FlowKind::Write => self.write.update(stat),
        }
    }

    /// Cached records of the given kind at `min_hot_degree` or above,
    /// grouped by node.
    pub fn shard_stats(
        &self,
        kind: FlowKind,
        min_hot_degree: u64,
    ) -> HashMap<NodeId, Vec<HotPeerStat>> {
        self.cache(kind).shard_stats(min_hot_degree)
    }

    /// Whether the shard is hot in either direction.
    pub fn is_shard_hot(&self, hb: &ShardHeartbeat, min_hot_degree: u64) -> bool {
        self.write.is_shard_hot(hb, min_hot_degree) || self.read.is_shard_hot(hb, min_hot_degree)
    }

    /// Exports gauges for both caches.
    pub fn collect_metrics(&self) {
        self.read.collect_metrics();
        self.write.collect_metrics();
    }

    /// The cache tracking the given kind.
    pub fn cache(&self, kind: FlowKind) -> &HotPeerCache {
        match kind {
            FlowKind::Read => &self.read,
            FlowKind::Write => &self.write,
        }
    }
}

/// Cluster hotspot statistics: the hot caches plus per-node summaries.
///
/// Owned by the heartbeat worker; shard heartbeats feed both caches, node
/// heartbeats feed the summaries.
#[derive(Debug)]
pub struct HotStat {
    cache: HotCache,
    nodes: NodesStats,
}

impl HotStat {
    /// Empty statistics.
    pub fn new(config: &LoadAwareConfig, metrics: Arc<LoadMetrics>) -> Self {
        HotStat {
            cache: HotCache::new(config, metrics),
            nodes: NodesStats::new(config.classifier.smoothing),
        }
    }

    /// Routes one shard heartbeat through both flow caches, applying every
    /// emitted record.
    pub fn observe_shard(&mut self, hb: &ShardHeartbeat) {
        let mut applied = 0usize;
        for stat in self.cache.check_write(hb) {
            self.cache.update(stat);
            applied += 1;
        }
        for stat in self.cache.check_read(hb) {
            self.cache.update(stat);
            applied += 1;
        }
        debug!(shard = hb.shard_id, records = applied, "observed shard heartbeat");
    }

    /// Folds one node heartbeat into the per-node summaries.
    pub fn observe_node(&self, hb: &NodeHeartbeat) {
        self.nodes.observe(hb);
    }

    /// Cached records of the given kind at `min_hot_degree` or above.
    pub fn shard_stats(
        &self,
        kind: FlowKind,
        min_hot_degree: u64,
    ) -> HashMap<NodeId, Vec<HotPeerStat>> {
        self.cache.shard_stats(kind, min_hot_degree)
    }

    /// Whether the shard is hot in either direction.
    pub fn is_shard_hot(&self, hb: &ShardHeartbeat, min_hot_degree: u64) -> bool {
        self.cache.is_shard_hot(hb, min_hot_degree)
    }

    /// The flow caches.
    pub fn hot_cache(&self) -> &HotCache {
        &self.cache
    }

    /// The per-node summaries.
    pub fn nodes_stats(&self) -> &NodesStats {
        &self.nodes
    }

    /// Exports cache gauges.
    pub fn collect_metrics(&self) {
        self.cache.collect_metrics();
    }
}
