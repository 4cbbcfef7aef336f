//! Cluster-wide per-node flow summaries.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::heartbeat::NodeHeartbeat;
use crate::statistics::rolling::Ema;
use crate::NodeId;

/// Smoothed utilization of one node.
#[derive(Debug)]
struct RollingNodeStat {
    write_byte_rate: Ema,
    write_key_rate: Ema,
    read_byte_rate: Ema,
    read_key_rate: Ema,
    cpu_percent: Ema,
    available_bytes: u64,
    last_update: Instant,
}

impl RollingNodeStat {
    fn new(smoothing: f64) -> Self {
        RollingNodeStat {
            write_byte_rate: Ema::new(smoothing),
            write_key_rate: Ema::new(smoothing),
            read_byte_rate: Ema::new(smoothing),
            read_key_rate: Ema::new(smoothing),
            cpu_percent: Ema::new(smoothing),
            available_bytes: 0,
            last_update: Instant::now(),
        }
    }
}

/// Point-in-time view of one node's smoothed flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFlowSnapshot {
    /// Node the snapshot describes.
    pub node_id: NodeId,
    /// Smoothed write bytes/sec.
    pub write_byte_rate: f64,
    /// Smoothed write keys/sec.
    pub write_key_rate: f64,
    /// Smoothed read bytes/sec.
    pub read_byte_rate: f64,
    /// Smoothed read keys/sec.
    pub read_key_rate: f64,
    /// Smoothed serving-thread CPU percentage.
    pub cpu_percent: f64,
    /// Capacity still available, from the latest report.
    pub available_bytes: u64,
}

/// Per-node exponentially-smoothed flow aggregates.
///
/// Mutated by the heartbeat worker and read concurrently by schedulers;
/// each node's entry is updated atomically under its map shard.
#[derive(Debug)]
pub struct NodesStats {
    nodes: DashMap<NodeId, RollingNodeStat>,
    smoothing: f64,
}

impl NodesStats {
    /// Empty container with the given EMA weight.
    pub fn new(smoothing: f64) -> Self {
        NodesStats { nodes: DashMap::new(), smoothing }
    }

    /// Folds one node heartbeat into the aggregates. Zero-width reports
    /// carry no rates and are dropped.
    pub fn observe(&self, hb: &NodeHeartbeat) {
        if hb.interval_secs == 0 {
            return;
        }
        let interval = hb.interval_secs as f64;
        let mut entry =
            self.nodes.entry(hb.node_id).or_insert_with(|| RollingNodeStat::new(self.smoothing));
        entry.write_byte_rate.observe(hb.bytes_written as f64 / interval);
        entry.write_key_rate.observe(hb.keys_written as f64 / interval);
        entry.read_byte_rate.observe(hb.bytes_read as f64 / interval);
        entry.read_key_rate.observe(hb.keys_read as f64 / interval);
        entry.cpu_percent.observe(hb.cpu_percent());
        entry.available_bytes = hb.available_bytes;
        entry.last_update = Instant::now();
    }

    /// Snapshot of one node, if it has reported.
    pub fn snapshot(&self, node_id: NodeId) -> Option<NodeFlowSnapshot> {
        self.nodes.get(&node_id).map(|entry| Self::snapshot_entry(node_id, &entry))
    }

    /// Snapshots for every tracked node, in no particular order.
    pub fn all(&self) -> Vec<NodeFlowSnapshot> {
        self.nodes.iter().map(|e| Self::snapshot_entry(*e.key(), e.value())).collect()
    }

    fn snapshot_entry(node_id: NodeId, entry: &RollingNodeStat) -> NodeFlowSnapshot {
        NodeFlowSnapshot {
            node_id,
            write_byte_rate: entry.write_byte_rate.get(),
            write_key_rate: entry.write_key_rate.get(),
            read_byte_rate: entry.read_byte_rate.get(),
            read_key_rate: entry.read_key_rate.get(),
            cpu_percent: entry.cpu_percent.get(),
            available_bytes: entry.available_bytes,
        }
    }

    /// Sum of smoothed write bytes/sec across the cluster.
    pub fn total_write_byte_rate(&self) -> f64 {
        self.nodes.iter().map(|e| e.write_byte_rate.get()).sum()
    }

    /// Sum of smoothed read bytes/sec across the cluster.
    pub fn total_read_byte_rate(&self) -> f64 {
        self.nodes.iter().map(|e| e.read_byte_rate.get()).sum()
    }

    /// Forgets a node, e.g. after it leaves the cluster.
    pub fn remove(&self, node_id: NodeId) {
        self.nodes.remove(&node_id);
    }

    /// Drops nodes that have not reported within `timeout`.
    pub fn evict_stale(&self, timeout: Duration) {
        self.nodes.retain(|_, stat| stat.last_update.elapsed() < timeout);
    }

    /// Number of tracked nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has reported yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(node_id: NodeId, bytes_written: u64, interval_secs: u64) -> NodeHeartbeat {
        NodeHeartbeat {
            node_id,
            cpu_usages: vec![40],
            bytes_written,
            bytes_read: bytes_written / 2,
            keys_written: bytes_written / 100,
            interval_secs,
            available_bytes: 1 << 30,
            ..Default::default()
        }
    }

    #[test]
    fn observe_smooths_rates() {
        let stats = NodesStats::new(0.5);
        stats.observe(&heartbeat(1, 60_000, 60));
        let snap = stats.snapshot(1).unwrap();
        assert!((snap.write_byte_rate - 1000.0).abs() < 1e-9);

        stats.observe(&heartbeat(1, 0, 60));
        let snap = stats.snapshot(1).unwrap();
        assert!((snap.write_byte_rate - 500.0).abs() < 1e-9);
        assert_eq!(snap.available_bytes, 1 << 30);
    }

    #[test]
    fn zero_interval_reports_ignored() {
        let stats = NodesStats::new(0.5);
        stats.observe(&heartbeat(1, 60_000, 0));
        assert!(stats.is_empty());
    }

    #[test]
    fn totals_sum_over_nodes() {
        let stats = NodesStats::new(1.0);
        stats.observe(&heartbeat(1, 60_000, 60));
        stats.observe(&heartbeat(2, 120_000, 60));
        assert!((stats.total_write_byte_rate() - 3000.0).abs() < 1e-9);
        assert_eq!(stats.len(), 2);

        stats.remove(2);
        assert!((stats.total_write_byte_rate() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn stale_nodes_evicted() {
        let stats = NodesStats::new(0.5);
        stats.observe(&heartbeat(1, 60_000, 60));
        stats.evict_stale(Duration::from_secs(600));
        assert_eq!(stats.len(), 1);
        stats.evict_stale(Duration::ZERO);
        assert!(stats.is_empty());
    }
}
