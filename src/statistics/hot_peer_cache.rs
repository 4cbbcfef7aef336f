//! Hot-peer cache: per-node tracking of over-heated shards.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::error;

use crate::config::HeartbeatConfig;
use crate::flow::{FlowKind, BYTE_DIM, DIM_LEN, KEY_DIM};
use crate::heartbeat::ShardHeartbeat;
use crate::metrics::LoadMetrics;
use crate::statistics::hot_peer::HotPeerStat;
use crate::statistics::topn::TopN;
use crate::{NodeId, ShardId};

/// Per-node cache size at which thresholds switch from the static floor to
/// the adaptive top-N rank.
pub const TOP_N_N: usize = 60;
/// Bias applied to the top-N rank when deriving thresholds, keeping the
/// cache stable under mild rank churn.
pub const HOT_THRESHOLD_RATIO: f64 = 0.8;
/// Buckets in the rolling rate window.
pub const ROLLING_WINDOW_SIZE: usize = 5;
/// Cold observations a hot record absorbs before removal.
pub const HOT_SHARD_ANTI_COUNT: u64 = 2;
/// Reports narrower than this are dropped when denoising is on; only
/// simulators and tests report faster.
pub const HOT_SHARD_REPORT_MIN_INTERVAL_SECS: u64 = 3;

/// Tracks the hottest shards per node for one flow kind.
///
/// Two indexes are kept in lockstep: `peers_of_node` answers "what is hot
/// on this node" and `nodes_of_shard` answers "where was this shard seen".
/// A (shard, node) pair is present in both or in neither; every removal,
/// including TTL and capacity eviction inside the per-node [`TopN`], is
/// mirrored across both.
#[derive(Debug)]
pub struct HotPeerCache {
    kind: FlowKind,
    report_interval: Duration,
    denoising: bool,
    topn_ttl: Duration,
    peers_of_node: HashMap<NodeId, TopN<HotPeerStat>>,
    nodes_of_shard: HashMap<ShardId, HashSet<NodeId>>,
    metrics: Arc<LoadMetrics>,
}

impl HotPeerCache {
    /// Empty cache for one flow kind.
    pub fn new(kind: FlowKind, config: &HeartbeatConfig, metrics: Arc<LoadMetrics>) -> Self {
        HotPeerCache {
            kind,
            report_interval: config.shard_report_interval,
            denoising: config.denoising,
            topn_ttl: config.topn_ttl(),
            peers_of_node: HashMap::new(),
            nodes_of_shard: HashMap::new(),
            metrics,
        }
    }

    /// Flow kind this cache tracks.
    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Examines one shard heartbeat and returns the records it produces:
    /// refreshed stats for live replicas and terminal (`need_delete`)
    /// stats for replicas the shard no longer occupies. The cache itself
    /// is not modified; feed each returned record to [`Self::update`].
    pub fn check_shard_flow(&self, hb: &ShardHeartbeat) -> Vec<HotPeerStat> {
        let interval = hb.interval_secs();
        let bytes = self.kind.shard_bytes(hb) as f64;
        let keys = self.kind.shard_keys(hb) as f64;
        let (byte_rate, key_rate) = if interval == 0 {
            (0.0, 0.0)
        } else {
            (bytes / interval as f64, keys / interval as f64)
        };
        self.metrics.observe_shard_flow(self.kind, byte_rate, key_rate, interval);

        let peer_nodes: Vec<NodeId> = hb.peers.iter().map(|p| p.node_id).collect();
        let candidates = self.candidate_nodes(hb);
        let just_transfer_leader = self.just_transfer_leader(hb);
        let now = Instant::now();

        // A replica expired on one node may have just landed on another;
        // its prior is kept aside so the new node inherits the history.
        let mut migrated: Option<HotPeerStat> = None;
        let mut ret = Vec::new();
        for &node_id in &candidates {
            let expired = self.is_expired(hb, node_id);
            let mut old = self.old_stat(hb.shard_id, node_id).cloned();
            if expired && old.is_some() {
                migrated = old.clone();
            }
            if !expired && self.denoising && interval < HOT_SHARD_REPORT_MIN_INTERVAL_SECS {
                continue;
            }
            let new_stat = HotPeerStat {
                shard_id: hb.shard_id,
                node_id,
                kind: self.kind,
                byte_rate,
                key_rate,
                hot_degree: 0,
                anti_count: 0,
                thresholds: self.calc_hot_thresholds(node_id),
                is_leader: hb.leader_node() == node_id,
                last_update: now,
                rolling_bytes: None,
                rolling_keys: None,
                last_transfer_leader: None,
                just_transfer_leader,
                interval_secs: interval,
                need_delete: expired,
                is_new: false,
                peers: peer_nodes.clone(),
            };
            if old.is_none() {
                old = migrated.clone().or_else(|| {
                    candidates.iter().find_map(|&c| self.old_stat(hb.shard_id, c).cloned())
                });
            }
            if let Some(stat) =
                self.update_stat(new_stat, old, bytes, keys, Duration::from_secs(interval))
            {
                ret.push(stat);
            }
        }
        ret
    }

    /// Applies one record produced by [`Self::check_shard_flow`], keeping
    /// both indexes consistent.
    pub fn update(&mut self, stat: HotPeerStat) {
        let shard_id = stat.shard_id;
        let node_id = stat.node_id;
        if stat.need_delete {
            if let Some(peers) = self.peers_of_node.get_mut(&node_id) {
                peers.remove(shard_id);
            }
            self.unlink(shard_id, node_id);
        } else {
            let ttl = self.topn_ttl;
            let peers =
                self.peers_of_node.entry(node_id).or_insert_with(|| TopN::new(TOP_N_N, ttl));
            let dropped = peers.put(stat);
            // the fresh insert itself may have lost the capacity eviction
            let inserted_survived = peers.get(shard_id).is_some();
            for gone in dropped {
                if gone.shard_id != shard_id {
                    self.unlink(gone.shard_id, node_id);
                }
            }
            if inserted_survived {
                self.nodes_of_shard.entry(shard_id).or_default().insert(node_id);
            } else {
                self.unlink(shard_id, node_id);
            }
        }
    }

    /// Whether the shard is hot at `min_hot_degree` or above. Write flow
    /// checks every replica; read flow only the leader.
    pub fn is_shard_hot(&self, hb: &ShardHeartbeat, min_hot_degree: u64) -> bool {
        match self.kind {
            FlowKind::Write => {
                hb.peers.iter().any(|p| self.node_hot(hb.shard_id, p.node_id, min_hot_degree))
            }
            FlowKind::Read => self.node_hot(hb.shard_id, hb.leader_node(), min_hot_degree),
        }
    }

    /// All cached records at `min_hot_degree` or above, grouped by node.
    /// Nodes whose cache holds only colder records map to an empty list.
    pub fn shard_stats(&self, min_hot_degree: u64) -> HashMap<NodeId, Vec<HotPeerStat>> {
        let mut res = HashMap::new();
        for (&node_id, topn) in &self.peers_of_node {
            let stats: Vec<HotPeerStat> =
                topn.iter().filter(|s| s.hot_degree >= min_hot_degree).cloned().collect();
            res.insert(node_id, stats);
        }
        res
    }

    /// Exports per-node cache gauges: cache length and the current
    /// thresholds. `hotThreshold` repeats the byte threshold for dashboards
    /// that predate the per-dimension split.
    pub fn collect_metrics(&self) {
        for (&node_id, topn) in &self.peers_of_node {
            let thresholds = self.calc_hot_thresholds(node_id);
            let kind = self.kind;
            self.metrics.set_hot_cache_status("total_length", node_id, kind, topn.len() as f64);
            self.metrics.set_hot_cache_status(
                "byte-rate-threshold",
                node_id,
                kind,
                thresholds[BYTE_DIM],
            );
            self.metrics.set_hot_cache_status(
                "key-rate-threshold",
                node_id,
                kind,
                thresholds[KEY_DIM],
            );
            self.metrics.set_hot_cache_status("hotThreshold", node_id, kind, thresholds[BYTE_DIM]);
        }
    }

    /// Hotness thresholds for one node: the static floor while its cache
    /// is sparse, else the biased rate of its n-th hottest shard.
    pub fn calc_hot_thresholds(&self, node_id: NodeId) -> [f64; DIM_LEN] {
        let min = self.kind.min_thresholds();
        let Some(topn) = self.peers_of_node.get(&node_id) else {
            return min;
        };
        if topn.len() < TOP_N_N {
            return min;
        }
        let byte_rank = topn.get_top_n_min(BYTE_DIM).map_or(0.0, |s| s.rolling_byte_rate());
        let key_rank = topn.get_top_n_min(KEY_DIM).map_or(0.0, |s| s.rolling_key_rate());
        [
            (byte_rank * HOT_THRESHOLD_RATIO).max(min[BYTE_DIM]),
            (key_rank * HOT_THRESHOLD_RATIO).max(min[KEY_DIM]),
        ]
    }

    pub(crate) fn old_stat(&self, shard_id: ShardId, node_id: NodeId) -> Option<&HotPeerStat> {
        self.peers_of_node.get(&node_id)?.get(shard_id)
    }

    fn unlink(&mut self, shard_id: ShardId, node_id: NodeId) {
        if let Some(nodes) = self.nodes_of_shard.get_mut(&shard_id) {
            nodes.remove(&node_id);
            if nodes.is_empty() {
                self.nodes_of_shard.remove(&shard_id);
            }
        }
    }

    fn node_hot(&self, shard_id: ShardId, node_id: NodeId, min_hot_degree: u64) -> bool {
        self.old_stat(shard_id, node_id).map_or(false, |s| s.hot_degree >= min_hot_degree)
    }

    /// Nodes to examine for this heartbeat: everywhere the shard was
    /// cached before, then its current placement. Read flow only follows
    /// the leader.
    fn candidate_nodes(&self, hb: &ShardHeartbeat) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        if let Some(nodes) = self.nodes_of_shard.get(&hb.shard_id) {
            for &node_id in nodes {
                if seen.insert(node_id) {
                    out.push(node_id);
                }
            }
        }
        for peer in &hb.peers {
            if self.kind == FlowKind::Read && peer.node_id != hb.leader_node() {
                continue;
            }
            if seen.insert(peer.node_id) {
                out.push(peer.node_id);
            }
        }
        out
    }

    /// A cached entry is stale when the replica left the node (write) or
    /// the node lost leadership (read).
    fn is_expired(&self, hb: &ShardHeartbeat, node_id: NodeId) -> bool {
        match self.kind {
            FlowKind::Write => hb.peer_on_node(node_id).is_none(),
            FlowKind::Read => hb.leader_node() != node_id,
        }
    }

    /// Leader moved since the last cached observation of this shard.
    fn just_transfer_leader(&self, hb: &ShardHeartbeat) -> bool {
        let Some(nodes) = self.nodes_of_shard.get(&hb.shard_id) else {
            return false;
        };
        for &node_id in nodes {
            if let Some(old) = self.old_stat(hb.shard_id, node_id) {
                if old.is_leader {
                    return old.node_id != hb.leader_node();
                }
            }
        }
        false
    }

    /// The prior's node kept the replica but fell out of the cache, so its
    /// history is too stale to extend.
    fn is_old_cold_peer(&self, old: &HotPeerStat, node_id: NodeId) -> bool {
        let was_peer = old.peers.contains(&node_id);
        let in_cache =
            self.nodes_of_shard.get(&old.shard_id).map_or(false, |nodes| nodes.contains(&node_id));
        was_peer && !in_cache
    }

    /// Hysteresis core: folds one observation into the prior record.
    /// Returns `None` for observations that should leave no trace.
    fn update_stat(
        &self,
        mut new: HotPeerStat,
        old: Option<HotPeerStat>,
        bytes: f64,
        keys: f64,
        interval: Duration,
    ) -> Option<HotPeerStat> {
        if new.need_delete {
            return Some(new);
        }

        let Some(old) = old else {
            if interval.is_zero() {
                return None;
            }
            let is_hot = new.byte_rate >= new.thresholds[BYTE_DIM]
                || new.key_rate >= new.thresholds[KEY_DIM];
            if !is_hot {
                return None;
            }
            if interval >= self.report_interval {
                new.hot_degree = 1;
                new.anti_count = HOT_SHARD_ANTI_COUNT;
            }
            new.is_new = true;
            new.init_rolling(self.report_interval, ROLLING_WINDOW_SIZE);
            new.add_flow(bytes, keys, interval);
            if new.rolling_full() {
                new.clear_last_average();
            }
            return Some(new);
        };

        if old.anti_count > HOT_SHARD_ANTI_COUNT {
            error!(
                shard = new.shard_id,
                node = new.node_id,
                anti_count = old.anti_count,
                "hot peer anti_count above ceiling"
            );
            debug_assert!(false, "anti_count above ceiling");
        }

        new.rolling_bytes = old.rolling_bytes.clone();
        new.rolling_keys = old.rolling_keys.clone();

        if new.just_transfer_leader {
            // The first report after a leader move was measured by the old
            // leader; keep the counters but skip the sample.
            new.hot_degree = old.hot_degree;
            new.anti_count = old.anti_count;
            new.last_transfer_leader = Some(Instant::now());
            return Some(new);
        }

        new.last_transfer_leader = old.last_transfer_leader;
        new.add_flow(bytes, keys, interval);

        if !new.rolling_full() {
            // Still warming up; carry the prior verdict unchanged.
            new.hot_degree = old.hot_degree;
            new.anti_count = old.anti_count;
        } else {
            if self.is_old_cold_peer(&old, new.node_id) {
                if new.is_full_and_hot() {
                    new.hot_degree = 1;
                    new.anti_count = HOT_SHARD_ANTI_COUNT;
                } else {
                    new.need_delete = true;
                }
            } else if new.is_full_and_hot() {
                new.hot_degree = old.hot_degree + 1;
                new.anti_count = HOT_SHARD_ANTI_COUNT;
            } else {
                new.hot_degree = old.hot_degree.saturating_sub(1);
                new.anti_count = old.anti_count.saturating_sub(1);
                if new.anti_count == 0 {
                    new.need_delete = true;
                }
            }
            new.clear_last_average();
        }
        Some(new)
    }

    #[cfg(test)]
    fn assert_bimap_consistent(&self) {
        for (&node_id, topn) in &self.peers_of_node {
            for stat in topn.iter() {
                assert!(
                    self.nodes_of_shard
                        .get(&stat.shard_id)
                        .is_some_and(|nodes| nodes.contains(&node_id)),
                    "shard {} cached on node {node_id} but not linked back",
                    stat.shard_id
                );
            }
        }
        for (&shard_id, nodes) in &self.nodes_of_shard {
            for &node_id in nodes {
                assert!(
                    self.old_stat(shard_id, node_id).is_some(),
                    "shard {shard_id} linked to node {node_id} but not cached there"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowKind;
    use std::time::Instant;

    fn cache(kind: FlowKind) -> HotPeerCache {
        HotPeerCache::new(kind, &HeartbeatConfig::default(), Arc::new(LoadMetrics::new()))
    }

    fn raw_stat(shard_id: ShardId, node_id: NodeId, byte_rate: f64, key_rate: f64) -> HotPeerStat {
        HotPeerStat {
            shard_id,
            node_id,
            kind: FlowKind::Write,
            byte_rate,
            key_rate,
            hot_degree: 1,
            anti_count: HOT_SHARD_ANTI_COUNT,
            thresholds: FlowKind::Write.min_thresholds(),
            is_leader: false,
            last_update: Instant::now(),
            rolling_bytes: None,
            rolling_keys: None,
            last_transfer_leader: None,
            just_transfer_leader: false,
            interval_secs: 60,
            need_delete: false,
            is_new: false,
            peers: vec![node_id],
        }
    }

    #[test]
    fn sparse_node_uses_threshold_floor() {
        let mut cache = cache(FlowKind::Write);
        for shard_id in 0..(TOP_N_N as u64 - 1) {
            cache.update(raw_stat(shard_id, 1, 1.0e6, 1.0e3));
        }
        assert_eq!(cache.calc_hot_thresholds(1), FlowKind::Write.min_thresholds());
        assert_eq!(cache.calc_hot_thresholds(99), FlowKind::Write.min_thresholds());
    }

    #[test]
    fn full_node_adapts_thresholds_above_floor() {
        let mut cache = cache(FlowKind::Write);
        for i in 1..=(TOP_N_N as u64) {
            cache.update(raw_stat(i, 1, 10_000.0 + 100.0 * i as f64, i as f64));
        }
        let thresholds = cache.calc_hot_thresholds(1);
        // n-th largest byte rate is 10_100; keys stay below the floor
        assert!((thresholds[BYTE_DIM] - 10_100.0 * HOT_THRESHOLD_RATIO).abs() < 1e-9);
        assert_eq!(thresholds[KEY_DIM], FlowKind::Write.min_thresholds()[KEY_DIM]);
    }

    #[test]
    fn capacity_eviction_keeps_bimap_consistent() {
        let mut cache = cache(FlowKind::Write);
        // one over the TopN internal capacity
        for shard_id in 0..(3 * TOP_N_N as u64 + 1) {
            cache.update(raw_stat(shard_id, 7, 1000.0 + shard_id as f64, 50.0));
            cache.assert_bimap_consistent();
        }
        // the coldest shard was evicted and unlinked on both sides
        assert!(cache.old_stat(0, 7).is_none());
        assert!(!cache.nodes_of_shard.contains_key(&0));
    }

    #[test]
    fn delete_applies_to_both_indexes() {
        let mut cache = cache(FlowKind::Write);
        cache.update(raw_stat(5, 2, 2048.0, 64.0));
        assert!(cache.old_stat(5, 2).is_some());

        let mut terminal = raw_stat(5, 2, 0.0, 0.0);
        terminal.need_delete = true;
        cache.update(terminal);
        assert!(cache.old_stat(5, 2).is_none());
        assert!(!cache.nodes_of_shard.contains_key(&5));
        cache.assert_bimap_consistent();
    }

    #[test]
    fn denoising_drops_short_reports() {
        use crate::heartbeat::{Peer, ShardHeartbeat};
        let cache = cache(FlowKind::Write);
        let hb = ShardHeartbeat::new(1, vec![Peer::new(1, 1)], Peer::new(1, 1))
            .with_interval(HOT_SHARD_REPORT_MIN_INTERVAL_SECS - 1)
            .with_written(1 << 20, 1 << 10);
        assert!(cache.check_shard_flow(&hb).is_empty());

        let quiet = HeartbeatConfig { denoising: false, ..Default::default() };
        let cache = HotPeerCache::new(FlowKind::Write, &quiet, Arc::new(LoadMetrics::new()));
        assert_eq!(cache.check_shard_flow(&hb).len(), 1);
    }
}
