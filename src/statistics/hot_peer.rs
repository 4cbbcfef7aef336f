//! Per-(shard, node) hot flow record.

use std::time::{Duration, Instant};

use crate::flow::{FlowKind, BYTE_DIM, DIM_LEN, KEY_DIM};
use crate::statistics::rolling::RollingFlowStat;
use crate::statistics::topn::TopNItem;
use crate::{NodeId, ShardId};

/// One observation chain for a shard replica's flow on a node.
///
/// The instantaneous rates cover the latest reporting window only; the
/// rolling rates smooth over several windows and gate all hotness
/// decisions once they are warmed up. `hot_degree` integrates consecutive
/// hot evidence and `anti_count` grants a removal grace period, so a shard
/// neither flaps hot on one spike nor vanishes over one quiet heartbeat.
#[derive(Debug, Clone)]
pub struct HotPeerStat {
    /// Shard this record tracks.
    pub shard_id: ShardId,
    /// Node the tracked replica lives on.
    pub node_id: NodeId,
    /// Flow direction feeding this record.
    pub kind: FlowKind,
    /// Bytes/sec over the latest reporting window.
    pub byte_rate: f64,
    /// Keys/sec over the latest reporting window.
    pub key_rate: f64,
    /// Consecutive hot observations minus cold decrements.
    pub hot_degree: u64,
    /// Cold observations the record may still absorb before removal.
    pub anti_count: u64,
    /// Hotness thresholds snapshotted at decision time, per dimension.
    pub thresholds: [f64; DIM_LEN],
    /// Whether the replica was the shard leader at observation time.
    pub is_leader: bool,
    /// When this record was produced.
    pub last_update: Instant,
    /// When leadership last moved onto this node, if it ever did while
    /// the record was tracked.
    pub last_transfer_leader: Option<Instant>,
    /// Seconds covered by the observation that produced this record.
    pub interval_secs: u64,

    pub(crate) rolling_bytes: Option<RollingFlowStat>,
    pub(crate) rolling_keys: Option<RollingFlowStat>,
    pub(crate) just_transfer_leader: bool,
    pub(crate) need_delete: bool,
    pub(crate) is_new: bool,
    pub(crate) peers: Vec<NodeId>,
}

impl HotPeerStat {
    /// Whether this is the terminal record for its (shard, node) pair; the
    /// cache drops the entry when applying it.
    pub fn need_delete(&self) -> bool {
        self.need_delete
    }

    /// Whether the record was created by this observation rather than
    /// carried over from a cached prior.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Smoothed bytes/sec; falls back to the instantaneous rate before the
    /// rolling window exists.
    pub fn rolling_byte_rate(&self) -> f64 {
        match &self.rolling_bytes {
            Some(r) => r.get().round(),
            None => self.byte_rate.round(),
        }
    }

    /// Smoothed keys/sec; falls back to the instantaneous rate before the
    /// rolling window exists.
    pub fn rolling_key_rate(&self) -> f64 {
        match &self.rolling_keys {
            Some(r) => r.get().round(),
            None => self.key_rate.round(),
        }
    }

    pub(crate) fn init_rolling(&mut self, bucket: Duration, window: usize) {
        self.rolling_bytes = Some(RollingFlowStat::new(bucket, window));
        self.rolling_keys = Some(RollingFlowStat::new(bucket, window));
    }

    pub(crate) fn add_flow(&mut self, bytes: f64, keys: f64, interval: Duration) {
        if let Some(r) = self.rolling_bytes.as_mut() {
            r.add(bytes, interval);
        }
        if let Some(r) = self.rolling_keys.as_mut() {
            r.add(keys, interval);
        }
    }

    pub(crate) fn rolling_full(&self) -> bool {
        self.rolling_bytes.as_ref().map_or(false, RollingFlowStat::is_full)
    }

    /// Warmed up and at or above threshold in both dimensions.
    pub(crate) fn is_full_and_hot(&self) -> bool {
        self.rolling_full()
            && self.rolling_byte_rate() >= self.thresholds[BYTE_DIM]
            && self.rolling_key_rate() >= self.thresholds[KEY_DIM]
    }

    pub(crate) fn clear_last_average(&mut self) {
        if let Some(r) = self.rolling_bytes.as_mut() {
            r.clear_last_average();
        }
        if let Some(r) = self.rolling_keys.as_mut() {
            r.clear_last_average();
        }
    }
}

impl TopNItem for HotPeerStat {
    fn item_id(&self) -> u64 {
        self.shard_id
    }

    fn dim_rate(&self, dim: usize) -> f64 {
        match dim {
            BYTE_DIM => self.rolling_byte_rate(),
            KEY_DIM => self.rolling_key_rate(),
            _ => unreachable!("unknown flow dimension {dim}"),
        }
    }
}
