//! Inbound heartbeat payloads.
//!
//! Nodes report two streams: per-shard flow heartbeats and per-node
//! utilization heartbeats. Both arrive already decoded; transport and
//! codec live elsewhere in the platform. Leader-less shard heartbeats are
//! rejected before they reach this crate, so `leader` is not optional.

use serde::{Deserialize, Serialize};

use crate::{NodeId, ShardId};

/// Role of a peer within its shard's Raft group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Full voting member.
    #[default]
    Voter,
    /// Non-voting learner replica.
    Learner,
    /// Voter being added through joint consensus.
    IncomingVoter,
    /// Voter being demoted through joint consensus.
    DemotingVoter,
}

/// One replica of a shard placed on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Peer {
    /// Unique peer id.
    pub id: u64,
    /// Node holding this replica.
    pub node_id: NodeId,
    /// Raft role of the replica.
    pub role: PeerRole,
}

impl Peer {
    /// Voter peer with the given ids.
    pub fn new(id: u64, node_id: NodeId) -> Self {
        Peer { id, node_id, role: PeerRole::Voter }
    }
}

/// Version pair guarding shard membership and range changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShardEpoch {
    /// Bumped on membership changes.
    pub conf_ver: u64,
    /// Bumped on splits and merges.
    pub version: u64,
}

/// Reporting window covered by a shard heartbeat, in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportInterval {
    /// Window start.
    pub start_s: u64,
    /// Window end.
    pub end_s: u64,
}

/// Periodic flow report for one shard, sent by its leader's node.
///
/// Counters are cumulative over the reporting window; rates are derived
/// by the statistics layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardHeartbeat {
    /// Shard being reported.
    pub shard_id: ShardId,
    /// Membership/range epoch at report time.
    pub epoch: ShardEpoch,
    /// All replicas of the shard.
    pub peers: Vec<Peer>,
    /// Current leader replica.
    pub leader: Peer,
    /// Bytes written over the window.
    pub bytes_written: u64,
    /// Bytes read over the window.
    pub bytes_read: u64,
    /// Keys written over the window.
    pub keys_written: u64,
    /// Keys read over the window.
    pub keys_read: u64,
    /// Window covered by the counters.
    pub interval: ReportInterval,
}

impl ShardHeartbeat {
    /// Heartbeat with zeroed counters and an empty window.
    pub fn new(shard_id: ShardId, peers: Vec<Peer>, leader: Peer) -> Self {
        ShardHeartbeat {
            shard_id,
            epoch: ShardEpoch::default(),
            peers,
            leader,
            bytes_written: 0,
            bytes_read: 0,
            keys_written: 0,
            keys_read: 0,
            interval: ReportInterval::default(),
        }
    }

    /// Sets the reporting window to `[0, secs]`.
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval = ReportInterval { start_s: 0, end_s: secs };
        self
    }

    /// Sets the cumulative write counters.
    pub fn with_written(mut self, bytes: u64, keys: u64) -> Self {
        self.bytes_written = bytes;
        self.keys_written = keys;
        self
    }

    /// Sets the cumulative read counters.
    pub fn with_read(mut self, bytes: u64, keys: u64) -> Self {
        self.bytes_read = bytes;
        self.keys_read = keys;
        self
    }

    /// Seconds covered by the reporting window.
    pub fn interval_secs(&self) -> u64 {
        self.interval.end_s.saturating_sub(self.interval.start_s)
    }

    /// Node the current leader lives on.
    pub fn leader_node(&self) -> NodeId {
        self.leader.node_id
    }

    /// Replica placed on `node_id`, if any.
    pub fn peer_on_node(&self, node_id: NodeId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.node_id == node_id)
    }
}

/// Periodic utilization report for one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeHeartbeat {
    /// Reporting node.
    pub node_id: NodeId,
    /// Busy percentage per sampled serving thread.
    pub cpu_usages: Vec<u64>,
    /// I/O wait percentage.
    pub io_wait_percent: u64,
    /// Requests queued but not yet served.
    pub pending_requests: u64,
    /// Bytes written since the last report.
    pub bytes_written: u64,
    /// Bytes read since the last report.
    pub bytes_read: u64,
    /// Keys written since the last report.
    pub keys_written: u64,
    /// Keys read since the last report.
    pub keys_read: u64,
    /// Seconds since the last report.
    pub interval_secs: u64,
    /// Total store capacity in bytes.
    pub capacity_bytes: u64,
    /// Bytes currently used.
    pub used_bytes: u64,
    /// Bytes still available.
    pub available_bytes: u64,
}

impl NodeHeartbeat {
    /// Mean busy percentage across sampled threads, zero when unsampled.
    pub fn cpu_percent(&self) -> f64 {
        if self.cpu_usages.is_empty() {
            return 0.0;
        }
        self.cpu_usages.iter().sum::<u64>() as f64 / self.cpu_usages.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_window_width() {
        let hb = ShardHeartbeat::new(1, vec![Peer::new(1, 1)], Peer::new(1, 1)).with_interval(60);
        assert_eq!(hb.interval_secs(), 60);

        // reversed windows saturate instead of wrapping
        let mut hb = hb;
        hb.interval = ReportInterval { start_s: 100, end_s: 40 };
        assert_eq!(hb.interval_secs(), 0);
    }

    #[test]
    fn cpu_percent_averages_threads() {
        let hb = NodeHeartbeat { node_id: 1, cpu_usages: vec![10, 20, 30], ..Default::default() };
        assert!((hb.cpu_percent() - 20.0).abs() < f64::EPSILON);
        assert_eq!(NodeHeartbeat::default().cpu_percent(), 0.0);
    }
}
