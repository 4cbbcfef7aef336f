//! Placement operations and their per-state admission rates.

use serde::{Deserialize, Serialize};

use crate::cluster::state::LoadState;

/// Placement operation subject to a cluster-wide admission limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitOp {
    /// Adding a replica to a shard.
    AddPeer,
    /// Removing a replica from a shard.
    RemovePeer,
}

impl LimitOp {
    /// Both limit operations, in publication order.
    pub const ALL: [LimitOp; 2] = [LimitOp::AddPeer, LimitOp::RemovePeer];

    /// Stable label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            LimitOp::AddPeer => "add-peer",
            LimitOp::RemovePeer => "remove-peer",
        }
    }
}

impl std::fmt::Display for LimitOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission rates for one operation, keyed by cluster load state.
///
/// All rates are ops/sec across the fleet. `LoadState::None` has no row;
/// an unclassified cluster publishes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Rate while the cluster is idle.
    pub idle: f64,
    /// Rate under low load.
    pub low: f64,
    /// Rate under normal load.
    pub normal: f64,
    /// Rate under high load.
    pub high: f64,
}

impl Scene {
    /// Rate for the given load state; zero when unclassified.
    pub fn rate_for(&self, state: LoadState) -> f64 {
        match state {
            LoadState::None => 0.0,
            LoadState::Idle => self.idle,
            LoadState::Low => self.low,
            LoadState::Normal => self.normal,
            LoadState::High => self.high,
        }
    }

    /// Stock scene for the given operation.
    pub fn default_for(_op: LimitOp) -> Scene {
        Scene { idle: 100.0, low: 50.0, normal: 32.0, high: 12.0 }
    }
}
