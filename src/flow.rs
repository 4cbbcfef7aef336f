//! Flow kinds and flow dimensions.
//!
//! A shard heartbeat reports read and write traffic separately; the hot
//! caches track the two directions independently. Each direction is
//! measured in two dimensions: bytes per second and keys per second.

use serde::{Deserialize, Serialize};

use crate::heartbeat::ShardHeartbeat;

/// Number of tracked flow dimensions.
pub const DIM_LEN: usize = 2;
/// Index of the bytes-per-second dimension.
pub const BYTE_DIM: usize = 0;
/// Index of the keys-per-second dimension.
pub const KEY_DIM: usize = 1;

/// Direction of shard traffic tracked by a hot-peer cache.
///
/// Write flow is produced by every replica of a shard; read flow only by
/// its leader. The accessors below keep that asymmetry in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Leader-served read traffic.
    Read,
    /// Replicated write traffic.
    Write,
}

impl FlowKind {
    /// Metric label for this kind.
    pub fn label(self) -> &'static str {
        match self {
            FlowKind::Read => "read",
            FlowKind::Write => "write",
        }
    }

    /// Hotness floors per dimension. A shard is never considered hot below
    /// these rates no matter how idle the rest of the node is.
    pub fn min_thresholds(self) -> [f64; DIM_LEN] {
        match self {
            FlowKind::Write => [1024.0, 32.0],
            FlowKind::Read => [8.0 * 1024.0, 128.0],
        }
    }

    /// Cumulative bytes of this kind covered by the heartbeat.
    pub(crate) fn shard_bytes(self, hb: &ShardHeartbeat) -> u64 {
        match self {
            FlowKind::Read => hb.bytes_read,
            FlowKind::Write => hb.bytes_written,
        }
    }

    /// Cumulative keys of this kind covered by the heartbeat.
    pub(crate) fn shard_keys(self, hb: &ShardHeartbeat) -> u64 {
        match self {
            FlowKind::Read => hb.keys_read,
            FlowKind::Write => hb.keys_written,
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
