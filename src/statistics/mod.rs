//! Hotspot statistics: rolling rates, bounded top-N caches, and the
//! hot-peer tracking built on top of them.

pub mod hot_peer;
pub mod hot_peer_cache;
pub mod hot_stat;
pub mod node_stats;
pub mod rolling;
pub mod topn;

pub use hot_peer::HotPeerStat;
pub use hot_peer_cache::{
    HotPeerCache, HOT_SHARD_ANTI_COUNT, HOT_SHARD_REPORT_MIN_INTERVAL_SECS, HOT_THRESHOLD_RATIO,
    ROLLING_WINDOW_SIZE, TOP_N_N,
};
pub use hot_stat::{HotCache, HotStat};
pub use node_stats::{NodeFlowSnapshot, NodesStats};
pub use rolling::{Ema, RollingFlowStat};
pub use topn::{TopN, TopNItem};
