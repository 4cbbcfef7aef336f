//! Cluster load classification from node heartbeats.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::heartbeat::NodeHeartbeat;
use crate::statistics::rolling::Ema;
use crate::NodeId;

/// Discrete cluster-wide load classification.
///
/// Ordered from unclassified to saturated; the order drives metric
/// fan-out and the adjacency rule in the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Not enough history to classify.
    None,
    /// Practically no serving load.
    Idle,
    /// Light load.
    Low,
    /// Steady-state load.
    Normal,
    /// Saturated; placement work should back off.
    High,
}

impl LoadState {
    /// Every state, in label order.
    pub const ALL: [LoadState; 5] =
        [LoadState::None, LoadState::Idle, LoadState::Low, LoadState::Normal, LoadState::High];

    /// Stable label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::None => "none",
            LoadState::Idle => "idle",
            LoadState::Low => "low",
            LoadState::Normal => "normal",
            LoadState::High => "high",
        }
    }

    fn rank(self) -> i8 {
        match self {
            LoadState::None => 0,
            LoadState::Idle => 1,
            LoadState::Low => 2,
            LoadState::Normal => 3,
            LoadState::High => 4,
        }
    }

    fn is_adjacent(self, other: LoadState) -> bool {
        (self.rank() - other.rank()).abs() == 1
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct NodeLoad {
    cpu: Ema,
    last_update: Instant,
}

/// Classifies cluster load from a stream of node heartbeats.
///
/// Keeps a smoothed CPU aggregate per node and maps the cluster mean
/// through a rule table. Two stabilizers apply: the classifier stays at
/// `None` until enough ticks have been collected, and a jump between
/// non-adjacent states must repeat on the next observation before it
/// commits.
#[derive(Debug)]
pub struct LoadClassifier {
    config: ClassifierConfig,
    nodes: HashMap<NodeId, NodeLoad>,
    ticks: u64,
    current: LoadState,
    pending: Option<LoadState>,
}

impl LoadClassifier {
    /// Classifier starting at `LoadState::None`.
    pub fn new(config: ClassifierConfig) -> Self {
        LoadClassifier {
            config,
            nodes: HashMap::new(),
            ticks: 0,
            current: LoadState::None,
            pending: None,
        }
    }

    /// Ingests one node tick and advances the classification.
    pub fn collect(&mut self, hb: &NodeHeartbeat) {
        let now = Instant::now();
        let stale_after = self.config.stale_after;
        self.nodes.retain(|_, load| now.duration_since(load.last_update) < stale_after);

        let load = self.nodes.entry(hb.node_id).or_insert_with(|| NodeLoad {
            cpu: Ema::new(self.config.smoothing),
            last_update: now,
        });
        load.cpu.observe(hb.cpu_percent());
        load.last_update = now;
        self.ticks += 1;

        let raw = self.raw_state();
        self.advance(raw);
    }

    /// Current committed classification.
    pub fn state(&self) -> LoadState {
        self.current
    }

    fn raw_state(&self) -> LoadState {
        if self.ticks < self.config.history_size as u64 || self.nodes.is_empty() {
            return LoadState::None;
        }
        let sum: f64 = self.nodes.values().map(|load| load.cpu.get()).sum();
        let cpu = sum / self.nodes.len() as f64;
        if cpu < self.config.idle_below {
            LoadState::Idle
        } else if cpu < self.config.low_below {
            LoadState::Low
        } else if cpu < self.config.normal_below {
            LoadState::Normal
        } else {
            LoadState::High
        }
    }

    fn advance(&mut self, raw: LoadState) {
        if raw == self.current {
            self.pending = None;
            return;
        }
        if self.current.is_adjacent(raw) {
            self.current = raw;
            self.pending = None;
            return;
        }
        // Distant jumps need a confirming observation in the same zone.
        if self.pending == Some(raw) {
            self.current = raw;
            self.pending = None;
        } else {
            self.pending = Some(raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(node_id: NodeId, cpu: u64) -> NodeHeartbeat {
        NodeHeartbeat { node_id, cpu_usages: vec![cpu], interval_secs: 10, ..Default::default() }
    }

    fn classifier(history: usize) -> LoadClassifier {
        LoadClassifier::new(ClassifierConfig { history_size: history, ..Default::default() })
    }

    #[test]
    fn none_until_enough_history() {
        let mut cls = classifier(5);
        for _ in 0..4 {
            cls.collect(&tick(1, 3));
            assert_eq!(cls.state(), LoadState::None);
        }
        cls.collect(&tick(1, 3));
        assert_eq!(cls.state(), LoadState::Idle);
    }

    #[test]
    fn higher_cpu_never_classifies_lower() {
        let mut prev = LoadState::None;
        for cpu in [2u64, 7, 20, 60] {
            let mut cls = classifier(1);
            // enough confirming ticks for any distant jump to commit
            for _ in 0..3 {
                cls.collect(&tick(1, cpu));
            }
            assert!(cls.state() >= prev, "cpu {cpu} classified below {prev}");
            prev = cls.state();
        }
    }

    #[test]
    fn distant_jump_needs_confirmation() {
        let mut cls = classifier(1);
        for _ in 0..3 {
            cls.collect(&tick(1, 2));
        }
        assert_eq!(cls.state(), LoadState::Idle);

        // EMA 0.6: one 90% tick lands the aggregate deep in the High zone
        cls.collect(&tick(1, 90));
        assert_eq!(cls.state(), LoadState::Idle, "jumped two zones in one tick");
        cls.collect(&tick(1, 90));
        assert_eq!(cls.state(), LoadState::High);
    }

    #[test]
    fn single_step_commits_immediately() {
        let mut cls = classifier(1);
        for _ in 0..3 {
            cls.collect(&tick(1, 2));
        }
        assert_eq!(cls.state(), LoadState::Idle);

        // nudge the aggregate into the Low zone only
        cls.collect(&tick(1, 12));
        assert_eq!(cls.state(), LoadState::Low);
    }

    #[test]
    fn aggregates_across_nodes() {
        let mut cls = classifier(2);
        cls.collect(&tick(1, 2));
        cls.collect(&tick(2, 14));
        // the mean of 2 and 14 sits in the Low zone; the jump from None
        // is distant, so it commits on the confirming pass
        cls.collect(&tick(1, 2));
        cls.collect(&tick(2, 14));
        assert_eq!(cls.state(), LoadState::Low);
    }
}
