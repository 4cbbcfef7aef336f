//! In-process metrics for the load-awareness subsystem.
//!
//! The platform exports metrics through its own monitoring pipeline rather
//! than an external registry, so this module keeps plain label→value maps
//! and bounded-sample histograms that the exporter snapshots on its own
//! cadence.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cluster::state::LoadState;
use crate::flow::FlowKind;
use crate::NodeId;

/// Samples kept per histogram for percentile-ish snapshots.
const HISTOGRAM_SAMPLE_CAP: usize = 512;

/// Metric registry shared by the caches and the limiter.
#[derive(Debug, Default)]
pub struct LoadMetrics {
    /// 1.0 for the current cluster state, 0.0 for the other labels.
    cluster_state: DashMap<&'static str, f64>,
    /// Hot-cache gauges keyed by (metric, node, kind label).
    hot_cache_status: DashMap<(String, NodeId, &'static str), f64>,
    /// Width of every shard reporting window, including zero-length ones.
    shard_heartbeat_interval: Histogram,
    read_byte_rate: Histogram,
    read_key_rate: Histogram,
    write_byte_rate: Histogram,
    write_key_rate: Histogram,
}

impl LoadMetrics {
    /// Empty registry.
    pub fn new() -> Self {
        LoadMetrics::default()
    }

    /// Fans the current state out across all state labels.
    pub fn set_cluster_state(&self, state: LoadState) {
        for s in LoadState::ALL {
            self.cluster_state.insert(s.as_str(), if s == state { 1.0 } else { 0.0 });
        }
    }

    /// Gauge value for one state label; zero when never set.
    pub fn cluster_state(&self, state: LoadState) -> f64 {
        self.cluster_state.get(state.as_str()).map(|v| *v).unwrap_or(0.0)
    }

    pub(crate) fn set_hot_cache_status(
        &self,
        metric: &str,
        node_id: NodeId,
        kind: FlowKind,
        value: f64,
    ) {
        self.hot_cache_status.insert((metric.to_string(), node_id, kind.label()), value);
    }

    /// Hot-cache gauge for one (metric, node, kind) triple.
    pub fn hot_cache_status(&self, metric: &str, node_id: NodeId, kind: FlowKind) -> Option<f64> {
        self.hot_cache_status.get(&(metric.to_string(), node_id, kind.label())).map(|v| *v)
    }

    pub(crate) fn observe_shard_flow(
        &self,
        kind: FlowKind,
        byte_rate: f64,
        key_rate: f64,
        interval_secs: u64,
    ) {
        self.shard_heartbeat_interval.observe(interval_secs as f64);
        if interval_secs == 0 {
            return;
        }
        match kind {
            FlowKind::Read => {
                self.read_byte_rate.observe(byte_rate);
                self.read_key_rate.observe(key_rate);
            }
            FlowKind::Write => {
                self.write_byte_rate.observe(byte_rate);
                self.write_key_rate.observe(key_rate);
            }
        }
    }

    /// Snapshot of every histogram for the exporter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            shard_heartbeat_interval: self.shard_heartbeat_interval.snapshot(),
            read_byte_rate: self.read_byte_rate.snapshot(),
            read_key_rate: self.read_key_rate.snapshot(),
            write_byte_rate: self.write_byte_rate.snapshot(),
            write_key_rate: self.write_key_rate.snapshot(),
        }
    }
}

/// Point-in-time view of the flow histograms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Reporting-window widths, seconds.
    pub shard_heartbeat_interval: HistogramSnapshot,
    /// Leader read flow, bytes/sec.
    pub read_byte_rate: HistogramSnapshot,
    /// Leader read flow, keys/sec.
    pub read_key_rate: HistogramSnapshot,
    /// Replicated write flow, bytes/sec.
    pub write_byte_rate: HistogramSnapshot,
    /// Replicated write flow, keys/sec.
    pub write_key_rate: HistogramSnapshot,
}

/// Streaming histogram with a bounded sample window.
#[derive(Debug, Default)]
pub struct Histogram {
    inner: Mutex<HistogramInner>,
}

#[derive(Debug, Default)]
struct HistogramInner {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    samples: VecDeque<f64>,
}

impl Histogram {
    /// Records one observation.
    pub fn observe(&self, value: f64) {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            inner.min = value;
            inner.max = value;
        } else {
            inner.min = inner.min.min(value);
            inner.max = inner.max.max(value);
        }
        inner.count += 1;
        inner.sum += value;
        if inner.samples.len() == HISTOGRAM_SAMPLE_CAP {
            inner.samples.pop_front();
        }
        inner.samples.push_back(value);
    }

    /// Aggregate view of everything observed so far.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.lock();
        HistogramSnapshot {
            count: inner.count,
            sum: inner.sum,
            mean: if inner.count == 0 { 0.0 } else { inner.sum / inner.count as f64 },
            min: inner.min,
            max: inner.max,
        }
    }
}

/// Aggregates for one histogram.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Observations recorded.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Mean observation.
    pub mean: f64,
    /// Smallest observation.
    pub min: f64,
    /// Largest observation.
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_state_fan_out() {
        let metrics = LoadMetrics::new();
        metrics.set_cluster_state(LoadState::Normal);
        assert_eq!(metrics.cluster_state(LoadState::Normal), 1.0);
        assert_eq!(metrics.cluster_state(LoadState::Idle), 0.0);

        metrics.set_cluster_state(LoadState::High);
        assert_eq!(metrics.cluster_state(LoadState::Normal), 0.0);
        assert_eq!(metrics.cluster_state(LoadState::High), 1.0);
    }

    #[test]
    fn zero_interval_skips_rate_histograms() {
        let metrics = LoadMetrics::new();
        metrics.observe_shard_flow(FlowKind::Write, 100.0, 10.0, 0);
        let snap = metrics.snapshot();
        assert_eq!(snap.shard_heartbeat_interval.count, 1);
        assert_eq!(snap.write_byte_rate.count, 0);

        metrics.observe_shard_flow(FlowKind::Write, 100.0, 10.0, 60);
        let snap = metrics.snapshot();
        assert_eq!(snap.write_byte_rate.count, 1);
        assert_eq!(snap.write_key_rate.mean, 10.0);
    }

    #[test]
    fn histogram_tracks_extremes() {
        let hist = Histogram::default();
        for v in [4.0, 1.0, 9.0] {
            hist.observe(v);
        }
        let snap = hist.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.min, 1.0);
        assert_eq!(snap.max, 9.0);
        assert!((snap.mean - 14.0 / 3.0).abs() < 1e-9);
    }
}
