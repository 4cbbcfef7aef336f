//! Dynamic admission-rate controller for placement operations.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cluster::state::{LoadClassifier, LoadState};
use crate::config::LoadAwareConfig;
use crate::error::Result;
use crate::heartbeat::NodeHeartbeat;
use crate::limit::{LimitOp, Scene};
use crate::metrics::LoadMetrics;

/// Receiver of fleet-wide rate updates, typically the persisted options
/// the per-node limiters read from.
///
/// Implementations must be cheap: the controller calls this under its
/// writer lock on every classified tick. The setter is idempotent and may
/// coalesce repeated values.
pub trait RateSink: Send + Sync {
    /// Applies `rate` (ops/sec) as the limit for `op` on every node.
    fn set_all_nodes_limit(&self, op: LimitOp, rate: f64) -> Result<()>;
}

#[derive(Debug)]
struct LimiterInner {
    scenes: HashMap<LimitOp, Scene>,
    classifier: LoadClassifier,
    current: LoadState,
    published: HashMap<LimitOp, f64>,
}

/// Maps the classified cluster state through per-operation scene tables
/// and publishes the resulting admission rates.
///
/// A single reader-writer lock serializes mutation; `collect` takes the
/// writer side because it advances the classifier and the observed state.
pub struct ClusterLimiter {
    inner: RwLock<LimiterInner>,
    sink: Arc<dyn RateSink>,
    metrics: Arc<LoadMetrics>,
}

impl ClusterLimiter {
    /// Controller with the configured scene tables, starting unclassified.
    pub fn new(
        config: &LoadAwareConfig,
        sink: Arc<dyn RateSink>,
        metrics: Arc<LoadMetrics>,
    ) -> Self {
        let scenes = LimitOp::ALL.iter().map(|&op| (op, config.limits.scene(op))).collect();
        ClusterLimiter {
            inner: RwLock::new(LimiterInner {
                scenes,
                classifier: LoadClassifier::new(config.classifier.clone()),
                current: LoadState::None,
                published: HashMap::new(),
            }),
            sink,
            metrics,
        }
    }

    /// Ingests one node tick, reclassifies, and publishes any changed
    /// rates. Publication is best-effort: a failing sink is logged and the
    /// rate retried on the next tick.
    pub fn collect(&self, hb: &NodeHeartbeat) {
        let mut inner = self.inner.write();
        debug!(node = hb.node_id, cpu = hb.cpu_percent(), "collected node statistics");
        inner.classifier.collect(hb);
        let state = inner.classifier.state();

        let rates: Vec<(LimitOp, f64)> =
            LimitOp::ALL.iter().map(|&op| (op, inner.scenes[&op].rate_for(state))).collect();
        if rates.iter().all(|(_, rate)| *rate <= 0.0) {
            // An unclassified cluster publishes nothing and, by design,
            // leaves the observed state where it was.
            return;
        }

        for (op, rate) in rates {
            if rate <= 0.0 {
                continue;
            }
            if inner.published.get(&op) == Some(&rate) {
                continue;
            }
            match self.sink.set_all_nodes_limit(op, rate) {
                Ok(()) => {
                    inner.published.insert(op, rate);
                    info!(%op, rate, %state, "changed cluster placement limit");
                }
                Err(err) => {
                    warn!(%op, rate, error = %err, "rate sink rejected placement limit");
                }
            }
        }
        inner.current = state;
        self.metrics.set_cluster_state(state);
    }

    /// Replaces the scene table for one operation.
    pub fn replace_scene(&self, op: LimitOp, scene: Scene) {
        self.inner.write().scenes.insert(op, scene);
    }

    /// Snapshot of the scene table for one operation.
    pub fn scene(&self, op: LimitOp) -> Scene {
        self.inner.read().scenes[&op]
    }

    /// Last load state that produced a publication.
    pub fn current_state(&self) -> LoadState {
        self.inner.read().current
    }
}

impl std::fmt::Debug for ClusterLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ClusterLimiter")
            .field("current", &inner.current)
            .field("published", &inner.published)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassifierConfig;
    use crate::error::Error;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MockSink {
        calls: Mutex<Vec<(LimitOp, f64)>>,
        fail: AtomicBool,
    }

    impl RateSink for MockSink {
        fn set_all_nodes_limit(&self, op: LimitOp, rate: f64) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Sink { op, rate, reason: "store unavailable".into() });
            }
            self.calls.lock().push((op, rate));
            Ok(())
        }
    }

    fn config() -> LoadAwareConfig {
        LoadAwareConfig {
            classifier: ClassifierConfig { history_size: 1, ..Default::default() },
            ..Default::default()
        }
    }

    fn tick(cpu: u64) -> NodeHeartbeat {
        NodeHeartbeat { node_id: 1, cpu_usages: vec![cpu], interval_secs: 10, ..Default::default() }
    }

    #[test]
    fn unclassified_cluster_publishes_nothing() {
        let sink = Arc::new(MockSink::default());
        let limiter = ClusterLimiter::new(
            &LoadAwareConfig::default(), // history 30, so the tick stays None
            sink.clone(),
            Arc::new(LoadMetrics::new()),
        );
        limiter.collect(&tick(20));
        assert!(sink.calls.lock().is_empty());
        assert_eq!(limiter.current_state(), LoadState::None);
    }

    #[test]
    fn repeated_rates_publish_once() {
        let sink = Arc::new(MockSink::default());
        let metrics = Arc::new(LoadMetrics::new());
        let limiter = ClusterLimiter::new(&config(), sink.clone(), metrics.clone());

        // Idle commits adjacent to None on the first classified tick
        limiter.collect(&tick(2));
        assert_eq!(limiter.current_state(), LoadState::Idle);
        {
            let calls = sink.calls.lock();
            assert_eq!(calls.len(), 2);
            assert!(calls.contains(&(LimitOp::AddPeer, 100.0)));
            assert!(calls.contains(&(LimitOp::RemovePeer, 100.0)));
        }
        assert_eq!(metrics.cluster_state(LoadState::Idle), 1.0);

        limiter.collect(&tick(2));
        assert_eq!(sink.calls.lock().len(), 2, "unchanged rates were republished");
    }

    #[test]
    fn failed_publication_retries_next_tick() {
        let sink = Arc::new(MockSink::default());
        let limiter =
            ClusterLimiter::new(&config(), sink.clone(), Arc::new(LoadMetrics::new()));

        sink.fail.store(true, Ordering::SeqCst);
        limiter.collect(&tick(2));
        assert!(sink.calls.lock().is_empty());
        // the state still moved; only the publication is outstanding
        assert_eq!(limiter.current_state(), LoadState::Idle);

        sink.fail.store(false, Ordering::SeqCst);
        limiter.collect(&tick(2));
        assert_eq!(sink.calls.lock().len(), 2);
    }

    #[test]
    fn replace_scene_changes_published_rate() {
        let sink = Arc::new(MockSink::default());
        let limiter =
            ClusterLimiter::new(&config(), sink.clone(), Arc::new(LoadMetrics::new()));

        limiter.replace_scene(
            LimitOp::AddPeer,
            Scene { idle: 200.0, low: 60.0, normal: 40.0, high: 8.0 },
        );
        assert_eq!(limiter.scene(LimitOp::AddPeer).idle, 200.0);
        assert_eq!(limiter.scene(LimitOp::RemovePeer).idle, 100.0);

        limiter.collect(&tick(2));
        assert!(sink.calls.lock().contains(&(LimitOp::AddPeer, 200.0)));
    }
}
