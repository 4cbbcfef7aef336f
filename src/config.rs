//! Configuration for the load-awareness subsystem.
//!
//! The platform parses and persists configuration elsewhere and hands this
//! crate ready-made objects; nothing here touches files or flags.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limit::{LimitOp, Scene};

/// Top-level configuration for the subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadAwareConfig {
    /// Heartbeat cadence and ingestion filtering.
    pub heartbeat: HeartbeatConfig,
    /// Cluster load classification.
    pub classifier: ClassifierConfig,
    /// Admission-rate scene tables.
    pub limits: LimitsConfig,
}

impl LoadAwareConfig {
    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.heartbeat.validate()?;
        self.classifier.validate()?;
        self.limits.validate()
    }
}

/// Heartbeat cadence and ingestion filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Expected gap between two flow reports for the same shard.
    pub shard_report_interval: Duration,
    /// Drop implausibly short shard reports. Simulators and tests that
    /// compress time should turn this off.
    pub denoising: bool,
}

impl HeartbeatConfig {
    /// How long a cached hot peer survives without a fresh report.
    pub fn topn_ttl(&self) -> Duration {
        3 * self.shard_report_interval
    }

    fn validate(&self) -> Result<()> {
        if self.shard_report_interval.is_zero() {
            return Err(Error::InvalidConfig("shard_report_interval must be positive".into()));
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig { shard_report_interval: Duration::from_secs(60), denoising: true }
    }
}

/// Cluster load classification.
///
/// The CPU boundaries are empirical policy, tuned against serving-thread
/// utilization rather than whole-process CPU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Node ticks required before the classifier leaves `LoadState::None`.
    pub history_size: usize,
    /// Nodes silent for this long drop out of the aggregate.
    pub stale_after: Duration,
    /// Mean CPU below this is `Idle`.
    pub idle_below: f64,
    /// Mean CPU below this (and above `idle_below`) is `Low`.
    pub low_below: f64,
    /// Mean CPU below this (and above `low_below`) is `Normal`; anything
    /// higher is `High`.
    pub normal_below: f64,
    /// EMA weight of the newest observation, in `(0, 1]`.
    pub smoothing: f64,
}

impl ClassifierConfig {
    fn validate(&self) -> Result<()> {
        if self.history_size == 0 {
            return Err(Error::InvalidConfig("classifier history_size must be positive".into()));
        }
        if !(self.idle_below < self.low_below && self.low_below < self.normal_below) {
            return Err(Error::InvalidConfig(
                "classifier CPU boundaries must be strictly increasing".into(),
            ));
        }
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(Error::InvalidConfig("classifier smoothing must be in (0, 1]".into()));
        }
        Ok(())
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            history_size: 30,
            stale_after: Duration::from_secs(300),
            idle_below: 5.0,
            low_below: 10.0,
            normal_below: 30.0,
            smoothing: 0.6,
        }
    }
}

/// Admission-rate scene tables, one per placement operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Scene for adding replicas.
    pub add_peer: Scene,
    /// Scene for removing replicas.
    pub remove_peer: Scene,
}

impl LimitsConfig {
    /// Scene for the given operation.
    pub fn scene(&self, op: LimitOp) -> Scene {
        match op {
            LimitOp::AddPeer => self.add_peer,
            LimitOp::RemovePeer => self.remove_peer,
        }
    }

    fn validate(&self) -> Result<()> {
        for op in LimitOp::ALL {
            let scene = self.scene(op);
            for rate in [scene.idle, scene.low, scene.normal, scene.high] {
                if !rate.is_finite() || rate < 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "{op} scene rates must be finite and non-negative"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            add_peer: Scene::default_for(LimitOp::AddPeer),
            remove_peer: Scene::default_for(LimitOp::RemovePeer),
        }
    }
}
