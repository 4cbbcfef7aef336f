//! Rolling rate estimators.
//!
//! `RollingFlowStat` turns a stream of (delta, interval) flow samples into
//! a robust rate: samples accumulate into fixed-width buckets of one
//! report interval each, and the estimate is the median over the most
//! recent bucket means. A single long sample fills every bucket it spans,
//! so a quiet stretch pushes the estimate down as fast as the wall clock
//! moved, not one bucket per heartbeat.

use std::collections::VecDeque;
use std::time::Duration;

/// Windowed median-of-means rate estimator, units/sec.
#[derive(Debug, Clone)]
pub struct RollingFlowStat {
    bucket: Duration,
    window: usize,
    records: VecDeque<f64>,
    last_total: f64,
    last_elapsed: Duration,
}

impl RollingFlowStat {
    /// Estimator with `window` buckets of `bucket` width each.
    pub fn new(bucket: Duration, window: usize) -> Self {
        debug_assert!(!bucket.is_zero() && window > 0);
        RollingFlowStat {
            bucket,
            window,
            records: VecDeque::with_capacity(window),
            last_total: 0.0,
            last_elapsed: Duration::ZERO,
        }
    }

    /// Feeds one flow sample covering `interval`. Zero-width samples are
    /// ignored.
    pub fn add(&mut self, delta: f64, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        self.last_total += delta;
        self.last_elapsed += interval;
        if self.last_elapsed < self.bucket {
            return;
        }
        let rate = self.last_total / self.last_elapsed.as_secs_f64();
        let spanned = (self.last_elapsed.as_secs_f64() / self.bucket.as_secs_f64()) as usize;
        for _ in 0..spanned.min(self.window) {
            if self.records.len() == self.window {
                self.records.pop_front();
            }
            self.records.push_back(rate);
        }
        self.last_total = 0.0;
        self.last_elapsed = Duration::ZERO;
    }

    /// Current estimate: the median over the recorded bucket means. Zero
    /// until the first bucket completes.
    pub fn get(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.records.iter().copied().collect();
        sorted.sort_unstable_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 1 {
            sorted[mid]
        } else {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        }
    }

    /// Whether the window holds a full set of buckets. Callers must treat
    /// the estimate as unreliable before this turns true.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.window
    }

    /// Discards the partially accumulated bucket so the next `add` starts
    /// a fresh sub-window.
    pub fn clear_last_average(&mut self) {
        self.last_total = 0.0;
        self.last_elapsed = Duration::ZERO;
    }
}

/// Exponential moving average seeded by its first observation.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: f64,
    samples: u64,
}

impl Ema {
    /// EMA weighting the newest observation by `alpha`.
    pub fn new(alpha: f64) -> Self {
        debug_assert!(alpha > 0.0 && alpha <= 1.0);
        Ema { alpha, value: 0.0, samples: 0 }
    }

    /// Folds one observation into the average.
    pub fn observe(&mut self, value: f64) {
        if self.samples == 0 {
            self.value = value;
        } else {
            self.value = self.alpha * value + (1.0 - self.alpha) * self.value;
        }
        self.samples += 1;
    }

    /// Current smoothed value, zero before any observation.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Observations folded in so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: Duration = Duration::from_secs(60);

    #[test]
    fn fills_after_window_buckets() {
        let mut stat = RollingFlowStat::new(BUCKET, 5);
        for i in 0..5 {
            assert!(!stat.is_full(), "full after {i} buckets");
            stat.add(6000.0, BUCKET);
        }
        assert!(stat.is_full());
        assert!((stat.get() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn median_rides_out_single_outlier() {
        let mut stat = RollingFlowStat::new(BUCKET, 5);
        for _ in 0..5 {
            stat.add(6000.0, BUCKET);
        }
        stat.add(0.0, BUCKET);
        // [100, 100, 100, 100, 0] -> median still 100
        assert!((stat.get() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn long_sample_spans_multiple_buckets() {
        let mut stat = RollingFlowStat::new(BUCKET, 5);
        for _ in 0..5 {
            stat.add(6000.0, BUCKET);
        }
        // one silent 3-minute stretch pushes three zero buckets
        stat.add(0.0, 3 * BUCKET);
        assert!(stat.is_full());
        assert_eq!(stat.get(), 0.0);
    }

    #[test]
    fn sub_bucket_samples_accumulate() {
        let mut stat = RollingFlowStat::new(BUCKET, 5);
        stat.add(1500.0, Duration::from_secs(30));
        assert_eq!(stat.get(), 0.0);
        stat.add(1500.0, Duration::from_secs(30));
        assert!((stat.get() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn clear_last_average_drops_partial_bucket() {
        let mut stat = RollingFlowStat::new(BUCKET, 5);
        stat.add(100_000.0, Duration::from_secs(30));
        stat.clear_last_average();
        stat.add(1500.0, Duration::from_secs(30));
        assert_eq!(stat.get(), 0.0, "cleared partial bucket still counted");
        stat.add(1500.0, Duration::from_secs(30));
        assert!((stat.get() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn zero_interval_ignored() {
        let mut stat = RollingFlowStat::new(BUCKET, 5);
        stat.add(1.0e9, Duration::ZERO);
        assert_eq!(stat.get(), 0.0);
        assert!(!stat.is_full());
    }

    #[test]
    fn ema_seeds_then_smooths() {
        let mut ema = Ema::new(0.5);
        assert_eq!(ema.get(), 0.0);
        ema.observe(100.0);
        assert_eq!(ema.get(), 100.0);
        ema.observe(0.0);
        assert_eq!(ema.get(), 50.0);
        assert_eq!(ema.samples(), 2);
    }
}
