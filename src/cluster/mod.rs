//! Cluster-level intelligence: load classification and the admission-rate
//! controller built on it.

pub mod limiter;
pub mod state;

pub use limiter::{ClusterLimiter, RateSink};
pub use state::{LoadClassifier, LoadState};
