//! Error types for the load-awareness subsystem.

use thiserror::Error;

use crate::limit::LimitOp;

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the load-awareness subsystem.
///
/// Dropped observations (zero intervals, denoised short reports, cold
/// samples) are never errors; they are silently ignored at the ingestion
/// boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration object failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The fleet-wide rate sink rejected a published limit.
    #[error("rate sink rejected {op} limit of {rate}: {reason}")]
    Sink {
        /// Operation whose limit was being published.
        op: LimitOp,
        /// Rate that failed to apply, in ops/sec.
        rate: f64,
        /// Sink-provided failure description.
        reason: String,
    },

    /// The ingestion worker has stopped and no longer accepts heartbeats.
    #[error("load-aware worker is not running")]
    WorkerStopped,
}
