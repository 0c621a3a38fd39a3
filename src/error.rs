//! Error types for fan-out execution.
//!
//! Every failure the engine can report is a [`FanOutError`]. Failures are never
//! recovered locally: the first one observed in a chunk or group aborts that
//! unit of work and propagates to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::engine::ConfigError;

/// Boxed error returned by user-supplied work units.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T, E = FanOutError> = std::result::Result<T, E>;

/// Errors that can occur while fanning work out and gathering it back.
#[derive(Debug, Error)]
pub enum FanOutError {
    /// Invalid patch size, worker count, pool capacity or config source.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single work unit did not finish within its deadline.
    #[error("Work unit {index} exceeded its deadline of {timeout:?}")]
    DeadlineExceeded { index: usize, timeout: Duration },

    /// A work unit returned an error or panicked.
    #[error("Work unit {index} failed: {message}")]
    WorkUnitFailure { index: usize, message: String },

    /// The cluster scheduler could not be reached.
    #[error("Cluster at '{address}' is unavailable: {reason}")]
    ClusterUnavailable { address: String, reason: String },

    /// A cluster worker went away before reporting its group result.
    #[error("Cluster worker running group {group} was lost")]
    WorkerLost { group: usize },

    /// The blocking pool has been shut down.
    #[error("Blocking pool is closed")]
    PoolClosed,

    /// The blocking pool did not drain in time.
    #[error("Blocking pool shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The async runtime could not be built or used from this context.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl FanOutError {
    /// Builds a `WorkUnitFailure` from any displayable cause.
    pub fn unit_failure(index: usize, cause: impl std::fmt::Display) -> Self {
        Self::WorkUnitFailure {
            index,
            message: cause.to_string(),
        }
    }

    /// Returns true for errors raised before any work was started.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if the error came from a per-unit deadline.
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Shifts the unit index carried by the error by `offset`.
    ///
    /// Group-local indices are rebased onto the caller's full work list.
    pub(crate) fn rebase(self, offset: usize) -> Self {
        match self {
            Self::DeadlineExceeded { index, timeout } => Self::DeadlineExceeded {
                index: index + offset,
                timeout,
            },
            Self::WorkUnitFailure { index, message } => Self::WorkUnitFailure {
                index: index + offset,
                message,
            },
            other => other,
        }
    }
}

impl From<ConfigError> for FanOutError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
