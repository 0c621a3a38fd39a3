//! fanout: hierarchical fan-out execution of independent work units.
//!
//! A work list is run in bounded patches on the local runtime
//! ([`BatchRunner`]), or partitioned into one group per cluster worker
//! ([`RemoteDispatcher`]) where each group is again run in patches.
//! Blocking closures go through an owned [`BlockingPool`]; [`drive`] lets
//! synchronous callers wait on the async entry points.
//!
//! Results always come back in input order, and a failing unit fails the
//! whole run unless [`BatchRunner::run_settled`] is used.

pub mod cli;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod executor;
pub mod metrics;

pub use cluster::{
    ClusterScheduler, DispatchOptions, GroupHandle, LocalCluster, RemoteDispatcher, WorkGroup,
};
pub use engine::{ConfigError, Engine, EngineConfig};
pub use error::{BoxError, FanOutError, Result};
pub use executor::{drive, BatchOptions, BatchRunner, BlockingPool, ExecutionMode, WorkUnit};
