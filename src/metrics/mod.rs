//! Prometheus metrics for fan-out runs.
//!
//! # Example
//!
//! ```ignore
//! use fanout::metrics::{init_metrics, export_metrics};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! // ... run batches ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{ActiveUnitGuard, MetricsCollector, Outcome};
pub use self::prometheus::{
    export_metrics, init_metrics, ACTIVE_WORK_UNITS, GROUPS_TOTAL, REGISTRY, RUN_DURATION,
    WORK_UNITS_TOTAL,
};
