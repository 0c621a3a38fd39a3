//! Local execution: patch-bounded batches of work units.
//!
//! - **WorkUnit**: a zero-argument callable, blocking or cooperative
//! - **BatchRunner**: runs a work list in consecutive patches
//! - **BlockingPool**: bounded bridge from blocking callables into async code
//! - **fan_out**: the chunked combinator both execution levels are built on
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fanout::executor::{BatchOptions, BatchRunner, BlockingPool, WorkUnit};
//!
//! let pool = Arc::new(BlockingPool::new(32)?);
//! let runner = BatchRunner::new(pool);
//!
//! let units = (0..100).map(|i| WorkUnit::blocking_ok(move || i * i)).collect();
//! let squares = runner.run(units, &BatchOptions::new(8)).await?;
//! ```

pub mod batch;
pub mod bridge;
pub mod fan_out;
pub mod work;

pub use batch::BatchRunner;
pub use bridge::{drive, BlockingPool, BlockingTask, DEFAULT_POOL_CAPACITY};
pub use fan_out::{fan_out, Chunk};
pub use work::{
    BatchOptions, BlockingFn, CooperativeFn, ExecutionMode, WorkUnit, DEFAULT_PATCH_SIZE,
};
