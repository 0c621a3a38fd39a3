//! Distributed execution: groups of work shipped to cluster workers.
//!
//! - **partition**: contiguous split of a work list into one group per worker
//! - **ClusterScheduler**: `submit` / `gather` contract the dispatcher relies on
//! - **LocalCluster**: in-process cluster with a bounded number of workers
//! - **RemoteDispatcher**: submits every group, gathers and flattens results
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │    Work list     │
//!                 └────────┬─────────┘
//!                          │ partition
//!         ┌────────────────┼────────────────┐
//!         ▼                ▼                ▼
//!    ┌─────────┐      ┌─────────┐      ┌─────────┐
//!    │ Group 0 │      │ Group 1 │      │ Group N │   one per worker
//!    └────┬────┘      └────┬────┘      └────┬────┘
//!         │ BatchRunner    │                │        patches inside
//!         ▼                ▼                ▼
//!    ┌──────────────────────────────────────────┐
//!    │      gather + flatten in group order     │
//!    └──────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod partition;
pub mod scheduler;

pub use dispatcher::{DispatchOptions, RemoteDispatcher};
pub use partition::{group_size, partition, WorkGroup, DEFAULT_WORKER_COUNT};
pub use scheduler::{ClusterScheduler, GroupHandle, LocalCluster, DEFAULT_CLUSTER_ADDRESS};
