//! Cluster scheduler contract and the in-process cluster.
//!
//! The dispatcher only needs two operations from a cluster: `submit` one
//! group and get a handle back, then `gather` a list of handles into their
//! results. [`LocalCluster`] implements them on the current tokio runtime,
//! with one slot per worker bounding how many groups run at once.

use std::net::ToSocketAddrs;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info};

use crate::error::{FanOutError, Result};
use crate::metrics::{MetricsCollector, Outcome};

use super::partition::WorkGroup;

/// Default address of the cluster scheduler.
pub const DEFAULT_CLUSTER_ADDRESS: &str = "localhost:9010";

/// Pending result of one submitted group.
#[derive(Debug)]
pub struct GroupHandle<T> {
    group: usize,
    receiver: oneshot::Receiver<Result<Vec<T>>>,
}

impl<T> GroupHandle<T> {
    pub fn new(group: usize, receiver: oneshot::Receiver<Result<Vec<T>>>) -> Self {
        Self { group, receiver }
    }

    pub fn group(&self) -> usize {
        self.group
    }

    /// Waits for the group's result.
    ///
    /// # Errors
    ///
    /// The group's own error, or `WorkerLost` if the worker dropped the
    /// result channel (for example because the group panicked).
    pub async fn wait(self) -> Result<Vec<T>> {
        let group = self.group;
        self.receiver
            .await
            .unwrap_or(Err(FanOutError::WorkerLost { group }))
    }
}

/// A scheduler that runs groups on cluster workers.
#[async_trait]
pub trait ClusterScheduler: Send + Sync {
    /// Address the scheduler was reached at.
    fn address(&self) -> &str;

    /// Number of groups the cluster runs at once.
    fn worker_count(&self) -> usize;

    /// Ships one group to the cluster.
    fn submit<T: Send + 'static>(&self, group: WorkGroup<T>) -> Result<GroupHandle<T>>;

    /// Waits for every handle, then returns results in handle order.
    ///
    /// There is no short-circuit: all groups are awaited before the first
    /// failure, in handle order, is reported.
    async fn gather<T: Send + 'static>(&self, handles: Vec<GroupHandle<T>>) -> Result<Vec<Vec<T>>> {
        join_all(handles.into_iter().map(GroupHandle::wait))
            .await
            .into_iter()
            .collect()
    }
}

/// In-process cluster running groups as tokio tasks.
#[derive(Debug)]
pub struct LocalCluster {
    address: String,
    worker_count: usize,
    slots: Arc<Semaphore>,
    metrics: MetricsCollector,
}

impl LocalCluster {
    /// Connects to the cluster at `address` with `worker_count` workers.
    ///
    /// The address must be a resolvable `host:port`. Connection failures are
    /// not retried.
    ///
    /// # Errors
    ///
    /// `ClusterUnavailable` if the address does not resolve, `Configuration`
    /// if `worker_count` is zero.
    pub fn connect(address: &str, worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(FanOutError::Configuration(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        let unavailable = |reason: String| FanOutError::ClusterUnavailable {
            address: address.to_string(),
            reason,
        };

        let mut resolved = address
            .to_socket_addrs()
            .map_err(|e| unavailable(e.to_string()))?;
        if resolved.next().is_none() {
            return Err(unavailable("address resolved to nothing".to_string()));
        }

        info!(address = %address, workers = worker_count, "Connected to cluster");

        Ok(Self {
            address: address.to_string(),
            worker_count,
            slots: Arc::new(Semaphore::new(worker_count)),
            metrics: MetricsCollector::new(),
        })
    }

    /// Number of groups currently holding a worker slot.
    pub fn busy_workers(&self) -> usize {
        self.worker_count - self.slots.available_permits()
    }
}

#[async_trait]
impl ClusterScheduler for LocalCluster {
    fn address(&self) -> &str {
        &self.address
    }

    fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn submit<T: Send + 'static>(&self, group: WorkGroup<T>) -> Result<GroupHandle<T>> {
        let runtime = Handle::try_current().map_err(|e| FanOutError::ClusterUnavailable {
            address: self.address.clone(),
            reason: format!("no runtime to run workers on: {}", e),
        })?;

        let index = group.index();
        let (tx, rx) = oneshot::channel();
        let slots = Arc::clone(&self.slots);
        let metrics = self.metrics;

        runtime.spawn(async move {
            let Ok(_slot) = slots.acquire_owned().await else {
                error!(group = index, "Cluster closed before group could start");
                metrics.record_group(Outcome::Failed);
                return;
            };
            debug!(group = index, units = group.len(), "Worker picked up group");
            let result = group.invoke().await;
            metrics.record_group(Outcome::of(&result));
            // Receiver gone means the caller stopped gathering.
            let _ = tx.send(result);
        });

        Ok(GroupHandle::new(index, rx))
    }
}
