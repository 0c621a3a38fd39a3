//! Ships groups to the cluster and flattens their results.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FanOutError, Result};
use crate::executor::{drive, fan_out, BatchOptions, BatchRunner, WorkUnit};
use crate::metrics::MetricsCollector;

use super::partition::{partition, WorkGroup, DEFAULT_WORKER_COUNT};
use super::scheduler::ClusterScheduler;

/// Parameters of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Number of groups the work list is split into.
    pub worker_count: usize,
    /// Options each group's batch run uses.
    pub batch: BatchOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            batch: BatchOptions::default(),
        }
    }
}

impl DispatchOptions {
    pub fn new(worker_count: usize, batch: BatchOptions) -> Self {
        Self {
            worker_count,
            batch,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(FanOutError::Configuration(
                "worker_count must be greater than 0".to_string(),
            ));
        }
        self.batch.validate()
    }
}

/// Fans a work list out over a cluster, one group per worker.
pub struct RemoteDispatcher<C> {
    cluster: Arc<C>,
    runner: BatchRunner,
    metrics: MetricsCollector,
}

impl<C: ClusterScheduler> RemoteDispatcher<C> {
    pub fn new(cluster: Arc<C>, runner: BatchRunner) -> Self {
        Self {
            cluster,
            runner,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn cluster(&self) -> &Arc<C> {
        &self.cluster
    }

    /// Partitions `units`, runs every group on the cluster and returns all
    /// results in input order.
    ///
    /// # Errors
    ///
    /// `Configuration` before any work starts; otherwise the first failure
    /// in group order once every group has finished.
    pub async fn dispatch<T: Send + 'static>(
        &self,
        units: Vec<WorkUnit<T>>,
        options: &DispatchOptions,
    ) -> Result<Vec<T>> {
        options.validate()?;
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let dispatch_id = Uuid::new_v4();
        let total = units.len();
        let started = Instant::now();

        let groups = partition(units, options.worker_count, &self.runner, &options.batch)?;
        info!(
            dispatch_id = %dispatch_id,
            units = total,
            groups = groups.len(),
            cluster = %self.cluster.address(),
            "Dispatching work to cluster"
        );

        let result = self
            .gather_groups(groups, options.worker_count)
            .await
            .map(|per_group| per_group.into_iter().flatten().collect::<Vec<T>>());

        let elapsed = started.elapsed();
        self.metrics.record_run("dispatch", elapsed.as_secs_f64());

        match &result {
            Ok(results) => info!(
                dispatch_id = %dispatch_id,
                results = results.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Dispatch completed"
            ),
            Err(e) => warn!(dispatch_id = %dispatch_id, error = %e, "Dispatch failed"),
        }

        result
    }

    /// Synchronous form of [`RemoteDispatcher::dispatch`].
    ///
    /// # Errors
    ///
    /// Same as `dispatch`, plus `Runtime` when called from a current-thread
    /// runtime.
    pub fn dispatch_blocking<T: Send + 'static>(
        &self,
        units: Vec<WorkUnit<T>>,
        options: &DispatchOptions,
    ) -> Result<Vec<T>> {
        drive(self.dispatch(units, options))?
    }

    /// Submits already-built groups and gathers their results in group order.
    pub async fn submit_all<T: Send + 'static>(
        &self,
        groups: Vec<WorkGroup<T>>,
    ) -> Result<Vec<Vec<T>>> {
        self.gather_groups(groups, self.cluster.worker_count()).await
    }

    async fn gather_groups<T: Send + 'static>(
        &self,
        groups: Vec<WorkGroup<T>>,
        limit: usize,
    ) -> Result<Vec<Vec<T>>> {
        let cluster = &self.cluster;

        fan_out(groups, limit, |chunk| async move {
            let handles = chunk
                .items
                .into_iter()
                .map(|group| cluster.submit(group))
                .collect::<Result<Vec<_>>>()?;
            debug!(chunk = chunk.index, groups = handles.len(), "Groups submitted");

            cluster.gather(handles).await
        })
        .await
    }
}
