//! Composition root wiring the blocking pool, batch runner and cluster.
//!
//! An [`Engine`] owns the one piece of shared state in the crate, the
//! [`BlockingPool`]. It is built explicitly from an [`EngineConfig`] and torn
//! down with [`Engine::shutdown`].

pub mod config;

pub use config::{ConfigError, EngineConfig};

use std::sync::Arc;

use tracing::info;

use crate::cluster::{DispatchOptions, LocalCluster, RemoteDispatcher};
use crate::error::Result;
use crate::executor::{BatchOptions, BatchRunner, BlockingPool, WorkUnit};

/// Fan-out engine with configured defaults.
pub struct Engine {
    config: EngineConfig,
    pool: Arc<BlockingPool>,
    runner: BatchRunner,
    dispatcher: RemoteDispatcher<LocalCluster>,
}

impl Engine {
    /// Validates `config`, builds the blocking pool and connects the cluster.
    ///
    /// # Errors
    ///
    /// `Configuration` for invalid settings, `ClusterUnavailable` if the
    /// cluster address cannot be reached.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(BlockingPool::new(config.thread_pool_capacity)?);
        let runner = BatchRunner::new(Arc::clone(&pool));
        let cluster = Arc::new(LocalCluster::connect(
            &config.cluster_address,
            config.worker_count,
        )?);
        let dispatcher = RemoteDispatcher::new(cluster, runner.clone());

        info!(
            patch_size = config.patch_size,
            worker_count = config.worker_count,
            thread_pool_capacity = config.thread_pool_capacity,
            "Engine ready"
        );

        Ok(Self {
            config,
            pool,
            runner,
            dispatcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BlockingPool> {
        &self.pool
    }

    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    pub fn dispatcher(&self) -> &RemoteDispatcher<LocalCluster> {
        &self.dispatcher
    }

    /// Batch options built from the configured patch size and timeout.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            patch_size: self.config.patch_size,
            timeout: self.config.task_timeout(),
        }
    }

    /// Dispatch options built from the configured worker count.
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions::new(self.config.worker_count, self.batch_options())
    }

    /// Runs `units` locally with the configured defaults.
    pub async fn run<T: Send + 'static>(&self, units: Vec<WorkUnit<T>>) -> Result<Vec<T>> {
        self.runner.run(units, &self.batch_options()).await
    }

    /// Runs `units` locally, reporting each unit's outcome.
    pub async fn run_settled<T: Send + 'static>(
        &self,
        units: Vec<WorkUnit<T>>,
    ) -> Result<Vec<Result<T>>> {
        self.runner.run_settled(units, &self.batch_options()).await
    }

    /// Distributes `units` over the cluster with the configured defaults.
    pub async fn dispatch<T: Send + 'static>(&self, units: Vec<WorkUnit<T>>) -> Result<Vec<T>> {
        self.dispatcher
            .dispatch(units, &self.dispatch_options())
            .await
    }

    /// Synchronous form of [`Engine::dispatch`].
    pub fn dispatch_blocking<T: Send + 'static>(&self, units: Vec<WorkUnit<T>>) -> Result<Vec<T>> {
        self.dispatcher
            .dispatch_blocking(units, &self.dispatch_options())
    }

    /// Closes the blocking pool and waits for in-flight units.
    ///
    /// # Errors
    ///
    /// `ShutdownTimeout` if units are still running after the configured
    /// shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.shutdown(self.config.shutdown_timeout()).await
    }
}
