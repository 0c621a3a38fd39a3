//! Work units and per-run batch options.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, FanOutError, Result};

/// Default number of work units in flight per batch run.
pub const DEFAULT_PATCH_SIZE: usize = 8;

/// Synchronous work unit body, executed on the blocking pool.
pub type BlockingFn<T> = Box<dyn FnOnce() -> std::result::Result<T, BoxError> + Send + 'static>;

/// Cooperative work unit body, awaited on the calling task.
pub type CooperativeFn<T> =
    Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + 'static>;

/// How a work unit is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs on a blocking-pool thread and is awaited through the bridge.
    Blocking,
    /// Awaited directly; suspends at its own await points.
    Cooperative,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocking => write!(f, "blocking"),
            Self::Cooperative => write!(f, "cooperative"),
        }
    }
}

/// A zero-argument callable invoked exactly once by the engine.
///
/// The variant decides the scheduling mode, so one work list may mix
/// blocking and cooperative units.
pub enum WorkUnit<T> {
    Blocking(BlockingFn<T>),
    Cooperative(CooperativeFn<T>),
}

impl<T: Send + 'static> WorkUnit<T> {
    /// Wraps a fallible synchronous closure.
    pub fn blocking<F, E>(f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Blocking(Box::new(move || f().map_err(Into::into)))
    }

    /// Wraps a fallible async closure.
    pub fn cooperative<F, Fut, E>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Cooperative(Box::new(move || {
            async move { f().await.map_err(Into::into) }.boxed()
        }))
    }

    /// Wraps an infallible synchronous closure.
    pub fn blocking_ok<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::Blocking(Box::new(move || Ok(f())))
    }

    /// Wraps an infallible async closure.
    pub fn cooperative_ok<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self::Cooperative(Box::new(move || async move { Ok(f().await) }.boxed()))
    }
}

impl<T> WorkUnit<T> {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Blocking(_) => ExecutionMode::Blocking,
            Self::Cooperative(_) => ExecutionMode::Cooperative,
        }
    }
}

impl<T> fmt::Debug for WorkUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkUnit").field(&self.mode()).finish()
    }
}

/// Parameters of one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum number of units in flight at once.
    pub patch_size: usize,
    /// Deadline applied to each unit individually.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            patch_size: DEFAULT_PATCH_SIZE,
            timeout: None,
        }
    }
}

impl BatchOptions {
    pub fn new(patch_size: usize) -> Self {
        Self {
            patch_size,
            ..Default::default()
        }
    }

    /// Sets the per-unit timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of chunks a list of `len` units is split into.
    pub fn chunk_count(&self, len: usize) -> usize {
        if self.patch_size == 0 {
            return 0;
        }
        len.div_ceil(self.patch_size)
    }

    /// Rejects a zero patch size before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(FanOutError::Configuration(
                "patch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
