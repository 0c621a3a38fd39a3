//! Bridge between blocking callables and the async scheduler.
//!
//! [`BlockingPool`] offloads synchronous work onto tokio's blocking threads
//! while capping how many offloaded calls run at once. The pool is built
//! explicitly by the composition root and shared through an `Arc`; every
//! batch run holding the same pool competes for the same permits, so for
//! blocking units the effective concurrency is `min(patch_size, capacity)`.
//!
//! [`drive`] goes the other way: it runs an async computation to completion
//! from synchronous code.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BoxError, FanOutError, Result};

/// Default number of concurrently running offloaded calls.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// Bounded pool for blocking work units.
#[derive(Debug)]
pub struct BlockingPool {
    capacity: usize,
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    /// Creates a pool running at most `capacity` calls at once.
    ///
    /// # Errors
    ///
    /// Returns `FanOutError::Configuration` if `capacity` is zero or larger
    /// than the semaphore can represent.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(FanOutError::Configuration(
                "thread_pool_capacity must be greater than 0".to_string(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS || u32::try_from(capacity).is_err() {
            return Err(FanOutError::Configuration(format!(
                "thread_pool_capacity {} is too large",
                capacity
            )));
        }

        debug!(capacity = capacity, "Blocking pool created");

        Ok(Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of offloaded calls currently holding a pool slot.
    pub fn in_flight(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.capacity - self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Runs `f` on a blocking thread once a pool slot is free.
    ///
    /// An error returned by `f` or a panic inside it surfaces as
    /// `WorkUnitFailure` with index 0; callers rebase it onto their own
    /// indexing.
    ///
    /// # Errors
    ///
    /// Returns `FanOutError::PoolClosed` after [`BlockingPool::shutdown`].
    pub async fn offload<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> std::result::Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(f).await?.await
    }

    /// Starts `f` on a blocking thread once a pool slot is free and returns
    /// a handle to its outcome.
    ///
    /// Dropping the handle does not stop the thread; the slot stays taken
    /// until `f` returns.
    ///
    /// # Errors
    ///
    /// Returns `FanOutError::PoolClosed` after [`BlockingPool::shutdown`].
    pub async fn spawn<T, F>(&self, f: F) -> Result<BlockingTask<T>>
    where
        F: FnOnce() -> std::result::Result<T, BoxError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| FanOutError::PoolClosed)?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        Ok(BlockingTask { handle })
    }

    /// Closes the pool to new work and waits for in-flight calls.
    ///
    /// Callers queued for a slot when the pool closes receive `PoolClosed`.
    ///
    /// # Errors
    ///
    /// Returns `FanOutError::ShutdownTimeout` if in-flight calls do not finish
    /// within `timeout`. The pool is closed either way.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        info!(
            capacity = self.capacity,
            in_flight = self.in_flight(),
            "Shutting down blocking pool"
        );

        // Validated in `new`.
        let all = self.capacity as u32;
        let drained = tokio::time::timeout(timeout, self.permits.acquire_many(all)).await;
        self.permits.close();

        match drained {
            Ok(Ok(permits)) => {
                permits.forget();
                info!("Blocking pool shutdown complete");
                Ok(())
            }
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                warn!(timeout = ?timeout, "Blocking pool did not drain in time");
                Err(FanOutError::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Outcome of a call started with [`BlockingPool::spawn`].
#[derive(Debug)]
pub struct BlockingTask<T> {
    handle: JoinHandle<std::result::Result<T, BoxError>>,
}

impl<T> BlockingTask<T> {
    /// Returns true once the blocking call has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for BlockingTask<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(FanOutError::unit_failure(0, e)),
            Err(join_err) if join_err.is_panic() => Err(FanOutError::unit_failure(
                0,
                format!("panicked: {}", panic_message(join_err.into_panic())),
            )),
            Err(join_err) => Err(FanOutError::unit_failure(0, join_err)),
        })
    }
}

/// Runs an async computation to completion from synchronous code.
///
/// Outside any runtime a current-thread runtime is built for the call. Inside
/// a multi-thread runtime the worker thread is handed over with
/// `block_in_place`.
///
/// # Errors
///
/// Returns `FanOutError::Runtime` when called from a current-thread runtime,
/// where blocking would deadlock, or when a runtime cannot be built.
pub fn drive<F: Future>(future: F) -> Result<F::Output> {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(FanOutError::Runtime(
                "cannot block inside a current-thread runtime; await the future instead"
                    .to_string(),
            )),
            _ => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        },
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| FanOutError::Runtime(e.to_string()))?;
            Ok(runtime.block_on(future))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_zero_capacity_rejected() {
        let err = BlockingPool::new(0).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_offload_returns_value() {
        let pool = BlockingPool::new(2).unwrap();
        let value = pool.offload(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_offload_propagates_error() {
        let pool = BlockingPool::new(1).unwrap();
        let err = pool
            .offload::<(), _>(|| Err("disk on fire".into()))
            .await
            .unwrap_err();
        match err {
            FanOutError::WorkUnitFailure { index, message } => {
                assert_eq!(index, 0);
                assert_eq!(message, "disk on fire");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawned_task_keeps_slot_until_it_returns() {
        let pool = BlockingPool::new(1).unwrap();
        let mut task = pool
            .spawn(|| {
                std::thread::sleep(Duration::from_millis(100));
                Ok(5)
            })
            .await
            .unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(10), &mut task).await;
        assert!(waited.is_err());
        assert!(!task.is_finished());
        assert_eq!(pool.in_flight(), 1);

        assert_eq!(task.await.unwrap(), 5);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_offload_reports_panic() {
        let pool = BlockingPool::new(1).unwrap();
        let err = pool
            .offload::<(), _>(|| panic!("kaboom"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_bounds_parallelism() {
        let pool = Arc::new(BlockingPool::new(2).unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let pool = Arc::clone(&pool);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                pool.offload(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }
        });
        for outcome in futures::future::join_all(calls).await {
            outcome.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = BlockingPool::new(2).unwrap();
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(pool.is_closed());
        assert_eq!(pool.in_flight(), 0);

        let err = pool.offload(|| Ok(1)).await.unwrap_err();
        assert!(matches!(err, FanOutError::PoolClosed));

        // Second shutdown is a no-op.
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_times_out_on_stuck_call() {
        let pool = Arc::new(BlockingPool::new(1).unwrap());
        let background = Arc::clone(&pool);
        let stuck = tokio::spawn(async move {
            background
                .offload(|| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = pool.shutdown(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, FanOutError::ShutdownTimeout(_)));
        assert!(stuck.await.unwrap().is_ok());
    }

    #[test]
    fn test_drive_outside_runtime() {
        let value = drive(async { 7 }).unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drive_inside_multi_thread_runtime() {
        let value = drive(async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            "done"
        })
        .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn test_drive_inside_current_thread_runtime_fails() {
        let err = drive(async { 1 }).unwrap_err();
        assert!(matches!(err, FanOutError::Runtime(_)));
    }
}
