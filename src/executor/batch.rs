//! Patch-bounded batch runner.
//!
//! A run splits its work list into consecutive chunks of `patch_size`, runs
//! every unit of a chunk concurrently and waits for the whole chunk before
//! starting the next one. Blocking units go through the shared
//! [`BlockingPool`]; cooperative units are polled on the calling task.
//!
//! `run` is all-or-nothing: the first failing unit (including a timeout)
//! aborts its chunk, later chunks never start, and results of chunks that
//! already finished are dropped. `run_settled` reports every unit's outcome
//! instead.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use futures::FutureExt;
use tracing::{debug, warn};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{FanOutError, Result};
use crate::metrics::{MetricsCollector, Outcome};

use super::bridge::BlockingPool;
use super::fan_out::fan_out;
use super::work::{BatchOptions, BlockingFn, WorkUnit};

/// Runs work lists in patches on top of a shared blocking pool.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    pool: Arc<BlockingPool>,
    metrics: MetricsCollector,
}

impl BatchRunner {
    pub fn new(pool: Arc<BlockingPool>) -> Self {
        Self {
            pool,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn pool(&self) -> &Arc<BlockingPool> {
        &self.pool
    }

    /// Runs `units` and returns their results in input order.
    ///
    /// # Errors
    ///
    /// `Configuration` for a zero patch size (before anything runs), otherwise
    /// the first `WorkUnitFailure` or `DeadlineExceeded` of the failing chunk.
    pub async fn run<T: Send + 'static>(
        &self,
        units: Vec<WorkUnit<T>>,
        options: &BatchOptions,
    ) -> Result<Vec<T>> {
        options.validate()?;
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let run_id = Uuid::new_v4();
        let total = units.len();
        let started = Instant::now();
        let timeout = options.timeout;

        debug!(
            run_id = %run_id,
            units = total,
            patch_size = options.patch_size,
            chunks = options.chunk_count(total),
            "Starting batch run"
        );

        let result = fan_out(units, options.patch_size, |chunk| {
            try_join_all(
                chunk
                    .into_indexed()
                    .map(|(index, unit)| {
                        self.execute(index, unit, timeout, OnDeadline::Abandon)
                    }),
            )
        })
        .await;

        let elapsed = started.elapsed();
        self.metrics.record_run("batch", elapsed.as_secs_f64());

        match &result {
            Ok(_) => debug!(
                run_id = %run_id,
                units = total,
                duration_ms = elapsed.as_millis() as u64,
                "Batch run completed"
            ),
            Err(e) => warn!(run_id = %run_id, units = total, error = %e, "Batch run failed"),
        }

        result
    }

    /// Runs every unit and reports each outcome separately.
    ///
    /// Chunking and ordering match [`BatchRunner::run`], but a failing unit
    /// neither aborts its chunk nor stops later chunks. A blocking unit that
    /// misses its deadline is reported as `DeadlineExceeded` once its thread
    /// has returned, so no more than `patch_size` units of the run are ever
    /// executing.
    ///
    /// # Errors
    ///
    /// Only `Configuration`, for a zero patch size.
    pub async fn run_settled<T: Send + 'static>(
        &self,
        units: Vec<WorkUnit<T>>,
        options: &BatchOptions,
    ) -> Result<Vec<Result<T>>> {
        options.validate()?;
        let timeout = options.timeout;
        let started = Instant::now();

        let outcomes = fan_out(units, options.patch_size, |chunk| {
            join_all(
                chunk
                    .into_indexed()
                    .map(|(index, unit)| {
                        self.execute(index, unit, timeout, OnDeadline::Drain)
                    }),
            )
            .map(Ok)
        })
        .await?;

        self.metrics
            .record_run("batch", started.elapsed().as_secs_f64());
        Ok(outcomes)
    }

    async fn execute<T: Send + 'static>(
        &self,
        index: usize,
        unit: WorkUnit<T>,
        timeout: Option<Duration>,
        on_deadline: OnDeadline,
    ) -> Result<T> {
        let _active = self.metrics.track_active();

        let outcome = match unit {
            WorkUnit::Blocking(f) => self.execute_blocking(f, timeout, on_deadline).await,
            WorkUnit::Cooperative(f) => {
                let work = AssertUnwindSafe(f()).catch_unwind().map(|caught| match caught {
                    Ok(outcome) => outcome.map_err(|e| FanOutError::unit_failure(0, e)),
                    Err(_) => Err(FanOutError::unit_failure(0, "panicked")),
                });
                match timeout {
                    Some(limit) => tokio::time::timeout(limit, work)
                        .await
                        .unwrap_or_else(|_| Err(deadline_exceeded(limit))),
                    None => work.await,
                }
            }
        }
        .map_err(|e| e.rebase(index));

        if let Err(e) = &outcome {
            debug!(index = index, error = %e, "Work unit failed");
        }
        self.metrics.record_unit(Outcome::of(&outcome));

        outcome
    }

    /// Runs a blocking unit on the pool. The deadline covers waiting for a
    /// pool slot as well as the call itself.
    async fn execute_blocking<T: Send + 'static>(
        &self,
        f: BlockingFn<T>,
        timeout: Option<Duration>,
        on_deadline: OnDeadline,
    ) -> Result<T> {
        let Some(limit) = timeout else {
            return self.pool.offload(f).await;
        };
        let deadline = Instant::now() + limit;

        let mut task = match tokio::time::timeout_at(deadline, self.pool.spawn(f)).await {
            Ok(task) => task?,
            Err(_) => return Err(deadline_exceeded(limit)),
        };

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(outcome) => outcome,
            Err(_) => {
                if on_deadline == OnDeadline::Drain {
                    // The thread cannot be cancelled; keep the chunk open until it returns.
                    let _ = task.await;
                }
                Err(deadline_exceeded(limit))
            }
        }
    }
}

/// What a chunk does with a blocking unit whose deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnDeadline {
    /// Stop awaiting it; the run is failing anyway.
    Abandon,
    /// Wait for the thread to return so the next chunk starts on a free patch.
    Drain,
}

fn deadline_exceeded(timeout: Duration) -> FanOutError {
    FanOutError::DeadlineExceeded { index: 0, timeout }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn runner(capacity: usize) -> BatchRunner {
        BatchRunner::new(Arc::new(BlockingPool::new(capacity).unwrap()))
    }

    #[tokio::test]
    async fn test_empty_list_returns_empty() {
        let out: Vec<u32> = runner(1)
            .run(Vec::new(), &BatchOptions::new(8))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_zero_patch_size_rejected_before_work() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let units = vec![WorkUnit::cooperative_ok(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })];

        let err = runner(1)
            .run(units, &BatchOptions::new(0))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mixed_modes_keep_order() {
        let units: Vec<WorkUnit<usize>> = (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    WorkUnit::blocking_ok(move || i)
                } else {
                    WorkUnit::cooperative_ok(move || async move {
                        tokio::time::sleep(Duration::from_millis((12 - i) as u64)).await;
                        i
                    })
                }
            })
            .collect();

        let out = runner(4).run(units, &BatchOptions::new(5)).await.unwrap();
        assert_eq!(out, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_chunks_wait_for_each_other() {
        // Every unit of chunk 0 must finish before any unit of chunk 1 starts.
        let log = Arc::new(Mutex::new(Vec::new()));
        let units: Vec<WorkUnit<()>> = (0..6)
            .map(|i| {
                let log = Arc::clone(&log);
                WorkUnit::cooperative_ok(move || async move {
                    log.lock().unwrap().push(("start", i));
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    log.lock().unwrap().push(("end", i));
                })
            })
            .collect();

        runner(1).run(units, &BatchOptions::new(3)).await.unwrap();

        let log = log.lock().unwrap();
        let first_chunk_done = log
            .iter()
            .rposition(|(kind, i)| *kind == "end" && *i < 3)
            .unwrap();
        let second_chunk_start = log
            .iter()
            .position(|(kind, i)| *kind == "start" && *i >= 3)
            .unwrap();
        assert!(first_chunk_done < second_chunk_start);
    }

    #[tokio::test]
    async fn test_cooperative_panic_becomes_failure() {
        let units: Vec<WorkUnit<u8>> = vec![
            WorkUnit::cooperative_ok(|| async { 1 }),
            WorkUnit::cooperative_ok(|| async {
                let value: u8 = 2;
                assert!(value == 0, "inside unit");
                value
            }),
        ];
        let err = runner(1)
            .run(units, &BatchOptions::new(2))
            .await
            .unwrap_err();
        assert!(matches!(err, FanOutError::WorkUnitFailure { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_blocking_failure_carries_unit_index() {
        let units: Vec<WorkUnit<u8>> = (0..4)
            .map(|i| {
                WorkUnit::blocking(move || {
                    if i == 2 {
                        Err("bad input")
                    } else {
                        Ok(i)
                    }
                })
            })
            .collect();
        let err = runner(2)
            .run(units, &BatchOptions::new(4))
            .await
            .unwrap_err();
        match err {
            FanOutError::WorkUnitFailure { index, message } => {
                assert_eq!(index, 2);
                assert_eq!(message, "bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_settled_reports_each_unit() {
        let units: Vec<WorkUnit<usize>> = (0..5)
            .map(|i| {
                WorkUnit::cooperative(move || async move {
                    if i == 1 {
                        Err("odd one out")
                    } else {
                        Ok(i)
                    }
                })
            })
            .collect();

        let outcomes = runner(1)
            .run_settled(units, &BatchOptions::new(2))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 5);
        assert!(matches!(
            outcomes[1],
            Err(FanOutError::WorkUnitFailure { index: 1, .. })
        ));
        for i in [0, 2, 3, 4] {
            assert_eq!(*outcomes[i].as_ref().unwrap(), i);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_settled_waits_for_timed_out_blocking_units() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let sleeps = [300u64, 300, 100, 100, 100, 100];

        let units: Vec<WorkUnit<usize>> = sleeps
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                WorkUnit::blocking_ok(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(ms));
                    active.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let options = BatchOptions::new(2).with_timeout(Duration::from_millis(50));
        let outcomes = runner(8).run_settled(units, &options).await.unwrap();

        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Err(FanOutError::DeadlineExceeded { index, .. }) => assert_eq!(*index, i),
                other => panic!("unit {i}: unexpected outcome {other:?}"),
            }
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cooperative_unit_exceeds_deadline() {
        let units: Vec<WorkUnit<u8>> = vec![
            WorkUnit::cooperative_ok(|| async { 1 }),
            WorkUnit::cooperative_ok(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                2
            }),
        ];
        let timeout = Duration::from_millis(20);

        let err = runner(1)
            .run(units, &BatchOptions::new(2).with_timeout(timeout))
            .await
            .unwrap_err();
        match err {
            FanOutError::DeadlineExceeded { index, timeout: limit } => {
                assert_eq!(index, 1);
                assert_eq!(limit, timeout);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_applies_per_unit() {
        let units: Vec<WorkUnit<u8>> = vec![
            WorkUnit::cooperative_ok(|| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                1
            }),
            WorkUnit::cooperative_ok(|| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                2
            }),
        ];
        // Two 5ms units in sequence would take 10ms; each alone is well under 200ms.
        let out = runner(1)
            .run(
                units,
                &BatchOptions::new(1).with_timeout(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
