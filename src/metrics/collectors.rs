//! Recording helpers over the global fanout metrics.

use prometheus::Gauge;

use super::prometheus::{ACTIVE_WORK_UNITS, GROUPS_TOTAL, RUN_DURATION, WORK_UNITS_TOTAL};
use crate::error::{FanOutError, Result};

/// Outcome label for a finished work unit or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Failed,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    /// Classifies a unit or group result.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(FanOutError::DeadlineExceeded { .. }) => Self::Timeout,
            Err(_) => Self::Failed,
        }
    }
}

/// Thin wrapper over the global fanout metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished work unit.
    pub fn record_unit(&self, outcome: Outcome) {
        if let Some(total) = WORK_UNITS_TOTAL.get() {
            total.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    /// Record a gathered group.
    pub fn record_group(&self, outcome: Outcome) {
        if let Some(total) = GROUPS_TOTAL.get() {
            total.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    /// Record the wall time of a run at `level` ("batch" or "dispatch").
    pub fn record_run(&self, level: &str, duration_secs: f64) {
        if let Some(histogram) = RUN_DURATION.get() {
            histogram.with_label_values(&[level]).observe(duration_secs);
        }

        tracing::trace!(level = level, duration_secs = duration_secs, "Recorded run metric");
    }

    /// Marks one work unit active until the returned guard drops.
    ///
    /// Units abandoned by a failing chunk are dropped rather than completed,
    /// so the gauge is tied to the guard's lifetime.
    pub fn track_active(&self) -> ActiveUnitGuard {
        ActiveUnitGuard::new(ACTIVE_WORK_UNITS.get().cloned())
    }
}

/// Decrements the active-unit gauge on drop.
#[derive(Debug)]
pub struct ActiveUnitGuard {
    gauge: Option<Gauge>,
}

impl ActiveUnitGuard {
    fn new(gauge: Option<Gauge>) -> Self {
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        Self { gauge }
    }
}

impl Drop for ActiveUnitGuard {
    fn drop(&mut self) {
        if let Some(gauge) = &self.gauge {
            gauge.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Ok.as_str(), "ok");
        assert_eq!(Outcome::Failed.as_str(), "failed");
        assert_eq!(Outcome::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_record_unit_and_group() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_unit(Outcome::Ok);
        collector.record_unit(Outcome::Timeout);
        collector.record_group(Outcome::Failed);
        collector.record_run("batch", 0.25);
    }

    #[test]
    fn test_outcome_of_result() {
        assert_eq!(Outcome::of(&Ok::<_, FanOutError>(1)), Outcome::Ok);
        assert_eq!(
            Outcome::of::<()>(&Err(FanOutError::DeadlineExceeded {
                index: 0,
                timeout: std::time::Duration::from_millis(1),
            })),
            Outcome::Timeout
        );
        assert_eq!(
            Outcome::of::<()>(&Err(FanOutError::unit_failure(0, "x"))),
            Outcome::Failed
        );
    }

    #[test]
    fn test_active_guard_balances_gauge() {
        // A private gauge, so concurrently running tests cannot move it.
        let gauge = Gauge::new("test_active_units", "Active units in this test").unwrap();
        gauge.set(3.0);

        {
            let _a = ActiveUnitGuard::new(Some(gauge.clone()));
            let _b = ActiveUnitGuard::new(Some(gauge.clone()));
            assert_eq!(gauge.get(), 5.0);
        }
        assert_eq!(gauge.get(), 3.0);

        // Before `init_metrics` there is nothing to track.
        drop(ActiveUnitGuard::new(None));
    }
}
