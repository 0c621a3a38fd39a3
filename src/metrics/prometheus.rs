//! Prometheus metrics registration and export.
//!
//! All metrics live in process-wide `OnceLock` statics. Until
//! [`init_metrics`] runs, recording through
//! [`MetricsCollector`](super::MetricsCollector) is a no-op.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all fanout metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Work units finished, labeled by status (ok, failed, timeout).
pub static WORK_UNITS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Work units currently executing across all batch runs.
pub static ACTIVE_WORK_UNITS: OnceLock<Gauge> = OnceLock::new();

/// Groups gathered from the cluster, labeled by status (ok, failed).
pub static GROUPS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall time of a whole run in seconds, labeled by level (batch, dispatch).
pub static RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric construction or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let work_units_total = CounterVec::new(
        Opts::new("fanout_work_units_total", "Total number of work units finished"),
        &["status"],
    )?;

    let active_work_units = Gauge::new(
        "fanout_active_work_units",
        "Number of work units currently executing",
    )?;

    let groups_total = CounterVec::new(
        Opts::new("fanout_groups_total", "Total number of groups gathered from the cluster"),
        &["status"],
    )?;

    let run_duration = HistogramVec::new(
        HistogramOpts::new("fanout_run_duration_seconds", "Run duration in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
        &["level"],
    )?;

    registry.register(Box::new(work_units_total.clone()))?;
    registry.register(Box::new(active_work_units.clone()))?;
    registry.register(Box::new(groups_total.clone()))?;
    registry.register(Box::new(run_duration.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = WORK_UNITS_TOTAL.set(work_units_total);
    let _ = ACTIVE_WORK_UNITS.set(active_work_units);
    let _ = GROUPS_TOTAL.set(groups_total);
    let _ = RUN_DURATION.set(run_duration);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(counter) = WORK_UNITS_TOTAL.get() {
            counter.with_label_values(&["ok"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("fanout_work_units_total"));
    }
}
