//! Observability metrics for the compilation scheduler.
//!
//! Metrics are exported via the `metrics` crate facade and support:
//!
//! - **Alerting**: failure and disconnect rates
//! - **Dashboards**: running-compilation gauges and dedup hit rates
//! - **Debugging**: compile durations correlated with traces
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `smelt_sched_compilations_total` | Counter | `result` | Compilations by final result |
//! | `smelt_sched_dedup_total` | Counter | `outcome` | Deduplication attach outcomes |
//! | `smelt_sched_running_compilations` | Gauge | - | Currently registered compilations |
//! | `smelt_sched_compile_duration_seconds` | Histogram | `mode` | Compilation task duration |
//! | `smelt_sched_successful_swaps_total` | Counter | - | Last-successful supersessions |
//! | `smelt_sched_classes_dir_deletions_total` | Counter | - | Superseded directories deleted |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Compilations by final result.
    pub const COMPILATIONS_TOTAL: &str = "smelt_sched_compilations_total";
    /// Counter: Deduplication attach outcomes.
    pub const DEDUP_TOTAL: &str = "smelt_sched_dedup_total";
    /// Gauge: Currently registered running compilations.
    pub const RUNNING_COMPILATIONS: &str = "smelt_sched_running_compilations";
    /// Histogram: Compiler invocation duration in seconds.
    pub const COMPILE_DURATION_SECONDS: &str = "smelt_sched_compile_duration_seconds";
    /// Counter: Last-successful supersessions.
    pub const SUCCESSFUL_SWAPS_TOTAL: &str = "smelt_sched_successful_swaps_total";
    /// Counter: Superseded classes directories deleted.
    pub const CLASSES_DIR_DELETIONS_TOTAL: &str = "smelt_sched_classes_dir_deletions_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Final result (ok, failed, cancelled, blocked, global_error).
    pub const RESULT: &str = "result";
    /// Dedup attach outcome (hit, replay_failed, disconnect).
    pub const OUTCOME: &str = "outcome";
    /// Traversal mode (normal, pipelined).
    pub const MODE: &str = "mode";
}

/// High-level interface for recording scheduler metrics.
///
/// Cheap to clone and share across tasks.
#[derive(Debug, Clone, Default)]
pub struct SchedMetrics;

impl SchedMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a dispatched compilation finishing with `result`.
    pub fn record_compilation(&self, result: &str) {
        counter!(
            names::COMPILATIONS_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records a deduplication attach outcome.
    pub fn record_dedup(&self, outcome: &str) {
        counter!(
            names::DEDUP_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Updates the running-compilations gauge.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_running_compilations(&self, count: usize) {
        gauge!(names::RUNNING_COMPILATIONS).set(count as f64);
    }

    /// Records a last-successful supersession.
    pub fn record_swap(&self) {
        counter!(names::SUCCESSFUL_SWAPS_TOTAL).increment(1);
    }

    /// Records the deletion of a superseded classes directory.
    pub fn record_deletion(&self) {
        counter!(names::CLASSES_DIR_DELETIONS_TOTAL).increment(1);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use smelt_sched::metrics::TimingGuard;
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         tracing::debug!(?duration, "dispatch finished");
///     });
///
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard for one compilation task.
///
/// Records the duration in the `smelt_sched_compile_duration_seconds`
/// histogram, labelled with the traversal mode, when the guard drops.
///
/// ## Example
///
/// ```rust,no_run
/// use smelt_sched::metrics::time_compilation;
///
/// async fn dispatch() {
///     let _guard = time_compilation("normal");
///     // Compile...
/// }
/// ```
#[must_use]
pub fn time_compilation(mode: &'static str) -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(move |duration| {
        histogram!(
            names::COMPILE_DURATION_SECONDS,
            labels::MODE => mode,
        )
        .record(duration.as_secs_f64());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_an_installed_recorder_does_not_panic() {
        let metrics = SchedMetrics::new();
        metrics.record_compilation("ok");
        metrics.record_dedup("hit");
        metrics.set_running_compilations(3);
        metrics.record_swap();
        metrics.record_deletion();

        let _guard = time_compilation("normal");
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded_duration = None;

        {
            let _guard = TimingGuard::new(|d| {
                recorded_duration = Some(d);
            });
            std::thread::sleep(Duration::from_millis(10));
        }

        // Duration should have been recorded
        assert!(recorded_duration.is_some());
        assert!(recorded_duration.is_some_and(|d| d >= Duration::from_millis(10)));
    }

    #[test]
    fn timing_guard_elapsed_works() {
        let guard = TimingGuard::new(|_| {});
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = guard.elapsed();
        assert!(elapsed >= Duration::from_millis(5));
    }
}
