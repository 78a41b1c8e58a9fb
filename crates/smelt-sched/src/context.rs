//! Scheduler context: configuration, executors, and shared state.
//!
//! A [`SchedulerContext`] is the single value threaded into every
//! traversal. It owns the deduplication registry, the configuration, and
//! two executor handles:
//!
//! - `compute`: bounded (CPU-count sized); runs compilation
//!   transformations and DAG composition
//! - `io`: for work that may block or wait indefinitely — awaiting
//!   another client's compilation, event replay, disk deletion
//!
//! There is no process-global state; tests reset by constructing a fresh
//! context.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::metrics::SchedMetrics;
use crate::registry::DeduplicationRegistry;

/// Environment variable overriding the replay disconnection timeout, in
/// whole seconds.
pub const DISCONNECT_TIMEOUT_ENV: &str = "SMELT_DEDUP_DISCONNECT_SECS";

const DEFAULT_DISCONNECT_SECS: u64 = 60;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long a deduplicated subscriber waits between events from the
    /// producing compilation before treating it as stalled, disconnecting,
    /// and re-dispatching.
    pub disconnect_timeout: Duration,
}

impl SchedulerConfig {
    /// Builds the configuration from the environment.
    ///
    /// Reads [`DISCONNECT_TIMEOUT_ENV`] (whole seconds); malformed or
    /// missing values fall back to the 60 second default.
    #[must_use]
    pub fn from_env() -> Self {
        let disconnect_timeout = std::env::var(DISCONNECT_TIMEOUT_ENV)
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map_or(Duration::from_secs(DEFAULT_DISCONNECT_SECS), Duration::from_secs);
        Self { disconnect_timeout }
    }

    /// A configuration with an explicit disconnect timeout (tests).
    #[must_use]
    pub fn with_disconnect_timeout(disconnect_timeout: Duration) -> Self {
        Self { disconnect_timeout }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout: Duration::from_secs(DEFAULT_DISCONNECT_SECS),
        }
    }
}

/// Shared scheduler state threaded into every operation.
pub struct SchedulerContext {
    registry: DeduplicationRegistry,
    config: SchedulerConfig,
    compute: Handle,
    io: Handle,
}

impl SchedulerContext {
    /// Creates a context running both executors on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let handle = Handle::current();
        Self::with_executors(config, handle.clone(), handle)
    }

    /// Creates a context with distinct compute and I/O executors.
    ///
    /// All cross-compilation waits (deduplicated awaits, event replay,
    /// disk deletion) run on `io` so they cannot starve `compute`.
    #[must_use]
    pub fn with_executors(config: SchedulerConfig, compute: Handle, io: Handle) -> Arc<Self> {
        Arc::new(Self {
            registry: DeduplicationRegistry::new(),
            config,
            compute,
            io,
        })
    }

    /// The deduplication registry.
    #[must_use]
    pub fn registry(&self) -> &DeduplicationRegistry {
        &self.registry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The compute executor handle.
    #[must_use]
    pub fn compute(&self) -> &Handle {
        &self.compute
    }

    /// The I/O executor handle.
    #[must_use]
    pub fn io(&self) -> &Handle {
        &self.io
    }

    /// Spawns compilation work on the compute executor.
    pub fn spawn_compute<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.compute.spawn(future)
    }

    /// Spawns potentially-blocking work on the I/O executor.
    pub fn spawn_io<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.io.spawn(future)
    }

    /// The metrics recorder.
    #[must_use]
    pub fn metrics(&self) -> &SchedMetrics {
        self.registry.metrics()
    }

    /// Drops every last-successful result. Test hook.
    pub fn clear_successful_results(&self) {
        self.registry.clear_successful_results();
    }
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_disconnect_timeout_is_sixty_seconds() {
        let config = SchedulerConfig::default();
        assert_eq!(config.disconnect_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn context_spawns_on_both_executors() {
        let ctx = SchedulerContext::new(SchedulerConfig::default());
        let a = ctx.spawn_compute(async { 1 + 1 });
        let b = ctx.spawn_io(async { 2 + 2 });
        assert_eq!(a.await.unwrap(), 2);
        assert_eq!(b.await.unwrap(), 4);
    }
}
