//! Observability infrastructure for Smelt.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors used across the scheduler
//! so that every compilation can be traced end to end.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at server startup. Safe to call multiple times; subsequent
/// calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `smelt_sched=debug`)
///
/// # Example
///
/// ```rust
/// use smelt_core::observability::{LogFormat, init_logging};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one compilation attempt with standard fields.
///
/// # Example
///
/// ```rust
/// use smelt_core::observability::compile_span;
///
/// let span = compile_span("backend", "01JG2Z", "dispatch");
/// let _guard = span.enter();
/// // ... compile ...
/// ```
#[must_use]
pub fn compile_span(project: &str, client: &str, op: &str) -> Span {
    tracing::info_span!("compile", project = project, client = client, op = op)
}

/// Creates a span for a DAG traversal request.
#[must_use]
pub fn traversal_span(client: &str, pipelined: bool) -> Span {
    tracing::info_span!("traversal", client = client, pipelined = pipelined)
}
