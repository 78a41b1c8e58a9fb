//! Compilation events and client sinks.
//!
//! Every compilation produces a FIFO stream of [`CompileEvent`]s: exactly
//! one start event, any number of diagnostics and log lines, and exactly
//! one end event. Clients receive these through a [`ClientSink`]; the
//! deduplication layer mirrors the same stream so late subscribers can
//! replay it from the start in the original order.
//!
//! Events are serde-serializable so sinks can forward them over a
//! protocol boundary or persist them for later inspection.

use serde::{Deserialize, Serialize};

use smelt_core::ProjectId;

/// Severity of a compiler diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A fatal diagnostic; the compilation failed.
    Error,
    /// A non-fatal diagnostic.
    Warning,
    /// Informational output.
    Info,
}

/// A single compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Diagnostic severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Source file the diagnostic points at, if any.
    pub file: Option<String>,
    /// 1-based line number, if known.
    pub line: Option<u32>,
}

impl Problem {
    /// Creates an error diagnostic with just a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    /// Creates a warning diagnostic with just a message.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            file: None,
            line: None,
        }
    }
}

/// How a compilation ended, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    /// The compilation succeeded.
    Ok,
    /// The compilation failed with diagnostics.
    Failed,
    /// The compilation was cancelled (user cancel or stall re-dispatch).
    Cancelled,
}

/// Log line level for compiler/scheduler output forwarded to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Debug-level output.
    Debug,
    /// Informational output.
    Info,
    /// Warnings.
    Warn,
    /// Errors.
    Error,
}

/// One event in a compilation's reporter/logger stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompileEvent {
    /// Compilation of a project started.
    ///
    /// `previous_problems` carries the diagnostics of the last analysis so
    /// clients can seed their diagnostics view before new results arrive.
    Started {
        /// The project being compiled.
        project: ProjectId,
        /// Diagnostics re-derived from the previous analysis.
        previous_problems: Vec<Problem>,
    },
    /// A diagnostic was reported.
    Diagnostic {
        /// The project the diagnostic belongs to.
        project: ProjectId,
        /// The diagnostic.
        problem: Problem,
    },
    /// A log line was emitted.
    Log {
        /// Line level.
        level: LogLevel,
        /// Line content.
        message: String,
    },
    /// Compilation of a project ended.
    Ended {
        /// The project that finished.
        project: ProjectId,
        /// Final status.
        status: EndStatus,
    },
}

/// Error returned by a [`ClientSink`] that can no longer accept events.
#[derive(Debug, Clone, thiserror::Error)]
#[error("client sink rejected event: {message}")]
pub struct SinkError {
    /// Description of the failure.
    pub message: String,
}

impl SinkError {
    /// Creates a sink error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receiver of compilation events for one client.
///
/// Implementations translate events onto the client's protocol (BSP
/// notifications, console output). Handling must be fast and must not
/// block; a sink that fails permanently returns an error, which the
/// deduplication layer converts into a per-client global error without
/// disturbing the producing compilation.
pub trait ClientSink: Send + Sync {
    /// Delivers one event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the client can no longer accept events.
    fn handle(&self, event: &CompileEvent) -> Result<(), SinkError>;
}
