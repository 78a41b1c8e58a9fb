//! The compiler contract.
//!
//! The scheduler never invokes a compiler directly; callers supply an
//! implementation of [`Compiler`]. In pipelined mode the invocation also
//! receives [`PipelineInputs`], and the implementation MUST complete the
//! signature and finished-compilation promises and MUST honour the
//! transitive Java signal (abort the Java phase on
//! [`JavaSignal::FailFastCompilation`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::bundle::{Analysis, CompileBundle, CompileProducts, LastSuccessfulResult};
use crate::event::Problem;
use crate::oracle::{CompilerOracle, DoneResult, PromiseFailed, SignaturesResult};
use crate::promise::Promise;
use crate::result::SharedTask;

/// Whether a pipelined compilation may run its Java phase.
///
/// Folded left-to-right over the upstream completion results:
/// `Continue ∘ Continue = Continue`; two fail-fasts concatenate their
/// upstream lists; otherwise the fail-fast absorbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JavaSignal {
    /// All upstreams completed successfully; proceed.
    ContinueCompilation,
    /// At least one upstream failed; abort the Java phase.
    FailFastCompilation(Vec<String>),
}

impl JavaSignal {
    /// Merges two signals.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::ContinueCompilation, Self::ContinueCompilation) => Self::ContinueCompilation,
            (Self::FailFastCompilation(mut a), Self::FailFastCompilation(b)) => {
                a.extend(b);
                Self::FailFastCompilation(a)
            }
            (signal @ Self::FailFastCompilation(_), Self::ContinueCompilation)
            | (Self::ContinueCompilation, signal @ Self::FailFastCompilation(_)) => signal,
        }
    }

    /// Folds an iterator of signals left-to-right.
    #[must_use]
    pub fn fold(signals: impl IntoIterator<Item = Self>) -> Self {
        signals
            .into_iter()
            .fold(Self::ContinueCompilation, Self::merge)
    }
}

/// The promise handles of one pipelined compilation.
#[derive(Debug, Clone)]
pub struct PipelineHandles {
    /// Completed by the compiler as soon as type signatures are ready.
    pub signatures: Promise<SignaturesResult>,
    /// Completed by the compiler when compilation fully completes.
    pub done: Promise<DoneResult>,
    /// Completed when the Java phase finishes.
    pub complete_java: Promise<DoneResult>,
}

impl PipelineHandles {
    /// Creates fresh, unfulfilled handles.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signatures: Promise::new(),
            done: Promise::new(),
            complete_java: Promise::new(),
        }
    }

    /// Fails every unfulfilled promise with `reason`.
    ///
    /// Called by the scheduler when the compilation finishes without
    /// completing its promises, so pipelined downstreams unblock with a
    /// structural failure instead of hanging.
    pub fn fail_unfilled(&self, reason: &str) {
        self.signatures
            .complete(Err(PromiseFailed::new(reason)));
        self.done.complete(Err(PromiseFailed::new(reason)));
        self.complete_java.complete(Err(PromiseFailed::new(reason)));
    }
}

impl Default for PipelineHandles {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipelining inputs handed to the compiler.
#[derive(Clone)]
pub struct PipelineInputs {
    /// The compiler completes this as early as type signatures are ready.
    pub signatures: Promise<SignaturesResult>,
    /// The compiler completes this when compilation fully completes.
    pub done: Promise<DoneResult>,
    /// The compiler completes this when the Java phase finishes.
    pub complete_java: Promise<DoneResult>,
    /// Resolves once every upstream finished; the compiler awaits it
    /// before the Java phase and aborts on fail-fast.
    pub transitive_java_signal: SharedTask<JavaSignal>,
    /// Compile Java and Scala sources through separate phases.
    pub separate_java_and_scala: bool,
}

impl std::fmt::Debug for PipelineInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineInputs")
            .field("signatures", &self.signatures)
            .field("done", &self.done)
            .field("complete_java", &self.complete_java)
            .field("separate_java_and_scala", &self.separate_java_and_scala)
            .finish_non_exhaustive()
    }
}

/// Everything one compiler invocation receives.
pub struct CompileInputs {
    /// The bundle for this attempt.
    pub bundle: Arc<CompileBundle>,
    /// The oracle (simple or pipelining).
    pub oracle: Arc<CompilerOracle>,
    /// Pipelining inputs; `None` in normal mode.
    pub pipeline: Option<PipelineInputs>,
    /// Previous analyses of the upstream projects, keyed by both their
    /// read-only and their new classes directories (downstream analysis
    /// lookup may resolve either path).
    pub dependent_results: HashMap<PathBuf, Arc<Analysis>>,
    /// The last-successful result selected by the scheduler for this
    /// attempt (the empty sentinel when no usable previous state exists).
    pub last_successful: Arc<LastSuccessfulResult>,
}

impl std::fmt::Debug for CompileInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileInputs")
            .field("project", &self.bundle.project.name)
            .field("pipelined", &self.pipeline.is_some())
            .field("dependent_results", &self.dependent_results.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of one compiler invocation.
#[derive(Debug)]
pub enum CompileOutcome {
    /// Compilation succeeded.
    Ok(CompileProducts),
    /// Compilation observed its cancel token and stopped.
    Cancelled,
    /// Compilation failed with diagnostics.
    Failed {
        /// The diagnostics.
        problems: Vec<Problem>,
    },
}

/// What a compiler invocation returns.
#[derive(Debug)]
pub struct ResultBundle {
    /// The outcome.
    pub outcome: CompileOutcome,
    /// When the invocation finished.
    pub completed_at: DateTime<Utc>,
}

impl ResultBundle {
    /// Wraps an outcome, stamping the completion time.
    #[must_use]
    pub fn new(outcome: CompileOutcome) -> Self {
        Self {
            outcome,
            completed_at: Utc::now(),
        }
    }

    /// A cancelled result.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(CompileOutcome::Cancelled)
    }
}

/// Caller-supplied compiler invocation.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compiles one bundle.
    ///
    /// Failures are expressed in the returned outcome, never as panics.
    /// Pipelined invocations must complete `inputs.pipeline`'s signature
    /// and done promises.
    async fn compile(&self, inputs: CompileInputs) -> ResultBundle;
}
