//! Compilation results flowing through the traversal.
//!
//! Every DAG node evaluates to a [`PartialCompileResult`]; the full
//! traversal returns a result DAG with the same shape as the input. The
//! eventual per-project outcome is a [`FinalCompileResult`], carried by a
//! memoized [`SharedTask`] so any number of clients and dependents can
//! await the same computation.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::runtime::Handle;

use crate::bundle::{CompileBundle, CompileProducts};
use crate::compile::PipelineHandles;
use crate::dag::Dag;
use crate::event::Problem;
use crate::project::Project;

/// A lazily-evaluated, memoized future shared by all subscribers.
///
/// Once the underlying future completes, every clone observes the same
/// (cloned) value; the engine may drive it any number of times.
pub type SharedTask<T> = Shared<BoxFuture<'static, T>>;

/// Wraps a future into a [`SharedTask`].
pub fn shared_task<T, F>(future: F) -> SharedTask<T>
where
    T: Clone + Send + Sync + 'static,
    F: std::future::Future<Output = T> + Send + 'static,
{
    future.boxed().shared()
}

/// A [`SharedTask`] that is already complete.
pub fn ready_task<T>(value: T) -> SharedTask<T>
where
    T: Clone + Send + Sync + 'static,
{
    shared_task(std::future::ready(value))
}

/// Spawns `future` onto `handle` and wraps the join into a [`SharedTask`].
///
/// The spawned work keeps running even if every subscriber drops its
/// clone; `on_join_error` converts a panicked or aborted task into a
/// value of `T`.
pub fn spawn_shared<T, F>(
    handle: &Handle,
    future: F,
    on_join_error: impl FnOnce(String) -> T + Send + 'static,
) -> SharedTask<T>
where
    T: Clone + Send + Sync + 'static,
    F: std::future::Future<Output = T> + Send + 'static,
{
    let join = handle.spawn(future);
    shared_task(async move {
        match join.await {
            Ok(value) => value,
            Err(e) => on_join_error(e.to_string()),
        }
    })
}

/// The eventual outcome of one project's compilation.
#[derive(Clone)]
pub enum FinalCompileResult {
    /// The compilation succeeded.
    Ok {
        /// The products of the compilation.
        products: Arc<CompileProducts>,
        /// Background population of the client-facing external classes
        /// directory; attached during result enrichment. Dependents that
        /// read the external directory await this first.
        populating: Option<SharedTask<()>>,
    },
    /// The compilation was cancelled (user cancel or stall re-dispatch).
    Cancelled,
    /// The compiler reported errors.
    Failed {
        /// The diagnostics.
        problems: Arc<[Problem]>,
    },
    /// Skipped because an upstream project failed or was blocked.
    Blocked {
        /// Names of the failed upstream projects.
        upstream: Vec<String>,
    },
    /// A scheduler-internal failure (setup error, replay error).
    GlobalError {
        /// Description of the failure.
        message: String,
    },
}

impl FinalCompileResult {
    /// Creates a successful result without enrichment attached yet.
    #[must_use]
    pub fn ok(products: Arc<CompileProducts>) -> Self {
        Self::Ok {
            products,
            populating: None,
        }
    }

    /// Creates a global error result.
    #[must_use]
    pub fn global_error(message: impl Into<String>) -> Self {
        Self::GlobalError {
            message: message.into(),
        }
    }

    /// Returns `true` for [`FinalCompileResult::Ok`].
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Returns the products if this result is successful.
    #[must_use]
    pub fn products(&self) -> Option<&Arc<CompileProducts>> {
        match self {
            Self::Ok { products, .. } => Some(products),
            _ => None,
        }
    }
}

impl std::fmt::Debug for FinalCompileResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok { products, .. } => f.debug_struct("Ok").field("products", products).finish(),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed { problems } => {
                f.debug_struct("Failed").field("problems", problems).finish()
            }
            Self::Blocked { upstream } => {
                f.debug_struct("Blocked").field("upstream", upstream).finish()
            }
            Self::GlobalError { message } => {
                f.debug_struct("GlobalError").field("message", message).finish()
            }
        }
    }
}

/// Why a node failed without a successful compiler run.
#[derive(Debug, Clone)]
pub enum FailureCause {
    /// Bundle setup failed.
    SetupFailed(String),
    /// One or more upstream projects failed or were blocked.
    Blocked {
        /// Names of the failed upstream projects.
        upstream: Vec<String>,
    },
    /// An upstream signature or completion promise failed or was
    /// cancelled.
    FailedOrCancelledPromise,
    /// The compiler reported errors for this project.
    Compiler,
    /// The compilation was cancelled.
    Cancelled,
    /// A scheduler-internal failure (setup error, replay error, panic).
    Internal(String),
}

/// A node that compiled (or is compiling, in pipelined mode).
#[derive(Clone)]
pub struct PartialSuccess {
    /// The bundle this attempt was compiled from.
    pub bundle: Arc<CompileBundle>,
    /// Pipelining handles (signatures/done promises), when pipelined.
    pub pipeline: Option<PipelineHandles>,
    /// The memoized per-project outcome.
    pub result: SharedTask<FinalCompileResult>,
}

impl std::fmt::Debug for PartialSuccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialSuccess")
            .field("project", &self.bundle.project.name)
            .field("pipelined", &self.pipeline.is_some())
            .finish_non_exhaustive()
    }
}

/// A node that did not compile.
#[derive(Clone)]
pub struct PartialFailure {
    /// The project that failed.
    pub project: Project,
    /// Why it failed.
    pub cause: FailureCause,
    /// The memoized per-project outcome (already complete for
    /// structural failures).
    pub result: SharedTask<FinalCompileResult>,
}

impl std::fmt::Debug for PartialFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialFailure")
            .field("project", &self.project.name)
            .field("cause", &self.cause)
            .finish_non_exhaustive()
    }
}

/// Per-node outcome flowing up the result DAG.
#[derive(Debug, Clone)]
pub enum PartialCompileResult {
    /// No compile work at this node (aggregate roots).
    Empty,
    /// The node compiled (or is compiling).
    Success(PartialSuccess),
    /// The node failed structurally or in the compiler.
    Failure(PartialFailure),
}

impl PartialCompileResult {
    /// Returns the success, if any.
    #[must_use]
    pub fn success(&self) -> Option<&PartialSuccess> {
        match self {
            Self::Success(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&PartialFailure> {
        match self {
            Self::Failure(f) => Some(f),
            _ => None,
        }
    }

    /// Returns `true` for [`PartialCompileResult::Failure`].
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// The result DAG returned by a traversal; same shape as the input DAG.
pub type ResultDag = Dag<PartialCompileResult>;

/// Collects the names of all failed projects in a result sub-DAG.
///
/// Depth-first, children before parents, each distinct node once; the
/// order is deterministic for a given DAG.
#[must_use]
pub fn failed_projects(dag: &Arc<ResultDag>) -> Vec<String> {
    let mut seen: Vec<*const ResultDag> = Vec::new();
    let mut out = Vec::new();
    collect_failures(dag, &mut seen, &mut out);
    out
}

fn collect_failures(
    node: &Arc<ResultDag>,
    seen: &mut Vec<*const ResultDag>,
    out: &mut Vec<String>,
) {
    let ptr = Arc::as_ptr(node);
    if seen.contains(&ptr) {
        return;
    }
    seen.push(ptr);
    for child in node.children() {
        collect_failures(child, seen, out);
    }
    if let Some(failure) = node.value().and_then(PartialCompileResult::failure) {
        out.push(failure.project.name.clone());
    }
}

/// Returns the first project (depth-first, children first) whose subtree
/// contains a failure, if any.
#[must_use]
pub fn blocked_by(dag: &Arc<ResultDag>) -> Option<String> {
    failed_projects(dag).into_iter().next()
}

/// Collects all distinct successes in a result sub-DAG, in the DFS
/// first-occurrence order used for classpath-like lookups.
#[must_use]
pub fn transitive_successes(dag: &Arc<ResultDag>) -> Vec<PartialSuccess> {
    dag.dfs()
        .iter()
        .filter_map(|node| node.value().and_then(PartialCompileResult::success))
        .cloned()
        .collect()
}
