//! The traversal engine.
//!
//! [`traverse`] walks a project DAG bottom-up, evaluates each node
//! through the deduplication layer, and returns a result DAG with the
//! same shape as the input. Two algorithms share the skeleton:
//!
//! - **normal** (strict topological): a parent compiles only after every
//!   child's compilation fully completed
//! - **pipelined**: a parent starts as soon as every upstream has
//!   published its type signatures
//!
//! Each request keeps a memoization table keyed by DAG node identity, so
//! a sub-DAG referenced from several parents evaluates exactly once.

mod dedup;
mod enrichment;
mod normal;
mod pipelined;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use smelt_core::ProjectId;

use crate::bundle::BundleSetup;
use crate::client::ClientInfo;
use crate::compile::Compiler;
use crate::context::SchedulerContext;
use crate::dag::Dag;
use crate::project::Project;
use crate::result::{
    PartialSuccess, ResultDag, SharedTask, blocked_by, failed_projects, shared_task,
    transitive_successes,
};

/// Per-request traversal state shared by every node evaluation.
pub(crate) struct TraversalState {
    pub(crate) ctx: Arc<SchedulerContext>,
    pub(crate) client: Arc<dyn ClientInfo>,
    pub(crate) setup: Arc<dyn BundleSetup>,
    pub(crate) compiler: Arc<dyn Compiler>,
    pub(crate) pipelined: bool,
    pub(crate) cancel: CancellationToken,
    pub(crate) root: Arc<Dag<Project>>,
    memo: Mutex<HashMap<usize, SharedTask<Arc<ResultDag>>>>,
}

/// Compiles a project DAG for one client.
///
/// Walks the DAG bottom-up, consults the deduplication registry per node
/// (dispatching a new compilation or attaching to a running one), and
/// returns a result DAG of the same shape. `pipelined` selects the
/// traversal algorithm; `cancel` aborts every compilation dispatched by
/// this request.
pub async fn traverse(
    ctx: &Arc<SchedulerContext>,
    dag: Arc<Dag<Project>>,
    client: Arc<dyn ClientInfo>,
    setup: Arc<dyn BundleSetup>,
    compiler: Arc<dyn Compiler>,
    pipelined: bool,
    cancel: CancellationToken,
) -> Arc<ResultDag> {
    let span = smelt_core::observability::traversal_span(&client.id().to_string(), pipelined);
    let ctx = Arc::clone(ctx);
    async move {
        let state = Arc::new(TraversalState {
            ctx,
            client,
            setup,
            compiler,
            pipelined,
            cancel,
            root: Arc::clone(&dag),
            memo: Mutex::new(HashMap::new()),
        });

        let result = traverse_node(&state, &dag).await;
        enrichment::enrich_result_dag(&state, &result)
    }
    .instrument(span)
    .await
}

/// Evaluates one node, memoized by node identity for this request.
pub(crate) fn traverse_node(
    state: &Arc<TraversalState>,
    node: &Arc<Dag<Project>>,
) -> SharedTask<Arc<ResultDag>> {
    let ptr = Arc::as_ptr(node) as usize;
    let mut memo = state.memo.lock();
    if let Some(task) = memo.get(&ptr) {
        return task.clone();
    }

    let task = {
        let state = Arc::clone(state);
        let node = Arc::clone(node);
        shared_task(async move {
            if state.pipelined {
                pipelined::evaluate(&state, &node).await
            } else {
                normal::evaluate(&state, &node).await
            }
        })
    };
    memo.insert(ptr, task.clone());
    task
}

/// Collects the distinct failed-project names across child subtrees, in
/// depth-first children-left-first order.
///
/// [`blocked_by`] gates each subtree; only subtrees that contain a
/// failure pay for the full collection.
pub(crate) fn upstream_failures(children: &[Arc<ResultDag>]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for child in children {
        if blocked_by(child).is_none() {
            continue;
        }
        for name in failed_projects(child) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}

/// Collects the distinct transitive successes across child subtrees in
/// DFS first-occurrence order (the classpath-lookup order).
pub(crate) fn upstream_successes(children: &[Arc<ResultDag>]) -> Vec<PartialSuccess> {
    let mut seen: HashSet<ProjectId> = HashSet::new();
    let mut out = Vec::new();
    for child in children {
        for success in transitive_successes(child) {
            if seen.insert(success.bundle.project.id.clone()) {
                out.push(success);
            }
        }
    }
    out
}
