//! Strict topological traversal.
//!
//! A parent node is evaluated only after every child subtree has fully
//! completed its compilation. Any failure in a child subtree blocks the
//! parent: its compile is never invoked and the node reports which
//! upstream projects caused the skip.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;

use smelt_core::ProjectId;

use crate::bundle::{Analysis, BundleProducts};
use crate::dag::Dag;
use crate::project::Project;
use crate::result::{
    FailureCause, FinalCompileResult, PartialCompileResult, PartialFailure, ResultDag, ready_task,
};

use super::{TraversalState, dedup, traverse_node, upstream_failures, upstream_successes};

/// Evaluates one node in normal (strict) mode.
pub(crate) async fn evaluate(
    state: &Arc<TraversalState>,
    node: &Arc<Dag<Project>>,
) -> Arc<ResultDag> {
    match &**node {
        Dag::Leaf(project) => {
            let result = dedup::setup_and_deduplicate(
                Arc::clone(state),
                project.clone(),
                Arc::new(HashMap::new()),
                Arc::new(HashMap::new()),
                None,
            )
            .await;
            Arc::new(Dag::Leaf(result))
        }

        Dag::Aggregate(children) => {
            let child_results = evaluate_children(state, children).await;
            Arc::new(Dag::Parent(PartialCompileResult::Empty, child_results))
        }

        Dag::Parent(project, children) => {
            let child_results = evaluate_children(state, children).await;

            let failed = upstream_failures(&child_results);
            if !failed.is_empty() {
                let result = blocked(project, failed);
                return Arc::new(Dag::Parent(result, child_results));
            }

            // Every child subtree succeeded structurally; gather their
            // products. In strict mode each upstream compilation has run
            // to completion by now.
            let successes = upstream_successes(&child_results);
            let mut dependent_products: HashMap<ProjectId, BundleProducts> = HashMap::new();
            let mut dependent_results: HashMap<PathBuf, Arc<Analysis>> = HashMap::new();
            let mut failed_upstreams: Vec<String> = Vec::new();

            for success in &successes {
                match success.result.clone().await {
                    FinalCompileResult::Ok { products, .. } => {
                        dependent_products.insert(
                            success.bundle.project.id.clone(),
                            BundleProducts::Full(Arc::clone(&products)),
                        );
                        // Register the analysis under both directories:
                        // downstream analysis lookup may resolve either.
                        dependent_results.insert(
                            products.read_only_classes_dir.clone(),
                            Arc::clone(&products.analysis),
                        );
                        dependent_results.insert(
                            products.new_classes_dir.clone(),
                            Arc::clone(&products.analysis),
                        );
                    }
                    _ => failed_upstreams.push(success.bundle.project.name.clone()),
                }
            }

            if !failed_upstreams.is_empty() {
                let result = blocked(project, failed_upstreams);
                return Arc::new(Dag::Parent(result, child_results));
            }

            let result = dedup::setup_and_deduplicate(
                Arc::clone(state),
                project.clone(),
                Arc::new(dependent_products),
                Arc::new(dependent_results),
                None,
            )
            .await;
            Arc::new(Dag::Parent(result, child_results))
        }
    }
}

async fn evaluate_children(
    state: &Arc<TraversalState>,
    children: &[Arc<Dag<Project>>],
) -> Vec<Arc<ResultDag>> {
    join_all(children.iter().map(|child| traverse_node(state, child))).await
}

fn blocked(project: &Project, upstream: Vec<String>) -> PartialCompileResult {
    tracing::debug!(
        project = %project.name,
        blocked_by = ?upstream,
        "skipping compilation, upstream failed"
    );
    PartialCompileResult::Failure(PartialFailure {
        project: project.clone(),
        cause: FailureCause::Blocked {
            upstream: upstream.clone(),
        },
        result: ready_task(FinalCompileResult::Blocked { upstream }),
    })
}
