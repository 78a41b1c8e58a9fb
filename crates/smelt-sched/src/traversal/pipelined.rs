//! Pipelined traversal.
//!
//! Downstream compilation starts as soon as every upstream has published
//! its type signatures, without waiting for upstream bytecode. Structural
//! error propagation is preserved: a parent still waits for each child's
//! traversal placeholder, and an upstream whose signature promise fails
//! blocks the parent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;

use smelt_core::ProjectId;

use crate::bundle::{Analysis, BundleProducts, PartialProducts};
use crate::compile::JavaSignal;
use crate::dag::Dag;
use crate::oracle::{SignatureBatch, SignatureTable};
use crate::project::Project;
use crate::result::{
    FailureCause, FinalCompileResult, PartialCompileResult, PartialFailure, PartialSuccess,
    ResultDag, SharedTask, ready_task, shared_task,
};

use super::{TraversalState, dedup, traverse_node, upstream_failures, upstream_successes};

/// Evaluates one node in pipelined mode.
pub(crate) async fn evaluate(
    state: &Arc<TraversalState>,
    node: &Arc<Dag<Project>>,
) -> Arc<ResultDag> {
    match &**node {
        Dag::Leaf(project) => {
            let prep = dedup::PipelinePrep {
                signatures: SignatureTable::new(),
                upstream_macros: IndexMap::new(),
                upstream_successes: Vec::new(),
                transitive_java_signal: ready_task(JavaSignal::ContinueCompilation),
            };
            let result = dedup::setup_and_deduplicate(
                Arc::clone(state),
                project.clone(),
                Arc::new(HashMap::new()),
                Arc::new(HashMap::new()),
                Some(Arc::new(prep)),
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
                let result = blocked(project, FailureCause::Blocked {
                    upstream: failed.clone(),
                }, failed);
                return Arc::new(Dag::Parent(result, child_results));
            }

            let successes = upstream_successes(&child_results);

            // Collect upstream signatures as soon as they materialize;
            // completion of the upstream compilations is not awaited
            // here.
            let mut signatures = SignatureTable::new();
            let mut upstream_macros: IndexMap<ProjectId, Arc<[String]>> = IndexMap::new();
            let mut batches: Vec<(PartialSuccess, SignatureBatch)> = Vec::new();
            let mut failed_promises: Vec<String> = Vec::new();

            for success in &successes {
                match upstream_signatures(success).await {
                    Ok(batch) => {
                        signatures.extend_first_wins(batch.signatures.iter().cloned());
                        upstream_macros.insert(
                            success.bundle.project.id.clone(),
                            Arc::clone(&batch.macro_symbols),
                        );
                        batches.push((success.clone(), batch));
                    }
                    Err(()) => failed_promises.push(success.bundle.project.name.clone()),
                }
            }

            if !failed_promises.is_empty() {
                let result = blocked(
                    project,
                    FailureCause::FailedOrCancelledPromise,
                    failed_promises,
                );
                return Arc::new(Dag::Parent(result, child_results));
            }

            let transitive_java_signal = java_signal_for(&successes);

            let mut dependent_products: HashMap<ProjectId, BundleProducts> = HashMap::new();
            let mut dependent_results: HashMap<PathBuf, Arc<Analysis>> = HashMap::new();
            for (success, batch) in &batches {
                // An upstream whose full compilation already finished
                // contributes full products; one still compiling
                // contributes the partial view pipelined dependents can
                // compile against.
                let finished = success
                    .result
                    .peek()
                    .and_then(|result| result.products().cloned());
                match finished {
                    Some(products) => {
                        dependent_results.insert(
                            products.read_only_classes_dir.clone(),
                            Arc::clone(&products.analysis),
                        );
                        dependent_results.insert(
                            products.new_classes_dir.clone(),
                            Arc::clone(&products.analysis),
                        );
                        dependent_products.insert(
                            success.bundle.project.id.clone(),
                            BundleProducts::Full(products),
                        );
                    }
                    None => {
                        dependent_products.insert(
                            success.bundle.project.id.clone(),
                            BundleProducts::Partial(PartialProducts {
                                read_only_classes_dir: success
                                    .bundle
                                    .read_only_classes_dir
                                    .clone(),
                                new_classes_dir: success.bundle.new_classes_dir.clone(),
                                macro_symbols: batch.macro_symbols.to_vec(),
                            }),
                        );
                    }
                }
            }

            let prep = dedup::PipelinePrep {
                signatures,
                upstream_macros,
                upstream_successes: successes
                    .iter()
                    .map(|s| s.bundle.project.id.clone())
                    .collect(),
                transitive_java_signal,
            };
            let result = dedup::setup_and_deduplicate(
                Arc::clone(state),
                project.clone(),
                Arc::new(dependent_products),
                Arc::new(dependent_results),
                Some(Arc::new(prep)),
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

/// Waits for an upstream's signatures.
///
/// An upstream compiled pipelined exposes its signatures promise; one
/// that deduplicated against a non-pipelined compilation is already
/// complete, so its signatures come from the full products.
async fn upstream_signatures(success: &PartialSuccess) -> Result<SignatureBatch, ()> {
    match &success.pipeline {
        Some(handles) => handles.signatures.wait().await.map_err(|_| ()),
        None => match success.result.clone().await {
            FinalCompileResult::Ok { products, .. } => Ok(SignatureBatch {
                signatures: Arc::clone(&products.signatures),
                macro_symbols: products.defined_macro_symbols.clone().into(),
            }),
            _ => Err(()),
        },
    }
}

/// The transitive Java signal for a node: `ContinueCompilation` once
/// every upstream's finished-compilation promise completed successfully,
/// otherwise the left-to-right fold of the fail-fasts.
fn java_signal_for(successes: &[PartialSuccess]) -> SharedTask<JavaSignal> {
    let waits: Vec<_> = successes
        .iter()
        .map(|success| {
            let name = success.bundle.project.name.clone();
            let pipeline = success.pipeline.clone();
            let result = success.result.clone();
            async move {
                let completed = match pipeline {
                    Some(handles) => handles.done.wait().await.is_ok(),
                    None => result.await.is_ok(),
                };
                if completed {
                    JavaSignal::ContinueCompilation
                } else {
                    JavaSignal::FailFastCompilation(vec![name])
                }
            }
        })
        .collect();

    shared_task(async move { JavaSignal::fold(join_all(waits).await) })
}

fn blocked(
    project: &Project,
    cause: FailureCause,
    upstream: Vec<String>,
) -> PartialCompileResult {
    tracing::debug!(
        project = %project.name,
        blocked_by = ?upstream,
        "skipping pipelined compilation, upstream failed"
    );
    PartialCompileResult::Failure(PartialFailure {
        project: project.clone(),
        cause,
        result: ready_task(FinalCompileResult::Blocked { upstream }),
    })
}
