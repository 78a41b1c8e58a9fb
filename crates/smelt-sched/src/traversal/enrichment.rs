//! Result enrichment and artifact cleanup.
//!
//! After a compilation completes, the registry must reflect its outcome
//! atomically: a failure unregisters the running entry and releases the
//! previous classes directory; a success supersedes the last-successful
//! result and, once the superseded directory is unreferenced, sequences
//! its deletion behind both populating-products tasks.
//!
//! The traversal's returned result tree is also enriched per client:
//! every successful node triggers background population of the client's
//! external classes directory on the I/O executor, and the resulting
//! future is stored in the delivered result so dependents can await it
//! before reading the directory.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;

use smelt_core::UniqueCompileInputs;

use crate::bundle::{CompileBundle, LastSuccessfulResult};
use crate::context::SchedulerContext;
use crate::dag::Dag;
use crate::result::{
    FinalCompileResult, PartialCompileResult, PartialSuccess, ResultDag, ready_task, shared_task,
    spawn_shared,
};

use super::TraversalState;

/// Applies a finished compilation's outcome to the registry.
///
/// On failure (including cancellation): the running entry is removed,
/// unless a disconnecting subscriber already unregistered it, and the
/// refcount taken on the previous classes directory is released.
///
/// On success: the last-successful result is swapped atomically. When the
/// swap returns a superseded result, its directory's deletion is
/// scheduled on the I/O executor, sequenced after both the old and the
/// new populating-products tasks, and the composite becomes the new
/// result's populating-products so future consumers wait on it.
pub(crate) async fn process_result_atomically(
    ctx: &Arc<SchedulerContext>,
    key: &UniqueCompileInputs,
    bundle: &Arc<CompileBundle>,
    obtained_previous: &Arc<LastSuccessfulResult>,
    is_unsubscribed: &Arc<AtomicBool>,
    outcome: &FinalCompileResult,
) {
    let registry = ctx.registry();

    let FinalCompileResult::Ok { products, .. } = outcome else {
        if !is_unsubscribed.load(Ordering::SeqCst) {
            registry.remove(key);
        }
        registry.decrement_classes_dir_refcount(obtained_previous.classes_dir());
        return;
    };

    // This attempt is done reading its previous artifacts; release the
    // reader reference before the swap so an unreferenced predecessor
    // can be reclaimed.
    registry.decrement_classes_dir_refcount(obtained_previous.classes_dir());

    let new_successful = Arc::new(LastSuccessfulResult::new(
        products.new_classes_dir.clone(),
        Arc::clone(&products.analysis),
        ready_task(()),
    ));

    let Some(superseded) =
        registry.swap_last_successful(&bundle.project.id, Arc::clone(&new_successful))
    else {
        return;
    };

    // Sequence: old populating, then new populating, then deletion. A
    // reader that obtained the old directory either finishes before the
    // deletion runs (the refcount was zero at swap time) or observes the
    // new record.
    let old_populating = superseded.populating();
    let new_populating = new_successful.populating();
    let old_dir = superseded.classes_dir().to_path_buf();
    let skip_deletion = superseded.is_empty_sentinel();
    let metrics = ctx.metrics().clone();

    let composite = spawn_shared(
        ctx.io(),
        async move {
            old_populating.await;
            new_populating.await;
            if skip_deletion {
                return;
            }
            match tokio::fs::remove_dir_all(&old_dir).await {
                Ok(()) => {
                    metrics.record_deletion();
                    tracing::debug!(
                        dir = %old_dir.display(),
                        "deleted superseded classes directory"
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        dir = %old_dir.display(),
                        error = %e,
                        "failed to delete superseded classes directory"
                    );
                }
            }
        },
        |_| (),
    );
    new_successful.set_populating(composite);
}

/// Enriches a traversal's result tree for the requesting client.
///
/// Rebuilds the DAG (preserving node sharing) with every successful
/// node's result wrapped to trigger background population of the
/// client's external classes directory once the compilation succeeds.
///
/// # Panics
///
/// Panics on an `Aggregate` node: traversal maps aggregates to parents
/// with an empty value, so one here is a scheduler invariant violation.
pub(crate) fn enrich_result_dag(
    state: &Arc<TraversalState>,
    dag: &Arc<ResultDag>,
) -> Arc<ResultDag> {
    let mut memo: HashMap<usize, Arc<ResultDag>> = HashMap::new();
    enrich_node(state, dag, &mut memo)
}

fn enrich_node(
    state: &Arc<TraversalState>,
    node: &Arc<ResultDag>,
    memo: &mut HashMap<usize, Arc<ResultDag>>,
) -> Arc<ResultDag> {
    let ptr = Arc::as_ptr(node) as usize;
    if let Some(done) = memo.get(&ptr) {
        return Arc::clone(done);
    }

    let enriched = match &**node {
        Dag::Leaf(result) => Arc::new(Dag::Leaf(enrich_result(state, result))),
        Dag::Parent(result, children) => {
            let children = children
                .iter()
                .map(|child| enrich_node(state, child, memo))
                .collect();
            Arc::new(Dag::Parent(enrich_result(state, result), children))
        }
        Dag::Aggregate(_) => {
            unreachable!("unexpected aggregate node during result enrichment")
        }
    };
    memo.insert(ptr, Arc::clone(&enriched));
    enriched
}

fn enrich_result(
    state: &Arc<TraversalState>,
    result: &PartialCompileResult,
) -> PartialCompileResult {
    let PartialCompileResult::Success(success) = result else {
        return result.clone();
    };
    let enriched = trigger_background_population(state, success);

    // In strict mode the outcome is already available; drive the wrapper
    // once so population starts before the traversal returns.
    if !state.pipelined {
        let _ = enriched.result.clone().now_or_never();
    }
    PartialCompileResult::Success(enriched)
}

/// Wraps a success so that, on `Ok`, the compile products' background
/// tasks populate this client's external classes directory and the
/// population future rides along in the delivered result.
fn trigger_background_population(
    state: &Arc<TraversalState>,
    success: &PartialSuccess,
) -> PartialSuccess {
    let original = success.result.clone();
    let ctx = Arc::clone(&state.ctx);
    let client = Arc::clone(&state.client);
    let project = success.bundle.project.clone();

    let result = shared_task(async move {
        match original.await {
            FinalCompileResult::Ok { products, .. } => {
                let external_dir = client.unique_classes_dir_for(&project);
                let background = Arc::clone(&products.background);
                let project_name = project.name.clone();
                let handle = ctx.spawn_io(async move {
                    if let Err(e) = background.trigger(external_dir).await {
                        tracing::warn!(
                            project = %project_name,
                            error = %e,
                            "background population of external classes directory failed"
                        );
                    }
                });
                let populating = shared_task(async move {
                    let _ = handle.await;
                });
                FinalCompileResult::Ok {
                    products,
                    populating: Some(populating),
                }
            }
            other => other,
        }
    });

    PartialSuccess {
        bundle: Arc::clone(&success.bundle),
        pipeline: success.pipeline.clone(),
        result,
    }
}
