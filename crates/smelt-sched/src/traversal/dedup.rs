//! Setup, deduplication, and dispatch of per-node compilations.
//!
//! For every node attempt the engine runs the caller's bundle setup,
//! then consults the registry: the first client to register a given
//! unique-inputs fingerprint dispatches and owns the compilation; every
//! other client attaches to it, replays its event mirror, and races the
//! replay against the memoized result. A replay that stalls past the
//! disconnection timeout unregisters the entry, cancels the producer,
//! and re-enters this module to dispatch afresh.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;

use smelt_core::{AttemptId, ProjectId};

use crate::bundle::{Analysis, BundleInputs, BundleProducts, CompileBundle, LastSuccessfulResult, LatestResult};
use crate::compile::{CompileInputs, CompileOutcome, JavaSignal, PipelineHandles, PipelineInputs};
use crate::event::{CompileEvent, EndStatus, Problem, SinkError};
use crate::metrics::time_compilation;
use crate::oracle::{CompilerOracle, PipeliningOracle, SignatureBatch, SignatureTable, SimpleOracle};
use crate::project::Project;
use crate::registry::RunningCompilation;
use crate::result::{
    FailureCause, FinalCompileResult, PartialCompileResult, PartialFailure, PartialSuccess,
    ready_task, spawn_shared,
};

use super::{TraversalState, enrichment};

/// Upstream context a pipelined node compiles with.
pub(crate) struct PipelinePrep {
    /// Transitive upstream signatures, DFS first-occurrence order.
    pub(crate) signatures: SignatureTable,
    /// Macro symbols defined per upstream project.
    pub(crate) upstream_macros: IndexMap<ProjectId, Arc<[String]>>,
    /// The upstream partial successes this node depends on.
    pub(crate) upstream_successes: Vec<ProjectId>,
    /// Fold of the upstream finished-compilation promises.
    pub(crate) transitive_java_signal: crate::result::SharedTask<JavaSignal>,
}

/// Runs bundle setup for one node and either dispatches a new
/// compilation or deduplicates against a running one.
///
/// Boxed because the stall/re-dispatch path re-enters recursively.
pub(crate) fn setup_and_deduplicate(
    state: Arc<TraversalState>,
    project: Project,
    dependent_products: Arc<HashMap<ProjectId, BundleProducts>>,
    dependent_results: Arc<HashMap<PathBuf, Arc<Analysis>>>,
    pipeline: Option<Arc<PipelinePrep>>,
) -> BoxFuture<'static, PartialCompileResult> {
    async move {
        let inputs = BundleInputs {
            project: project.clone(),
            dag: Arc::clone(&state.root),
            dependent_products: dependent_products.as_ref().clone(),
            client: Arc::clone(&state.client),
            cancel: state.cancel.child_token(),
        };

        let bundle = match state.setup.setup(inputs).await {
            Ok(bundle) => Arc::new(bundle),
            Err(e) => {
                tracing::warn!(project = %project.name, error = %e, "bundle setup failed");
                return PartialCompileResult::Failure(PartialFailure {
                    project,
                    cause: FailureCause::SetupFailed(e.message.clone()),
                    result: ready_task(FinalCompileResult::global_error(e.to_string())),
                });
            }
        };

        let key = bundle.unique_inputs.clone();
        let (running, inserted) = state.ctx.registry().lookup_or_insert(&key, || {
            schedule_compilation(
                &state,
                Arc::clone(&bundle),
                pipeline.as_deref(),
                dependent_results.as_ref().clone(),
            )
        });

        if inserted {
            tracing::debug!(
                project = %project.name,
                inputs = %key,
                attempt = %running.attempt,
                "dispatched compilation"
            );
            if state.pipelined {
                return PartialCompileResult::Success(PartialSuccess {
                    bundle,
                    pipeline: running.pipeline.clone(),
                    result: running.result.clone(),
                });
            }
            let outcome = running.result.clone().await;
            return partial_from_final(&bundle, &running, outcome);
        }

        attach_to_running(
            state,
            project,
            bundle,
            running,
            dependent_products,
            dependent_results,
            pipeline,
        )
        .await
    }
    .boxed()
}

/// Builds and registers a fresh [`RunningCompilation`] for a bundle.
///
/// Runs synchronously under the registry's running-map lock; the compile
/// work itself is spawned onto the compute executor and memoized, so it
/// keeps making progress even if every subscriber disconnects.
fn schedule_compilation(
    state: &Arc<TraversalState>,
    bundle: Arc<CompileBundle>,
    pipeline: Option<&PipelinePrep>,
    dependent_results: HashMap<PathBuf, Arc<Analysis>>,
) -> RunningCompilation {
    let registry = state.ctx.registry();
    let attempt = AttemptId::generate();
    let is_unsubscribed = Arc::new(AtomicBool::new(false));

    // Most recent last-successful state, refcounted for this attempt.
    let obtained = registry
        .get_or_insert_last_successful(&bundle.project.id, Arc::clone(&bundle.last_successful));

    // Never reuse artifacts that vanished from disk, and never reuse an
    // analysis that was not validated by a previous run.
    let chosen = if !obtained.classes_dir().exists() || bundle.latest_result.is_empty() {
        Arc::new(LastSuccessfulResult::empty(&bundle.project))
    } else {
        Arc::clone(&obtained)
    };

    let previous_problems: Arc<[Problem]> = match &bundle.latest_result {
        LatestResult::Previous { analysis } => analysis.problems().to_vec().into(),
        LatestResult::Empty => chosen
            .analysis()
            .map(|analysis| analysis.problems().to_vec())
            .unwrap_or_default()
            .into(),
    };

    let (oracle, handles, pipeline_inputs) = match pipeline {
        Some(prep) => {
            let handles = PipelineHandles::new();
            let oracle = CompilerOracle::Pipelining(Arc::new(PipeliningOracle::new(
                prep.signatures.clone(),
                prep.upstream_macros.clone(),
                handles.signatures.clone(),
                prep.upstream_successes.clone(),
            )));
            let inputs = PipelineInputs {
                signatures: handles.signatures.clone(),
                done: handles.done.clone(),
                complete_java: handles.complete_java.clone(),
                transitive_java_signal: prep.transitive_java_signal.clone(),
                separate_java_and_scala: true,
            };
            (oracle, Some(handles), Some(inputs))
        }
        None => (CompilerOracle::Simple(SimpleOracle), None, None),
    };

    let compile_future = {
        let state = Arc::clone(state);
        let bundle = Arc::clone(&bundle);
        let obtained = Arc::clone(&obtained);
        let is_unsubscribed = Arc::clone(&is_unsubscribed);
        let handles = handles.clone();
        let key = bundle.unique_inputs.clone();
        let cancel = bundle.cancel.clone();
        let mode = if state.pipelined { "pipelined" } else { "normal" };

        async move {
            let _timing = time_compilation(mode);
            let inputs = CompileInputs {
                bundle: Arc::clone(&bundle),
                oracle: Arc::new(oracle),
                pipeline: pipeline_inputs,
                dependent_results,
                last_successful: chosen,
            };

            let result_bundle = tokio::select! {
                () = cancel.cancelled() => {
                    // The compiler future was dropped mid-flight; it
                    // cannot have published its end event.
                    bundle.observer.emit(CompileEvent::Ended {
                        project: bundle.project.id.clone(),
                        status: EndStatus::Cancelled,
                    });
                    crate::compile::ResultBundle::cancelled()
                }
                result = state.compiler.compile(inputs) => result,
            };

            if let Some(handles) = &handles {
                handles.fail_unfilled("compilation finished without completing pipelining promises");
            }

            let outcome = match result_bundle.outcome {
                CompileOutcome::Ok(products) => FinalCompileResult::ok(Arc::new(products)),
                CompileOutcome::Cancelled => FinalCompileResult::Cancelled,
                CompileOutcome::Failed { problems } => FinalCompileResult::Failed {
                    problems: problems.into(),
                },
            };

            enrichment::process_result_atomically(
                &state.ctx,
                &key,
                &bundle,
                &obtained,
                &is_unsubscribed,
                &outcome,
            )
            .await;

            // Close the mirror last: a drained replay implies the
            // registry already reflects this outcome.
            bundle.observer.mirror().close();

            state.ctx.metrics().record_compilation(result_label(&outcome));
            outcome
        }
    };

    let result = spawn_shared(
        state.ctx.compute(),
        tracing::Instrument::instrument(compile_future, bundle.span.clone()),
        |e| FinalCompileResult::global_error(format!("compilation task failed: {e}")),
    );

    RunningCompilation {
        result,
        mirror: Arc::clone(bundle.observer.mirror()),
        previous_successful: obtained,
        previous_problems,
        is_unsubscribed,
        owner: state.client.id(),
        attempt,
        cancel: bundle.cancel.clone(),
        pipeline: handles,
    }
}

/// How one replay pass over the producer's mirror ended.
enum ReplayStatus {
    /// The mirror closed and every event was delivered.
    Completed,
    /// This client's sink rejected an event.
    Failed(SinkError),
    /// No event arrived within the disconnection timeout.
    Disconnected,
}

/// Attaches a late client to a running compilation.
async fn attach_to_running(
    state: Arc<TraversalState>,
    project: Project,
    bundle: Arc<CompileBundle>,
    running: RunningCompilation,
    dependent_products: Arc<HashMap<ProjectId, BundleProducts>>,
    dependent_results: Arc<HashMap<PathBuf, Arc<Analysis>>>,
    pipeline: Option<Arc<PipelinePrep>>,
) -> PartialCompileResult {
    state.ctx.metrics().record_dedup("hit");
    tracing::info!(
        project = %project.name,
        owner = %running.owner,
        attempt = %running.attempt,
        "deduplicating compilation"
    );

    let key = bundle.unique_inputs.clone();

    if state.pipelined {
        // The subscriber's outcome resolves on the I/O executor; the
        // traversal returns immediately. The exposed handles are a
        // proxy, not the producer's own: a stall can cancel the
        // producer and re-dispatch, and waiters must then observe the
        // fresh attempt's signals rather than the cancelled attempt's
        // permanently-failed promises.
        let proxy = PipelineHandles::new();
        let io = state.ctx.io().clone();
        let future = deduplicated_result(
            Arc::clone(&state),
            project,
            key,
            running.clone(),
            dependent_products,
            dependent_results,
            pipeline,
            proxy.clone(),
        );
        let result = spawn_shared(&io, future, |e| {
            FinalCompileResult::global_error(format!("deduplication task failed: {e}"))
        });
        return PartialCompileResult::Success(PartialSuccess {
            bundle,
            pipeline: Some(proxy),
            result,
        });
    }

    match replay_race(&state, &running).await {
        RaceOutcome::Producer(outcome) => partial_from_final(&bundle, &running, outcome),
        RaceOutcome::ReplayFailed(error) => {
            replay_failed_result(&state, &project, &bundle, &running, &error).await
        }
        RaceOutcome::Disconnected => {
            disconnect(&state, &project, &key, &running);
            setup_and_deduplicate(
                state,
                project,
                dependent_products,
                dependent_results,
                pipeline,
            )
            .await
        }
    }
}

/// The deduplicated outcome as a plain future, for pipelined attaches.
///
/// Drives the replay race and keeps `proxy` pointed at whichever attempt
/// is current: the producer's successful signals are forwarded as they
/// materialize, a re-dispatched attempt's signals are adopted after a
/// disconnect, and the final outcome resolves anything still pending.
#[allow(clippy::too_many_arguments)]
fn deduplicated_result(
    state: Arc<TraversalState>,
    project: Project,
    key: smelt_core::UniqueCompileInputs,
    running: RunningCompilation,
    dependent_products: Arc<HashMap<ProjectId, BundleProducts>>,
    dependent_results: Arc<HashMap<PathBuf, Arc<Analysis>>>,
    pipeline: Option<Arc<PipelinePrep>>,
    proxy: PipelineHandles,
) -> BoxFuture<'static, FinalCompileResult> {
    async move {
        if let Some(source) = running.pipeline.clone() {
            let _ = state
                .ctx
                .spawn_io(forward_successful_handles(source, proxy.clone()));
        }

        let outcome = match replay_race(&state, &running).await {
            RaceOutcome::Producer(outcome) => outcome,
            RaceOutcome::ReplayFailed(error) => {
                let outcome = running.result.clone().await;
                if outcome.is_ok() {
                    state.ctx.metrics().record_dedup("replay_failed");
                    FinalCompileResult::global_error(format!("deduplication failed: {error}"))
                } else {
                    outcome
                }
            }
            RaceOutcome::Disconnected => {
                disconnect(&state, &project, &key, &running);
                let redispatched = setup_and_deduplicate(
                    Arc::clone(&state),
                    project,
                    dependent_products,
                    dependent_results,
                    pipeline,
                )
                .await;
                adopt_pipeline_handles(&redispatched, &proxy).await;
                final_of(redispatched).await
            }
        };

        resolve_proxy_from_outcome(&proxy, &outcome);
        outcome
    }
    .boxed()
}

/// Forwards a producer's successful pipelining signals into a
/// subscriber's proxy as they materialize.
///
/// Failures are withheld: a cancelled producer fails all of its
/// promises, and the re-dispatched attempt (or the final outcome) must
/// get to resolve the proxy instead.
async fn forward_successful_handles(source: PipelineHandles, proxy: PipelineHandles) {
    let signatures = source.signatures.wait().await;
    if signatures.is_ok() {
        proxy.signatures.complete(signatures);
    }
    let java = source.complete_java.wait().await;
    if java.is_ok() {
        proxy.complete_java.complete(java);
    }
    let done = source.done.wait().await;
    if done.is_ok() {
        proxy.done.complete(done);
    }
}

/// Points a subscriber's proxy at a re-dispatched attempt's signals.
///
/// The re-dispatched node's own handles already survive any further
/// re-dispatch (they are either an owner's or another subscriber's
/// proxy), so their resolutions are adopted verbatim.
async fn adopt_pipeline_handles(result: &PartialCompileResult, proxy: &PipelineHandles) {
    let Some(handles) = result.success().and_then(|s| s.pipeline.clone()) else {
        return;
    };
    proxy.signatures.complete(handles.signatures.wait().await);
    proxy.complete_java.complete(handles.complete_java.wait().await);
    proxy.done.complete(handles.done.wait().await);
}

/// Resolves whatever is still pending on a subscriber's proxy from the
/// final outcome.
///
/// Covers the producer that ran non-pipelined (it has no handles to
/// forward) and every failure path; completions that already happened
/// are left untouched.
fn resolve_proxy_from_outcome(proxy: &PipelineHandles, outcome: &FinalCompileResult) {
    match outcome {
        FinalCompileResult::Ok { products, .. } => {
            proxy.signatures.complete(Ok(SignatureBatch {
                signatures: Arc::clone(&products.signatures),
                macro_symbols: products.defined_macro_symbols.clone().into(),
            }));
            proxy.complete_java.complete(Ok(()));
            proxy.done.complete(Ok(()));
        }
        _ => {
            proxy.fail_unfilled("deduplicated compilation finished without pipelining signals");
        }
    }
}

/// Outcome of racing the producer's result against the event replay.
enum RaceOutcome {
    /// The producer finished and the replay drained cleanly.
    Producer(FinalCompileResult),
    /// The replay failed; the producer is untouched.
    ReplayFailed(SinkError),
    /// The replay stalled past the disconnection timeout.
    Disconnected,
}

/// Replays the producer's mirror to this client while racing the
/// memoized result.
async fn replay_race(state: &Arc<TraversalState>, running: &RunningCompilation) -> RaceOutcome {
    let sink = state.client.sink();
    let timeout = state.ctx.config().disconnect_timeout;
    let mut cursor = running.mirror.subscribe();
    let previous_problems = Arc::clone(&running.previous_problems);

    let replay = async {
        loop {
            match tokio::time::timeout(timeout, cursor.next()).await {
                Err(_) => return ReplayStatus::Disconnected,
                Ok(None) => return ReplayStatus::Completed,
                Ok(Some(event)) => {
                    let event = with_previous_problems(event, &previous_problems);
                    if let Err(error) = sink.handle(&event) {
                        return ReplayStatus::Failed(error);
                    }
                }
            }
        }
    };
    tokio::pin!(replay);

    let mut result = running.result.clone();
    tokio::select! {
        outcome = &mut result => {
            // Producer finished first: the mirror closes with it, so the
            // replay drains the remaining events and terminates.
            match (&mut replay).await {
                ReplayStatus::Completed => RaceOutcome::Producer(outcome),
                ReplayStatus::Failed(error) => RaceOutcome::ReplayFailed(error),
                ReplayStatus::Disconnected => RaceOutcome::Disconnected,
            }
        }
        status = &mut replay => match status {
            ReplayStatus::Completed => RaceOutcome::Producer(result.await),
            ReplayStatus::Failed(error) => RaceOutcome::ReplayFailed(error),
            ReplayStatus::Disconnected => RaceOutcome::Disconnected,
        }
    }
}

/// A deduplicated client whose replay failed keeps the node shape of a
/// success but substitutes a global error when the producer succeeded;
/// the producer's own result is untouched.
async fn replay_failed_result(
    state: &Arc<TraversalState>,
    project: &Project,
    bundle: &Arc<CompileBundle>,
    running: &RunningCompilation,
    error: &SinkError,
) -> PartialCompileResult {
    state.ctx.metrics().record_dedup("replay_failed");
    tracing::warn!(project = %project.name, error = %error, "event replay failed");

    let outcome = running.result.clone().await;
    if outcome.is_ok() {
        PartialCompileResult::Success(PartialSuccess {
            bundle: Arc::clone(bundle),
            pipeline: running.pipeline.clone(),
            result: ready_task(FinalCompileResult::global_error(format!(
                "deduplication failed: {error}"
            ))),
        })
    } else {
        partial_from_final(bundle, running, outcome)
    }
}

/// Disconnects this client from a stalled compilation: flags the entry,
/// unregisters it (compare-and-remove), cancels the producer's future,
/// and reports a cancelled end of compilation to this client.
fn disconnect(
    state: &Arc<TraversalState>,
    project: &Project,
    key: &smelt_core::UniqueCompileInputs,
    running: &RunningCompilation,
) {
    running.is_unsubscribed.store(true, Ordering::SeqCst);
    let removed = state
        .ctx
        .registry()
        .remove_if_attempt(key, running.attempt);
    running.cancel.cancel();

    let _ = state.client.sink().handle(&CompileEvent::Ended {
        project: project.id.clone(),
        status: EndStatus::Cancelled,
    });

    state.ctx.metrics().record_dedup("disconnect");
    tracing::warn!(
        project = %project.name,
        owner = %running.owner,
        removed,
        timeout = ?state.ctx.config().disconnect_timeout,
        "no events from the ongoing compilation within the disconnection timeout, re-dispatching"
    );
}

/// Converts a final outcome into the node-level result for this client.
fn partial_from_final(
    bundle: &Arc<CompileBundle>,
    running: &RunningCompilation,
    outcome: FinalCompileResult,
) -> PartialCompileResult {
    let project = bundle.project.clone();
    match outcome {
        FinalCompileResult::Ok { .. } => PartialCompileResult::Success(PartialSuccess {
            bundle: Arc::clone(bundle),
            pipeline: running.pipeline.clone(),
            result: running.result.clone(),
        }),
        FinalCompileResult::Cancelled => failure(project, FailureCause::Cancelled, outcome),
        FinalCompileResult::Failed { .. } => failure(project, FailureCause::Compiler, outcome),
        FinalCompileResult::Blocked { ref upstream } => {
            let upstream = upstream.clone();
            failure(project, FailureCause::Blocked { upstream }, outcome)
        }
        FinalCompileResult::GlobalError { ref message } => {
            let message = message.clone();
            failure(project, FailureCause::Internal(message), outcome)
        }
    }
}

fn failure(
    project: Project,
    cause: FailureCause,
    outcome: FinalCompileResult,
) -> PartialCompileResult {
    PartialCompileResult::Failure(PartialFailure {
        project,
        cause,
        result: ready_task(outcome),
    })
}

/// Flattens a re-dispatched node result into a final outcome.
async fn final_of(result: PartialCompileResult) -> FinalCompileResult {
    match result {
        PartialCompileResult::Empty => {
            FinalCompileResult::global_error("re-dispatch yielded an empty node")
        }
        PartialCompileResult::Success(success) => success.result.clone().await,
        PartialCompileResult::Failure(failure) => failure.result.clone().await,
    }
}

/// Substitutes this client's re-derived previous problems into the
/// producer's start event; every other event is forwarded verbatim.
fn with_previous_problems(event: CompileEvent, problems: &Arc<[Problem]>) -> CompileEvent {
    match event {
        CompileEvent::Started { project, .. } => CompileEvent::Started {
            project,
            previous_problems: problems.to_vec(),
        },
        other => other,
    }
}

fn result_label(outcome: &FinalCompileResult) -> &'static str {
    match outcome {
        FinalCompileResult::Ok { .. } => "ok",
        FinalCompileResult::Cancelled => "cancelled",
        FinalCompileResult::Failed { .. } => "failed",
        FinalCompileResult::Blocked { .. } => "blocked",
        FinalCompileResult::GlobalError { .. } => "global_error",
    }
}
