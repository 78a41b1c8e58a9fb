//! Deterministic compiler stubs and recording sinks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use smelt_core::ProjectId;
use smelt_sched::bundle::{Analysis, CompileProducts, NoBackgroundTasks};
use smelt_sched::compile::{
    CompileInputs, CompileOutcome, Compiler, JavaSignal, ResultBundle,
};
use smelt_sched::event::{ClientSink, CompileEvent, EndStatus, Problem, SinkError};
use smelt_sched::oracle::{Signature, SignatureBatch};

/// A sink that records every delivered event, with optional failure
/// injection.
#[derive(Debug)]
pub struct RecordingSink {
    events: Mutex<Vec<CompileEvent>>,
    fail_after: AtomicUsize,
}

impl RecordingSink {
    /// Creates a sink that accepts every event.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_after: AtomicUsize::new(usize::MAX),
        }
    }

    /// Makes the sink reject the `n`th delivered event (0-based) and
    /// every one after it.
    pub fn fail_after(&self, n: usize) {
        self.fail_after.store(n, Ordering::SeqCst);
    }

    /// The events delivered so far, in order.
    pub fn events(&self) -> Vec<CompileEvent> {
        self.events.lock().clone()
    }

    /// The end statuses delivered so far, in order.
    pub fn end_statuses(&self) -> Vec<EndStatus> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                CompileEvent::Ended { status, .. } => Some(status),
                _ => None,
            })
            .collect()
    }

    /// Number of start events delivered.
    pub fn start_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, CompileEvent::Started { .. }))
            .count()
    }
}

impl ClientSink for RecordingSink {
    fn handle(&self, event: &CompileEvent) -> Result<(), SinkError> {
        let mut events = self.events.lock();
        if events.len() >= self.fail_after.load(Ordering::SeqCst) {
            return Err(SinkError::new("injected sink failure"));
        }
        events.push(event.clone());
        Ok(())
    }
}

/// Per-project behavior of the [`StubCompiler`].
#[derive(Debug, Clone, Default)]
pub enum StubBehavior {
    /// Succeed immediately.
    #[default]
    Succeed,
    /// Succeed after a delay (normal mode: before the end event).
    SucceedSlowly(Duration),
    /// Pipelined: publish signatures immediately, then wait this long
    /// before finishing compilation.
    SignatureGap(Duration),
    /// Fail with the given diagnostics.
    Fail(Vec<Problem>),
    /// Pipelined: publish signatures successfully, then fail the rest of
    /// the compilation (so downstreams start and later observe a
    /// fail-fast Java signal).
    FailAfterSignatures(Vec<Problem>),
    /// Hang forever on the first `n` invocations, then succeed.
    HangTimes(usize),
}

#[derive(Debug, Clone, Default)]
struct ProjectConfig {
    behavior: StubBehavior,
    signatures: Option<Vec<Signature>>,
    macros: Vec<String>,
}

/// A deterministic compiler for tests.
///
/// Emits one start event, behavior-specific diagnostics, and one end
/// event per invocation; creates the attempt's classes directory on disk
/// on success; completes pipelining promises in the required order and
/// honours the transitive Java signal. Records invocation counts, times,
/// and observed oracle state for assertions.
#[derive(Debug, Default)]
pub struct StubCompiler {
    configs: Mutex<HashMap<ProjectId, ProjectConfig>>,
    counts: Mutex<HashMap<ProjectId, usize>>,
    invoked_at: Mutex<HashMap<ProjectId, Instant>>,
    completed_at: Mutex<HashMap<ProjectId, Instant>>,
    observed_signals: Mutex<HashMap<ProjectId, JavaSignal>>,
    observed_signatures: Mutex<HashMap<ProjectId, Vec<Signature>>>,
}

impl StubCompiler {
    /// Creates a stub where every project succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    fn config_mut(&self, project: &str, f: impl FnOnce(&mut ProjectConfig)) {
        let mut configs = self.configs.lock();
        f(configs.entry(ProjectId::new(project)).or_default());
    }

    /// Sets a project's behavior.
    pub fn behave(&self, project: &str, behavior: StubBehavior) {
        self.config_mut(project, |config| config.behavior = behavior);
    }

    /// Makes a project fail with one error diagnostic.
    pub fn fail(&self, project: &str, message: &str) {
        self.behave(project, StubBehavior::Fail(vec![Problem::error(message)]));
    }

    /// Overrides the signatures a project publishes.
    pub fn set_signatures(&self, project: &str, signatures: Vec<Signature>) {
        self.config_mut(project, |config| config.signatures = Some(signatures));
    }

    /// Sets the macro symbols a project defines.
    pub fn set_macros(&self, project: &str, macros: Vec<String>) {
        self.config_mut(project, |config| config.macros = macros);
    }

    /// Total invocations across all projects.
    pub fn invocation_count(&self) -> usize {
        self.counts.lock().values().sum()
    }

    /// Invocations for one project.
    pub fn invocations_for(&self, project: &str) -> usize {
        self.counts
            .lock()
            .get(&ProjectId::new(project))
            .copied()
            .unwrap_or(0)
    }

    /// When a project's compile was last invoked.
    pub fn invoked_at(&self, project: &str) -> Option<Instant> {
        self.invoked_at.lock().get(&ProjectId::new(project)).copied()
    }

    /// When a project's compile last completed.
    pub fn completed_at(&self, project: &str) -> Option<Instant> {
        self.completed_at
            .lock()
            .get(&ProjectId::new(project))
            .copied()
    }

    /// The transitive Java signal a project's compile observed.
    pub fn observed_signal(&self, project: &str) -> Option<JavaSignal> {
        self.observed_signals
            .lock()
            .get(&ProjectId::new(project))
            .cloned()
    }

    /// The upstream signatures (in oracle order) a project's compile
    /// observed.
    pub fn observed_signatures(&self, project: &str) -> Option<Vec<Signature>> {
        self.observed_signatures
            .lock()
            .get(&ProjectId::new(project))
            .cloned()
    }
}

#[async_trait]
impl Compiler for StubCompiler {
    #[allow(clippy::too_many_lines)]
    async fn compile(&self, inputs: CompileInputs) -> ResultBundle {
        let bundle = Arc::clone(&inputs.bundle);
        let project = bundle.project.clone();

        let invocation = {
            let mut counts = self.counts.lock();
            let count = counts.entry(project.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.invoked_at.lock().insert(project.id.clone(), Instant::now());

        if let Some(oracle) = inputs.oracle.pipelining() {
            let signatures = oracle.upstream_signatures().signatures().cloned().collect();
            self.observed_signatures
                .lock()
                .insert(project.id.clone(), signatures);
        }

        let config = self
            .configs
            .lock()
            .get(&project.id)
            .cloned()
            .unwrap_or_default();

        let previous_problems = inputs
            .last_successful
            .analysis()
            .map(|analysis| analysis.problems().to_vec())
            .unwrap_or_default();
        bundle.observer.emit(CompileEvent::Started {
            project: project.id.clone(),
            previous_problems,
        });

        let hang = match &config.behavior {
            StubBehavior::HangTimes(n) => invocation <= *n,
            _ => false,
        };
        if hang {
            std::future::pending::<()>().await;
            unreachable!("pending future resolved");
        }

        if let StubBehavior::Fail(problems) = &config.behavior {
            for problem in problems {
                bundle.observer.emit(CompileEvent::Diagnostic {
                    project: project.id.clone(),
                    problem: problem.clone(),
                });
            }
            bundle.observer.emit(CompileEvent::Ended {
                project: project.id.clone(),
                status: EndStatus::Failed,
            });
            self.completed_at.lock().insert(project.id.clone(), Instant::now());
            return ResultBundle::new(CompileOutcome::Failed {
                problems: problems.clone(),
            });
        }

        // Success path: produce the attempt's output directory.
        let _ = tokio::fs::create_dir_all(&bundle.new_classes_dir).await;

        let signatures: Arc<[Signature]> = config
            .signatures
            .unwrap_or_else(|| vec![Signature::new(format!("{}.Api", project.name), invocation as u64)])
            .into();
        let analysis = Arc::new(Analysis {
            problems: Vec::new(),
            generation: invocation as u64,
        });

        if let Some(pipeline) = &inputs.pipeline {
            pipeline.signatures.complete(Ok(SignatureBatch {
                signatures: Arc::clone(&signatures),
                macro_symbols: config.macros.clone().into(),
            }));

            if let StubBehavior::FailAfterSignatures(problems) = &config.behavior {
                for problem in problems {
                    bundle.observer.emit(CompileEvent::Diagnostic {
                        project: project.id.clone(),
                        problem: problem.clone(),
                    });
                }
                bundle.observer.emit(CompileEvent::Ended {
                    project: project.id.clone(),
                    status: EndStatus::Failed,
                });
                self.completed_at.lock().insert(project.id.clone(), Instant::now());
                return ResultBundle::new(CompileOutcome::Failed {
                    problems: problems.clone(),
                });
            }

            if let StubBehavior::SignatureGap(gap) = &config.behavior {
                tokio::time::sleep(*gap).await;
            }

            // Await the upstream completion fold before the Java phase.
            let signal = pipeline.transitive_java_signal.clone().await;
            self.observed_signals
                .lock()
                .insert(project.id.clone(), signal.clone());
            if let JavaSignal::FailFastCompilation(upstream) = signal {
                let problem = Problem::error(format!(
                    "aborted Java phase, upstream failed: {}",
                    upstream.join(", ")
                ));
                bundle.observer.emit(CompileEvent::Diagnostic {
                    project: project.id.clone(),
                    problem: problem.clone(),
                });
                bundle.observer.emit(CompileEvent::Ended {
                    project: project.id.clone(),
                    status: EndStatus::Failed,
                });
                self.completed_at.lock().insert(project.id.clone(), Instant::now());
                return ResultBundle::new(CompileOutcome::Failed {
                    problems: vec![problem],
                });
            }
            pipeline.complete_java.complete(Ok(()));
        } else if let StubBehavior::SucceedSlowly(delay) = &config.behavior {
            tokio::time::sleep(*delay).await;
        }

        bundle.observer.emit(CompileEvent::Ended {
            project: project.id.clone(),
            status: EndStatus::Ok,
        });
        self.completed_at.lock().insert(project.id.clone(), Instant::now());

        let products = CompileProducts {
            read_only_classes_dir: bundle.read_only_classes_dir.clone(),
            new_classes_dir: bundle.new_classes_dir.clone(),
            analysis,
            defined_macro_symbols: config.macros,
            signatures,
            background: Arc::new(NoBackgroundTasks),
        };

        if let Some(pipeline) = &inputs.pipeline {
            pipeline.done.complete(Ok(()));
        }

        ResultBundle::new(CompileOutcome::Ok(products))
    }
}
