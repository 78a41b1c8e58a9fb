//! Compile bundles and compilation products.
//!
//! A [`CompileBundle`] is the immutable snapshot needed to compile one
//! project once: identity, the unique-inputs fingerprint, the event
//! observer (client sink plus mirror), the classes directories for this
//! attempt, the last-successful handle, and the cancel token. Bundles are
//! produced per attempt by the caller-supplied [`BundleSetup`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use smelt_core::{ProjectId, UniqueCompileInputs};

use crate::client::ClientInfo;
use crate::dag::Dag;
use crate::event::{ClientSink, CompileEvent, Problem};
use crate::mirror::EventMirror;
use crate::oracle::Signature;
use crate::project::Project;
use crate::result::{SharedTask, ready_task};

/// Incremental-compilation state handle.
///
/// Opaque to the scheduler except for the diagnostics it carries, which
/// are re-derived when a deduplicated client needs "previous problems".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Diagnostics of the compilation that produced this analysis.
    pub problems: Vec<Problem>,
    /// Monotonic generation counter, bumped per successful compilation.
    pub generation: u64,
}

impl Analysis {
    /// The diagnostics recorded in this analysis.
    #[must_use]
    pub fn problems(&self) -> &[Problem] {
        &self.problems
    }
}

/// The client's view of its most recent compilation state for a project.
#[derive(Debug, Clone, Default)]
pub enum LatestResult {
    /// No validated compilation state exists.
    #[default]
    Empty,
    /// A previous compilation produced this analysis.
    Previous {
        /// The analysis of the previous compilation.
        analysis: Arc<Analysis>,
    },
}

impl LatestResult {
    /// Returns `true` if no validated state exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// The artifacts of the most recent successful compilation of a project.
///
/// Registered in the deduplication registry on success, replaced
/// atomically when superseded, and deleted once its classes directory is
/// no longer referenced.
pub struct LastSuccessfulResult {
    classes_dir: PathBuf,
    analysis: Option<Arc<Analysis>>,
    populating: Mutex<SharedTask<()>>,
    empty_sentinel: bool,
}

impl LastSuccessfulResult {
    /// Creates a last-successful result for real on-disk artifacts.
    #[must_use]
    pub fn new(classes_dir: PathBuf, analysis: Arc<Analysis>, populating: SharedTask<()>) -> Self {
        Self {
            classes_dir,
            analysis: Some(analysis),
            populating: Mutex::new(populating),
            empty_sentinel: false,
        }
    }

    /// The empty sentinel: no prior artifacts exist for this project.
    ///
    /// The sentinel's directory is a marker path that never exists on
    /// disk and is never scheduled for deletion.
    #[must_use]
    pub fn empty(project: &Project) -> Self {
        Self {
            classes_dir: PathBuf::from(".smelt-empty-classes").join(project.id.as_str()),
            analysis: None,
            populating: Mutex::new(ready_task(())),
            empty_sentinel: true,
        }
    }

    /// The on-disk classes directory of this result.
    #[must_use]
    pub fn classes_dir(&self) -> &Path {
        &self.classes_dir
    }

    /// The analysis of this result (`None` for the empty sentinel).
    #[must_use]
    pub fn analysis(&self) -> Option<&Arc<Analysis>> {
        self.analysis.as_ref()
    }

    /// The populating-products task consumers await before reading the
    /// classes directory.
    #[must_use]
    pub fn populating(&self) -> SharedTask<()> {
        self.populating.lock().clone()
    }

    /// Replaces the populating-products task.
    ///
    /// Result enrichment is the only writer: it installs the memoized
    /// populate-then-delete composite after a supersession.
    pub fn set_populating(&self, task: SharedTask<()>) {
        *self.populating.lock() = task;
    }

    /// Returns `true` for the empty sentinel.
    #[must_use]
    pub fn is_empty_sentinel(&self) -> bool {
        self.empty_sentinel
    }
}

impl std::fmt::Debug for LastSuccessfulResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastSuccessfulResult")
            .field("classes_dir", &self.classes_dir)
            .field("empty_sentinel", &self.empty_sentinel)
            .field("has_analysis", &self.analysis.is_some())
            .finish_non_exhaustive()
    }
}

/// Deferred work that copies compilation outputs into a client-facing
/// external classes directory.
///
/// Triggered on the I/O executor during result enrichment; the returned
/// future is stored in the delivered result so dependents can await it
/// before reading the directory.
#[async_trait]
pub trait BackgroundTasks: Send + Sync {
    /// Populates `external_classes_dir` with this compilation's outputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be populated.
    async fn trigger(&self, external_classes_dir: PathBuf) -> smelt_core::Result<()>;
}

/// Background tasks that do nothing.
///
/// Useful for compilers whose outputs are written directly to their final
/// location.
#[derive(Debug, Default)]
pub struct NoBackgroundTasks;

#[async_trait]
impl BackgroundTasks for NoBackgroundTasks {
    async fn trigger(&self, _external_classes_dir: PathBuf) -> smelt_core::Result<()> {
        Ok(())
    }
}

/// The full products of a completed compilation.
pub struct CompileProducts {
    /// The classes directory this compilation read from (its upstream
    /// snapshot of the previous successful output).
    pub read_only_classes_dir: PathBuf,
    /// The classes directory this compilation wrote to.
    pub new_classes_dir: PathBuf,
    /// The analysis produced by this compilation.
    pub analysis: Arc<Analysis>,
    /// Macro symbols defined by this project.
    pub defined_macro_symbols: Vec<String>,
    /// The project's type signatures.
    pub signatures: Arc<[Signature]>,
    /// Deferred population of external classes directories.
    pub background: Arc<dyn BackgroundTasks>,
}

impl std::fmt::Debug for CompileProducts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileProducts")
            .field("read_only_classes_dir", &self.read_only_classes_dir)
            .field("new_classes_dir", &self.new_classes_dir)
            .field("defined_macro_symbols", &self.defined_macro_symbols)
            .field("signatures", &self.signatures.len())
            .finish_non_exhaustive()
    }
}

/// What a pipelined dependent knows about an upstream whose full
/// compilation has not finished yet.
#[derive(Debug, Clone)]
pub struct PartialProducts {
    /// The upstream's read-only classes directory.
    pub read_only_classes_dir: PathBuf,
    /// The classes directory the upstream is writing to.
    pub new_classes_dir: PathBuf,
    /// Macro symbols the upstream defines.
    pub macro_symbols: Vec<String>,
}

/// What dependents receive about each upstream project.
#[derive(Debug, Clone)]
pub enum BundleProducts {
    /// The upstream is still compiling (pipelined mode).
    Partial(PartialProducts),
    /// The upstream's compilation completed.
    Full(Arc<CompileProducts>),
}

/// Forwards compilation events to the owning client and mirrors them for
/// deduplicated subscribers.
#[derive(Clone)]
pub struct CompileObserver {
    sink: Arc<dyn ClientSink>,
    mirror: Arc<EventMirror>,
}

impl CompileObserver {
    /// Creates an observer over a fresh mirror.
    #[must_use]
    pub fn new(sink: Arc<dyn ClientSink>) -> Self {
        Self {
            sink,
            mirror: Arc::new(EventMirror::new()),
        }
    }

    /// Emits one event: appended to the mirror first, then delivered to
    /// the owning client's sink.
    ///
    /// Sink failures of the owning client are logged and do not fail the
    /// compilation; deduplicated subscribers have their own failure
    /// handling during replay.
    pub fn emit(&self, event: CompileEvent) {
        self.mirror.append(event.clone());
        if let Err(e) = self.sink.handle(&event) {
            tracing::warn!(error = %e, "owning client sink rejected event");
        }
    }

    /// The mirror deduplicated subscribers replay from.
    #[must_use]
    pub fn mirror(&self) -> &Arc<EventMirror> {
        &self.mirror
    }
}

impl std::fmt::Debug for CompileObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileObserver")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

/// The snapshot needed to compile one project once.
pub struct CompileBundle {
    /// The project being compiled.
    pub project: Project,
    /// Fingerprint of the semantically relevant compile inputs; the
    /// deduplication key.
    pub unique_inputs: UniqueCompileInputs,
    /// Event observer: owning client sink plus replay mirror.
    pub observer: CompileObserver,
    /// The read-only classes directory of the previous successful output.
    pub read_only_classes_dir: PathBuf,
    /// The classes directory this attempt writes to. Distinct from
    /// `read_only_classes_dir` per attempt; allocated by the caller.
    pub new_classes_dir: PathBuf,
    /// The client's cached last-successful candidate, used as the
    /// fallback when the registry has none.
    pub last_successful: Arc<LastSuccessfulResult>,
    /// The client's latest compilation state for this project.
    pub latest_result: LatestResult,
    /// Cancel token checked by the compiler.
    pub cancel: CancellationToken,
    /// Tracing span covering this attempt.
    pub span: tracing::Span,
}

impl CompileBundle {
    /// Creates a bundle, wiring a fresh mirror behind the client sink.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        project: Project,
        unique_inputs: UniqueCompileInputs,
        sink: Arc<dyn ClientSink>,
        read_only_classes_dir: PathBuf,
        new_classes_dir: PathBuf,
        last_successful: Arc<LastSuccessfulResult>,
        latest_result: LatestResult,
        cancel: CancellationToken,
    ) -> Self {
        let span = smelt_core::observability::compile_span(&project.name, "-", "attempt");
        Self {
            project,
            unique_inputs,
            observer: CompileObserver::new(sink),
            read_only_classes_dir,
            new_classes_dir,
            last_successful,
            latest_result,
            cancel,
            span,
        }
    }
}

impl std::fmt::Debug for CompileBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileBundle")
            .field("project", &self.project.name)
            .field("unique_inputs", &self.unique_inputs)
            .field("read_only_classes_dir", &self.read_only_classes_dir)
            .field("new_classes_dir", &self.new_classes_dir)
            .finish_non_exhaustive()
    }
}

/// Inputs to [`BundleSetup`].
pub struct BundleInputs {
    /// The project to set up.
    pub project: Project,
    /// The full request DAG, for callers that need topology context.
    pub dag: Arc<Dag<Project>>,
    /// Products of the upstream projects this node depends on.
    pub dependent_products: HashMap<ProjectId, BundleProducts>,
    /// The requesting client.
    pub client: Arc<dyn ClientInfo>,
    /// Cancel token for this attempt (a child of the traversal token).
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for BundleInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleInputs")
            .field("project", &self.project.name)
            .field("dependent_products", &self.dependent_products.len())
            .finish_non_exhaustive()
    }
}

/// Error returned when a bundle cannot be assembled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bundle setup failed: {message}")]
pub struct SetupError {
    /// Description of the failure.
    pub message: String,
}

impl SetupError {
    /// Creates a setup error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Caller-supplied factory that assembles a [`CompileBundle`] per attempt.
///
/// The engine converts a setup failure into a per-project failure leaf;
/// sibling work continues.
#[async_trait]
pub trait BundleSetup: Send + Sync {
    /// Assembles the bundle for one compilation attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the snapshot cannot be assembled.
    async fn setup(&self, inputs: BundleInputs) -> Result<CompileBundle, SetupError>;
}
