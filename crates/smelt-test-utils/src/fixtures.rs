//! Test fixtures: clients, bundle setup, DAG factories, and the harness.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use smelt_core::{ClientId, ProjectId, UniqueCompileInputs};
use smelt_sched::bundle::{
    Analysis, BundleInputs, BundleSetup, CompileBundle, LastSuccessfulResult, LatestResult,
    SetupError,
};
use smelt_sched::client::ClientInfo;
use smelt_sched::context::{SchedulerConfig, SchedulerContext};
use smelt_sched::dag::{Dag, DagBuilder};
use smelt_sched::event::ClientSink;
use smelt_sched::project::Project;
use smelt_sched::result::ResultDag;
use smelt_sched::traversal::traverse;

use crate::stubs::{RecordingSink, StubCompiler};

/// A test client with a recording sink and per-project external dirs.
pub struct TestClient {
    id: ClientId,
    sink: Arc<RecordingSink>,
    base: PathBuf,
}

impl TestClient {
    /// Creates a client rooted at `base`.
    pub fn new(base: PathBuf) -> Self {
        Self {
            id: ClientId::generate(),
            sink: Arc::new(RecordingSink::new()),
            base,
        }
    }

    /// The recording sink, for event assertions.
    pub fn recording(&self) -> &Arc<RecordingSink> {
        &self.sink
    }
}

impl ClientInfo for TestClient {
    fn id(&self) -> ClientId {
        self.id
    }

    fn sink(&self) -> Arc<dyn ClientSink> {
        Arc::clone(&self.sink) as Arc<dyn ClientSink>
    }

    fn unique_classes_dir_for(&self, project: &Project) -> PathBuf {
        self.base.join(format!("external-{}-{}", self.id, project.id))
    }
}

/// Bundle setup fixture: stable fingerprints per project (bumpable to
/// simulate edits), a fresh output directory per attempt, optional
/// injected failures and warm analysis state.
pub struct TestBundleSetup {
    base: PathBuf,
    digests: Mutex<HashMap<ProjectId, String>>,
    latest: Mutex<HashMap<ProjectId, Arc<Analysis>>>,
    failing: Mutex<HashSet<ProjectId>>,
    attempts: AtomicUsize,
}

impl TestBundleSetup {
    /// Creates a setup rooted at `base`.
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            digests: Mutex::new(HashMap::new()),
            latest: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Changes a project's input digest, simulating an edit.
    pub fn set_digest(&self, project: &str, digest: &str) {
        self.digests
            .lock()
            .insert(ProjectId::new(project), digest.to_string());
    }

    /// Seeds the client's cached analysis for a project, so attempts
    /// carry a validated previous result.
    pub fn set_latest_analysis(&self, project: &str, analysis: Arc<Analysis>) {
        self.latest.lock().insert(ProjectId::new(project), analysis);
    }

    /// Makes setup fail for a project.
    pub fn fail_setup(&self, project: &str) {
        self.failing.lock().insert(ProjectId::new(project));
    }
}

#[async_trait]
impl BundleSetup for TestBundleSetup {
    async fn setup(&self, inputs: BundleInputs) -> Result<CompileBundle, SetupError> {
        let project = inputs.project;
        if self.failing.lock().contains(&project.id) {
            return Err(SetupError::new(format!(
                "injected setup failure for {}",
                project.name
            )));
        }

        let digest = self
            .digests
            .lock()
            .get(&project.id)
            .cloned()
            .unwrap_or_else(|| "v1".to_string());
        let unique_inputs = UniqueCompileInputs::from_digest(project.id.clone(), digest);

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let new_classes_dir = self
            .base
            .join(format!("classes-{}-{attempt}", project.id));
        let read_only_classes_dir = self.base.join(format!("classes-{}-ro", project.id));

        let latest_result = self
            .latest
            .lock()
            .get(&project.id)
            .map_or(LatestResult::Empty, |analysis| LatestResult::Previous {
                analysis: Arc::clone(analysis),
            });
        let last_successful = Arc::new(LastSuccessfulResult::empty(&project));

        Ok(CompileBundle::new(
            project,
            unique_inputs,
            inputs.client.sink(),
            read_only_classes_dir,
            new_classes_dir,
            last_successful,
            latest_result,
            inputs.cancel,
        ))
    }
}

/// A pre-configured scheduler environment for integration tests.
pub struct TestHarness {
    /// The scheduler context under test.
    pub ctx: Arc<SchedulerContext>,
    /// The default client.
    pub client: Arc<TestClient>,
    /// The bundle setup fixture.
    pub setup: Arc<TestBundleSetup>,
    /// The stub compiler.
    pub compiler: Arc<StubCompiler>,
    _workdir: TempDir,
}

impl TestHarness {
    /// Creates a harness with the default configuration.
    ///
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a harness with an explicit configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        let workdir = TempDir::new().expect("create test workdir");
        let base = workdir.path().to_path_buf();
        Self {
            ctx: SchedulerContext::new(config),
            client: Arc::new(TestClient::new(base.clone())),
            setup: Arc::new(TestBundleSetup::new(base)),
            compiler: Arc::new(StubCompiler::new()),
            _workdir: workdir,
        }
    }

    /// Builds a DAG from `(name, dependencies)` pairs.
    pub fn dag(&self, projects: &[(&str, &[&str])]) -> Arc<Dag<Project>> {
        build_dag(projects)
    }

    /// A second client sharing this harness's working directory.
    pub fn second_client(&self) -> Arc<TestClient> {
        Arc::new(TestClient::new(self._workdir.path().to_path_buf()))
    }

    /// Traverses a DAG as the default client.
    pub async fn traverse(&self, dag: &Arc<Dag<Project>>, pipelined: bool) -> Arc<ResultDag> {
        self.traverse_as(&self.client, dag, pipelined).await
    }

    /// Traverses a DAG as a specific client.
    pub async fn traverse_as(
        &self,
        client: &Arc<TestClient>,
        dag: &Arc<Dag<Project>>,
        pipelined: bool,
    ) -> Arc<ResultDag> {
        self.traverse_with_cancel(client, dag, pipelined, CancellationToken::new())
            .await
    }

    /// Traverses a DAG with an explicit cancel token.
    pub async fn traverse_with_cancel(
        &self,
        client: &Arc<TestClient>,
        dag: &Arc<Dag<Project>>,
        pipelined: bool,
        cancel: CancellationToken,
    ) -> Arc<ResultDag> {
        traverse(
            &self.ctx,
            Arc::clone(dag),
            Arc::clone(client) as Arc<dyn ClientInfo>,
            Arc::clone(&self.setup) as Arc<dyn BundleSetup>,
            Arc::clone(&self.compiler) as Arc<dyn smelt_sched::compile::Compiler>,
            pipelined,
            cancel,
        )
        .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a DAG from `(name, dependencies)` pairs.
pub fn build_dag(projects: &[(&str, &[&str])]) -> Arc<Dag<Project>> {
    let projects: Vec<Project> = projects
        .iter()
        .map(|(name, deps)| Project::new(*name).with_dependencies(deps.iter().copied()))
        .collect();
    DagBuilder::from_dependencies(projects).expect("valid test DAG")
}
