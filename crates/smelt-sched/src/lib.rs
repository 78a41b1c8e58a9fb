//! # smelt-sched
//!
//! Compilation scheduler for the Smelt build server.
//!
//! This crate turns a DAG of projects into a concurrent, deduplicated,
//! cancellable, pipelined compilation traversal:
//!
//! - **DAG traversal**: Strict topological or pipelined evaluation with
//!   per-sub-DAG memoization and structural failure propagation
//! - **Deduplication**: Concurrent requests for equivalent compile inputs
//!   share one running compilation, with faithful in-order event replay to
//!   late subscribers
//! - **Artifact lifecycle**: Reference-counted last-successful classes
//!   directories with atomic supersession and safe, delayed deletion
//! - **Cancellation**: Per-attempt cancel tokens, stall detection on
//!   deduplicated streams, and automatic re-dispatch
//!
//! ## Core Concepts
//!
//! - **Bundle**: The immutable snapshot needed to compile one project once
//! - **Oracle**: The capability handed to the compiler; in pipelined mode
//!   it carries upstream type signatures and macro symbols
//! - **Registry**: The process-wide table of running compilations and
//!   last-successful results
//!
//! ## Example
//!
//! ```rust,ignore
//! use smelt_sched::prelude::*;
//!
//! let ctx = SchedulerContext::new(SchedulerConfig::from_env());
//! let dag = DagBuilder::from_dependencies(projects)?;
//! let results = traverse(&ctx, dag, client, setup, compiler, false, cancel).await;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod client;
pub mod compile;
pub mod context;
pub mod dag;
pub mod error;
pub mod event;
pub mod metrics;
pub mod mirror;
pub mod oracle;
pub mod project;
pub mod promise;
pub mod registry;
pub mod result;
pub mod traversal;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bundle::{
        Analysis, BackgroundTasks, BundleInputs, BundleProducts, BundleSetup, CompileBundle,
        CompileProducts, LastSuccessfulResult, LatestResult, PartialProducts, SetupError,
    };
    pub use crate::client::ClientInfo;
    pub use crate::compile::{
        CompileInputs, CompileOutcome, Compiler, JavaSignal, PipelineInputs, ResultBundle,
    };
    pub use crate::context::{SchedulerConfig, SchedulerContext};
    pub use crate::dag::{Dag, DagBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::event::{ClientSink, CompileEvent, EndStatus, Problem, Severity, SinkError};
    pub use crate::oracle::{CompilerOracle, PipeliningOracle, Signature, SignatureTable};
    pub use crate::project::Project;
    pub use crate::registry::{DeduplicationRegistry, RunningCompilation};
    pub use crate::result::{
        FailureCause, FinalCompileResult, PartialCompileResult, PartialFailure, PartialSuccess,
        SharedTask, blocked_by, failed_projects, transitive_successes,
    };
    pub use crate::traversal::traverse;
}
