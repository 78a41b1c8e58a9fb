//! Error types for the compilation scheduler.

use smelt_core::ProjectId;

/// The result type used throughout smelt-sched.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cycle was detected in the project dependency graph.
    #[error("cycle detected in project dependency graph: {cycle:?}")]
    CycleDetected {
        /// The project ids on (or entering) the cycle.
        cycle: Vec<String>,
    },

    /// A project referenced a dependency that is not part of the build.
    #[error("project {project} depends on unknown project {dependency}")]
    UnknownDependency {
        /// The project declaring the dependency.
        project: ProjectId,
        /// The dependency that could not be resolved.
        dependency: ProjectId,
    },

    /// An error from smelt-core.
    #[error("core error: {0}")]
    Core(#[from] smelt_core::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_display() {
        let err = Error::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn unknown_dependency_display() {
        let err = Error::UnknownDependency {
            project: ProjectId::new("backend"),
            dependency: ProjectId::new("missing"),
        };
        let msg = err.to_string();
        assert!(msg.contains("backend"));
        assert!(msg.contains("missing"));
    }
}
