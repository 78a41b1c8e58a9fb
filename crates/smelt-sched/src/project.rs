//! Build unit identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use smelt_core::ProjectId;

/// A build unit: the node type of the compilation DAG.
///
/// Projects are immutable per build. The `id` is stable across server
/// restarts and keys last-successful compilation state; `name` is the
/// human-facing label used in diagnostics and blocked-by reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    /// Stable identity of this project.
    pub id: ProjectId,
    /// Human-readable name (shown in events and blocked-by lists).
    pub name: String,
    /// Direct dependencies, by project id.
    pub dependencies: Vec<ProjectId>,
}

impl Project {
    /// Creates a project with no dependencies, using the name as its id.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ProjectId::new(name.clone()),
            name,
            dependencies: Vec::new(),
        }
    }

    /// Adds direct dependencies by name.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(|d| ProjectId::new(d)).collect();
        self
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
