//! The compilation DAG.
//!
//! The traversal engine works over an algebraic, `Arc`-shared DAG with
//! three node shapes:
//!
//! - [`Dag::Leaf`]: a project with no dependencies
//! - [`Dag::Parent`]: a project gated on its children
//! - [`Dag::Aggregate`]: a fan-out root carrying no compile work of its own
//!
//! Shared sub-graphs are represented by shared `Arc`s: a diamond
//! dependency is one node referenced from two parents, and traversal
//! de-duplicates by reference identity so each distinct node is visited
//! exactly once.
//!
//! [`DagBuilder`] constructs this shape from per-project dependency lists,
//! validating the input with petgraph (cycle detection with deterministic
//! reporting, unknown-dependency checks) before folding it into the
//! algebraic form.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::algo::toposort;

use smelt_core::ProjectId;

use crate::error::{Error, Result};
use crate::project::Project;

/// An immutable compilation DAG node.
///
/// Nodes are shared via `Arc`; two parents depending on the same project
/// hold clones of one `Arc`, and identity (`Arc::as_ptr`) is the
/// de-duplication key during traversal.
#[derive(Debug)]
pub enum Dag<T> {
    /// A project with no dependencies.
    Leaf(T),
    /// A project gated on its children.
    Parent(T, Vec<Arc<Dag<T>>>),
    /// A fan-out root aggregating independent sub-graphs; carries no
    /// compile work of its own.
    Aggregate(Vec<Arc<Dag<T>>>),
}

impl<T> Dag<T> {
    /// Returns the value carried by this node, if any.
    ///
    /// `Aggregate` nodes carry no value.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Leaf(v) | Self::Parent(v, _) => Some(v),
            Self::Aggregate(_) => None,
        }
    }

    /// Returns the children of this node (empty for leaves).
    #[must_use]
    pub fn children(&self) -> &[Arc<Dag<T>>] {
        match self {
            Self::Leaf(_) => &[],
            Self::Parent(_, children) | Self::Aggregate(children) => children,
        }
    }

    /// Depth-first, pre-order traversal yielding each distinct node
    /// exactly once.
    ///
    /// Distinctness is by reference identity: a node reachable through
    /// several parents appears once, at its first occurrence. The
    /// resulting order is the classpath-lookup order used for signature
    /// collection (first occurrence wins).
    #[must_use]
    pub fn dfs(self: &Arc<Self>) -> Vec<Arc<Self>> {
        let mut seen: Vec<*const Self> = Vec::new();
        let mut out = Vec::new();
        Self::dfs_into(self, &mut seen, &mut out);
        out
    }

    fn dfs_into(node: &Arc<Self>, seen: &mut Vec<*const Self>, out: &mut Vec<Arc<Self>>) {
        let ptr = Arc::as_ptr(node);
        if seen.contains(&ptr) {
            return;
        }
        seen.push(ptr);
        out.push(Arc::clone(node));
        for child in node.children() {
            Self::dfs_into(child, seen, out);
        }
    }

    /// Returns the number of distinct nodes reachable from this root.
    #[must_use]
    pub fn node_count(self: &Arc<Self>) -> usize {
        self.dfs().len()
    }
}

/// Builder that folds per-project dependency lists into the algebraic DAG.
#[derive(Debug, Default)]
pub struct DagBuilder;

impl DagBuilder {
    /// Builds the compilation DAG for a set of projects.
    ///
    /// Dependencies are resolved by project id. When the dependency graph
    /// has a single root (a project nothing depends on), that root's node
    /// is returned; multiple roots are wrapped in an [`Dag::Aggregate`].
    /// Shared dependencies resolve to shared `Arc` nodes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDependency`] if a project references an id
    /// outside the given set, and [`Error::CycleDetected`] if the
    /// dependency graph contains a cycle.
    pub fn from_dependencies(projects: Vec<Project>) -> Result<Arc<Dag<Project>>> {
        if projects.is_empty() {
            return Err(Error::Core(smelt_core::Error::InvalidInput(
                "cannot build a DAG from zero projects".into(),
            )));
        }

        let mut graph: DiGraph<ProjectId, ()> = DiGraph::new();
        let mut indices: HashMap<ProjectId, NodeIndex> = HashMap::new();
        let mut by_id: HashMap<ProjectId, Project> = HashMap::new();
        // Insertion order for deterministic root ordering.
        let mut order: Vec<ProjectId> = Vec::new();

        for project in projects {
            let idx = graph.add_node(project.id.clone());
            indices.insert(project.id.clone(), idx);
            order.push(project.id.clone());
            by_id.insert(project.id.clone(), project);
        }

        for id in &order {
            let project = &by_id[id];
            for dep in &project.dependencies {
                let Some(&dep_idx) = indices.get(dep) else {
                    return Err(Error::UnknownDependency {
                        project: id.clone(),
                        dependency: dep.clone(),
                    });
                };
                // Edge direction dep -> project: compilation order.
                graph.add_edge(dep_idx, indices[id], ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let node = graph
                .node_weight(cycle.node_id())
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            return Err(Error::CycleDetected { cycle: vec![node] });
        }

        // Fold into the algebraic shape bottom-up, memoizing by id so
        // shared dependencies become shared Arcs.
        let mut nodes: HashMap<ProjectId, Arc<Dag<Project>>> = HashMap::new();
        for id in &order {
            Self::node_for(id, &by_id, &mut nodes);
        }

        // Roots: projects no other project depends on, in insertion order.
        let mut depended_on: Vec<&ProjectId> = Vec::new();
        for project in by_id.values() {
            depended_on.extend(project.dependencies.iter());
        }
        let roots: Vec<Arc<Dag<Project>>> = order
            .iter()
            .filter(|id| !depended_on.contains(id))
            .map(|id| Arc::clone(&nodes[id]))
            .collect();

        let mut roots = roots;
        if roots.len() == 1 {
            // Toposort above guarantees a non-empty acyclic graph has at
            // least one root.
            Ok(roots.remove(0))
        } else {
            Ok(Arc::new(Dag::Aggregate(roots)))
        }
    }

    fn node_for(
        id: &ProjectId,
        by_id: &HashMap<ProjectId, Project>,
        nodes: &mut HashMap<ProjectId, Arc<Dag<Project>>>,
    ) -> Arc<Dag<Project>> {
        if let Some(node) = nodes.get(id) {
            return Arc::clone(node);
        }
        let project = by_id[id].clone();
        let node = if project.dependencies.is_empty() {
            Arc::new(Dag::Leaf(project))
        } else {
            let children = project
                .dependencies
                .iter()
                .map(|dep| Self::node_for(dep, by_id, nodes))
                .collect();
            Arc::new(Dag::Parent(project, children))
        };
        nodes.insert(id.clone(), Arc::clone(&node));
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(name: &str, deps: &[&str]) -> Project {
        Project::new(name).with_dependencies(deps.iter().copied())
    }

    #[test]
    fn single_project_becomes_a_leaf() {
        let dag = DagBuilder::from_dependencies(vec![project("a", &[])]).unwrap();
        assert!(matches!(*dag, Dag::Leaf(_)));
        assert_eq!(dag.node_count(), 1);
    }

    #[test]
    fn linear_chain_becomes_nested_parents() {
        let dag = DagBuilder::from_dependencies(vec![
            project("a", &[]),
            project("b", &["a"]),
            project("c", &["b"]),
        ])
        .unwrap();

        // Root is c, gated on b, gated on a.
        assert_eq!(dag.value().map(|p| p.name.as_str()), Some("c"));
        assert_eq!(dag.node_count(), 3);
        let order: Vec<_> = dag
            .dfs()
            .iter()
            .filter_map(|n| n.value().map(|p| p.name.clone()))
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn diamond_shares_one_node() {
        // d depends on b and c, which both depend on a.
        let dag = DagBuilder::from_dependencies(vec![
            project("a", &[]),
            project("b", &["a"]),
            project("c", &["a"]),
            project("d", &["b", "c"]),
        ])
        .unwrap();

        // a appears once in the distinct traversal even though it is
        // reachable through both b and c.
        assert_eq!(dag.node_count(), 4);
        let a_nodes: Vec<_> = dag
            .dfs()
            .into_iter()
            .filter(|n| n.value().is_some_and(|p| p.name == "a"))
            .collect();
        assert_eq!(a_nodes.len(), 1);
    }

    #[test]
    fn multiple_roots_become_an_aggregate() {
        let dag =
            DagBuilder::from_dependencies(vec![project("a", &[]), project("b", &[])]).unwrap();
        assert!(matches!(*dag, Dag::Aggregate(_)));
        assert!(dag.value().is_none());
        assert_eq!(dag.children().len(), 2);
    }

    #[test]
    fn dfs_is_first_occurrence_pre_order() {
        let dag = DagBuilder::from_dependencies(vec![
            project("a", &[]),
            project("b", &["a"]),
            project("c", &["a", "b"]),
        ])
        .unwrap();

        let order: Vec<_> = dag
            .dfs()
            .iter()
            .filter_map(|n| n.value().map(|p| p.name.clone()))
            .collect();
        // c first (pre-order), then its first child a, then b; a is not
        // repeated under b.
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let result = DagBuilder::from_dependencies(vec![
            project("a", &["b"]),
            project("b", &["a"]),
        ]);
        assert!(matches!(result, Err(Error::CycleDetected { .. })));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let result = DagBuilder::from_dependencies(vec![project("a", &["ghost"])]);
        assert!(matches!(result, Err(Error::UnknownDependency { .. })));
    }
}
