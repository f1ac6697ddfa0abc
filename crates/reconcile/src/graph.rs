//! Dependency graph over the tasks of a run
//!
//! Edges point from a dependency to its dependent. Node `i` is the task at
//! arena index `i` in the [`TaskSet`] the graph was built from.

use crate::error::{Error, Result};
use crate::task::{TaskKey, TaskSet};
use log::debug;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

/// A validated, acyclic dependency graph.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<TaskKey, ()>,
}

impl DependencyGraph {
    /// Build the graph from every task's declared dependencies and links.
    ///
    /// Fails with [`Error::MissingDependency`] if a task names a key outside
    /// the run, and with [`Error::Cycle`] naming every task on a cycle. A
    /// task listing itself (common for "every task of my kind") is ignored.
    pub fn build<C: ?Sized + Send + Sync + 'static>(tasks: &TaskSet<C>) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        for key in tasks.keys() {
            graph.add_node(key.clone());
        }

        for idx in 0..tasks.len() {
            let entry = tasks.entry(idx);
            let mut deps = entry.dependencies(tasks);
            deps.extend(entry.link_keys());

            for dep in deps {
                if &dep == entry.key() {
                    debug!("{} lists itself as a dependency, ignoring", dep);
                    continue;
                }
                let dep_idx = tasks
                    .position(&dep)
                    .ok_or_else(|| Error::MissingDependency {
                        from: entry.key().clone(),
                        missing: dep.clone(),
                    })?;
                graph.update_edge(NodeIndex::new(dep_idx), NodeIndex::new(idx), ());
            }
        }

        let mut cyclic: Vec<TaskKey> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| component.len() > 1)
            .flatten()
            .map(|node| graph[node].clone())
            .collect();
        if !cyclic.is_empty() {
            cyclic.sort();
            return Err(Error::Cycle { tasks: cyclic });
        }

        Ok(Self { graph })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn key(&self, idx: usize) -> &TaskKey {
        &self.graph[NodeIndex::new(idx)]
    }

    /// Direct dependencies of a task, in key order.
    pub fn dependencies(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Incoming)
    }

    /// Direct dependents of a task, in key order.
    pub fn dependents(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Outgoing)
    }

    /// Every task that depends on `idx`, directly or transitively.
    pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
        let start = NodeIndex::new(idx);
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                found.push(node.index());
            }
        }
        self.sort_by_key(&mut found);
        found
    }

    /// Partition the tasks into layers of mutually independent tasks.
    ///
    /// Every task's dependencies are in earlier layers. Within a layer tasks
    /// are ordered by kind, then name.
    pub fn layers(&self) -> Vec<Vec<usize>> {
        let mut pending: Vec<usize> = (0..self.len())
            .map(|idx| self.dependencies(idx).len())
            .collect();
        let mut current: Vec<usize> = (0..self.len()).filter(|&i| pending[i] == 0).collect();
        self.sort_by_key(&mut current);

        let mut layers = Vec::new();
        while !current.is_empty() {
            let mut next = Vec::new();
            for &idx in &current {
                for dependent in self.dependents(idx) {
                    pending[dependent] -= 1;
                    if pending[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            self.sort_by_key(&mut next);
            layers.push(std::mem::replace(&mut current, next));
        }
        layers
    }

    /// Tasks in a deterministic dependency order.
    pub fn order(&self) -> Vec<usize> {
        self.layers().into_iter().flatten().collect()
    }

    fn neighbors(&self, idx: usize, direction: Direction) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), direction)
            .map(NodeIndex::index)
            .collect();
        self.sort_by_key(&mut found);
        found
    }

    pub(crate) fn sort_by_key(&self, indices: &mut [usize]) {
        indices.sort_by(|a, b| self.key(*a).cmp(self.key(*b)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::diff::Differ;
    use crate::target::BackendKind;
    use crate::task::Resource;

    #[derive(Debug, Clone, Default)]
    struct Node {
        after_all: bool,
        name: String,
        after: Vec<&'static str>,
    }

    fn node(name: &str, after: &[&'static str]) -> Node {
        Node {
            after_all: false,
            name: name.to_string(),
            after: after.to_vec(),
        }
    }

    impl Resource for Node {
        type Cloud = ();
        const KIND: &'static str = "Node";
        const BACKENDS: &'static [BackendKind] = &[BackendKind::Direct];

        fn name(&self) -> &str {
            &self.name
        }

        fn dependencies(&self, tasks: &TaskSet<()>) -> Vec<TaskKey> {
            let mut deps: Vec<TaskKey> = self
                .after
                .iter()
                .map(|name| TaskKey::of::<Node>(*name))
                .collect();
            if self.after_all {
                deps.extend(tasks.keys_of::<Node>());
            }
            deps
        }

        fn find(&self, _ctx: &Context<'_, ()>) -> anyhow::Result<Option<Self>> {
            Ok(None)
        }

        fn diff(_actual: &Self, _expected: &Self, _differ: &mut Differ<'_>) -> Self {
            Self::default()
        }

        fn check_changes(_a: Option<&Self>, _e: &Self, _c: &Self) -> Result<()> {
            Ok(())
        }
    }

    fn names(graph: &DependencyGraph, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| graph.key(i).name.clone()).collect()
    }

    #[test]
    fn test_three_task_cycle_names_every_task() {
        let mut tasks = TaskSet::new();
        tasks.add(node("a", &["b"])).unwrap();
        tasks.add(node("b", &["c"])).unwrap();
        tasks.add(node("c", &["a"])).unwrap();
        tasks.add(node("d", &[])).unwrap();

        match DependencyGraph::build(&tasks) {
            Err(Error::Cycle { tasks }) => {
                let names: Vec<&str> = tasks.iter().map(|k| k.name.as_str()).collect();
                assert_eq!(names, ["a", "b", "c"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let mut tasks = TaskSet::new();
        tasks.add(node("a", &["ghost"])).unwrap();
        assert!(matches!(
            DependencyGraph::build(&tasks),
            Err(Error::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_ignored() {
        let mut tasks = TaskSet::new();
        tasks.add(node("a", &[])).unwrap();
        tasks
            .add(Node {
                after_all: true,
                ..node("b", &[])
            })
            .unwrap();

        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(names(&graph, &graph.dependencies(1)), ["a"]);
    }

    #[test]
    fn test_layers_are_sorted_regardless_of_insertion_order() {
        let mut forward = TaskSet::new();
        for n in [node("net", &[]), node("b", &["net"]), node("a", &["net"]), node("lb", &["a", "b"])] {
            forward.add(n).unwrap();
        }
        let mut reverse = TaskSet::new();
        for n in [node("lb", &["a", "b"]), node("a", &["net"]), node("b", &["net"]), node("net", &[])] {
            reverse.add(n).unwrap();
        }

        let layers = |tasks: &TaskSet<()>| {
            let graph = DependencyGraph::build(tasks).unwrap();
            graph
                .layers()
                .iter()
                .map(|layer| names(&graph, layer))
                .collect::<Vec<_>>()
        };
        assert_eq!(layers(&forward), [vec!["net"], vec!["a", "b"], vec!["lb"]]);
        assert_eq!(layers(&forward), layers(&reverse));
    }

    #[test]
    fn test_transitive_dependents() {
        let mut tasks = TaskSet::new();
        tasks.add(node("a", &[])).unwrap();
        tasks.add(node("b", &["a"])).unwrap();
        tasks.add(node("c", &["b"])).unwrap();
        tasks.add(node("d", &[])).unwrap();

        let graph = DependencyGraph::build(&tasks).unwrap();
        assert_eq!(names(&graph, &graph.transitive_dependents(0)), ["b", "c"]);
        assert!(graph.transitive_dependents(3).is_empty());
        assert_eq!(graph.order().len(), 4);
    }
}
