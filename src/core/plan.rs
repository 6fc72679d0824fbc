//! Execution plan: the resolved sub-graph of a request, grouped for
//! concurrent execution.
//!
//! Nodes are task names; an edge runs from a prerequisite to the task that
//! needs it. Groups are ordered so that every prerequisite of a task lives in
//! a strictly earlier group, and tasks inside one group have no dependency
//! relation, so a group can run concurrently behind a barrier.

use petgraph::algo::is_cyclic_directed;
use petgraph::dot::{Config as DotConfig, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::HashMap;
use std::fmt;

pub struct ExecutionPlan {
    /// Task names requested by the caller, in request order.
    requested: Vec<String>,
    graph: DiGraph<String, ()>,
    /// Index mapping from task name to NodeIndex for fast lookups.
    index: HashMap<String, NodeIndex>,
    groups: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Create an empty plan for the given request.
    pub fn new(requested: Vec<String>) -> Self {
        Self {
            requested,
            graph: DiGraph::new(),
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    /// Add a task node; adding an existing name returns its NodeIndex.
    pub fn add_task(&mut self, name: &str) -> NodeIndex {
        if let Some(&index) = self.index.get(name) {
            return index;
        }
        let index = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), index);
        index
    }

    /// Record that `prerequisite` must settle before `dependent` starts.
    pub fn add_dependency(&mut self, prerequisite: &str, dependent: &str) {
        let from = self.add_task(prerequisite);
        let to = self.add_task(dependent);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    /// Place `name` into group `level`, growing the group list as needed.
    pub fn place(&mut self, name: &str, level: usize) {
        self.add_task(name);
        if self.groups.len() <= level {
            self.groups.resize_with(level + 1, Vec::new);
        }
        self.groups[level].push(name.to_string());
    }

    /// Reorder every group with the given key (declaration order).
    pub fn sort_groups_by_key<K: Ord>(&mut self, mut key: impl FnMut(&str) -> K) {
        for group in &mut self.groups {
            group.sort_by_key(|name| key(name));
        }
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// Concurrency-safe groups, in execution order.
    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// All task names in execution order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flatten().map(String::as_str)
    }

    /// Index of the group holding `name`.
    pub fn group_of(&self, name: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.iter().any(|n| n == name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of prerequisite edges in the plan.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct prerequisites of `name` within the plan.
    pub fn prerequisites(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct dependents of `name` within the plan.
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Every task that (transitively) needs `name`.
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = Vec::new();
        while let Some(node) = dfs.next(&self.graph) {
            if node != start {
                found.push(self.graph[node].as_str());
            }
        }
        found
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        match self.index.get(name) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, direction)
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Plans are built from an acyclic registry; this double-checks the graph.
    pub fn is_acyclic(&self) -> bool {
        !is_cyclic_directed(&self.graph)
    }

    /// Graphviz rendering of the plan graph.
    pub fn to_dot(&self) -> String {
        format!(
            "{:?}",
            Dot::with_config(&self.graph, &[DotConfig::EdgeNoLabel])
        )
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("requested", &self.requested)
            .field("groups", &self.groups)
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in self.groups.iter().enumerate() {
            writeln!(f, "group {}: {}", i, group.join(", "))?;
        }
        Ok(())
    }
}
