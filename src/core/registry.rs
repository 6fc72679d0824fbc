//! Task registry.
//!
//! The registry owns every task definition for the lifetime of the process.
//! It is built during configuration, validated, then frozen behind an `Arc`
//! and shared read-only with the resolver and scheduler.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::core::task::Task;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct TaskRegistry {
    /// Definitions in declaration order.
    tasks: Vec<Task>,
    /// Name to position in `tasks`.
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    ///
    /// Prerequisites may name tasks that are registered later. The task is
    /// rejected if its name is taken or if it closes a dependency cycle
    /// with tasks already registered.
    ///
    /// # Errors
    /// - [`Error::DuplicateTask`] if the name is already registered
    /// - [`Error::CyclicDependency`] if the task would (transitively) depend on itself
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.index.contains_key(&task.name) {
            return Err(Error::DuplicateTask(task.name));
        }

        if let Some(cycle) = self.cycle_through(&task) {
            return Err(Error::CyclicDependency { cycle });
        }

        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    /// Look up a task by name.
    pub fn lookup(&self, name: &str) -> Result<&Task> {
        self.get(name).ok_or_else(|| Error::unknown(name))
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Declaration position, used to break ties deterministically.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check that every referenced task exists.
    ///
    /// Called once the configuration phase ends.
    pub fn validate(&self) -> Result<()> {
        for task in &self.tasks {
            if let Some(missing) = task.references().find(|r| !self.contains(r)) {
                return Err(Error::UnknownTask {
                    name: missing.clone(),
                    required_by: Some(task.name.clone()),
                });
            }
        }
        Ok(())
    }

    /// Validate and share the registry read-only.
    pub fn freeze(self) -> Result<Arc<Self>> {
        self.validate()?;
        Ok(Arc::new(self))
    }

    /// Insert without the cycle check, to exercise the resolver on graphs
    /// `register` refuses to build.
    #[cfg(test)]
    pub(crate) fn insert_unchecked(&mut self, task: Task) {
        self.index.insert(task.name.clone(), self.tasks.len());
        self.tasks.push(task);
    }

    /// Find a cycle that `candidate` would close, as a path from the
    /// candidate back to itself.
    ///
    /// The registered graph is acyclic, so any new cycle runs through the
    /// candidate. Unregistered names are dead ends.
    fn cycle_through(&self, candidate: &Task) -> Option<Vec<String>> {
        let mut path = vec![candidate.name.clone()];
        let mut visited = HashSet::new();
        if self.walk_back_to(candidate, &candidate.name, &mut path, &mut visited) {
            Some(path)
        } else {
            None
        }
    }

    fn walk_back_to(
        &self,
        candidate: &Task,
        current: &str,
        path: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> bool {
        let refs: Vec<&String> = if current == candidate.name {
            candidate.references().collect()
        } else {
            match self.get(current) {
                Some(task) => task.references().collect(),
                None => return false,
            }
        };

        for next in refs {
            if *next == candidate.name {
                path.push(next.clone());
                return true;
            }
            if !visited.insert(next.clone()) {
                continue;
            }
            path.push(next.clone());
            if self.walk_back_to(candidate, next, path, visited) {
                return true;
            }
            path.pop();
        }
        false
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}
