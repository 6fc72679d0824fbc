//! Dependency resolution: requested task names → execution plan.
//!
//! Resolution walks prerequisites depth-first from each requested task,
//! marking nodes `Visiting` on the way down and `Visited` on the way up.
//! Meeting a `Visiting` node again is a back-edge, i.e. a cycle.
//!
//! A task's group is the earliest one after all its prerequisites:
//! `level = 0` without prerequisites, otherwise `1 + max(level(prereq))`.
//! Tasks sharing a group are ordered by declaration order.

use std::collections::HashMap;

use crate::core::plan::ExecutionPlan;
use crate::core::registry::TaskRegistry;
use crate::core::task::Step;
use crate::error::{Error, Result};
use crate::pwlog_debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited { level: usize },
}

/// Expands requests into execution plans against a registry.
pub struct DependencyResolver<'a> {
    registry: &'a TaskRegistry,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self { registry }
    }

    /// Resolve one or more requested tasks into a single plan.
    ///
    /// Requested names are de-duplicated; shared prerequisites appear once.
    ///
    /// # Errors
    /// - [`Error::UnknownTask`] for an unregistered requested task or prerequisite
    /// - [`Error::CyclicDependency`] naming the cycle path
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<ExecutionPlan> {
        let mut requested: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !requested.iter().any(|r| r == name) {
                requested.push(name.to_string());
            }
        }

        let mut walk = Walk {
            registry: self.registry,
            marks: HashMap::new(),
            path: Vec::new(),
            plan: ExecutionPlan::new(requested.clone()),
        };

        for name in &requested {
            walk.visit(name, None)?;
        }

        let mut plan = walk.plan;
        let registry = self.registry;
        plan.sort_groups_by_key(|name| registry.position(name).unwrap_or(usize::MAX));

        pwlog_debug!(
            "Resolved [{}] into {} task(s) in {} group(s)",
            requested.join(", "),
            plan.len(),
            plan.groups().len()
        );
        Ok(plan)
    }

    /// Resolve every step of a sequence up front.
    ///
    /// A malformed step aborts the whole sequence before anything runs.
    pub fn resolve_sequence(&self, steps: &[Step]) -> Result<Vec<ExecutionPlan>> {
        if steps.iter().any(|s| s.names().is_empty()) {
            return Err(Error::Validation("sequence step with no tasks".into()));
        }
        steps.iter().map(|step| self.resolve(step.names())).collect()
    }
}

/// State of one depth-first resolution.
struct Walk<'a> {
    registry: &'a TaskRegistry,
    marks: HashMap<String, Mark>,
    /// Current DFS path, for cycle reporting.
    path: Vec<String>,
    plan: ExecutionPlan,
}

impl Walk<'_> {
    /// Visit `name`, returning its group level.
    fn visit(&mut self, name: &str, required_by: Option<&str>) -> Result<usize> {
        match self.marks.get(name) {
            Some(Mark::Visited { level }) => return Ok(*level),
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|p| p == name).unwrap_or(0);
                let mut cycle = self.path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(Error::CyclicDependency { cycle });
            }
            None => {}
        }

        let task = self.registry.get(name).ok_or_else(|| Error::UnknownTask {
            name: name.to_string(),
            required_by: required_by.map(str::to_string),
        })?;

        self.marks.insert(name.to_string(), Mark::Visiting);
        self.path.push(name.to_string());

        let mut level = 0;
        for prerequisite in &task.prerequisites {
            let prerequisite_level = self.visit(prerequisite, Some(name))?;
            self.plan.add_dependency(prerequisite, name);
            level = level.max(prerequisite_level + 1);
        }

        self.path.pop();
        self.marks.insert(name.to_string(), Mark::Visited { level });
        self.plan.place(name, level);
        Ok(level)
    }
}
