// src/dag/index.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::job::JobId;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Jobs that must finish before this one can start.
    deps: BTreeSet<JobId>,
    /// Jobs that list this one among their dependencies.
    dependents: BTreeSet<JobId>,
}

/// Dependency relation between stored jobs, keyed by id.
///
/// Jobs only ever depend on jobs that already exist, so inserting in id
/// order cannot create a cycle.
#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    nodes: BTreeMap<JobId, DagNode>,
}

impl DependencyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job together with its dependency set.
    pub fn insert(&mut self, job: JobId, deps: &BTreeSet<JobId>) {
        self.nodes.entry(job).or_default().deps.extend(deps.iter().copied());
        for dep in deps {
            self.nodes.entry(*dep).or_default().dependents.insert(job);
        }
    }

    /// Forget a job and its edges. Used to undo an insert.
    pub fn remove(&mut self, job: JobId) {
        let Some(node) = self.nodes.remove(&job) else {
            return;
        };
        for dep in &node.deps {
            if let Some(parent) = self.nodes.get_mut(dep) {
                parent.dependents.remove(&job);
            }
        }
    }

    /// Immediate dependencies of a job.
    pub fn dependencies_of(&self, job: JobId) -> BTreeSet<JobId> {
        self.nodes
            .get(&job)
            .map(|n| n.deps.clone())
            .unwrap_or_default()
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, job: JobId) -> Vec<JobId> {
        self.nodes
            .get(&job)
            .map(|n| n.dependents.iter().copied().collect())
            .unwrap_or_default()
    }
}
