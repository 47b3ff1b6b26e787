// src/dag/batch.rs

//! Batch submission of jobs that depend on each other.
//!
//! Jobs inside a [`JobGraph`] refer to each other by a local name; the
//! names only exist until the batch is written. Dependencies on jobs that
//! are already stored are plain [`NewJob::depends_on`] calls.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{JobQueueError, Result};
use crate::job::NewJob;

#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    entries: Vec<GraphEntry>,
}

#[derive(Debug, Clone)]
struct GraphEntry {
    name: String,
    job: NewJob,
    after: Vec<String>,
}

/// A validated graph: entries with resolved local dependencies and an
/// insertion order in which every job comes after the jobs it waits for.
#[derive(Debug)]
pub(crate) struct PlannedGraph {
    pub(crate) nodes: Vec<PlannedNode>,
    pub(crate) order: Vec<usize>,
}

#[derive(Debug)]
pub(crate) struct PlannedNode {
    pub(crate) name: String,
    pub(crate) job: NewJob,
    pub(crate) after: Vec<usize>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(self, name: impl Into<String>, job: NewJob) -> Self {
        self.add_after(name, job, Vec::<String>::new())
    }

    /// Add a job that waits for the named jobs of this graph.
    pub fn add_after<I, N>(mut self, name: impl Into<String>, job: NewJob, after: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.entries.push(GraphEntry {
            name: name.into(),
            job,
            after: after.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn plan(self) -> Result<PlannedGraph> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(JobQueueError::InvalidGraph(format!(
                    "job name '{}' is used more than once",
                    entry.name
                )));
            }
        }

        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        let mut nodes = Vec::with_capacity(self.entries.len());

        for (i, entry) in self.entries.into_iter().enumerate() {
            graph.add_node(i);
            let mut after = Vec::with_capacity(entry.after.len());
            for dep in &entry.after {
                let &dep_idx = index.get(dep).ok_or_else(|| {
                    JobQueueError::InvalidGraph(format!(
                        "job '{}' depends on unknown job '{}'",
                        entry.name, dep
                    ))
                })?;
                if dep_idx == i {
                    return Err(JobQueueError::InvalidGraph(format!(
                        "job '{}' cannot depend on itself",
                        entry.name
                    )));
                }
                graph.add_edge(dep_idx, i, ());
                after.push(dep_idx);
            }
            nodes.push(PlannedNode {
                name: entry.name,
                job: entry.job,
                after,
            });
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            JobQueueError::InvalidGraph(format!(
                "cycle detected in job graph involving job '{}'",
                nodes[cycle.node_id()].name
            ))
        })?;

        Ok(PlannedGraph { nodes, order })
    }
}
