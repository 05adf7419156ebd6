//! DAG builder for constructing stage dependency graphs.
//!
//! The builder takes the set of stages participating in a run and wires the
//! edges declared by [`Stage::dependencies`]. Every dependency must itself be
//! part of the run.

use alertflow_common::Stage;
use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};

/// Index into the stage list.
pub type StageIndex = usize;

/// A directed acyclic graph of stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
    index_map: HashMap<Stage, StageIndex>,
    /// index -> stages that depend on it
    forward_edges: Vec<Vec<StageIndex>>,
    /// index -> stages it depends on
    reverse_edges: Vec<Vec<StageIndex>>,
}

impl StageGraph {
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, index: StageIndex) -> Option<Stage> {
        self.stages.get(index).copied()
    }

    pub fn index_of(&self, stage: Stage) -> Option<StageIndex> {
        self.index_map.get(&stage).copied()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stages that depend on the given stage (forward edges).
    pub fn dependents(&self, index: StageIndex) -> &[StageIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Stages the given stage depends on (reverse edges).
    pub fn dependencies(&self, index: StageIndex) -> &[StageIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn dependencies_satisfied(
        &self,
        index: StageIndex,
        completed: &HashSet<StageIndex>,
    ) -> bool {
        self.dependencies(index)
            .iter()
            .all(|dep| completed.contains(dep))
    }
}

/// Builder for constructing stage graphs.
pub struct DagBuilder {
    stages: Vec<Stage>,
}

impl DagBuilder {
    pub fn new(stages: impl IntoIterator<Item = Stage>) -> Self {
        Self {
            stages: stages.into_iter().collect(),
        }
    }

    /// Build the stage graph.
    ///
    /// Fails on duplicate stages, on dependencies outside the stage set and
    /// on cycles.
    pub fn build(self) -> Result<StageGraph> {
        let mut index_map = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if index_map.insert(*stage, i).is_some() {
                bail!("Duplicate stage: {}", stage);
            }
        }

        let mut forward_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); self.stages.len()];
        let mut reverse_edges: Vec<Vec<StageIndex>> = vec![Vec::new(); self.stages.len()];

        for (to_idx, stage) in self.stages.iter().enumerate() {
            for dep in stage.dependencies() {
                let from_idx = *index_map.get(dep).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Stage '{}' depends on '{}', which is not part of this run",
                        stage,
                        dep
                    )
                })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let graph = StageGraph {
            stages: self.stages,
            index_map,
            forward_edges,
            reverse_edges,
        };

        Self::validate_no_cycles(&graph)?;

        Ok(graph)
    }

    /// Validate that the graph has no cycles using Kahn's algorithm.
    fn validate_no_cycles(graph: &StageGraph) -> Result<()> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut queue: Vec<StageIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut processed = 0;

        while let Some(node) = queue.pop() {
            processed += 1;

            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if processed != graph.len() {
            let cycle: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.stages.get(i).map(|s| s.as_str()))
                .collect();

            bail!("Cycle detected in stage dependencies. Involved stages: {:?}", cycle);
        }

        Ok(())
    }
}
