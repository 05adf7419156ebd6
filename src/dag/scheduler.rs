//! Scheduler for the one-click stage walk.
//!
//! Tracks the status of each stage node, reports which stages are ready to
//! start and propagates skips to every transitive dependent of a stage that
//! failed or was skipped. A failure never stops sibling branches.

use crate::dag::builder::{DagBuilder, StageGraph, StageIndex};
use alertflow_common::Stage;
use anyhow::Result;
use std::collections::HashSet;

/// Status of a stage node within one walk.
#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    /// Already succeeded before the walk started
    Satisfied,
}

impl NodeStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Skipped | Self::Satisfied
        )
    }
}

#[derive(Debug, Clone)]
struct StageNode {
    stage: Stage,
    status: NodeStatus,
    index: StageIndex,
}

/// Drives a topological walk over a [`StageGraph`].
#[derive(Debug)]
pub struct OneClickScheduler {
    graph: StageGraph,
    nodes: Vec<StageNode>,
    /// Nodes whose dependents may start
    completed: HashSet<StageIndex>,
}

impl OneClickScheduler {
    pub fn from_stages(stages: impl IntoIterator<Item = Stage>) -> Result<Self> {
        let graph = DagBuilder::new(stages).build()?;
        let nodes = graph
            .stages()
            .iter()
            .enumerate()
            .map(|(index, stage)| StageNode {
                stage: *stage,
                status: NodeStatus::Pending,
                index,
            })
            .collect();

        Ok(Self {
            graph,
            nodes,
            completed: HashSet::new(),
        })
    }

    /// Pending stages whose dependencies have all succeeded.
    pub fn ready_stages(&self) -> Vec<Stage> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.status, NodeStatus::Pending))
            .filter(|node| self.graph.dependencies_satisfied(node.index, &self.completed))
            .map(|node| node.stage)
            .collect()
    }

    pub fn mark_running(&mut self, stage: Stage) {
        self.set_status(stage, NodeStatus::Running);
    }

    pub fn mark_satisfied(&mut self, stage: Stage) {
        if let Some(idx) = self.set_status(stage, NodeStatus::Satisfied) {
            self.completed.insert(idx);
        }
    }

    pub fn mark_succeeded(&mut self, stage: Stage) {
        if let Some(idx) = self.set_status(stage, NodeStatus::Succeeded) {
            self.completed.insert(idx);
        }
    }

    /// Mark a stage failed and skip its dependents.
    ///
    /// Returns the newly skipped stages with their skip reasons.
    pub fn mark_failed(&mut self, stage: Stage) -> Vec<(Stage, String)> {
        let mut skipped = Vec::new();
        if let Some(idx) = self.set_status(stage, NodeStatus::Failed) {
            self.skip_dependents(idx, "failed", &mut skipped);
        }
        skipped
    }

    fn skip_dependents(
        &mut self,
        upstream_idx: StageIndex,
        outcome: &str,
        skipped: &mut Vec<(Stage, String)>,
    ) {
        let Some(upstream) = self.graph.stage(upstream_idx) else {
            return;
        };
        let dependents: Vec<StageIndex> = self.graph.dependents(upstream_idx).to_vec();
        for dep_idx in dependents {
            if let Some(node) = self.nodes.get_mut(dep_idx)
                && !node.status.is_terminal()
                && !matches!(node.status, NodeStatus::Running)
            {
                let reason = format!("dependency {} {}", upstream, outcome);
                node.status = NodeStatus::Skipped;
                skipped.push((node.stage, reason));
                self.skip_dependents(dep_idx, "skipped", skipped);
            }
        }
    }

    fn set_status(&mut self, stage: Stage, status: NodeStatus) -> Option<StageIndex> {
        let idx = self.graph.index_of(stage)?;
        let node = self.nodes.get_mut(idx)?;
        node.status = status;
        Some(idx)
    }
}
