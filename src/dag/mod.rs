//! Stage dependency graph and one-click scheduling.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs a DAG from the stages taking part in a run
//! 2. **Scheduler** - Tracks node status, reports ready stages and skips
//!    dependents of failed stages
//! 3. **State** - Per-stage outcomes and the run summary
//!
//! The coordinator drives the walk; this module holds no async state.
//!
//! ## Example
//!
//! ```
//! use alertflow::dag::OneClickScheduler;
//! use alertflow_common::Stage;
//!
//! let mut stages = Stage::ANALYSIS.to_vec();
//! stages.push(Stage::OrchestrationApi);
//! let mut scheduler = OneClickScheduler::from_stages(stages).unwrap();
//!
//! let ready = scheduler.ready_stages();
//! assert_eq!(
//!     ready,
//!     vec![Stage::Classification, Stage::DeepAnalysis, Stage::OrchestrationApi]
//! );
//!
//! for stage in ready {
//!     scheduler.mark_running(stage);
//! }
//! let skipped = scheduler.mark_failed(Stage::DeepAnalysis);
//! assert_eq!(skipped.len(), 2);
//! ```

mod builder;
mod scheduler;
mod state;

pub use builder::{DagBuilder, StageGraph, StageIndex};
pub use scheduler::OneClickScheduler;
pub use state::{ExecutionTimer, RunSummary, StageOutcome};

use alertflow_common::Stage;

/// Stages walked by a one-click run: every analysis stage plus the
/// selected orchestration transport.
pub fn one_click_stages(orchestration: Stage) -> Vec<Stage> {
    let mut stages = Stage::ANALYSIS.to_vec();
    stages.push(orchestration);
    stages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_click_stage_set() {
        let stages = one_click_stages(Stage::OrchestrationMcp);
        assert_eq!(stages.len(), 6);
        assert!(!stages.contains(&Stage::OrchestrationApi));
        assert!(OneClickScheduler::from_stages(stages).is_ok());
    }
}
