//! Command/compensation pair for tentatively claiming a stage.
//!
//! The coordinator applies a claim before it knows whether the executor can
//! be launched. If launching fails, the compensation restores the previous
//! run and claim under the same lock, so no observer of the record ever sees
//! a claim without a task behind it once the lock is released.

use alertflow_common::{Stage, StageRun};

use super::{ActiveClaim, AlertEntry};

pub(super) struct ClaimCommand {
    pub run: StageRun,
    pub claim: ActiveClaim,
}

#[must_use = "a tentative claim must be kept or reverted"]
pub(super) struct ClaimCompensation {
    stage: Stage,
    previous_run: StageRun,
    previous_claim: Option<ActiveClaim>,
}

impl ClaimCommand {
    pub fn apply(self, entry: &mut AlertEntry) -> ClaimCompensation {
        let stage = self.run.stage;
        let previous_run = entry.record.run(stage);
        let previous_claim = entry.claims.insert(stage, self.claim);
        entry.record.put(self.run);
        ClaimCompensation {
            stage,
            previous_run,
            previous_claim,
        }
    }
}

impl ClaimCompensation {
    /// The claim stays; nothing to undo.
    pub fn commit(self) {}

    /// Undo the claim and return the restored run.
    pub fn revert(self, entry: &mut AlertEntry) -> StageRun {
        entry.claims.remove(&self.stage);
        if let Some(previous) = self.previous_claim {
            entry.claims.insert(self.stage, previous);
        }
        entry.record.put(self.previous_run.clone());
        self.previous_run
    }
}
