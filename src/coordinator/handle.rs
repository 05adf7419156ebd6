use alertflow_common::{Stage, StageRun};
use tokio::sync::watch;
use uuid::Uuid;

use crate::errors::OrchestratorError;

/// Awaitable view of one claimed run.
///
/// Dropping a handle abandons interest only; the run continues. Handles for
/// the same claim observe the same run.
#[derive(Debug, Clone)]
pub struct StageRunHandle {
    alert_id: String,
    stage: Stage,
    claim: Uuid,
    rx: watch::Receiver<StageRun>,
}

impl StageRunHandle {
    pub(crate) fn new(
        alert_id: &str,
        stage: Stage,
        claim: Uuid,
        rx: watch::Receiver<StageRun>,
    ) -> Self {
        Self {
            alert_id: alert_id.to_string(),
            stage,
            claim,
            rx,
        }
    }

    pub fn alert_id(&self) -> &str {
        &self.alert_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn claim_token(&self) -> Uuid {
        self.claim
    }

    /// Latest known state of the run.
    pub fn current(&self) -> StageRun {
        self.rx.borrow().clone()
    }

    /// Wait for the run to reach a terminal state.
    ///
    /// Fails with [`OrchestratorError::ClaimExpired`] when the claim was
    /// superseded or the alert was aborted before a result arrived.
    pub async fn wait(mut self) -> Result<StageRun, OrchestratorError> {
        let claim = self.claim;
        loop {
            {
                let run = self.rx.borrow_and_update();
                if is_final(claim, &run) {
                    return Ok(run.clone());
                }
            }
            if self.rx.changed().await.is_err() {
                let run = self.rx.borrow();
                if is_final(claim, &run) {
                    return Ok(run.clone());
                }
                return Err(OrchestratorError::ClaimExpired {
                    alert_id: self.alert_id.clone(),
                    stage: self.stage,
                });
            }
        }
    }
}

fn is_final(claim: Uuid, run: &StageRun) -> bool {
    run.claim_token == Some(claim) && run.state.is_terminal()
}
