// ABOUTME: State transition rules and the record-keeping each transition performs.
// ABOUTME: Closing a stage appends exactly one StageRecord; nothing else edits the history.

use chrono::{DateTime, Utc};

use crate::types::TrafficSplit;

use super::deployment::{Deployment, FailureCause, StageOutcome, StageRecord};
use super::error::DeployError;
use super::state::DeploymentStatus;

impl DeploymentStatus {
    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: DeploymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            DeploymentStatus::RollingBack => self != DeploymentStatus::RollingBack,
            DeploymentStatus::RolledBack => self == DeploymentStatus::RollingBack,
            _ => self.next_forward() == Some(to),
        }
    }
}

impl Deployment {
    fn close_stage(&mut self, outcome: StageOutcome, cause: Option<FailureCause>, now: DateTime<Utc>) {
        self.stage_history.push(StageRecord {
            stage: self.status,
            entered_at: self.stage_entered_at,
            exited_at: now,
            outcome,
            traffic: self.traffic_split,
            cause,
        });
        self.updated_at = now;
    }

    fn enter(&mut self, to: DeploymentStatus, now: DateTime<Utc>) -> Result<(), DeployError> {
        if !self.status.can_transition_to(to) {
            return Err(DeployError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.stage_entered_at = now;
        self.updated_at = now;
        Ok(())
    }

    /// Close the current stage as passed and move to the next forward state.
    pub(crate) fn advance(&mut self, now: DateTime<Utc>) -> Result<DeploymentStatus, DeployError> {
        let from = self.status;
        let to = from
            .next_forward()
            .ok_or(DeployError::InvalidTransition {
                from,
                to: DeploymentStatus::Completed,
            })?;
        if !from.can_transition_to(to) {
            return Err(DeployError::InvalidTransition { from, to });
        }
        self.close_stage(StageOutcome::Passed, None, now);
        self.enter(to, now)?;
        if to == DeploymentStatus::Completed {
            self.promote_candidate(now);
        }
        Ok(to)
    }

    /// Close the current stage as failed and start rolling back.
    pub(crate) fn begin_rollback(
        &mut self,
        cause: FailureCause,
        now: DateTime<Utc>,
    ) -> Result<(), DeployError> {
        if !self.status.can_transition_to(DeploymentStatus::RollingBack) {
            return Err(DeployError::InvalidTransition {
                from: self.status,
                to: DeploymentStatus::RollingBack,
            });
        }
        self.close_stage(StageOutcome::Failed, Some(cause.clone()), now);
        self.last_error = Some(cause);
        self.enter(DeploymentStatus::RollingBack, now)
    }

    /// Close the rollback stage and enter the terminal `RolledBack` state.
    pub(crate) fn finish_rollback(&mut self, now: DateTime<Utc>) -> Result<(), DeployError> {
        if self.status != DeploymentStatus::RollingBack {
            return Err(DeployError::InvalidTransition {
                from: self.status,
                to: DeploymentStatus::RolledBack,
            });
        }
        // The failure that started the rollback, not a later rollback hiccup
        let cause = self
            .rollback_trigger()
            .cloned()
            .or_else(|| self.last_error.clone());
        self.last_error = cause.clone();
        self.manual_intervention_required = false;
        self.close_stage(StageOutcome::RolledBack, cause, now);
        self.enter(DeploymentStatus::RolledBack, now)
    }

    /// The failure that moved this deployment into `RollingBack`.
    pub fn rollback_trigger(&self) -> Option<&FailureCause> {
        self.stage_history
            .iter()
            .rev()
            .find(|r| r.outcome == StageOutcome::Failed)
            .and_then(|r| r.cause.as_ref())
    }

    /// Stop automated action. The split stays at its last confirmed value.
    pub(crate) fn freeze(&mut self, cause: FailureCause, now: DateTime<Utc>) {
        self.close_stage(StageOutcome::Frozen, Some(cause.clone()), now);
        self.last_error = Some(cause);
        self.manual_intervention_required = true;
        self.stage_entered_at = now;
    }

    /// Operator cleared a freeze; the current stage is re-entered.
    pub(crate) fn unfreeze(&mut self, now: DateTime<Utc>) {
        self.manual_intervention_required = false;
        self.stage_entered_at = now;
        self.updated_at = now;
    }

    /// Close the open stage after a restart so the stage can be re-entered.
    pub(crate) fn mark_interrupted(&mut self, now: DateTime<Utc>) {
        self.close_stage(StageOutcome::Interrupted, None, now);
        self.stage_entered_at = now;
    }

    /// Former candidate becomes stable, former stable is kept for audit.
    fn promote_candidate(&mut self, now: DateTime<Utc>) {
        if let Some(candidate) = self.candidate_variant.take() {
            let mut old = std::mem::replace(&mut self.stable_variant, candidate);
            old.decommissioned_at.get_or_insert(now);
            self.previous_stable = Some(old);
        }
        self.traffic_split = TrafficSplit::ALL_STABLE;
        self.pending_split = None;
    }
}
