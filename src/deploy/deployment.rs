// ABOUTME: The persisted rollout record and its variant and stage-history types.
// ABOUTME: Fields are crate-private; only the controller mutates a deployment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RolloutConfig;
use crate::types::{Color, DeploymentId, ImageDigest, ServiceName, TrafficSplit};

use super::error::DeployErrorKind;
use super::state::DeploymentStatus;

/// One concrete deployable instance of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub color: Color,
    pub image_digest: ImageDigest,
    pub replica_count: u32,
    pub ready_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decommissioned_at: Option<DateTime<Utc>>,
}

impl Variant {
    pub fn new(color: Color, image_digest: ImageDigest, replica_count: u32) -> Self {
        Self {
            color,
            image_digest,
            replica_count,
            ready_at: None,
            decommissioned_at: None,
        }
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage work succeeded and the rollout moved on.
    Passed,
    /// Stage failed; the rollout moved to rolling back.
    Failed,
    /// The process stopped mid-stage; the stage was re-entered on resume.
    Interrupted,
    /// Rollback finished.
    RolledBack,
    /// Rollback could not finish; automated action stopped.
    Frozen,
    /// Recorded as the existing production variant rather than rolled out.
    Adopted,
}

/// Structured reason a stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: DeployErrorKind,
    pub stage: DeploymentStatus,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// One closed entry of the stage log. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: DeploymentStatus,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
    pub outcome: StageOutcome,
    /// Confirmed traffic split when the stage closed.
    pub traffic: TrafficSplit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}

/// Which rollback steps have already been confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackProgress {
    /// Stable variant re-applied after a failure during finalizing.
    #[serde(default)]
    pub stable_reapplied: bool,
    pub traffic_restored: bool,
    pub candidate_decommissioned: bool,
}

/// A single rollout attempt of one image digest for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub(crate) id: DeploymentId,
    pub(crate) service: ServiceName,
    pub(crate) target_image_digest: ImageDigest,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) status: DeploymentStatus,
    pub(crate) stable_variant: Variant,
    pub(crate) candidate_variant: Option<Variant>,
    /// The stable variant this rollout replaced, once it completes.
    #[serde(default)]
    pub(crate) previous_stable: Option<Variant>,
    /// Last split the driver confirmed active.
    pub(crate) traffic_split: TrafficSplit,
    /// Split written ahead of a driver call and not yet confirmed.
    #[serde(default)]
    pub(crate) pending_split: Option<TrafficSplit>,
    pub(crate) stage_history: Vec<StageRecord>,
    /// When the current (open) stage was entered.
    pub(crate) stage_entered_at: DateTime<Utc>,
    pub(crate) last_error: Option<FailureCause>,
    #[serde(default)]
    pub(crate) rollback: RollbackProgress,
    #[serde(default)]
    pub(crate) manual_intervention_required: bool,
    pub(crate) config: RolloutConfig,
}

impl Deployment {
    /// A new rollout of `digest`, replacing `stable`.
    pub fn new(
        service: ServiceName,
        digest: ImageDigest,
        stable: Variant,
        config: RolloutConfig,
    ) -> Self {
        let now = Utc::now();
        let candidate = Variant::new(stable.color.opposite(), digest.clone(), stable.replica_count);
        Self {
            id: DeploymentId::generate(),
            service,
            target_image_digest: digest,
            created_at: now,
            updated_at: now,
            status: DeploymentStatus::Pending,
            stable_variant: stable,
            candidate_variant: Some(candidate),
            previous_stable: None,
            traffic_split: TrafficSplit::ALL_STABLE,
            pending_split: None,
            stage_history: Vec::new(),
            stage_entered_at: now,
            last_error: None,
            rollback: RollbackProgress::default(),
            manual_intervention_required: false,
            config,
        }
    }

    /// A completed record describing a variant already serving production.
    pub fn adopted(service: ServiceName, stable: Variant, config: RolloutConfig) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            service,
            target_image_digest: stable.image_digest.clone(),
            created_at: now,
            updated_at: now,
            status: DeploymentStatus::Completed,
            stable_variant: stable,
            candidate_variant: None,
            previous_stable: None,
            traffic_split: TrafficSplit::ALL_STABLE,
            pending_split: None,
            stage_history: vec![StageRecord {
                stage: DeploymentStatus::Completed,
                entered_at: now,
                exited_at: now,
                outcome: StageOutcome::Adopted,
                traffic: TrafficSplit::ALL_STABLE,
                cause: None,
            }],
            stage_entered_at: now,
            last_error: None,
            rollback: RollbackProgress::default(),
            manual_intervention_required: false,
            config,
        }
    }

    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    pub fn service(&self) -> &ServiceName {
        &self.service
    }

    pub fn target_image_digest(&self) -> &ImageDigest {
        &self.target_image_digest
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn stable_variant(&self) -> &Variant {
        &self.stable_variant
    }

    pub fn candidate_variant(&self) -> Option<&Variant> {
        self.candidate_variant.as_ref()
    }

    pub fn previous_stable(&self) -> Option<&Variant> {
        self.previous_stable.as_ref()
    }

    pub fn traffic_split(&self) -> TrafficSplit {
        self.traffic_split
    }

    pub fn pending_split(&self) -> Option<TrafficSplit> {
        self.pending_split
    }

    pub fn stage_history(&self) -> &[StageRecord] {
        &self.stage_history
    }

    pub fn stage_entered_at(&self) -> DateTime<Utc> {
        self.stage_entered_at
    }

    pub fn last_error(&self) -> Option<&FailureCause> {
        self.last_error.as_ref()
    }

    pub fn rollback_progress(&self) -> RollbackProgress {
        self.rollback
    }

    pub fn manual_intervention_required(&self) -> bool {
        self.manual_intervention_required
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Non-terminal and not waiting on an operator.
    pub fn is_resumable(&self) -> bool {
        !self.is_terminal() && !self.manual_intervention_required
    }
}
