// ABOUTME: Error types for rollout operations.
// ABOUTME: Every error maps onto one DeployErrorKind so causes can be persisted and matched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ValidationError;
use crate::driver::DriverError;
use crate::store::StoreError;
use crate::types::{DeploymentId, ServiceName};

use super::deployment::FailureCause;
use super::state::DeploymentStatus;
use super::traffic::TrafficError;

/// Error classification for programmatic handling and for persisted failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployErrorKind {
    /// Bad input; never retried.
    Validation,
    /// Network or timeout trouble talking to the driver; retried with backoff.
    TransientDriver,
    /// Driver refused the operation for good.
    PermanentDriver,
    /// Metrics or smoke check breached a threshold.
    GateFailure,
    /// Metrics could not be read; handled like a gate failure.
    DataUnavailable,
    /// A rollback step ran out of attempts.
    RollbackFailure,
    /// Another rollout of the service is active.
    Conflict,
    NotFound,
    InvalidTransition,
    Store,
    /// Operator asked for the rollout to stop.
    Aborted,
    /// A wait or stage ran past its deadline.
    StageTimeout,
    /// Automated action is frozen until an operator steps in.
    ManualIntervention,
}

impl DeployErrorKind {
    /// Whether local retry is allowed.
    pub fn is_transient(self) -> bool {
        self == DeployErrorKind::TransientDriver
    }
}

/// Who holds a service lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolderInfo {
    pub deployment: DeploymentId,
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Errors that can occur while starting, running or rolling back a deployment.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No stable variant is known for the service.
    #[error("no stable variant recorded for service {0}; adopt the running version first")]
    NoStableVariant(ServiceName),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("traffic shift failed: {0}")]
    Traffic(#[from] TrafficError),

    /// Candidate replicas did not become ready in time.
    #[error("candidate not ready after {}", humantime::format_duration(*.0))]
    ReadinessTimeout(Duration),

    #[error("smoke check failed: {0}")]
    SmokeCheckFailed(String),

    #[error("health gate failed: {0}")]
    GateFailed(String),

    #[error("metrics unavailable: {0}")]
    DataUnavailable(String),

    /// Soak window ended before enough consecutive passes.
    #[error("soak window expired at {stage} after {passes}/{required} consecutive passes")]
    SoakExpired {
        stage: DeploymentStatus,
        passes: u32,
        required: u32,
    },

    #[error("stage {stage} exceeded its timeout of {}", humantime::format_duration(*.after))]
    StageTimeout {
        stage: DeploymentStatus,
        after: Duration,
    },

    #[error("deployment aborted by operator")]
    Aborted,

    #[error("service {service} already has an active deployment {active} in {status}")]
    Conflict {
        service: ServiceName,
        active: DeploymentId,
        status: DeploymentStatus,
    },

    #[error("service {service} is locked by deployment {} (held by {} pid {} since {})", .holder.deployment, .holder.holder, .holder.pid, .holder.started_at)]
    LockHeld {
        service: ServiceName,
        holder: LockHolderInfo,
    },

    #[error("deployment not found: {0}")]
    NotFound(DeploymentId),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("deployment {id} is already {status}")]
    AlreadyTerminal {
        id: DeploymentId,
        status: DeploymentStatus,
    },

    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    #[error("deployment {id} requires manual intervention: {message}")]
    ManualInterventionRequired { id: DeploymentId, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DeployError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> DeployErrorKind {
        use DeployErrorKind as K;
        match self {
            DeployError::Validation(_) | DeployError::NoStableVariant(_) => K::Validation,
            DeployError::Driver(e) => e.kind(),
            DeployError::Traffic(e) => e.kind(),
            DeployError::ReadinessTimeout(_)
            | DeployError::SoakExpired { .. }
            | DeployError::StageTimeout { .. } => K::StageTimeout,
            DeployError::SmokeCheckFailed(_) | DeployError::GateFailed(_) => K::GateFailure,
            DeployError::DataUnavailable(_) => K::DataUnavailable,
            DeployError::Aborted => K::Aborted,
            DeployError::Conflict { .. } | DeployError::LockHeld { .. } => K::Conflict,
            DeployError::NotFound(_) => K::NotFound,
            DeployError::InvalidTransition { .. } | DeployError::AlreadyTerminal { .. } => {
                K::InvalidTransition
            }
            DeployError::RollbackFailed(_) => K::RollbackFailure,
            DeployError::ManualInterventionRequired { .. } => K::ManualIntervention,
            DeployError::Store(_) => K::Store,
        }
    }

    /// Returns lock holder details if this is a lock conflict.
    pub fn lock_holder_info(&self) -> Option<&LockHolderInfo> {
        match self {
            DeployError::LockHeld { holder, .. } => Some(holder),
            _ => None,
        }
    }

    /// Persistable cause for a failure that ended `stage`.
    pub fn cause(&self, stage: DeploymentStatus) -> FailureCause {
        FailureCause {
            kind: self.kind(),
            stage,
            message: self.to_string(),
            at: Utc::now(),
        }
    }
}
