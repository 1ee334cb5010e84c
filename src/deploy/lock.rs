// ABOUTME: Per-service lock guaranteeing at most one active rollout per service.
// ABOUTME: Lock records live in the state store; locks whose holder has finished are broken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StateStore;
use crate::types::{DeploymentId, ServiceName};

use super::deployment::Deployment;
use super::error::{DeployError, LockHolderInfo};

/// Information about who holds a service lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Deployment the lock was taken for.
    pub deployment_id: DeploymentId,
    /// Service being rolled out.
    pub service: ServiceName,
    /// Hostname of the machine that took the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
}

impl LockInfo {
    /// Lock info for `deployment`, held by the current process.
    pub fn new(deployment: &Deployment) -> Self {
        Self {
            deployment_id: deployment.id().clone(),
            service: deployment.service().clone(),
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }

    fn holder_info(&self) -> LockHolderInfo {
        LockHolderInfo {
            deployment: self.deployment_id.clone(),
            holder: self.holder.clone(),
            pid: self.pid,
            started_at: self.started_at,
        }
    }
}

/// Take the service lock for `deployment`.
///
/// Re-acquiring a lock the deployment already holds succeeds, so a resumed
/// rollout can call this unconditionally. A lock whose holder record is
/// terminal, or missing past a short grace period, is stale and gets broken
/// with a warning.
pub fn acquire(store: &dyn StateStore, deployment: &Deployment) -> Result<(), DeployError> {
    let info = LockInfo::new(deployment);

    let Some(existing) = store.try_lock(&info)? else {
        tracing::debug!(service = %info.service, deployment = %info.deployment_id, "service lock acquired");
        return Ok(());
    };

    if existing.deployment_id == info.deployment_id {
        return Ok(());
    }

    if !is_stale(store, &existing)? {
        return Err(DeployError::LockHeld {
            service: info.service,
            holder: existing.holder_info(),
        });
    }

    tracing::warn!(
        service = %existing.service,
        holder = %existing.holder,
        pid = existing.pid,
        since = %existing.started_at,
        deployment = %existing.deployment_id,
        "breaking stale lock"
    );
    store.break_lock(&existing.service)?;

    match store.try_lock(&info)? {
        None => Ok(()),
        Some(raced) => Err(DeployError::LockHeld {
            service: info.service,
            holder: raced.holder_info(),
        }),
    }
}

/// Release the service lock if `deployment` holds it.
pub fn release(store: &dyn StateStore, deployment: &Deployment) -> Result<(), DeployError> {
    if store.release_lock(deployment.service(), deployment.id())? {
        tracing::debug!(service = %deployment.service(), deployment = %deployment.id(), "service lock released");
    }
    Ok(())
}

/// A lock is taken just before its deployment is first written; give the
/// holder this long to appear before treating a missing record as stale.
const MISSING_HOLDER_GRACE_SECS: i64 = 60;

fn is_stale(store: &dyn StateStore, lock: &LockInfo) -> Result<bool, DeployError> {
    Ok(match store.get(&lock.deployment_id)? {
        None => (Utc::now() - lock.started_at).num_seconds() > MISSING_HOLDER_GRACE_SECS,
        Some(holder) => holder.is_terminal(),
    })
}
