// ABOUTME: Reverts a failed rollout to the last known-good stable variant.
// ABOUTME: Each step is retried up to a ceiling and recorded, so re-running skips finished steps.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::driver::{DriverError, EnvironmentDriver, Readiness};
use crate::types::ServiceName;

use super::deployment::{Deployment, FailureCause, Variant};
use super::error::{DeployError, DeployErrorKind};
use super::journal::Journal;
use super::retry::retry;
use super::state::DeploymentStatus;
use super::traffic::TrafficManager;

#[derive(Clone)]
pub struct RollbackManager {
    driver: Arc<dyn EnvironmentDriver>,
    traffic: TrafficManager,
    journal: Journal,
}

impl RollbackManager {
    pub(crate) fn new(
        driver: Arc<dyn EnvironmentDriver>,
        traffic: TrafficManager,
        journal: Journal,
    ) -> Self {
        Self {
            driver,
            traffic,
            journal,
        }
    }

    /// Roll `deployment` back to its stable variant.
    ///
    /// Steps:
    /// 1. If the rollout failed while finalizing, re-apply the stable variant
    ///    and wait for it, since its teardown may already have started
    /// 2. Route all traffic to the stable variant
    /// 3. Decommission the candidate
    /// 4. Mark the deployment `RolledBack`
    ///
    /// Safe to call again after a partial run. If a step runs out of attempts
    /// the deployment is frozen for manual intervention and an alert is sent;
    /// traffic stays at the last confirmed split.
    pub async fn revert(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        match deployment.status() {
            DeploymentStatus::RolledBack => return Ok(()),
            DeploymentStatus::RollingBack => {}
            other => {
                return Err(DeployError::InvalidTransition {
                    from: other,
                    to: DeploymentStatus::RolledBack,
                });
            }
        }
        if deployment.manual_intervention_required() {
            return Err(DeployError::ManualInterventionRequired {
                id: deployment.id().clone(),
                message: deployment
                    .last_error()
                    .map(|c| c.message.clone())
                    .unwrap_or_else(|| "rollback previously failed".to_string()),
            });
        }

        let policy = deployment.config().rollback_retry.clone();
        let service = deployment.service().clone();

        let failed_while_finalizing = deployment
            .rollback_trigger()
            .is_some_and(|c| c.stage == DeploymentStatus::Finalizing);
        if failed_while_finalizing && !deployment.rollback.stable_reapplied {
            let stable = deployment.stable_variant().clone();
            let ready_timeout = deployment.config().ready_timeout;
            let (service, stable) = (&service, &stable);
            let result = retry(&policy, "reapply_stable", |_| true, move || {
                self.reapply(service, stable, ready_timeout)
            })
            .await;
            if let Err(e) = result {
                return Err(self.freeze(deployment, format!("failed to restore stable variant: {e}")));
            }
            deployment.stable_variant.decommissioned_at = None;
            deployment.rollback.stable_reapplied = true;
            self.journal.save(deployment)?;
        }

        if !deployment.rollback.traffic_restored {
            if let Err(e) = self.traffic.revert_to_stable(deployment, &policy).await {
                if matches!(e, DeployError::Store(_)) {
                    return Err(e);
                }
                return Err(self.freeze(deployment, format!("failed to restore traffic: {e}")));
            }
            deployment.rollback.traffic_restored = true;
            self.journal.save(deployment)?;
            tracing::info!(deployment = %deployment.id(), "traffic restored to stable");
        }

        if !deployment.rollback.candidate_decommissioned {
            if let Some(candidate) = deployment.candidate_variant().cloned() {
                let (service, candidate) = (&service, &candidate);
                let result = retry(&policy, "decommission_candidate", |_| true, move || {
                    self.driver.decommission(service, candidate)
                })
                .await;
                if let Err(e) = result {
                    return Err(self.freeze(
                        deployment,
                        format!("failed to decommission candidate: {e}"),
                    ));
                }
            }
            let now = Utc::now();
            if let Some(candidate) = deployment.candidate_variant.as_mut() {
                candidate.decommissioned_at.get_or_insert(now);
            }
            deployment.rollback.candidate_decommissioned = true;
            self.journal.save(deployment)?;
        }

        deployment.finish_rollback(Utc::now())?;
        self.journal
            .transition(deployment, DeploymentStatus::RollingBack)?;
        Ok(())
    }

    async fn reapply(
        &self,
        service: &ServiceName,
        stable: &Variant,
        ready_timeout: Duration,
    ) -> Result<(), DriverError> {
        self.driver.apply(service, stable).await?;
        match self.driver.wait_ready(service, stable, ready_timeout).await? {
            Readiness::Ready => Ok(()),
            Readiness::TimedOut => Err(DriverError::Transient(format!(
                "stable variant {} not ready after {}",
                stable.color,
                humantime::format_duration(ready_timeout)
            ))),
        }
    }

    /// Stop automated action and raise an alert. Returns the error to surface.
    fn freeze(&self, deployment: &mut Deployment, message: String) -> DeployError {
        let cause = FailureCause {
            kind: DeployErrorKind::RollbackFailure,
            stage: deployment.status(),
            message: message.clone(),
            at: Utc::now(),
        };
        deployment.freeze(cause, Utc::now());
        if let Err(e) = self.journal.save(deployment) {
            // The in-memory record is still frozen; the alert below is the last resort
            tracing::error!(deployment = %deployment.id(), error = %e, "failed to persist frozen deployment");
        }
        self.journal.alert(deployment);
        DeployError::ManualInterventionRequired {
            id: deployment.id().clone(),
            message,
        }
    }
}
