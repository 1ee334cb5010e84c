// ABOUTME: The state machine driving one rollout from Pending to a terminal state.
// ABOUTME: State is persisted before every externally visible action; cancellation is explicit.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::driver::{DriverError, EnvironmentDriver, Readiness};
use crate::metrics::MetricsSource;
use crate::notify::Notifier;
use crate::smoke::SmokeCheck;
use crate::store::StateStore;
use crate::types::TrafficSplit;

use super::deployment::Deployment;
use super::error::DeployError;
use super::gate::HealthGate;
use super::journal::Journal;
use super::lock;
use super::retry::retry;
use super::rollback::RollbackManager;
use super::soak::{SoakTasks, StageSignal};
use super::state::DeploymentStatus;
use super::traffic::TrafficManager;

/// The external systems a controller works against.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub driver: Arc<dyn EnvironmentDriver>,
    pub metrics: Arc<dyn MetricsSource>,
    pub smoke: Arc<dyn SmokeCheck>,
    pub notifier: Arc<dyn Notifier>,
}

/// Cancellation inputs for a running rollout.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    /// Operator abort: move to `RollingBack` as soon as possible.
    pub abort: CancellationToken,
    /// Process shutdown: stop where it is safe and leave the rollout resumable.
    pub shutdown: CancellationToken,
}

/// Result of running one stage.
enum Step {
    Advance,
    Fail(DeployError),
    Suspend,
}

#[derive(Clone)]
pub struct DeploymentController {
    deps: Collaborators,
    journal: Journal,
    traffic: TrafficManager,
    gate: HealthGate,
    rollback: RollbackManager,
}

impl DeploymentController {
    pub fn new(deps: Collaborators) -> Self {
        let journal = Journal::new(deps.store.clone(), deps.notifier.clone());
        let traffic = TrafficManager::new(deps.driver.clone(), journal.clone());
        let gate = HealthGate::new(deps.metrics.clone());
        let rollback = RollbackManager::new(deps.driver.clone(), traffic.clone(), journal.clone());
        Self {
            deps,
            journal,
            traffic,
            gate,
            rollback,
        }
    }

    /// Drive `deployment` until it is terminal, frozen, or shut down.
    ///
    /// Returns the deployment as last persisted. A non-terminal status in the
    /// `Ok` value means the run was suspended by shutdown and can be resumed.
    pub async fn run(
        &self,
        mut deployment: Deployment,
        signals: Signals,
    ) -> Result<Deployment, DeployError> {
        loop {
            if deployment.is_terminal() {
                lock::release(self.journal.store(), &deployment)?;
                return Ok(deployment);
            }

            if deployment.status() == DeploymentStatus::RollingBack {
                self.rollback.revert(&mut deployment).await?;
                continue;
            }

            let aborted = signals.abort.is_cancelled()
                || self.deps.store.abort_requested(deployment.id())?;
            let step = if aborted {
                Step::Fail(DeployError::Aborted)
            } else if signals.shutdown.is_cancelled() {
                Step::Suspend
            } else {
                self.step(&mut deployment, &signals).await
            };

            let from = deployment.status();
            match step {
                Step::Advance => {
                    deployment.advance(Utc::now())?;
                    self.journal.transition(&deployment, from)?;
                }
                Step::Fail(DeployError::Store(e)) => return Err(DeployError::Store(e)),
                Step::Fail(error) => {
                    deployment.begin_rollback(error.cause(from), Utc::now())?;
                    self.journal.transition(&deployment, from)?;
                }
                Step::Suspend => {
                    tracing::info!(
                        deployment = %deployment.id(),
                        status = %deployment.status(),
                        "rollout suspended"
                    );
                    return Ok(deployment);
                }
            }
        }
    }

    async fn step(&self, deployment: &mut Deployment, signals: &Signals) -> Step {
        let stage_started = Instant::now();
        let stage_deadline = stage_started + deployment.config().stage_timeout;

        match deployment.status() {
            DeploymentStatus::Pending => {
                cancellable(signals, async {
                    Step::from(self.apply_candidate(deployment).await)
                })
                .await
            }
            DeploymentStatus::CandidateDeploying => {
                cancellable(signals, async {
                    Step::from(self.wait_candidate_ready(deployment).await)
                })
                .await
            }
            DeploymentStatus::CandidateHealthChecking => {
                cancellable(signals, async {
                    Step::from(self.smoke_check(deployment).await)
                })
                .await
            }
            DeploymentStatus::Shifting10
            | DeploymentStatus::Shifting50
            | DeploymentStatus::Shifting100 => {
                self.shift_and_soak(deployment, signals, stage_deadline).await
            }
            DeploymentStatus::Finalizing => {
                cancellable(signals, async {
                    Step::from(self.decommission_old_stable(deployment).await)
                })
                .await
            }
            other => Step::Fail(DeployError::InvalidTransition {
                from: other,
                to: other,
            }),
        }
    }

    async fn apply_candidate(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let Some(candidate) = deployment.candidate_variant().cloned() else {
            return Err(DeployError::InvalidTransition {
                from: deployment.status(),
                to: DeploymentStatus::CandidateDeploying,
            });
        };
        let service = deployment.service().clone();
        let policy = deployment.config().driver_retry.clone();
        let (service, candidate) = (&service, &candidate);
        retry(&policy, "apply", DriverError::is_transient, move || {
            self.deps.driver.apply(service, candidate)
        })
        .await?;
        Ok(())
    }

    async fn wait_candidate_ready(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let Some(candidate) = deployment.candidate_variant().cloned() else {
            return Err(DeployError::InvalidTransition {
                from: deployment.status(),
                to: DeploymentStatus::CandidateHealthChecking,
            });
        };
        let timeout = deployment.config().ready_timeout;
        match self
            .deps
            .driver
            .wait_ready(deployment.service(), &candidate, timeout)
            .await?
        {
            Readiness::Ready => {
                if let Some(c) = deployment.candidate_variant.as_mut() {
                    c.ready_at = Some(Utc::now());
                }
                Ok(())
            }
            Readiness::TimedOut => Err(DeployError::ReadinessTimeout(timeout)),
        }
    }

    async fn smoke_check(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let Some(candidate) = deployment.candidate_variant() else {
            return Err(DeployError::SmokeCheckFailed("no candidate variant".to_string()));
        };
        self.deps
            .smoke
            .check(deployment.service(), candidate)
            .await
            .map_err(|e| DeployError::SmokeCheckFailed(e.to_string()))
    }

    async fn decommission_old_stable(&self, deployment: &mut Deployment) -> Result<(), DeployError> {
        let stable = deployment.stable_variant().clone();
        let service = deployment.service().clone();
        let policy = deployment.config().driver_retry.clone();
        let (service_ref, stable_ref) = (&service, &stable);
        retry(&policy, "decommission", DriverError::is_transient, move || {
            self.deps.driver.decommission(service_ref, stable_ref)
        })
        .await?;
        deployment.stable_variant.decommissioned_at = Some(Utc::now());
        Ok(())
    }

    /// Apply the stage's split, then soak until enough consecutive passes.
    async fn shift_and_soak(
        &self,
        deployment: &mut Deployment,
        signals: &Signals,
        stage_deadline: Instant,
    ) -> Step {
        let stage = deployment.status();
        let Some(weight) = stage.target_weight() else {
            return Step::Fail(DeployError::InvalidTransition {
                from: stage,
                to: stage,
            });
        };
        let config = deployment.config().clone();

        // Traffic changes are never interrupted by shutdown mid-call; abort still wins.
        let shifted = tokio::select! {
            biased;
            _ = signals.abort.cancelled() => Err(DeployError::Aborted),
            _ = tokio::time::sleep_until(stage_deadline) => Err(DeployError::StageTimeout {
                stage,
                after: config.stage_timeout,
            }),
            result = self.traffic.apply(deployment, TrafficSplit::candidate_percent(weight)) => result,
        };
        if let Err(e) = shifted {
            return Step::Fail(e);
        }
        if signals.shutdown.is_cancelled() {
            return Step::Suspend;
        }

        let mut tasks = SoakTasks::spawn(
            self.gate.clone(),
            deployment.clone(),
            config.metrics_window,
            config.poll_interval,
            Instant::now() + config.soak_window,
            stage_deadline,
        );

        let required = config.consecutive_passes_required;
        let mut passes = 0u32;
        loop {
            let signal = tokio::select! {
                biased;
                _ = signals.abort.cancelled() => return Step::Fail(DeployError::Aborted),
                _ = signals.shutdown.cancelled() => return Step::Suspend,
                signal = tasks.recv() => signal,
            };
            match signal {
                Some(StageSignal::Sample(verdict)) if verdict.pass => {
                    passes += 1;
                    tracing::debug!(
                        deployment = %deployment.id(),
                        stage = %stage,
                        passes,
                        required,
                        "gate passed"
                    );
                    if passes >= required {
                        return Step::Advance;
                    }
                }
                Some(StageSignal::Sample(verdict)) => {
                    let error = verdict
                        .into_error()
                        .unwrap_or_else(|| DeployError::GateFailed("gate failed".to_string()));
                    return Step::Fail(error);
                }
                Some(StageSignal::StageTimeout) | None => {
                    return Step::Fail(DeployError::StageTimeout {
                        stage,
                        after: config.stage_timeout,
                    });
                }
                Some(StageSignal::SoakExpired) => {
                    return Step::Fail(DeployError::SoakExpired {
                        stage,
                        passes,
                        required,
                    });
                }
            }
        }
    }
}

impl From<Result<(), DeployError>> for Step {
    fn from(result: Result<(), DeployError>) -> Self {
        match result {
            Ok(()) => Step::Advance,
            Err(e) => Step::Fail(e),
        }
    }
}

/// Run `work` unless a signal fires first. Work is dropped on cancellation;
/// everything it depends on was persisted before it started.
async fn cancellable(signals: &Signals, work: impl Future<Output = Step>) -> Step {
    tokio::select! {
        biased;
        _ = signals.abort.cancelled() => Step::Fail(DeployError::Aborted),
        _ = signals.shutdown.cancelled() => Step::Suspend,
        step = work => step,
    }
}
