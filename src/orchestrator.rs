// ABOUTME: Public entry point: submit, query, abort and resume rollouts.
// ABOUTME: Owns the running controller tasks and enforces one active rollout per service.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RolloutConfig;
use crate::deploy::{
    Collaborators, DeployError, Deployment, DeploymentController, DeploymentStatus, Signals,
    Variant, lock,
};
use crate::store::StateStore;
use crate::types::{Color, DeploymentId, ImageDigest, ServiceName};

/// How often a running rollout checks the store for abort requests made by other processes.
const ABORT_POLL_INTERVAL: Duration = Duration::from_secs(2);

type RunResult = Result<Deployment, DeployError>;

struct Running {
    abort: CancellationToken,
    handle: JoinHandle<RunResult>,
}

struct Inner {
    deps: Collaborators,
    controller: DeploymentController,
    running: Mutex<HashMap<DeploymentId, Running>>,
    shutdown: CancellationToken,
}

/// Runs rollouts in the background of the current tokio runtime.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(deps: Collaborators) -> Self {
        let controller = DeploymentController::new(deps.clone());
        Self {
            inner: Arc::new(Inner {
                deps,
                controller,
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Submit a rollout of `digest` for `service`.
    ///
    /// Rejected with a conflict while another rollout of the service is
    /// active. Submitting the digest that is already stable is a no-op that
    /// returns the completed deployment's id.
    pub fn start_deployment(
        &self,
        service: &ServiceName,
        digest: ImageDigest,
        config: RolloutConfig,
    ) -> Result<DeploymentId, DeployError> {
        config.validate()?;
        let store = self.inner.deps.store.as_ref();

        if let Some(active) = store.active_for_service(service)? {
            return Err(conflict(&active));
        }

        let Some(baseline) = store.latest_completed(service)? else {
            return Err(DeployError::NoStableVariant(service.clone()));
        };
        if baseline.stable_variant().image_digest.same_content(&digest) {
            tracing::info!(
                service = %service,
                digest = %digest,
                deployment = %baseline.id(),
                "digest already stable, nothing to do"
            );
            return Ok(baseline.id().clone());
        }

        let mut stable = baseline.stable_variant().clone();
        stable.decommissioned_at = None;
        let deployment = Deployment::new(service.clone(), digest, stable, config);

        lock::acquire(store, &deployment)?;
        // Re-check under the lock: a rollout may have started since the first look
        match store.active_for_service(service) {
            Ok(None) => {}
            Ok(Some(active)) => {
                release_after_failed_submit(store, &deployment);
                return Err(conflict(&active));
            }
            Err(e) => {
                release_after_failed_submit(store, &deployment);
                return Err(e.into());
            }
        }
        if let Err(e) = store.put(&deployment) {
            release_after_failed_submit(store, &deployment);
            return Err(e.into());
        }

        tracing::info!(
            deployment = %deployment.id(),
            service = %service,
            digest = %deployment.target_image_digest(),
            stable = %deployment.stable_variant().color,
            "rollout submitted"
        );
        let id = deployment.id().clone();
        self.spawn(deployment);
        Ok(id)
    }

    pub fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        self.inner
            .deps
            .store
            .get(id)?
            .ok_or_else(|| DeployError::NotFound(id.clone()))
    }

    /// Every recorded deployment, optionally for one service, oldest first.
    pub fn list_deployments(
        &self,
        service: Option<&ServiceName>,
    ) -> Result<Vec<Deployment>, DeployError> {
        let store = self.inner.deps.store.as_ref();
        Ok(match service {
            Some(service) => store.list_for_service(service)?,
            None => store.list()?,
        })
    }

    /// Request an immediate rollback of a non-terminal deployment.
    ///
    /// The request is persisted so a controller in another process picks it
    /// up, and a rollout that is not running anywhere rolls back on resume.
    pub fn abort_deployment(&self, id: &DeploymentId) -> Result<(), DeployError> {
        let deployment = self.get_deployment(id)?;
        if deployment.is_terminal() {
            return Err(DeployError::AlreadyTerminal {
                id: id.clone(),
                status: deployment.status(),
            });
        }
        self.inner.deps.store.request_abort(id)?;
        if let Some(running) = self.inner.running.lock().get(id) {
            running.abort.cancel();
        }
        tracing::warn!(deployment = %id, status = %deployment.status(), "abort requested");
        Ok(())
    }

    /// Record the variant already serving production as the service's stable baseline.
    pub fn adopt_stable(
        &self,
        service: &ServiceName,
        digest: ImageDigest,
        color: Color,
        replicas: u32,
        config: RolloutConfig,
    ) -> Result<DeploymentId, DeployError> {
        let store = self.inner.deps.store.as_ref();
        if let Some(active) = store.active_for_service(service)? {
            return Err(conflict(&active));
        }
        let mut stable = Variant::new(color, digest, replicas);
        stable.ready_at = Some(Utc::now());
        let deployment = Deployment::adopted(service.clone(), stable, config);
        store.put(&deployment)?;
        tracing::info!(
            deployment = %deployment.id(),
            service = %service,
            color = %color,
            "stable variant adopted"
        );
        Ok(deployment.id().clone())
    }

    /// Pick up every rollout left non-terminal by a previous process.
    ///
    /// Each one has its interrupted stage closed in the history and is
    /// re-entered; the stage's idempotent driver call is issued again.
    /// Frozen rollouts and rollouts locked by a live holder are skipped.
    pub fn resume_incomplete(&self) -> Result<Vec<DeploymentId>, DeployError> {
        let store = self.inner.deps.store.as_ref();
        let mut resumed = Vec::new();

        for mut deployment in store.list()? {
            if deployment.is_terminal() || self.is_running(deployment.id()) {
                continue;
            }
            if deployment.manual_intervention_required() {
                tracing::warn!(
                    deployment = %deployment.id(),
                    service = %deployment.service(),
                    "skipping frozen rollout; use retry-rollback after fixing the environment"
                );
                continue;
            }
            if let Err(e) = lock::acquire(store, &deployment) {
                tracing::warn!(deployment = %deployment.id(), error = %e, "not resuming");
                continue;
            }

            deployment.mark_interrupted(Utc::now());
            store.put(&deployment)?;
            tracing::info!(
                deployment = %deployment.id(),
                service = %deployment.service(),
                status = %deployment.status(),
                pending = ?deployment.pending_split(),
                "resuming rollout"
            );
            resumed.push(deployment.id().clone());
            self.spawn(deployment);
        }
        Ok(resumed)
    }

    /// Run the rollback of a frozen deployment again.
    pub fn retry_rollback(&self, id: &DeploymentId) -> Result<(), DeployError> {
        let mut deployment = self.get_deployment(id)?;
        if !deployment.manual_intervention_required()
            || deployment.status() != DeploymentStatus::RollingBack
        {
            return Err(DeployError::InvalidTransition {
                from: deployment.status(),
                to: DeploymentStatus::RolledBack,
            });
        }
        if self.is_running(id) {
            return Ok(());
        }
        let store = self.inner.deps.store.as_ref();
        lock::acquire(store, &deployment)?;
        deployment.unfreeze(Utc::now());
        store.put(&deployment)?;
        tracing::info!(deployment = %id, "retrying rollback");
        self.spawn(deployment);
        Ok(())
    }

    /// Delete terminal deployments last updated more than `older_than` ago.
    /// The latest completed deployment of each service is always kept.
    pub fn prune(&self, older_than: Duration) -> Result<Vec<DeploymentId>, DeployError> {
        let store = self.inner.deps.store.as_ref();
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));

        let all = store.list()?;
        let mut keep: HashMap<&ServiceName, &Deployment> = HashMap::new();
        for d in all.iter().filter(|d| d.status() == DeploymentStatus::Completed) {
            let entry = keep.entry(d.service()).or_insert(d);
            if d.updated_at() > entry.updated_at() {
                *entry = d;
            }
        }

        let mut pruned = Vec::new();
        for d in &all {
            let kept = keep.get(d.service()).is_some_and(|k| k.id() == d.id());
            let expired = cutoff.is_some_and(|cutoff| d.updated_at() < cutoff);
            if d.is_terminal() && !kept && expired {
                store.delete(d.id())?;
                pruned.push(d.id().clone());
            }
        }
        if !pruned.is_empty() {
            tracing::info!(count = pruned.len(), "pruned deployments");
        }
        Ok(pruned)
    }

    /// Whether a controller task for `id` is running in this process.
    pub fn is_running(&self, id: &DeploymentId) -> bool {
        self.inner
            .running
            .lock()
            .get(id)
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Wait for the local controller of `id` to stop, then return the deployment.
    ///
    /// Returns immediately with the stored record if nothing is running locally.
    pub async fn wait(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        let running = self.inner.running.lock().remove(id);
        match running {
            Some(running) => join(id, running.handle).await,
            None => self.get_deployment(id),
        }
    }

    /// Stop every running rollout at a safe point, leaving each resumable.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let running: Vec<_> = self.inner.running.lock().drain().collect();
        for (id, running) in running {
            match join(&id, running.handle).await {
                Ok(d) => tracing::debug!(deployment = %id, status = %d.status(), "controller stopped"),
                Err(e) => tracing::warn!(deployment = %id, error = %e, "controller stopped with error"),
            }
        }
    }

    fn spawn(&self, deployment: Deployment) {
        let id = deployment.id().clone();
        let signals = Signals {
            abort: CancellationToken::new(),
            shutdown: self.inner.shutdown.child_token(),
        };
        let done = CancellationToken::new();

        tokio::spawn(watch_abort_marker(
            self.inner.clone(),
            id.clone(),
            signals.abort.clone(),
            done.clone(),
        ));

        let controller = self.inner.controller.clone();
        let abort = signals.abort.clone();
        let handle = tokio::spawn(async move {
            let _done = done.drop_guard();
            let result = controller.run(deployment, signals).await;
            if let Err(ref e) = result {
                tracing::error!(error = %e, "rollout stopped");
            }
            result
        });

        self.inner
            .running
            .lock()
            .insert(id, Running { abort, handle });
    }
}

/// Fire `abort` when an abort marker for `id` shows up in the store.
async fn watch_abort_marker(
    inner: Arc<Inner>,
    id: DeploymentId,
    abort: CancellationToken,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval(ABORT_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = done.cancelled() => return,
            _ = abort.cancelled() => return,
            _ = ticker.tick() => match inner.deps.store.abort_requested(&id) {
                Ok(true) => {
                    abort.cancel();
                    return;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(deployment = %id, error = %e, "failed to check abort marker"),
            },
        }
    }
}

async fn join(id: &DeploymentId, handle: JoinHandle<RunResult>) -> RunResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(DeployError::ManualInterventionRequired {
            id: id.clone(),
            message: format!("controller task failed: {e}"),
        }),
    }
}

fn release_after_failed_submit(store: &dyn StateStore, deployment: &Deployment) {
    if let Err(e) = lock::release(store, deployment) {
        tracing::warn!(
            service = %deployment.service(),
            deployment = %deployment.id(),
            error = %e,
            "failed to release service lock after rejected submit; it stays held until broken"
        );
    }
}

fn conflict(active: &Deployment) -> DeployError {
    DeployError::Conflict {
        service: active.service().clone(),
        active: active.id().clone(),
        status: active.status(),
    }
}
