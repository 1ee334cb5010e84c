// ABOUTME: Persists deployment changes and announces transitions to observers.
// ABOUTME: The store write always happens first; observers only ever see persisted state.

use std::sync::Arc;

use crate::notify::{Notifier, TransitionEvent};
use crate::store::StateStore;

use super::deployment::Deployment;
use super::error::DeployError;
use super::state::DeploymentStatus;

#[derive(Clone)]
pub(crate) struct Journal {
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
}

impl Journal {
    pub(crate) fn new(store: Arc<dyn StateStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub(crate) fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Write the record without announcing anything.
    pub(crate) fn save(&self, deployment: &Deployment) -> Result<(), DeployError> {
        self.store.put(deployment)?;
        Ok(())
    }

    /// Write the record, then announce its move from `from` into the current status.
    pub(crate) fn transition(
        &self,
        deployment: &Deployment,
        from: DeploymentStatus,
    ) -> Result<(), DeployError> {
        self.save(deployment)?;
        let to = deployment.status();
        match deployment.last_error().filter(|_| to == DeploymentStatus::RollingBack) {
            Some(cause) => tracing::warn!(
                deployment = %deployment.id(),
                service = %deployment.service(),
                from = %from,
                to = %to,
                cause = %cause.message,
                "rolling back"
            ),
            None => tracing::info!(
                deployment = %deployment.id(),
                service = %deployment.service(),
                from = %from,
                to = %to,
                traffic = %deployment.traffic_split(),
                "transition"
            ),
        }
        self.notifier.notify(&TransitionEvent::new(deployment, from));
        Ok(())
    }

    /// Announce that automated action stopped on `deployment`.
    pub(crate) fn alert(&self, deployment: &Deployment) {
        tracing::error!(
            deployment = %deployment.id(),
            service = %deployment.service(),
            traffic = %deployment.traffic_split(),
            cause = deployment.last_error().map(|c| c.message.as_str()).unwrap_or("unknown"),
            "manual intervention required"
        );
        self.notifier.notify(&TransitionEvent::alert(deployment));
    }
}
