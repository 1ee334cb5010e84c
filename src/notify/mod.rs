// ABOUTME: Fire-and-forget observers receiving one event per deployment state transition.
// ABOUTME: Notifiers never block or fail the controller; delivery problems are only logged.

mod hook;

pub use hook::{HookNotifier, HookPoint};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::deploy::{Deployment, DeploymentStatus, FailureCause};
use crate::types::{DeploymentId, ServiceName, TrafficSplit};

/// How loudly an event should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    /// Automated action stopped; someone has to look.
    Alert,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionEvent {
    pub deployment_id: DeploymentId,
    pub service: ServiceName,
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
    pub at: DateTime<Utc>,
    pub traffic_split: TrafficSplit,
    pub cause: Option<FailureCause>,
    pub severity: Severity,
}

impl TransitionEvent {
    /// Event describing `deployment`'s move from `from` into its current status.
    pub fn new(deployment: &Deployment, from: DeploymentStatus) -> Self {
        let failing = deployment.status() == DeploymentStatus::RollingBack
            || deployment.status() == DeploymentStatus::RolledBack;
        Self {
            deployment_id: deployment.id().clone(),
            service: deployment.service().clone(),
            from,
            to: deployment.status(),
            at: deployment.updated_at(),
            traffic_split: deployment.traffic_split(),
            cause: failing.then(|| deployment.last_error().cloned()).flatten(),
            severity: Severity::Info,
        }
    }

    /// Alert that `deployment` is frozen awaiting an operator.
    pub fn alert(deployment: &Deployment) -> Self {
        Self {
            from: deployment.status(),
            cause: deployment.last_error().cloned(),
            severity: Severity::Alert,
            ..Self::new(deployment, deployment.status())
        }
    }
}

/// Observer of state transitions.
pub trait Notifier: Send + Sync {
    /// Deliver `event`. Must return promptly and must not panic.
    fn notify(&self, event: &TransitionEvent);
}

/// Writes every event to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &TransitionEvent) {
        match event.severity {
            Severity::Info => tracing::info!(
                deployment = %event.deployment_id,
                service = %event.service,
                from = %event.from,
                to = %event.to,
                traffic = %event.traffic_split,
                "deployment transition"
            ),
            Severity::Alert => tracing::error!(
                deployment = %event.deployment_id,
                service = %event.service,
                status = %event.to,
                traffic = %event.traffic_split,
                cause = event.cause.as_ref().map(|c| c.message.as_str()).unwrap_or("unknown"),
                "deployment requires manual intervention"
            ),
        }
    }
}

/// Forwards events into an unbounded channel, e.g. for a CLI progress display.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<TransitionEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: &TransitionEvent) {
        // Receiver gone means nobody is watching
        let _ = self.tx.send(event.clone());
    }
}

/// Fan-out to several notifiers.
#[derive(Clone, Default)]
pub struct Notifiers {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Notifier + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for Notifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifiers")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Notifier for Notifiers {
    fn notify(&self, event: &TransitionEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}
