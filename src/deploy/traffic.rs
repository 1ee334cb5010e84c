// ABOUTME: Applies traffic splits through the driver and waits until the router confirms them.
// ABOUTME: Intent is persisted before the driver call; the confirmed split only after confirmation.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::RetryPolicy;
use crate::driver::{DriverError, EnvironmentDriver, Route};
use crate::types::{ServiceName, TrafficSplit};

use super::deployment::Deployment;
use super::error::{DeployError, DeployErrorKind};
use super::journal::Journal;
use super::retry::retry;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrafficError {
    /// Worth retrying: the router was unreachable or had not converged yet.
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl TrafficError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            TrafficError::Transient(_) => DeployErrorKind::TransientDriver,
            TrafficError::Permanent(_) => DeployErrorKind::PermanentDriver,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TrafficError::Transient(_))
    }
}

impl From<DriverError> for TrafficError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::Transient(msg) => TrafficError::Transient(msg),
            DriverError::InvalidSpec(msg) | DriverError::Permanent(msg) => {
                TrafficError::Permanent(msg)
            }
        }
    }
}

/// How hard to try before giving up on a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Persistence {
    /// Forward shifts: only transient failures are retried.
    TransientOnly,
    /// Rollback: every failure is retried up to the attempt ceiling.
    Always,
}

#[derive(Clone)]
pub struct TrafficManager {
    driver: Arc<dyn EnvironmentDriver>,
    journal: Journal,
}

impl TrafficManager {
    pub(crate) fn new(driver: Arc<dyn EnvironmentDriver>, journal: Journal) -> Self {
        Self { driver, journal }
    }

    /// Move forward to `split`. Refuses to lower the candidate's weight.
    pub async fn apply(
        &self,
        deployment: &mut Deployment,
        split: TrafficSplit,
    ) -> Result<(), DeployError> {
        let current = deployment.traffic_split();
        if split.candidate() < current.candidate() {
            return Err(TrafficError::Permanent(format!(
                "refusing to lower candidate weight from {}% to {}% outside rollback",
                current.candidate(),
                split.candidate()
            ))
            .into());
        }
        let policy = deployment.config().driver_retry.clone();
        self.push(deployment, split, &policy, Persistence::TransientOnly)
            .await
    }

    /// Send all traffic back to the stable variant.
    pub(crate) async fn revert_to_stable(
        &self,
        deployment: &mut Deployment,
        policy: &RetryPolicy,
    ) -> Result<(), DeployError> {
        self.push(deployment, TrafficSplit::ALL_STABLE, policy, Persistence::Always)
            .await
    }

    async fn push(
        &self,
        deployment: &mut Deployment,
        split: TrafficSplit,
        policy: &RetryPolicy,
        persistence: Persistence,
    ) -> Result<(), DeployError> {
        if deployment.traffic_split() == split && deployment.pending_split().is_none() {
            return Ok(());
        }

        deployment.pending_split = Some(split);
        deployment.updated_at = chrono::Utc::now();
        self.journal.save(deployment)?;

        let service = deployment.service().clone();
        let route = route_of(deployment);
        let confirm_timeout = deployment.config().traffic_confirm_timeout;
        let confirm_interval = deployment.config().traffic_confirm_interval;

        let service = &service;
        let should_retry = |e: &TrafficError| persistence == Persistence::Always || e.is_transient();
        retry(policy, "set_traffic_split", should_retry, move || {
            self.set_and_confirm(service, route, split, confirm_timeout, confirm_interval)
        })
        .await?;

        deployment.traffic_split = split;
        deployment.pending_split = None;
        deployment.updated_at = chrono::Utc::now();
        self.journal.save(deployment)?;
        tracing::debug!(
            deployment = %deployment.id(),
            traffic = %split,
            "traffic split confirmed"
        );
        Ok(())
    }

    async fn set_and_confirm(
        &self,
        service: &ServiceName,
        route: Route,
        split: TrafficSplit,
        confirm_timeout: Duration,
        confirm_interval: Duration,
    ) -> Result<(), TrafficError> {
        self.driver.set_traffic_split(service, route, split).await?;

        let deadline = Instant::now() + confirm_timeout;
        loop {
            let observed = match self.driver.active_traffic_split(service, route).await {
                Ok(active) if active == split => return Ok(()),
                Ok(active) => active.to_string(),
                Err(DriverError::Transient(msg)) => msg,
                Err(e) => return Err(e.into()),
            };
            if Instant::now() >= deadline {
                return Err(TrafficError::Transient(format!(
                    "split {split} not confirmed within {} (last observed: {observed})",
                    humantime::format_duration(confirm_timeout)
                )));
            }
            tokio::time::sleep(confirm_interval).await;
        }
    }
}

/// Colors the split is applied between.
pub(crate) fn route_of(deployment: &Deployment) -> Route {
    let stable = deployment.stable_variant().color;
    let candidate = deployment
        .candidate_variant()
        .map(|c| c.color)
        .unwrap_or_else(|| stable.opposite());
    Route { stable, candidate }
}
