// ABOUTME: Abstraction over the environment that hosts variants and routes traffic.
// ABOUTME: Errors are classified as invalid spec, transient, or permanent for retry decisions.

mod command;

pub use command::CommandDriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::deploy::{DeployErrorKind, Variant};
use crate::types::{Color, ServiceName, TrafficSplit};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The environment rejected the variant definition itself.
    #[error("invalid variant spec: {0}")]
    InvalidSpec(String),

    /// Network trouble, throttling, or a timed out call. Safe to retry.
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl DriverError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DriverError::InvalidSpec(_) => DeployErrorKind::Validation,
            DriverError::Transient(_) => DeployErrorKind::TransientDriver,
            DriverError::Permanent(_) => DeployErrorKind::PermanentDriver,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DriverError::Transient(_))
    }
}

/// Result of waiting for a variant's replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// The two colors a traffic split is applied between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub stable: Color,
    pub candidate: Color,
}

/// Operations the orchestrator needs from the hosting environment.
///
/// Every operation must be idempotent: re-issuing the same call after a
/// crash or a lost response has the same effect as issuing it once.
#[async_trait]
pub trait EnvironmentDriver: Send + Sync {
    /// Create or update the variant's replicas.
    async fn apply(&self, service: &ServiceName, variant: &Variant) -> Result<(), DriverError>;

    /// Wait until every replica of the variant is ready, or `timeout` passes.
    async fn wait_ready(
        &self,
        service: &ServiceName,
        variant: &Variant,
        timeout: Duration,
    ) -> Result<Readiness, DriverError>;

    /// Ask the router to serve `split` between the two colors of `route`.
    async fn set_traffic_split(
        &self,
        service: &ServiceName,
        route: Route,
        split: TrafficSplit,
    ) -> Result<(), DriverError>;

    /// The split the router is actually serving right now.
    async fn active_traffic_split(
        &self,
        service: &ServiceName,
        route: Route,
    ) -> Result<TrafficSplit, DriverError>;

    /// Remove the variant. Succeeds if it is already gone.
    async fn decommission(&self, service: &ServiceName, variant: &Variant)
    -> Result<(), DriverError>;
}
