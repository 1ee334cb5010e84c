// ABOUTME: Source of error-rate and latency readings for a variant.
// ABOUTME: A reading is either a number or unavailable; callers treat unavailable as failing.

mod prometheus;

pub use prometheus::PrometheusSource;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::deploy::Variant;
use crate::types::ServiceName;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("{0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fraction of failed requests served by `variant` over `window`.
    async fn query_error_rate(
        &self,
        service: &ServiceName,
        variant: &Variant,
        window: Duration,
    ) -> Result<f64, MetricsError>;

    /// 95th percentile request latency of `variant` over `window`.
    async fn query_latency_p95(
        &self,
        service: &ServiceName,
        variant: &Variant,
        window: Duration,
    ) -> Result<f64, MetricsError>;
}
