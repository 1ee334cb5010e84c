// ABOUTME: Synthetic smoke check run against a variant's direct address.
// ABOUTME: Bypasses the traffic split so the candidate is checked before it takes real traffic.

mod http_check;

pub use http_check::HttpSmokeCheck;

use async_trait::async_trait;
use thiserror::Error;

use crate::deploy::Variant;
use crate::types::ServiceName;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SmokeError {
    /// An assertion did not hold.
    #[error("{check}: {reason}")]
    AssertionFailed { check: String, reason: String },

    /// The variant could not be reached at all.
    #[error("{check}: {reason}")]
    Unreachable { check: String, reason: String },
}

#[async_trait]
pub trait SmokeCheck: Send + Sync {
    /// Run every assertion in order, stopping at the first failure.
    async fn check(&self, service: &ServiceName, variant: &Variant) -> Result<(), SmokeError>;
}
