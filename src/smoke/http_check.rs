// ABOUTME: Smoke check issuing HTTP requests and asserting on status and body.
// ABOUTME: The base URL is templated per variant with {service} and {color}.

use async_trait::async_trait;

use crate::config::{SmokeAssertion, SmokeConfig};
use crate::deploy::Variant;
use crate::http::{self, HttpTarget};
use crate::types::ServiceName;

use super::{SmokeCheck, SmokeError};

#[derive(Debug, Clone)]
pub struct HttpSmokeCheck {
    config: SmokeConfig,
}

impl HttpSmokeCheck {
    pub fn new(config: SmokeConfig) -> Self {
        Self { config }
    }

    fn base_url(&self, service: &ServiceName, variant: &Variant) -> String {
        self.config
            .base_url
            .replace("{service}", service.as_str())
            .replace("{color}", variant.color.as_str())
    }
}

fn label(assertion: &SmokeAssertion) -> String {
    format!("{} {}", assertion.method, assertion.path)
}

#[async_trait]
impl SmokeCheck for HttpSmokeCheck {
    async fn check(&self, service: &ServiceName, variant: &Variant) -> Result<(), SmokeError> {
        let base = self.base_url(service, variant);
        let target = HttpTarget::parse(&base).map_err(|e| SmokeError::Unreachable {
            check: base.clone(),
            reason: e.to_string(),
        })?;

        for assertion in self.config.checks.iter() {
            let check = label(assertion);
            let resp = http::send(
                &target,
                &assertion.method,
                &assertion.path,
                self.config.request_timeout,
            )
            .await
            .map_err(|e| SmokeError::Unreachable {
                check: check.clone(),
                reason: e.to_string(),
            })?;

            if resp.status != assertion.expect_status {
                return Err(SmokeError::AssertionFailed {
                    check,
                    reason: format!(
                        "expected status {}, got {}",
                        assertion.expect_status, resp.status
                    ),
                });
            }
            if let Some(needle) = &assertion.body_contains
                && !resp.body.contains(needle.as_str())
            {
                return Err(SmokeError::AssertionFailed {
                    check,
                    reason: format!("body does not contain {needle:?}"),
                });
            }
            tracing::debug!(color = %variant.color, check = %check, "smoke assertion passed");
        }
        Ok(())
    }
}
