// ABOUTME: Health gate deciding whether the candidate may be promoted.
// ABOUTME: Fails closed: any missing reading is a failing verdict, never an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{MetricsError, MetricsSource};

use super::deployment::Deployment;
use super::error::DeployError;

/// One set of readings taken for a gate evaluation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub error_rate: Option<f64>,
    pub latency_p95: Option<f64>,
    /// The stable variant's p95 over the same window; the latency baseline.
    pub stable_latency_p95: Option<f64>,
}

/// Why a sample did not pass.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    /// A reading could not be taken.
    DataUnavailable(String),
    /// A reading breached its threshold.
    Breach(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub pass: bool,
    pub sample: HealthSample,
    pub rejection: Option<GateRejection>,
}

impl GateVerdict {
    /// The error a failing verdict ends the stage with.
    pub fn into_error(self) -> Option<DeployError> {
        self.rejection.map(|r| match r {
            GateRejection::DataUnavailable(msg) => DeployError::DataUnavailable(msg),
            GateRejection::Breach(msg) => DeployError::GateFailed(msg),
        })
    }
}

#[derive(Clone)]
pub struct HealthGate {
    metrics: Arc<dyn MetricsSource>,
}

impl HealthGate {
    pub fn new(metrics: Arc<dyn MetricsSource>) -> Self {
        Self { metrics }
    }

    /// Read the candidate's error rate and p95 latency and the stable p95 over
    /// `window`, then apply the deployment's thresholds.
    pub async fn evaluate(&self, deployment: &Deployment, window: Duration) -> GateVerdict {
        let mut sample = HealthSample {
            at: Utc::now(),
            window,
            error_rate: None,
            latency_p95: None,
            stable_latency_p95: None,
        };

        let Some(candidate) = deployment.candidate_variant() else {
            return fail(sample, GateRejection::DataUnavailable("no candidate variant".to_string()));
        };
        let service = deployment.service();
        let stable = deployment.stable_variant();

        let (error_rate, latency, baseline) = tokio::join!(
            self.metrics.query_error_rate(service, candidate, window),
            self.metrics.query_latency_p95(service, candidate, window),
            self.metrics.query_latency_p95(service, stable, window),
        );
        sample.error_rate = error_rate.as_ref().ok().copied();
        sample.latency_p95 = latency.as_ref().ok().copied();
        sample.stable_latency_p95 = baseline.as_ref().ok().copied();

        let readings = match (error_rate, latency, baseline) {
            (Ok(e), Ok(l), Ok(b)) => (e, l, b),
            (e, l, b) => {
                let missing = [
                    ("candidate error rate", e.err()),
                    ("candidate p95 latency", l.err()),
                    ("stable p95 latency", b.err()),
                ]
                .into_iter()
                .filter_map(|(what, err)| err.map(|MetricsError::Unavailable(why)| format!("{what}: {why}")))
                .collect::<Vec<_>>()
                .join("; ");
                tracing::debug!(deployment = %deployment.id(), %missing, "gate sample incomplete");
                return fail(sample, GateRejection::DataUnavailable(missing));
            }
        };
        let (error_rate, latency, baseline) = readings;

        let unusable = [
            ("candidate error rate", error_rate),
            ("candidate p95 latency", latency),
            ("stable p95 latency", baseline),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_finite() || *value < 0.0)
        .map(|(what, value)| format!("{what}: unusable reading {value}"))
        .collect::<Vec<_>>();
        if !unusable.is_empty() {
            let unusable = unusable.join("; ");
            tracing::debug!(deployment = %deployment.id(), %unusable, "gate sample unusable");
            return fail(sample, GateRejection::DataUnavailable(unusable));
        }

        let config = deployment.config();
        let latency_limit = baseline * config.latency_threshold_multiplier;

        let rejection = if error_rate > config.error_rate_threshold {
            Some(format!(
                "error rate {:.2}% exceeds {:.2}%",
                error_rate * 100.0,
                config.error_rate_threshold * 100.0
            ))
        } else if latency > latency_limit {
            Some(format!(
                "p95 latency {latency:.4} exceeds {latency_limit:.4} ({}x stable {baseline:.4})",
                config.latency_threshold_multiplier
            ))
        } else {
            None
        };

        tracing::debug!(
            deployment = %deployment.id(),
            error_rate,
            latency_p95 = latency,
            stable_latency_p95 = baseline,
            pass = rejection.is_none(),
            "gate sample"
        );

        match rejection {
            Some(reason) => fail(sample, GateRejection::Breach(reason)),
            None => GateVerdict {
                pass: true,
                sample,
                rejection: None,
            },
        }
    }
}

fn fail(sample: HealthSample, rejection: GateRejection) -> GateVerdict {
    GateVerdict {
        pass: false,
        sample,
        rejection: Some(rejection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RolloutConfig;
    use crate::deploy::Variant;
    use crate::types::{Color, ImageDigest, ServiceName};
    use async_trait::async_trait;

    struct Fixed {
        error_rate: Option<f64>,
        candidate_p95: Option<f64>,
        stable_p95: Option<f64>,
    }

    fn reading(v: Option<f64>) -> Result<f64, MetricsError> {
        v.ok_or_else(|| MetricsError::Unavailable("connection refused".to_string()))
    }

    #[async_trait]
    impl MetricsSource for Fixed {
        async fn query_error_rate(
            &self,
            _: &ServiceName,
            _: &Variant,
            _: Duration,
        ) -> Result<f64, MetricsError> {
            reading(self.error_rate)
        }

        async fn query_latency_p95(
            &self,
            _: &ServiceName,
            variant: &Variant,
            _: Duration,
        ) -> Result<f64, MetricsError> {
            match variant.color {
                Color::Green => reading(self.candidate_p95),
                Color::Blue => reading(self.stable_p95),
            }
        }
    }

    fn deployment() -> Deployment {
        let stable = Variant::new(
            Color::Blue,
            ImageDigest::parse(&format!("sha256:{}", "5".repeat(64))).unwrap(),
            2,
        );
        Deployment::new(
            ServiceName::new("svc-a").unwrap(),
            ImageDigest::parse(&format!("sha256:{}", "6".repeat(64))).unwrap(),
            stable,
            RolloutConfig::default(),
        )
    }

    async fn verdict(error_rate: Option<f64>, cand: Option<f64>, stable: Option<f64>) -> GateVerdict {
        let gate = HealthGate::new(Arc::new(Fixed {
            error_rate,
            candidate_p95: cand,
            stable_p95: stable,
        }));
        gate.evaluate(&deployment(), Duration::from_secs(60)).await
    }

    #[tokio::test]
    async fn passes_within_thresholds() {
        let v = verdict(Some(0.002), Some(0.140), Some(0.100)).await;
        assert!(v.pass);
        assert_eq!(v.sample.error_rate, Some(0.002));
    }

    #[tokio::test]
    async fn error_rate_breach_fails() {
        let v = verdict(Some(0.04), Some(0.1), Some(0.1)).await;
        assert!(!v.pass);
        assert!(matches!(v.into_error(), Some(DeployError::GateFailed(_))));
    }

    #[tokio::test]
    async fn latency_is_relative_to_stable() {
        assert!(!verdict(Some(0.0), Some(0.16), Some(0.1)).await.pass);
        assert!(verdict(Some(0.0), Some(1.4), Some(1.0)).await.pass);
    }

    #[tokio::test]
    async fn missing_data_fails_closed() {
        let v = verdict(None, Some(0.1), Some(0.1)).await;
        assert!(!v.pass);
        assert!(matches!(v.into_error(), Some(DeployError::DataUnavailable(_))));

        let v = verdict(Some(0.0), Some(0.1), None).await;
        assert!(!v.pass);
    }

    #[tokio::test]
    async fn non_finite_readings_fail_closed() {
        for v in [
            verdict(Some(f64::NAN), Some(0.1), Some(0.1)).await,
            verdict(Some(0.0), Some(f64::NAN), Some(0.1)).await,
            verdict(Some(0.0), Some(0.1), Some(f64::NAN)).await,
            verdict(Some(0.0), Some(0.1), Some(f64::INFINITY)).await,
            verdict(Some(f64::NEG_INFINITY), Some(0.1), Some(0.1)).await,
            verdict(Some(-0.5), Some(0.1), Some(0.1)).await,
        ] {
            assert!(!v.pass, "{:?}", v.sample);
            assert!(matches!(v.into_error(), Some(DeployError::DataUnavailable(_))));
        }
    }
}
