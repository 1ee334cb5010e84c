// ABOUTME: Immutable per-rollout settings: soak windows, gate thresholds, timeouts, retries.
// ABOUTME: Persisted inside each deployment record so a resumed rollout keeps its settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::RetryPolicy;

/// A rollout configuration that cannot work as written.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid rollout configuration: {0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// How long each traffic stage is observed before it must have passed.
    #[serde(with = "humantime_serde")]
    pub soak_window: Duration,

    /// Interval between health gate evaluations during a soak window.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Passing samples in a row needed to advance a stage.
    pub consecutive_passes_required: u32,

    /// Maximum candidate error rate as a fraction (0.01 = 1%).
    pub error_rate_threshold: f64,

    /// Candidate p95 latency may be at most this multiple of the stable p95.
    pub latency_threshold_multiplier: f64,

    /// Hard ceiling on time spent in one traffic stage, traffic shift included.
    #[serde(with = "humantime_serde")]
    pub stage_timeout: Duration,

    /// Bounded wait for all candidate replicas to report ready.
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Window passed to metric queries.
    #[serde(with = "humantime_serde")]
    pub metrics_window: Duration,

    pub driver_retry: RetryPolicy,

    /// Attempt ceiling for each rollback step.
    pub rollback_retry: RetryPolicy,

    #[serde(with = "humantime_serde")]
    pub traffic_confirm_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub traffic_confirm_interval: Duration,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            soak_window: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(30),
            consecutive_passes_required: 3,
            error_rate_threshold: 0.01,
            latency_threshold_multiplier: 1.5,
            stage_timeout: Duration::from_secs(10 * 60),
            ready_timeout: Duration::from_secs(5 * 60),
            metrics_window: Duration::from_secs(60),
            driver_retry: RetryPolicy::driver_default(),
            rollback_retry: RetryPolicy::rollback_default(),
            traffic_confirm_timeout: Duration::from_secs(60),
            traffic_confirm_interval: Duration::from_secs(2),
        }
    }
}

impl RolloutConfig {
    /// Reject settings under which a stage could never advance or a wait could never end.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fail = |msg: String| Err(ValidationError(msg));

        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return fail(format!(
                "error_rate_threshold must be a fraction between 0 and 1, got {}",
                self.error_rate_threshold
            ));
        }
        if self.latency_threshold_multiplier <= 0.0
            || !self.latency_threshold_multiplier.is_finite()
        {
            return fail(format!(
                "latency_threshold_multiplier must be positive, got {}",
                self.latency_threshold_multiplier
            ));
        }
        if self.consecutive_passes_required == 0 {
            return fail("consecutive_passes_required must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            return fail("poll_interval must be greater than zero".to_string());
        }
        let needed = self
            .poll_interval
            .saturating_mul(self.consecutive_passes_required);
        // The last pass must land strictly inside the window; a pass on the
        // deadline itself loses to the watchdog.
        if needed >= self.soak_window {
            return fail(format!(
                "{} passes every {} need {} but soak_window is only {}",
                self.consecutive_passes_required,
                humantime::format_duration(self.poll_interval),
                humantime::format_duration(needed),
                humantime::format_duration(self.soak_window)
            ));
        }
        // The stage clock also covers the traffic shift and its confirmation.
        let stage_minimum = self.soak_window.saturating_add(self.traffic_confirm_timeout);
        if self.stage_timeout <= stage_minimum {
            return fail(format!(
                "stage_timeout {} must exceed soak_window plus traffic_confirm_timeout ({})",
                humantime::format_duration(self.stage_timeout),
                humantime::format_duration(stage_minimum)
            ));
        }
        if self.ready_timeout.is_zero() {
            return fail("ready_timeout must be greater than zero".to_string());
        }
        if self.driver_retry.max_attempts == 0 || self.rollback_retry.max_attempts == 0 {
            return fail("retry policies need at least one attempt".to_string());
        }
        if self.traffic_confirm_interval.is_zero() {
            return fail("traffic_confirm_interval must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(RolloutConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_percent_style_threshold() {
        let config = RolloutConfig {
            error_rate_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_soak_window_too_short_for_required_passes() {
        let config = RolloutConfig {
            soak_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(30),
            consecutive_passes_required: 3,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("soak_window"));
    }

    #[test]
    fn rejects_stage_timeout_shorter_than_soak() {
        let config = RolloutConfig {
            stage_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_last_pass_landing_on_the_soak_deadline() {
        let config = RolloutConfig {
            soak_window: Duration::from_secs(30),
            poll_interval: Duration::from_secs(10),
            consecutive_passes_required: 3,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("soak_window"), "{err}");

        let roomy = RolloutConfig {
            soak_window: Duration::from_secs(31),
            ..config
        };
        assert_eq!(roomy.validate(), Ok(()));
    }

    #[test]
    fn stage_timeout_must_cover_shift_and_soak() {
        let config = RolloutConfig {
            stage_timeout: Duration::from_secs(5 * 60),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("traffic_confirm_timeout"), "{err}");

        let config = RolloutConfig {
            stage_timeout: Duration::from_secs(6 * 60),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RolloutConfig {
            stage_timeout: Duration::from_secs(6 * 60 + 1),
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: RolloutConfig = serde_yaml::from_str("soak_window: 2m\npoll_interval: 10s\n").unwrap();
        assert_eq!(config.soak_window, Duration::from_secs(120));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.consecutive_passes_required, 3);
    }
}
