// ABOUTME: Prometheus metrics source settings.
// ABOUTME: PromQL templates are expanded with {service}, {color}, {digest} and {window}.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Base URL of the Prometheus HTTP API, e.g. `http://prometheus:9090`.
    pub url: String,

    /// Query returning the error rate as a fraction.
    pub error_rate_query: String,

    /// Query returning the p95 request latency (any unit, compared relatively).
    pub latency_p95_query: String,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl MetricsConfig {
    pub fn template() -> Self {
        Self {
            url: "http://prometheus:9090".to_string(),
            error_rate_query: r#"sum(rate(http_requests_total{service="{service}",color="{color}",code=~"5.."}[{window}])) / sum(rate(http_requests_total{service="{service}",color="{color}"}[{window}]))"#.to_string(),
            latency_p95_query: r#"histogram_quantile(0.95, sum by (le) (rate(http_request_duration_seconds_bucket{service="{service}",color="{color}"}[{window}])))"#.to_string(),
            request_timeout: default_request_timeout(),
        }
    }
}
