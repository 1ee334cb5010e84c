// ABOUTME: Metrics source backed by the Prometheus instant-query HTTP API.
// ABOUTME: Query templates are filled with the service, variant color, digest and window.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::MetricsConfig;
use crate::deploy::Variant;
use crate::http::{self, HttpError, HttpTarget};
use crate::types::ServiceName;

use super::{MetricsError, MetricsSource};

#[derive(Debug, Clone)]
pub struct PrometheusSource {
    target: HttpTarget,
    config: MetricsConfig,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

impl PrometheusSource {
    pub fn new(config: MetricsConfig) -> Result<Self, HttpError> {
        let target = HttpTarget::parse(&config.url)?;
        Ok(Self { target, config })
    }

    async fn query(
        &self,
        template: &str,
        service: &ServiceName,
        variant: &Variant,
        window: Duration,
    ) -> Result<f64, MetricsError> {
        let promql = render_query(template, service, variant, window);
        tracing::debug!(query = %promql, "querying prometheus");

        let path = format!("/api/v1/query?query={}", urlencoding::encode(&promql));
        let resp = http::send(&self.target, "GET", &path, self.config.request_timeout)
            .await
            .map_err(|e| MetricsError::Unavailable(e.to_string()))?;

        if !(200..300).contains(&resp.status) {
            return Err(MetricsError::Unavailable(format!(
                "prometheus returned HTTP {}",
                resp.status
            )));
        }
        parse_scalar(&resp.body)
    }
}

/// Fill `{service}`, `{color}`, `{digest}` and `{window}` placeholders.
fn render_query(template: &str, service: &ServiceName, variant: &Variant, window: Duration) -> String {
    template
        .replace("{service}", service.as_str())
        .replace("{color}", variant.color.as_str())
        .replace("{digest}", &variant.image_digest.digest())
        .replace("{window}", &format!("{}s", window.as_secs().max(1)))
}

/// Extract a single finite number from a query response.
///
/// Vector results must contain exactly one series. An empty vector, a NaN or
/// an infinite value means the data is not there.
fn parse_scalar(body: &str) -> Result<f64, MetricsError> {
    let resp: QueryResponse = serde_json::from_str(body)
        .map_err(|e| MetricsError::Unavailable(format!("malformed prometheus response: {e}")))?;

    if resp.status != "success" {
        return Err(MetricsError::Unavailable(
            resp.error.unwrap_or_else(|| format!("query status {}", resp.status)),
        ));
    }
    let data = resp
        .data
        .ok_or_else(|| MetricsError::Unavailable("response has no data".to_string()))?;

    let sample = match data.result_type.as_str() {
        "scalar" => data.result,
        "vector" => match data.result.as_array().map(Vec::as_slice) {
            Some([series]) => series.get("value").cloned().unwrap_or_default(),
            Some([]) => return Err(MetricsError::Unavailable("query returned no series".to_string())),
            Some(many) => {
                return Err(MetricsError::Unavailable(format!(
                    "query returned {} series, expected one",
                    many.len()
                )));
            }
            None => serde_json::Value::Null,
        },
        other => {
            return Err(MetricsError::Unavailable(format!(
                "unsupported result type {other}"
            )));
        }
    };

    // Samples are [timestamp, "value"]
    let value = sample
        .get(1)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| MetricsError::Unavailable("sample has no numeric value".to_string()))?;

    if !value.is_finite() {
        return Err(MetricsError::Unavailable(format!("sample value is {value}")));
    }
    Ok(value)
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query_error_rate(
        &self,
        service: &ServiceName,
        variant: &Variant,
        window: Duration,
    ) -> Result<f64, MetricsError> {
        self.query(&self.config.error_rate_query, service, variant, window)
            .await
    }

    async fn query_latency_p95(
        &self,
        service: &ServiceName,
        variant: &Variant,
        window: Duration,
    ) -> Result<f64, MetricsError> {
        self.query(&self.config.latency_p95_query, service, variant, window)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, ImageDigest};

    #[test]
    fn renders_placeholders() {
        let variant = Variant::new(
            Color::Green,
            ImageDigest::parse(&format!("sha256:{}", "e".repeat(64))).unwrap(),
            2,
        );
        let q = render_query(
            r#"rate(errors{svc="{service}",color="{color}"}[{window}])"#,
            &ServiceName::new("checkout").unwrap(),
            &variant,
            Duration::from_secs(60),
        );
        assert_eq!(q, r#"rate(errors{svc="checkout",color="green"}[60s])"#);
    }

    #[test]
    fn parses_single_series_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1700000000.1,"0.002"]}]}}"#;
        assert_eq!(parse_scalar(body).unwrap(), 0.002);
    }

    #[test]
    fn parses_scalar() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[1700000000,"0.25"]}}"#;
        assert_eq!(parse_scalar(body).unwrap(), 0.25);
    }

    #[test]
    fn empty_vector_is_unavailable() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert!(parse_scalar(body).is_err());
    }

    #[test]
    fn nan_is_unavailable() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"NaN"]}]}}"#;
        assert!(parse_scalar(body).is_err());
    }

    #[test]
    fn error_status_is_unavailable() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = parse_scalar(body).unwrap_err();
        assert_eq!(err, MetricsError::Unavailable("parse error".to_string()));
    }
}
