// ABOUTME: Synthetic smoke check settings.
// ABOUTME: A fixed list of HTTP request/response assertions run against the candidate directly.

use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;

use super::deserialize::deserialize_checks;

#[derive(Debug, Clone, Deserialize)]
pub struct SmokeConfig {
    /// Direct address of a variant, bypassing the traffic split.
    /// `{color}` and `{service}` are substituted.
    pub base_url: String,

    #[serde(deserialize_with = "deserialize_checks")]
    pub checks: NonEmpty<SmokeAssertion>,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmokeAssertion {
    #[serde(default = "default_method")]
    pub method: String,

    pub path: String,

    #[serde(default = "default_status")]
    pub expect_status: u16,

    #[serde(default)]
    pub body_contains: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

impl SmokeAssertion {
    /// Parse the short form `[METHOD ]/path`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let (method, path) = match s.split_once(' ') {
            Some((method, path)) => (method.to_ascii_uppercase(), path.trim()),
            None => (default_method(), s),
        };
        if !path.starts_with('/') {
            return Err(format!("smoke check path must start with '/': {path}"));
        }
        Ok(Self {
            method,
            path: path.to_string(),
            expect_status: default_status(),
            body_contains: None,
        })
    }
}

impl SmokeConfig {
    pub fn template() -> Self {
        Self {
            base_url: "http://{service}-{color}.internal:8080".to_string(),
            checks: NonEmpty::new(SmokeAssertion {
                method: default_method(),
                path: "/healthz".to_string(),
                expect_status: 200,
                body_contains: None,
            }),
            request_timeout: default_request_timeout(),
        }
    }
}
