// ABOUTME: Minimal HTTP/1.1 client over a plain TCP connection.
// ABOUTME: Shared by the Prometheus metrics source and the HTTP smoke check.

use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: &'static str },

    #[error("failed to connect to {authority}: {source}")]
    Connect {
        authority: String,
        source: std::io::Error,
    },

    #[error("request to {url} timed out after {}", humantime::format_duration(*.after))]
    Timeout { url: String, after: Duration },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// A parsed `http://host[:port][/base]` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget {
    authority: String,
    host: String,
    port: u16,
    base_path: String,
}

impl HttpTarget {
    pub fn parse(url: &str) -> Result<Self, HttpError> {
        let invalid = |reason| HttpError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let rest = match url.split_once("://") {
            Some(("http", rest)) => rest,
            Some(("https", _)) => return Err(invalid("https is not supported")),
            Some(_) => return Err(invalid("unsupported scheme")),
            None => return Err(invalid("missing scheme")),
        };
        let (authority, base_path) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].trim_end_matches('/')),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            ),
            None => (authority, 80),
        };
        Ok(Self {
            authority: authority.to_string(),
            host: host.to_string(),
            port,
            base_path: base_path.to_string(),
        })
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}{}", self.authority, self.base_path, path_and_query)
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Send one request and read the whole response body.
///
/// `path_and_query` is appended to the target's base path.
pub async fn send(
    target: &HttpTarget,
    method: &str,
    path_and_query: &str,
    timeout: Duration,
) -> Result<HttpResponse, HttpError> {
    let url = target.url(path_and_query);
    match tokio::time::timeout(timeout, send_inner(target, method, path_and_query, &url)).await {
        Ok(result) => result,
        Err(_) => Err(HttpError::Timeout {
            url,
            after: timeout,
        }),
    }
}

async fn send_inner(
    target: &HttpTarget,
    method: &str,
    path_and_query: &str,
    url: &str,
) -> Result<HttpResponse, HttpError> {
    let request_failed = |message: String| HttpError::Request {
        url: url.to_string(),
        message,
    };

    let stream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|source| HttpError::Connect {
            authority: target.authority.clone(),
            source,
        })?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| request_failed(format!("HTTP handshake failed: {e}")))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("http connection error: {}", e);
        }
    });

    let req = hyper::Request::builder()
        .method(method)
        .uri(format!("{}{}", target.base_path, path_and_query))
        .header("Host", &target.authority)
        .header("User-Agent", concat!("pdo/", env!("CARGO_PKG_VERSION")))
        .body(Full::new(bytes::Bytes::new()))
        .map_err(|e| request_failed(format!("failed to build request: {e}")))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| request_failed(e.to_string()))?;

    let status = resp.status().as_u16();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| request_failed(format!("failed to read response: {e}")))?
        .to_bytes();

    Ok(HttpResponse {
        status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_base() {
        let t = HttpTarget::parse("http://prom.internal:9090/prometheus/").unwrap();
        assert_eq!(t.host, "prom.internal");
        assert_eq!(t.port, 9090);
        assert_eq!(t.base_path, "/prometheus");
        assert_eq!(t.url("/api/v1/query"), "http://prom.internal:9090/prometheus/api/v1/query");
    }

    #[test]
    fn default_port_is_80() {
        let t = HttpTarget::parse("http://svc-green").unwrap();
        assert_eq!(t.port, 80);
        assert_eq!(t.base_path, "");
    }

    #[test]
    fn rejects_https_and_garbage() {
        assert!(HttpTarget::parse("https://example.com").is_err());
        assert!(HttpTarget::parse("example.com").is_err());
        assert!(HttpTarget::parse("http://host:notaport").is_err());
    }
}
