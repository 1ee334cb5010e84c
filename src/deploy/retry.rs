// ABOUTME: Bounded exponential-backoff retry for async operations.
// ABOUTME: The caller decides which errors are worth another attempt.

use std::fmt::Display;
use std::future::Future;

use crate::config::RetryPolicy;

/// Run `call` until it succeeds, returns an error `should_retry` rejects, or
/// `policy.max_attempts` attempts have been made.
pub(crate) async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && should_retry(&e) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "attempt failed, retrying in {}",
                    humantime::format_duration(delay)
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
