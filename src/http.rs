//! Shared HTTP plumbing: client construction and bounded retry.
//!
//! Retry strategy (idempotent requests only):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → return immediately
//! - Connect/timeout errors → retry
//! - Backoff: base, 2×base, 4×base, … (capped at 2^5 × base)
//!
//! Mutations (S3 PUT/COPY, GraphQL mutations) must call `send()` directly.

use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::config::HttpConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Build the shared `reqwest` client with the configured timeout.
pub fn build_client(config: &HttpConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Send an idempotent request, rebuilding it for each attempt.
///
/// The builder closure runs once per attempt so that time-dependent
/// signatures are fresh. After the last attempt the final response or
/// error is returned as-is, including retryable statuses.
pub async fn send_idempotent<F>(
    policy: &RetryPolicy,
    label: &str,
    mut build: F,
) -> reqwest::Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let result = build().send().await;
        let retryable = match &result {
            Ok(resp) => is_retryable_status(resp.status()),
            Err(e) => is_retryable_error(e),
        };
        if !retryable || attempt >= policy.max_retries {
            return result;
        }
        attempt += 1;
        let delay = policy.delay(attempt);
        match &result {
            Ok(resp) => tracing::warn!(
                request = label,
                status = resp.status().as_u16(),
                attempt,
                ?delay,
                "retrying"
            ),
            Err(e) => tracing::warn!(request = label, error = %e, attempt, ?delay, "retrying"),
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
        assert_eq!(p.delay(9), Duration::from_millis(3200));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
