//! Shared request helper with a bounded 429 retry policy.
//!
//! Every outbound upstream call goes through [`send_with_retry`]. A 429 is
//! retried at most [`RetryConfig::max_retries`] times, waiting for the
//! server-supplied delay when one is present and for exponential backoff
//! otherwise. Once the policy is exhausted the 429 response is handed back to
//! the caller, which decides what "rate limited" means for its operation.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::retry::{RetryConfig, parse_ratelimit_reset_header, parse_retry_after_header};
use crate::time::now_ms;

/// Send a request, retrying on 429 under `policy`.
///
/// `build` is called once per attempt since a [`RequestBuilder`] is consumed
/// by `send`.
pub async fn send_with_retry<F>(
    policy: &RetryConfig,
    mut build: F,
) -> Result<Response, reqwest::Error>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        let response = build().send().await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS || attempt >= policy.max_retries {
            return Ok(response);
        }

        let delay_ms = server_delay_ms(response.headers())
            .map_or_else(|| policy.backoff_ms(attempt), |ms| ms.min(policy.max_delay_ms));
        warn!(
            url = %response.url(),
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            delay_ms,
            "rate limited by upstream, backing off"
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        attempt += 1;
    }
}

/// Delay requested by the server, if any.
fn server_delay_ms(headers: &HeaderMap) -> Option<u64> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header("retry-after")
        .and_then(parse_retry_after_header)
        .or_else(|| header("ratelimit-reset").and_then(|v| parse_ratelimit_reset_header(v, now_ms())))
}

/// Drain a failed response into `(status, body)` and log it with context.
pub async fn describe_failure(method: &str, response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    warn!(method, %url, status, %body, "upstream request failed");
    (status, body)
}

/// Whether the response is a 429.
pub fn is_rate_limited(response: &Response) -> bool {
    let limited = response.status() == StatusCode::TOO_MANY_REQUESTS;
    if limited {
        debug!(url = %response.url(), "upstream rate limit exhausted retry policy");
    }
    limited
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
