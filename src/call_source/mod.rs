//! External call provider client.
//!
//! Read-only access to the third-party call-center API via direct HTTP.
//! The provider is authoritative for which calls exist and for raw call
//! data (status, timestamps, transcript, recording); nothing here writes
//! back to it.
//!
//! Modules:
//! - client: call list fetching and normalization

pub mod client;

pub use client::{parse_call_datetime, CallSource, CallSourceClient, ProviderCall};

use std::time::Duration;

/// Errors from the call provider boundary. Non-2xx responses are fatal for
/// the current reconciliation pass; `send_with_retry` only absorbs bounded
/// transient failures before one surfaces.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("API key rejected")]
    AuthRejected,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt: doubles per attempt up to the cap,
    /// plus sub-second jitter so parallel sessions don't sync up.
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let doubled = self.initial_backoff.saturating_mul(1 << shift);
        doubled.min(self.max_backoff) + Duration::from_millis(jitter_ms())
    }
}

fn jitter_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_millis()) % 150)
        .unwrap_or(0)
}

/// 429, 408, and 5xx are worth another attempt; every other status is
/// final.
fn is_transient(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Delay-seconds form of Retry-After, capped so a hostile value cannot
/// park the pass for minutes. The HTTP-date form is ignored.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(secs.min(30)))
}

/// Send a request, retrying transient failures with exponential backoff.
/// Retry-After is honored when the provider sends it. Retries are bounded
/// by the policy; once exhausted, the last response or error surfaces to
/// the caller, which treats it as fatal for the pass.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, SourceError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let this_try = match request.try_clone() {
            Some(r) => r,
            // Streaming bodies can't be cloned; send the original once
            None => return request.send().await.map_err(SourceError::Http),
        };

        let last = attempt >= attempts;
        match this_try.send().await {
            Ok(response) if is_transient(response.status()) && !last => {
                let wait =
                    retry_after(response.headers()).unwrap_or_else(|| policy.backoff(attempt));
                log::warn!(
                    "CallSource: status {} on attempt {attempt}/{attempts}, retrying in {wait:?}",
                    response.status()
                );
                tokio::time::sleep(wait).await;
            }
            Ok(response) => return Ok(response),
            Err(e) if !last && (e.is_timeout() || e.is_connect()) => {
                let wait = policy.backoff(attempt);
                log::warn!(
                    "CallSource: {e} on attempt {attempt}/{attempts}, retrying in {wait:?}"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => return Err(SourceError::Http(e)),
        }
    }
}
