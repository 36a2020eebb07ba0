//! Call list fetching and normalization.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{send_with_retry, RetryPolicy, SourceError};

// ============================================================================
// API response types (deserialized from provider JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCall {
    #[serde(default)]
    call_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    ended_at: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    recording_url: Option<String>,
    #[serde(default)]
    from_number: Option<String>,
    /// Provider-side analysis blob. Opaque to this core; kept out of the
    /// normalized record.
    #[serde(default)]
    #[allow(dead_code)]
    analysis: Option<serde_json::Value>,
}

// ============================================================================
// Public types
// ============================================================================

/// A normalized call record from the external provider. Read-only input to
/// the reconciler; carries no overlay fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCall {
    pub call_id: String,
    pub status: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    pub from_number: Option<String>,
}

/// Fetch-style seam over the provider, so the refresh pass can be exercised
/// without a live API behind it.
#[async_trait::async_trait]
pub trait CallSource: Send + Sync {
    async fn fetch_calls(&self, agent_id: &str, limit: u32)
        -> Result<Vec<ProviderCall>, SourceError>;
}

/// HTTP client for the call provider API.
pub struct CallSourceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl CallSourceClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait::async_trait]
impl CallSource for CallSourceClient {
    /// Fetch the raw call set for an agent, newest first per the provider's
    /// ordering. Records without a call id are dropped during normalization;
    /// they cannot be keyed into the overlay or the known set.
    async fn fetch_calls(
        &self,
        agent_id: &str,
        limit: u32,
    ) -> Result<Vec<ProviderCall>, SourceError> {
        let limit_str = limit.to_string();
        let request = self
            .client
            .get(format!("{}/v1/calls", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("agentId", agent_id), ("limit", limit_str.as_str())]);

        let resp = send_with_retry(request, &self.retry).await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::AuthRejected);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let raw: Vec<RawCall> = resp.json().await?;

        let mut calls = Vec::with_capacity(raw.len());
        for item in raw {
            if item.call_id.is_empty() {
                log::warn!("CallSource: dropping record without callId for agent {agent_id}");
                continue;
            }
            calls.push(ProviderCall {
                call_id: item.call_id,
                status: item.status.unwrap_or_default(),
                started_at: item.started_at,
                ended_at: item.ended_at,
                transcript: item.transcript,
                recording_url: item.recording_url,
                from_number: item.from_number,
            });
        }

        log::debug!(
            "CallSource: fetched {} calls for agent {}",
            calls.len(),
            agent_id
        );
        Ok(calls)
    }
}

/// Parse a provider timestamp to a chrono DateTime<Utc>.
///
/// Accepts RFC 3339 and bare dates (treated as midnight UTC).
pub fn parse_call_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(DateTime::from_naive_utc_and_offset(midnight, Utc))
}
