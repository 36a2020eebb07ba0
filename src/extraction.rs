//! Appointment extraction service client.
//!
//! Single request/response against the natural-language extraction service:
//! transcript in, structured appointment/contact guess out. The call is
//! total from the caller's perspective. Transcripts too short to carry an
//! appointment are short-circuited locally, and remote failures map to the
//! null default result instead of propagating, so the orchestrator never
//! needs an error path per record.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::types::ExtractionResult;

/// Transcripts shorter than this never reach the remote service; there is
/// nothing to extract from a hangup or a wrong number.
pub const MIN_TRANSCRIPT_CHARS: usize = 50;

/// Extraction seam. The production implementation is `ExtractionClient`;
/// tests substitute a scripted extractor.
#[async_trait::async_trait]
pub trait AppointmentExtractor: Send + Sync {
    /// Extract an appointment guess from a transcript. `reference_date`
    /// anchors relative expressions ("tomorrow at 3pm") to the call's
    /// start time. Never fails; a useless input or a failed remote call
    /// yields the null default.
    async fn extract(&self, transcript: &str, reference_date: DateTime<Utc>) -> ExtractionResult;
}

/// HTTP client for the extraction service.
pub struct ExtractionClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ExtractionClient {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl AppointmentExtractor for ExtractionClient {
    async fn extract(&self, transcript: &str, reference_date: DateTime<Utc>) -> ExtractionResult {
        if transcript.trim().chars().count() < MIN_TRANSCRIPT_CHARS {
            log::debug!("Extraction: transcript too short, skipping remote call");
            return ExtractionResult::default();
        }

        let body = json!({
            "transcript": transcript,
            "referenceDate": reference_date.to_rfc3339(),
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("Extraction: request failed: {}", e);
                return ExtractionResult::default();
            }
        };

        let status = resp.status();
        if !status.is_success() {
            log::warn!("Extraction: service returned {}", status);
            return ExtractionResult::default();
        }

        match resp.json::<ExtractionResult>().await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Extraction: malformed response: {}", e);
                ExtractionResult::default()
            }
        }
    }
}
