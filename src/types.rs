//! Core data model shared across the reconciliation pipeline.
//!
//! `CallRecord` is a per-pass view, rebuilt on every reconciliation from the
//! provider snapshot plus the latest overlay rows. `OverlayRow` (in
//! `overlay.rs`) is the only durable entity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Appointment lifecycle status carried by an overlay row.
///
/// `Scheduled` and `Rejected` are terminal for automatic extraction: a
/// record carrying either is never re-offered to the extraction service,
/// so a human accept/reject decision is not overwritten. `Completed` is
/// only ever set by an edit path outside this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    #[default]
    Unset,
    InProcess,
    Scheduled,
    Rejected,
    Completed,
}

impl AppointmentStatus {
    /// Stable string form used in the overlay store and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Unset => "unset",
            AppointmentStatus::InProcess => "in-process",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Completed => "completed",
        }
    }

    /// Parse the stored string form. Unknown values fall back to `Unset`
    /// so a newer schema never wedges an older reader.
    pub fn parse(s: &str) -> Self {
        match s {
            "in-process" => AppointmentStatus::InProcess,
            "scheduled" => AppointmentStatus::Scheduled,
            "rejected" => AppointmentStatus::Rejected,
            "completed" => AppointmentStatus::Completed,
            _ => AppointmentStatus::Unset,
        }
    }

    /// Whether a record with this status may still be offered for automatic
    /// extraction. Keyed off status, not field nullness: a rejected record
    /// has its date/time cleared, and must stay excluded regardless.
    pub fn accepts_auto_extraction(&self) -> bool {
        !matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Rejected
        )
    }
}

/// Unified call record: one provider record merged with its overlay row.
///
/// Non-overlay fields (status, timestamps, transcript, recording) always
/// come from the provider. Overlay-writable fields come from the overlay
/// row when non-empty there, otherwise from the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: String,
    pub agent_id: String,
    /// Provider call status, opaque to this core.
    pub status: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    pub from_number: Option<String>,
    pub appointment_status: AppointmentStatus,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub client_name: Option<String>,
    pub client_address: Option<String>,
    pub client_email: Option<String>,
    pub notes: Option<String>,
    /// Present once the overlay store has a row for this call.
    pub overlay_row_id: Option<String>,
    /// Version of the overlay row this view was built from. Writers pass it
    /// back as the basis for guarded upserts.
    pub overlay_version: Option<i64>,
    /// True once extraction has been attempted for this call in the current
    /// session, whether or not it produced a result.
    pub processed: bool,
}

/// Structured guess returned by the extraction service for one transcript.
///
/// Never persisted as-is; qualifying fields are folded into an overlay row.
/// The all-`None` default doubles as the null result the client returns for
/// short transcripts and remote failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    #[serde(default)]
    pub appointment_date: Option<String>,
    #[serde(default)]
    pub appointment_time: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_address: Option<String>,
    #[serde(default)]
    pub client_email: Option<String>,
    /// 0-100. Gates notification, not persistence.
    #[serde(default)]
    pub confidence: i64,
    #[serde(default)]
    pub suggested_response: Option<String>,
}

impl ExtractionResult {
    /// Whether the result carries anything worth persisting: a non-empty
    /// date, time, or email.
    pub fn has_appointment_signal(&self) -> bool {
        non_empty(&self.appointment_date).is_some()
            || non_empty(&self.appointment_time).is_some()
            || non_empty(&self.client_email).is_some()
    }
}

/// Treat `None` and whitespace-only strings the same way.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn default_min_refresh_interval() -> u64 {
    30
}

fn default_call_fetch_limit() -> u32 {
    100
}

/// Configuration loaded from `~/.calldesk/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the external call provider, without a trailing slash.
    pub provider_base_url: String,
    pub provider_api_key: String,
    /// Endpoint of the appointment extraction service.
    pub extraction_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_api_key: Option<String>,
    /// Override for the overlay database path. Defaults to
    /// `~/.calldesk/overlay.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Minimum seconds between refresh passes. A refresh arriving inside
    /// the window is a no-op, not queued.
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval_secs: u64,
    /// Max records requested from the provider per fetch.
    #[serde(default = "default_call_fetch_limit")]
    pub call_fetch_limit: u32,
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

/// Check if a feature is enabled. An explicit config value takes priority;
/// everything defaults on.
pub fn is_feature_enabled(config: &Config, feature: &str) -> bool {
    config.features.get(feature).copied().unwrap_or(true)
}
