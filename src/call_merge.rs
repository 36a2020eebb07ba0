//! Provider/overlay record merge.
//!
//! Merges the provider's call snapshot (source of truth for *which calls
//! exist* and for raw call data) with the overlay store's annotation rows,
//! matched on `call_id`. Overlay fields win whenever they are non-empty;
//! the provider's data is the fallback, never an override.

use std::collections::HashMap;

use crate::call_source::ProviderCall;
use crate::overlay::OverlayRow;
use crate::types::{non_empty, AppointmentStatus, CallRecord};

/// Merge provider calls with overlay rows into the unified record set.
///
/// Deterministic and free of I/O: the output order is the provider's order,
/// and the same inputs always yield the same records. Overlay rows with no
/// matching provider call are excluded; the unified view is provider-rooted,
/// and such rows stay in the store untouched until their call reappears.
/// `processed` is always false here; the session applies its processed set
/// after the merge.
pub fn reconcile(
    agent_id: &str,
    provider: &[ProviderCall],
    overlay: &[OverlayRow],
) -> Vec<CallRecord> {
    let mut overlay_by_call: HashMap<&str, &OverlayRow> = HashMap::new();
    for row in overlay {
        overlay_by_call.insert(row.call_id.as_str(), row);
    }

    let mut result = Vec::with_capacity(provider.len());

    for call in provider {
        let row = overlay_by_call.get(call.call_id.as_str()).copied();
        result.push(merge_one(agent_id, call, row));
    }

    result
}

fn merge_one(agent_id: &str, call: &ProviderCall, row: Option<&OverlayRow>) -> CallRecord {
    match row {
        Some(row) => CallRecord {
            call_id: call.call_id.clone(),
            agent_id: agent_id.to_string(),
            status: call.status.clone(),
            started_at: call.started_at.clone(),
            ended_at: call.ended_at.clone(),
            transcript: call.transcript.clone(),
            recording_url: call.recording_url.clone(),
            from_number: call.from_number.clone(),
            appointment_status: row.appointment_status,
            appointment_date: overlay_field(&row.appointment_date),
            appointment_time: overlay_field(&row.appointment_time),
            client_name: overlay_field(&row.client_name),
            client_address: overlay_field(&row.client_address),
            client_email: overlay_field(&row.client_email),
            notes: overlay_field(&row.notes),
            overlay_row_id: Some(row.id.clone()),
            overlay_version: Some(row.version),
            processed: false,
        },
        None => CallRecord {
            call_id: call.call_id.clone(),
            agent_id: agent_id.to_string(),
            status: call.status.clone(),
            started_at: call.started_at.clone(),
            ended_at: call.ended_at.clone(),
            transcript: call.transcript.clone(),
            recording_url: call.recording_url.clone(),
            from_number: call.from_number.clone(),
            appointment_status: AppointmentStatus::Unset,
            appointment_date: None,
            appointment_time: None,
            client_name: None,
            client_address: None,
            client_email: None,
            notes: None,
            overlay_row_id: None,
            overlay_version: None,
            processed: false,
        },
    }
}

/// An overlay field only applies when it is non-empty; a blank value in the
/// row must not mask the (absent) provider value with an empty string.
fn overlay_field(value: &Option<String>) -> Option<String> {
    non_empty(value).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_call(id: &str) -> ProviderCall {
        ProviderCall {
            call_id: id.to_string(),
            status: "ended".to_string(),
            started_at: Some("2024-03-01T10:00:00Z".to_string()),
            ended_at: Some("2024-03-01T10:04:12Z".to_string()),
            transcript: Some("Agent: hello, how can I help?".to_string()),
            recording_url: Some(format!("https://cdn.example.com/rec/{id}.mp3")),
            from_number: Some("+15550100".to_string()),
        }
    }

    fn make_row(call_id: &str) -> OverlayRow {
        OverlayRow {
            id: format!("row-{call_id}"),
            call_id: call_id.to_string(),
            agent_id: "agent-1".to_string(),
            appointment_status: AppointmentStatus::InProcess,
            appointment_date: Some("2024-03-02".to_string()),
            appointment_time: Some("15:00".to_string()),
            client_name: Some("Sam".to_string()),
            client_address: None,
            client_email: Some("sam@x.com".to_string()),
            notes: Some("call back after lunch".to_string()),
            version: 3,
            created_at: "2024-03-01T10:10:00Z".to_string(),
            updated_at: "2024-03-01T11:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_overlay_fields_win_when_present() {
        let calls = vec![make_call("c1")];
        let rows = vec![make_row("c1")];

        let unified = reconcile("agent-1", &calls, &rows);
        assert_eq!(unified.len(), 1);

        let record = &unified[0];
        assert_eq!(record.appointment_date.as_deref(), Some("2024-03-02"));
        assert_eq!(record.appointment_time.as_deref(), Some("15:00"));
        assert_eq!(record.client_email.as_deref(), Some("sam@x.com"));
        assert_eq!(record.notes.as_deref(), Some("call back after lunch"));
        assert_eq!(record.appointment_status, AppointmentStatus::InProcess);
        assert_eq!(record.overlay_row_id.as_deref(), Some("row-c1"));
        assert_eq!(record.overlay_version, Some(3));
    }

    #[test]
    fn test_empty_overlay_fields_fall_back() {
        let calls = vec![make_call("c1")];
        let mut row = make_row("c1");
        row.appointment_date = Some("   ".to_string());
        row.client_name = None;

        let unified = reconcile("agent-1", &calls, &[row]);
        let record = &unified[0];
        assert!(record.appointment_date.is_none(), "blank date is absent");
        assert!(record.client_name.is_none());
        assert_eq!(record.appointment_time.as_deref(), Some("15:00"));
    }

    #[test]
    fn test_provider_fields_always_come_from_provider() {
        let calls = vec![make_call("c1")];
        let rows = vec![make_row("c1")];

        let record = &reconcile("agent-1", &calls, &rows)[0];
        assert_eq!(record.status, "ended");
        assert_eq!(record.started_at.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert_eq!(
            record.transcript.as_deref(),
            Some("Agent: hello, how can I help?")
        );
        assert_eq!(
            record.recording_url.as_deref(),
            Some("https://cdn.example.com/rec/c1.mp3")
        );
    }

    #[test]
    fn test_unoverlaid_call_passes_through() {
        let calls = vec![make_call("c1")];

        let record = &reconcile("agent-1", &calls, &[])[0];
        assert_eq!(record.call_id, "c1");
        assert_eq!(record.agent_id, "agent-1");
        assert_eq!(record.appointment_status, AppointmentStatus::Unset);
        assert!(record.appointment_date.is_none());
        assert!(record.overlay_row_id.is_none());
        assert!(!record.processed);
    }

    #[test]
    fn test_orphaned_overlay_rows_are_excluded() {
        let calls = vec![make_call("c1")];
        let rows = vec![make_row("c1"), make_row("purged-call")];

        let unified = reconcile("agent-1", &calls, &rows);
        assert_eq!(unified.len(), 1);
        assert_eq!(unified[0].call_id, "c1");
    }

    #[test]
    fn test_reconcile_is_deterministic() {
        let calls = vec![make_call("c1"), make_call("c2"), make_call("c3")];
        let rows = vec![make_row("c2")];

        let first = reconcile("agent-1", &calls, &rows);
        let second = reconcile("agent-1", &calls, &rows);
        assert_eq!(first, second);

        // Output order follows provider order
        let ids: Vec<&str> = first.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }
}
