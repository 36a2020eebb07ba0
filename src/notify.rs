//! Notification seam.
//!
//! Presentation (toasts, tray badges) belongs to the dashboard shell; the
//! core only decides *when* something is worth telling the operator and
//! hands over a title/body pair. `LogNotifier` is the headless default.

use crate::types::{CallRecord, ExtractionResult};

/// Sink for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str) -> Result<(), String>;
}

/// Default notifier for headless use: notifications land in the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        log::info!("Notify: {} - {}", title, body);
        Ok(())
    }
}

/// Announce newly arrived calls after a reconciliation pass.
pub fn notify_new_calls(notifier: &dyn Notifier, count: usize) {
    let body = if count == 1 {
        "1 new call has arrived.".to_string()
    } else {
        format!("{count} new calls have arrived.")
    };
    if let Err(e) = notifier.notify("New calls", &body) {
        log::warn!("Notify: failed to send new-call notification: {}", e);
    }
}

/// Announce a confident appointment detection for one call.
pub fn notify_appointment_detected(
    notifier: &dyn Notifier,
    record: &CallRecord,
    result: &ExtractionResult,
) {
    let caller = record
        .from_number
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown number");

    let mut body = format!("Possible appointment from {caller}");
    match (&result.appointment_date, &result.appointment_time) {
        (Some(date), Some(time)) => body.push_str(&format!(": {date} at {time}")),
        (Some(date), None) => body.push_str(&format!(": {date}")),
        (None, Some(time)) => body.push_str(&format!(" at {time}")),
        (None, None) => {}
    }
    body.push('.');

    if let Err(e) = notifier.notify("Appointment detected", &body) {
        log::warn!(
            "Notify: failed to send appointment notification for {}: {}",
            record.call_id,
            e
        );
    }
}
