//! Sequential appointment-extraction batch.
//!
//! After a reconciliation pass, the eligible subset of the unified record
//! set is drained one call at a time: extract, mark processed, persist
//! qualifying results, notify on confident detections. Strictly sequential
//! so there is never more than one extraction in flight per agent, and a
//! single record's failure stays isolated from the rest of the batch.
//!
//! Modeled as an owned batch with an epoch: a new reconciliation pass bumps
//! the session's epoch, and a superseded batch stops draining at the next
//! record boundary instead of racing the replacement batch.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use crate::call_source::parse_call_datetime;
use crate::extraction::AppointmentExtractor;
use crate::notify::{notify_appointment_detected, Notifier};
use crate::overlay::{DbError, OverlayDb, OverlayPatch};
use crate::session::SessionState;
use crate::types::{non_empty, CallRecord};

/// Results at or above this confidence produce a user-facing notification.
/// Anything below persists silently.
pub const NOTIFY_CONFIDENCE_MIN: i64 = 70;

/// Whether a unified record qualifies for automatic extraction.
///
/// Requires a transcript, no prior extraction attempt this session, and no
/// appointment fields yet. Eligibility is additionally keyed off the status
/// itself: `scheduled` and `rejected` are human decisions, and a rejected
/// row has its date/time cleared, so field-nullness alone would re-offer it
/// on the very next pass.
pub fn is_eligible(record: &CallRecord) -> bool {
    non_empty(&record.transcript).is_some()
        && !record.processed
        && record.appointment_date.is_none()
        && record.appointment_time.is_none()
        && record.appointment_status.accepts_auto_extraction()
}

/// What one batch did, for logging and diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub eligible: usize,
    pub attempted: usize,
    pub persisted: usize,
    pub notified: usize,
    pub stale_writes: usize,
    pub persist_failures: usize,
    pub superseded: bool,
}

/// Drain one batch of eligible records through the extraction service.
///
/// Every attempted record is marked processed whether or not extraction
/// produced anything, so a persistently failing transcript is not retried
/// within the session. Failures are per-record: extraction failures come
/// back as the null result, persistence failures are logged and skipped,
/// and the loop continues either way.
pub async fn process_batch(
    records: Vec<CallRecord>,
    session: Arc<SessionState>,
    db: Arc<Mutex<OverlayDb>>,
    extractor: Arc<dyn AppointmentExtractor>,
    notifier: Arc<dyn Notifier>,
    epoch: u64,
) -> BatchSummary {
    let eligible: Vec<&CallRecord> = records.iter().filter(|r| is_eligible(r)).collect();

    let mut summary = BatchSummary {
        eligible: eligible.len(),
        ..Default::default()
    };

    if eligible.is_empty() {
        return summary;
    }

    log::info!(
        "ExtractQueue: batch {} starting, {} eligible of {} records",
        epoch,
        eligible.len(),
        records.len()
    );

    for record in eligible {
        if session.current_batch() != epoch {
            log::info!("ExtractQueue: batch {} superseded, stopping", epoch);
            summary.superseded = true;
            break;
        }

        // A batch that overlapped this one may have gotten here first
        if session.is_processed(&record.call_id) {
            continue;
        }

        let transcript = match non_empty(&record.transcript) {
            Some(t) => t.to_string(),
            None => continue,
        };

        let reference_date = record
            .started_at
            .as_deref()
            .and_then(parse_call_datetime)
            .unwrap_or_else(Utc::now);

        let result = extractor.extract(&transcript, reference_date).await;

        // Processed is unconditional: failed or empty extractions must not
        // hot-loop on the same transcript within this session
        summary.attempted += 1;
        session.mark_processed(&record.call_id);
        session.update_record(&record.call_id, |r| r.processed = true);

        if !result.has_appointment_signal() {
            log::debug!("ExtractQueue: no appointment signal for {}", record.call_id);
            continue;
        }

        let patch = OverlayPatch::from_extraction(&record.call_id, &record.agent_id, &result);
        let basis = record.overlay_version;
        let db_for_write = Arc::clone(&db);

        let write = tokio::task::spawn_blocking(move || {
            let guard = db_for_write
                .lock()
                .map_err(|_| DbError::LockPoisoned)?;
            guard.upsert(&patch, basis)
        })
        .await;

        match write {
            Ok(Ok(row)) => {
                summary.persisted += 1;
                session.update_record(&record.call_id, |r| {
                    r.appointment_status = row.appointment_status;
                    r.appointment_date = row.appointment_date.clone();
                    r.appointment_time = row.appointment_time.clone();
                    r.client_name = row.client_name.clone();
                    r.client_address = row.client_address.clone();
                    r.client_email = row.client_email.clone();
                    r.overlay_row_id = Some(row.id.clone());
                    r.overlay_version = Some(row.version);
                });

                if result.confidence >= NOTIFY_CONFIDENCE_MIN {
                    notify_appointment_detected(notifier.as_ref(), record, &result);
                    summary.notified += 1;
                }

                log::info!(
                    "ExtractQueue: persisted appointment for {} (confidence {})",
                    record.call_id,
                    result.confidence
                );
            }
            Ok(Err(DbError::StaleWrite {
                stored_version,
                basis_version,
                ..
            })) => {
                // A manual edit won the race; its decision stands
                summary.stale_writes += 1;
                log::warn!(
                    "ExtractQueue: stale write for {} (stored v{}, basis v{})",
                    record.call_id,
                    stored_version,
                    basis_version
                );
            }
            Ok(Err(e)) => {
                summary.persist_failures += 1;
                log::error!(
                    "ExtractQueue: failed to persist result for {}: {}",
                    record.call_id,
                    e
                );
            }
            Err(e) => {
                summary.persist_failures += 1;
                log::warn!(
                    "ExtractQueue: persist task panicked for {}: {}",
                    record.call_id,
                    e
                );
            }
        }
    }

    log::info!(
        "ExtractQueue: batch {} done: {} attempted, {} persisted, {} notified",
        epoch,
        summary.attempted,
        summary.persisted,
        summary.notified
    );
    summary
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::OverlayDb;
    use crate::types::{AppointmentStatus, ExtractionResult};
    use chrono::DateTime;

    struct ScriptedExtractor {
        result: ExtractionResult,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExtractor {
        fn new(result: ExtractionResult) -> Self {
            Self {
                result,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl AppointmentExtractor for ScriptedExtractor {
        async fn extract(
            &self,
            transcript: &str,
            _reference_date: DateTime<Utc>,
        ) -> ExtractionResult {
            self.calls.lock().unwrap().push(transcript.to_string());
            self.result.clone()
        }
    }

    struct CountingNotifier {
        sent: Mutex<Vec<String>>,
    }

    impl CountingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, title: &str, _body: &str) -> Result<(), String> {
            self.sent.lock().unwrap().push(title.to_string());
            Ok(())
        }
    }

    fn test_db() -> Arc<Mutex<OverlayDb>> {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test_overlay.db");
        std::mem::forget(dir);
        Arc::new(Mutex::new(
            OverlayDb::open_at(path).expect("Failed to open test database"),
        ))
    }

    fn make_record(call_id: &str) -> CallRecord {
        CallRecord {
            call_id: call_id.to_string(),
            agent_id: "agent-1".to_string(),
            status: "ended".to_string(),
            started_at: Some("2024-03-01T10:00:00Z".to_string()),
            ended_at: None,
            transcript: Some(
                "Customer: I'd like to come in tomorrow at 3pm, email is sam@x.com, thanks."
                    .to_string(),
            ),
            recording_url: None,
            from_number: Some("+15550100".to_string()),
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
        }
    }

    fn confident_result() -> ExtractionResult {
        ExtractionResult {
            appointment_date: Some("2024-03-02".to_string()),
            appointment_time: Some("15:00".to_string()),
            client_email: Some("sam@x.com".to_string()),
            confidence: 82,
            ..Default::default()
        }
    }

    #[test]
    fn test_eligibility_predicate() {
        let record = make_record("c1");
        assert!(is_eligible(&record));

        let mut no_transcript = make_record("c1");
        no_transcript.transcript = None;
        assert!(!is_eligible(&no_transcript));

        let mut processed = make_record("c1");
        processed.processed = true;
        assert!(!is_eligible(&processed));

        let mut has_date = make_record("c1");
        has_date.appointment_date = Some("2024-03-02".to_string());
        assert!(!is_eligible(&has_date));

        let mut has_time = make_record("c1");
        has_time.appointment_time = Some("15:00".to_string());
        assert!(!is_eligible(&has_time));
    }

    #[test]
    fn test_rejected_record_is_not_eligible_despite_null_fields() {
        // Rejection clears date/time; the status keeps it out of the batch
        let mut rejected = make_record("c1");
        rejected.appointment_status = AppointmentStatus::Rejected;
        assert!(rejected.appointment_date.is_none());
        assert!(!is_eligible(&rejected));

        let mut scheduled = make_record("c1");
        scheduled.appointment_status = AppointmentStatus::Scheduled;
        assert!(!is_eligible(&scheduled));
    }

    #[tokio::test]
    async fn test_batch_persists_and_notifies_confident_result() {
        let session = Arc::new(SessionState::new("agent-1"));
        let db = test_db();
        let extractor = Arc::new(ScriptedExtractor::new(confident_result()));
        let notifier = Arc::new(CountingNotifier::new());

        let records = vec![make_record("c1")];
        session.set_records(records.clone());
        let epoch = session.begin_batch();

        let summary = process_batch(
            records,
            Arc::clone(&session),
            Arc::clone(&db),
            extractor.clone() as Arc<dyn AppointmentExtractor>,
            notifier.clone() as Arc<dyn Notifier>,
            epoch,
        )
        .await;

        assert_eq!(summary.eligible, 1);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.notified, 1);
        assert_eq!(notifier.count(), 1);

        // One overlay row, in-process, carrying the extracted fields
        let row = {
            let guard = db.lock().unwrap();
            let rows = guard.fetch_by_agent("agent-1").unwrap();
            assert_eq!(rows.len(), 1);
            rows[0].clone()
        };
        assert_eq!(row.call_id, "c1");
        assert_eq!(row.appointment_status, AppointmentStatus::InProcess);
        assert_eq!(row.appointment_date.as_deref(), Some("2024-03-02"));
        assert_eq!(row.appointment_time.as_deref(), Some("15:00"));
        assert_eq!(row.client_email.as_deref(), Some("sam@x.com"));

        // The unified view was updated in place
        let records = session.records();
        assert!(records[0].processed);
        assert_eq!(records[0].appointment_status, AppointmentStatus::InProcess);
        assert_eq!(records[0].overlay_row_id.as_deref(), Some(row.id.as_str()));
    }

    #[tokio::test]
    async fn test_low_confidence_persists_silently() {
        let session = Arc::new(SessionState::new("agent-1"));
        let db = test_db();
        let mut result = confident_result();
        result.confidence = 65;
        let extractor = Arc::new(ScriptedExtractor::new(result));
        let notifier = Arc::new(CountingNotifier::new());

        let epoch = session.begin_batch();
        let summary = process_batch(
            vec![make_record("c1")],
            Arc::clone(&session),
            Arc::clone(&db),
            extractor as Arc<dyn AppointmentExtractor>,
            notifier.clone() as Arc<dyn Notifier>,
            epoch,
        )
        .await;

        assert_eq!(summary.persisted, 1);
        assert_eq!(summary.notified, 0);
        assert_eq!(notifier.count(), 0);

        let guard = db.lock().unwrap();
        assert_eq!(guard.fetch_by_agent("agent-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_marks_processed_without_row() {
        let session = Arc::new(SessionState::new("agent-1"));
        let db = test_db();
        let extractor = Arc::new(ScriptedExtractor::new(ExtractionResult::default()));
        let notifier = Arc::new(CountingNotifier::new());

        let epoch = session.begin_batch();
        let summary = process_batch(
            vec![make_record("c1")],
            Arc::clone(&session),
            Arc::clone(&db),
            extractor as Arc<dyn AppointmentExtractor>,
            notifier as Arc<dyn Notifier>,
            epoch,
        )
        .await;

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.persisted, 0);
        assert!(session.is_processed("c1"));

        let guard = db.lock().unwrap();
        assert!(guard.fetch_by_agent("agent-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_processed_call_is_never_extracted_again() {
        let session = Arc::new(SessionState::new("agent-1"));
        let db = test_db();
        let extractor = Arc::new(ScriptedExtractor::new(ExtractionResult::default()));
        let notifier = Arc::new(CountingNotifier::new());

        let epoch = session.begin_batch();
        process_batch(
            vec![make_record("c1")],
            Arc::clone(&session),
            Arc::clone(&db),
            extractor.clone() as Arc<dyn AppointmentExtractor>,
            notifier.clone() as Arc<dyn Notifier>,
            epoch,
        )
        .await;
        assert_eq!(extractor.call_count(), 1);

        // Same record list again: still transcript-bearing, still
        // appointment-empty, but the session remembers the attempt
        let epoch = session.begin_batch();
        let summary = process_batch(
            vec![make_record("c1")],
            Arc::clone(&session),
            Arc::clone(&db),
            extractor.clone() as Arc<dyn AppointmentExtractor>,
            notifier as Arc<dyn Notifier>,
            epoch,
        )
        .await;

        assert_eq!(extractor.call_count(), 1, "no second extraction for c1");
        assert_eq!(summary.attempted, 0);
    }

    #[tokio::test]
    async fn test_superseded_batch_stops_draining() {
        let session = Arc::new(SessionState::new("agent-1"));
        let db = test_db();
        let extractor = Arc::new(ScriptedExtractor::new(confident_result()));
        let notifier = Arc::new(CountingNotifier::new());

        let stale_epoch = session.begin_batch();
        session.begin_batch();

        let summary = process_batch(
            vec![make_record("c1"), make_record("c2")],
            Arc::clone(&session),
            Arc::clone(&db),
            extractor.clone() as Arc<dyn AppointmentExtractor>,
            notifier as Arc<dyn Notifier>,
            stale_epoch,
        )
        .await;

        assert!(summary.superseded);
        assert_eq!(summary.attempted, 0);
        assert_eq!(extractor.call_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_continues_past_stale_write() {
        let session = Arc::new(SessionState::new("agent-1"));
        let db = test_db();
        let extractor = Arc::new(ScriptedExtractor::new(confident_result()));
        let notifier = Arc::new(CountingNotifier::new());

        // c1's row moves ahead of the batch's basis before the batch writes
        let mut stale = make_record("c1");
        stale.overlay_version = Some(1);
        {
            let guard = db.lock().unwrap();
            let patch = OverlayPatch {
                call_id: "c1".to_string(),
                agent_id: "agent-1".to_string(),
                notes: Some("first write".to_string()),
                ..Default::default()
            };
            guard.upsert(&patch, None).unwrap();
            let patch = OverlayPatch {
                notes: Some("manual edit".to_string()),
                ..patch
            };
            guard.upsert(&patch, None).unwrap();
        }

        let epoch = session.begin_batch();
        let summary = process_batch(
            vec![stale, make_record("c2")],
            Arc::clone(&session),
            Arc::clone(&db),
            extractor.clone() as Arc<dyn AppointmentExtractor>,
            notifier as Arc<dyn Notifier>,
            epoch,
        )
        .await;

        assert_eq!(summary.stale_writes, 1);
        assert_eq!(summary.persisted, 1, "c2 still went through");
        assert_eq!(extractor.call_count(), 2);
        assert!(session.is_processed("c1"), "stale write still marks processed");
    }
}
