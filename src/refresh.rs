//! The reconciliation pass: fetch, merge, detect, dispatch.
//!
//! One pass fetches the provider snapshot and the overlay rows (both
//! read-only, issued concurrently), merges them into the unified record
//! set, classifies new arrivals against the session's known set, then hands
//! the merged set to the extraction batch as a spawned task. A failed fetch
//! aborts the pass and leaves the previous unified state untouched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::call_merge::reconcile;
use crate::call_source::CallSource;
use crate::error::{PassError, SurfacedError};
use crate::extract_queue::{process_batch, BatchSummary};
use crate::extraction::AppointmentExtractor;
use crate::notify::{notify_new_calls, Notifier};
use crate::overlay::{DbError, OverlayDb, OverlayRow};
use crate::session::SessionState;
use crate::types::{is_feature_enabled, CallRecord, Config};

/// Everything a refresh pass needs, wired once at startup (or per dashboard
/// tab) and shared across passes.
pub struct RefreshEnv {
    pub config: Config,
    pub session: Arc<SessionState>,
    pub db: Arc<Mutex<OverlayDb>>,
    pub source: Arc<dyn CallSource>,
    pub extractor: Arc<dyn AppointmentExtractor>,
    pub notifier: Arc<dyn Notifier>,
}

/// Result of one refresh pass, shaped for the dashboard shell.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RefreshResult {
    #[serde(rename_all = "camelCase")]
    Completed {
        records: Vec<CallRecord>,
        new_call_ids: Vec<String>,
    },
    /// The pass was throttled by the minimum-interval gate; nothing ran and
    /// nothing was queued.
    Throttled,
    #[serde(rename_all = "camelCase")]
    Failed { error: SurfacedError },
}

/// A refresh result plus the handle of the extraction batch it spawned.
///
/// The dashboard ignores `batch` (fire-and-forget); the one-shot binary
/// joins it so the process does not exit mid-batch.
pub struct RefreshOutcome {
    pub result: RefreshResult,
    pub batch: Option<tokio::task::JoinHandle<BatchSummary>>,
}

/// Run one fetch-merge-detect-dispatch cycle for the session's agent.
pub async fn run_refresh(env: &RefreshEnv) -> RefreshOutcome {
    let agent_id = env.session.agent_id.clone();

    let min_interval = Duration::from_secs(env.config.min_refresh_interval_secs);
    if !env.session.try_begin_refresh(min_interval) {
        log::debug!("Refresh: throttled for agent {agent_id}");
        return RefreshOutcome {
            result: RefreshResult::Throttled,
            batch: None,
        };
    }

    // Both fetches are read-only and commute; issue them together and
    // merge only after both resolve
    let overlay_db = Arc::clone(&env.db);
    let overlay_agent = agent_id.clone();
    let overlay_task =
        tokio::task::spawn_blocking(move || -> Result<Vec<OverlayRow>, DbError> {
            let guard = overlay_db.lock().map_err(|_| DbError::LockPoisoned)?;
            guard.fetch_by_agent(&overlay_agent)
        });

    let (provider_result, overlay_result) = tokio::join!(
        env.source.fetch_calls(&agent_id, env.config.call_fetch_limit),
        overlay_task
    );

    let provider = match provider_result {
        Ok(calls) => calls,
        Err(e) => return fail(&agent_id, PassError::Source(e)),
    };
    let overlay = match overlay_result {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => return fail(&agent_id, PassError::Db(e)),
        Err(e) => return fail(&agent_id, PassError::Internal(e.to_string())),
    };

    let mut merged = reconcile(&agent_id, &provider, &overlay);
    env.session.apply_processed(&mut merged);

    let current_ids: HashSet<String> = merged.iter().map(|r| r.call_id.clone()).collect();
    let new_ids = env.session.observe_calls(&current_ids);
    if !new_ids.is_empty() {
        notify_new_calls(env.notifier.as_ref(), new_ids.len());
    }

    env.session.set_records(merged.clone());

    let batch = if is_feature_enabled(&env.config, "autoExtraction") {
        let epoch = env.session.begin_batch();
        Some(tokio::spawn(process_batch(
            merged.clone(),
            Arc::clone(&env.session),
            Arc::clone(&env.db),
            Arc::clone(&env.extractor),
            Arc::clone(&env.notifier),
            epoch,
        )))
    } else {
        log::debug!("Refresh: automatic extraction disabled for agent {agent_id}");
        None
    };

    log::info!(
        "Refresh: merged {} records for agent {} ({} new)",
        merged.len(),
        agent_id,
        new_ids.len()
    );

    let mut new_call_ids: Vec<String> = new_ids.into_iter().collect();
    new_call_ids.sort();

    RefreshOutcome {
        result: RefreshResult::Completed {
            records: merged,
            new_call_ids,
        },
        batch,
    }
}

fn fail(agent_id: &str, err: PassError) -> RefreshOutcome {
    log::error!("Refresh: pass aborted for agent {agent_id}: {err}");
    RefreshOutcome {
        result: RefreshResult::Failed {
            error: SurfacedError::from(&err),
        },
        batch: None,
    }
}

// =============================================================================
// Tests
// =============================================================================
